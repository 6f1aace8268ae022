// crates/az-scout-core/tests/common/mod.rs
// ============================================================================
// Module: Core Test Fakes
// Description: Scripted token exchanger and resource probe fakes.
// ============================================================================
//! ## Overview
//! Deterministic fakes for broker and coordinator tests. Fakes count calls so
//! tests can assert how many exchanges and probes a scenario performed.

#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Shared fixtures are not used by every test binary."
)]

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use az_scout_core::AccessToken;
use az_scout_core::Audience;
use az_scout_core::BrokerConfig;
use az_scout_core::CallerAssertion;
use az_scout_core::CredentialCache;
use az_scout_core::ExchangedToken;
use az_scout_core::ProbeError;
use az_scout_core::QuotaUsage;
use az_scout_core::RegionCapacity;
use az_scout_core::ResourceProbe;
use az_scout_core::RetryPolicy;
use az_scout_core::ScanOptions;
use az_scout_core::ScanTarget;
use az_scout_core::SubscriptionId;
use az_scout_core::SubscriptionInfo;
use az_scout_core::TenantId;
use az_scout_core::TokenBroker;
use az_scout_core::TokenError;
use az_scout_core::TokenExchanger;
use parking_lot::Mutex;
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;

// ============================================================================
// SECTION: Token Exchanger
// ============================================================================

/// Scripted exchange outcome.
#[derive(Debug, Clone)]
pub enum Exchange {
    /// Issue a token with the given lifetime.
    Issue(Duration),
    /// Fail with the given error.
    Fail(TokenError),
}

/// Fake identity provider.
pub struct FakeExchanger {
    pub delegated: bool,
    pub delay: Duration,
    script: Mutex<VecDeque<Exchange>>,
    fallback: Exchange,
    pub obo_calls: AtomicUsize,
    pub platform_calls: AtomicUsize,
    pub tenants: Mutex<Vec<TenantId>>,
}

impl FakeExchanger {
    /// Exchanger that always issues one-hour tokens.
    pub fn issuing(delegated: bool) -> Self {
        Self::scripted(delegated, Vec::new(), Exchange::Issue(Duration::from_secs(3600)))
    }

    /// Exchanger that plays `script` and then repeats `fallback`.
    pub fn scripted(delegated: bool, script: Vec<Exchange>, fallback: Exchange) -> Self {
        Self {
            delegated,
            delay: Duration::ZERO,
            script: Mutex::new(script.into()),
            fallback,
            obo_calls: AtomicUsize::new(0),
            platform_calls: AtomicUsize::new(0),
            tenants: Mutex::new(Vec::new()),
        }
    }

    /// Adds latency to every exchange.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn obo(&self) -> usize {
        self.obo_calls.load(Ordering::SeqCst)
    }

    pub fn platform(&self) -> usize {
        self.platform_calls.load(Ordering::SeqCst)
    }

    async fn next(&self, label: &str) -> Result<ExchangedToken, TokenError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let step = self.script.lock().pop_front().unwrap_or_else(|| self.fallback.clone());
        match step {
            Exchange::Issue(expires_in) => Ok(ExchangedToken {
                token: SecretString::new(format!("{label}-token").into_boxed_str()),
                expires_in,
            }),
            Exchange::Fail(err) => Err(err),
        }
    }
}

#[async_trait]
impl TokenExchanger for FakeExchanger {
    fn delegated_enabled(&self) -> bool {
        self.delegated
    }

    async fn exchange_on_behalf_of(
        &self,
        _assertion: &CallerAssertion,
        tenant: &TenantId,
        _audience: &Audience,
    ) -> Result<ExchangedToken, TokenError> {
        self.obo_calls.fetch_add(1, Ordering::SeqCst);
        self.tenants.lock().push(tenant.clone());
        self.next("obo").await
    }

    async fn acquire_platform(&self, _audience: &Audience) -> Result<ExchangedToken, TokenError> {
        self.platform_calls.fetch_add(1, Ordering::SeqCst);
        self.next("platform").await
    }
}

/// Broker config with fast retries for tests.
pub fn fast_broker_config() -> BrokerConfig {
    BrokerConfig {
        home_tenant: Some(TenantId::new("home-tenant")),
        retry: RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            max_total_wait: Duration::from_millis(100),
        },
        ..BrokerConfig::default()
    }
}

/// Builds a broker over `exchanger` with a fresh cache.
pub fn broker(exchanger: Arc<FakeExchanger>, config: BrokerConfig) -> Arc<TokenBroker> {
    Arc::new(TokenBroker::new(exchanger, Arc::new(CredentialCache::new()), config))
}

// ============================================================================
// SECTION: Resource Probe
// ============================================================================

/// Scripted per-subscription probe behavior.
#[derive(Debug, Clone)]
pub enum ProbeBehavior {
    /// Return one usage entry named after the target.
    Succeed,
    /// Return an unauthorized failure.
    Unauthorized,
    /// Sleep for the given duration, ignoring cancellation, then succeed.
    Stall(Duration),
}

/// Fake ARM probe.
pub struct FakeProbe {
    behaviors: HashMap<String, ProbeBehavior>,
    default: ProbeBehavior,
    pub delay: Duration,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub tokens_seen: Mutex<Vec<String>>,
}

impl FakeProbe {
    pub fn new(default: ProbeBehavior) -> Self {
        Self {
            behaviors: HashMap::new(),
            default,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            tokens_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with(mut self, subscription: &str, behavior: ProbeBehavior) -> Self {
        self.behaviors.insert(subscription.to_string(), behavior);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceProbe for FakeProbe {
    async fn probe(
        &self,
        target: &ScanTarget,
        token: &AccessToken,
        _options: &ScanOptions,
        _cancel: &CancellationToken,
    ) -> Result<RegionCapacity, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.tokens_seen.lock().push(token.expose().to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let behavior = self
            .behaviors
            .get(target.subscription_id.as_str())
            .cloned()
            .unwrap_or_else(|| self.default.clone());
        let outcome = match behavior {
            ProbeBehavior::Succeed => Ok(capacity_for(target)),
            ProbeBehavior::Unauthorized => Err(ProbeError::Unauthorized {
                subscription: target.subscription_id.clone(),
            }),
            ProbeBehavior::Stall(duration) => {
                tokio::time::sleep(duration).await;
                Ok(capacity_for(target))
            }
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    async fn list_subscriptions(
        &self,
        _token: &AccessToken,
        _cancel: &CancellationToken,
    ) -> Result<Vec<SubscriptionInfo>, ProbeError> {
        Ok(vec![SubscriptionInfo {
            subscription_id: SubscriptionId::new("sub-1"),
            display_name: "Sub One".to_string(),
            state: "Enabled".to_string(),
            tenant_id: Some(TenantId::new("home-tenant")),
        }])
    }
}

/// Capacity payload identifying its target.
pub fn capacity_for(target: &ScanTarget) -> RegionCapacity {
    RegionCapacity {
        usages: vec![QuotaUsage {
            name: format!("{}-{}", target.subscription_id, target.region),
            localized_name: "Total Regional vCPUs".to_string(),
            current_value: 4,
            limit: 100,
            unit: "Count".to_string(),
        }],
        skus: Vec::new(),
    }
}
