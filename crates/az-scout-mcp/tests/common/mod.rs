// crates/az-scout-mcp/tests/common/mod.rs
// ============================================================================
// Module: MCP Test Fixtures
// Description: Fakes and builders for server, tool, and proxy tests.
// ============================================================================
//! ## Overview
//! In-memory identity provider, ARM probe, audit sink, and provider token
//! client. Builders assemble a [`ToolRouter`] and [`McpServer`] over them so
//! tests exercise the real dispatch path without network access.

#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Shared fixtures are not used by every test binary."
)]

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use az_scout_config::AzScoutConfig;
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
use az_scout_core::ScanCoordinator;
use az_scout_core::ScanCoordinatorConfig;
use az_scout_core::ScanOptions;
use az_scout_core::ScanTarget;
use az_scout_core::SubscriptionId;
use az_scout_core::SubscriptionInfo;
use az_scout_core::TenantId;
use az_scout_core::TokenBroker;
use az_scout_core::TokenError;
use az_scout_core::TokenExchanger;
use az_scout_mcp::AuditEvent;
use az_scout_mcp::AuditSink;
use az_scout_mcp::McpServer;
use az_scout_mcp::ScanDefaults;
use az_scout_mcp::ToolRouter;
use az_scout_mcp::oauth_proxy::ProviderGrant;
use az_scout_mcp::oauth_proxy::ProviderTokenClient;
use az_scout_mcp::oauth_proxy::ProviderTokenResponse;
use az_scout_mcp::ProxyError;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use parking_lot::Mutex;
use secrecy::ExposeSecret;
use secrecy::SecretString;
use serde_json::json;
use tokio_util::sync::CancellationToken;

// ============================================================================
// SECTION: Identity Provider
// ============================================================================

/// Fake identity provider with a fixed outcome.
pub struct FakeExchanger {
    pub delegated: bool,
    pub outcome: Result<(), TokenError>,
    pub obo_calls: AtomicUsize,
    pub platform_calls: AtomicUsize,
    pub tenants: Mutex<Vec<String>>,
}

impl FakeExchanger {
    pub fn issuing(delegated: bool) -> Self {
        Self::with_outcome(delegated, Ok(()))
    }

    pub fn failing(delegated: bool, error: TokenError) -> Self {
        Self::with_outcome(delegated, Err(error))
    }

    fn with_outcome(delegated: bool, outcome: Result<(), TokenError>) -> Self {
        Self {
            delegated,
            outcome,
            obo_calls: AtomicUsize::new(0),
            platform_calls: AtomicUsize::new(0),
            tenants: Mutex::new(Vec::new()),
        }
    }

    pub fn obo(&self) -> usize {
        self.obo_calls.load(Ordering::SeqCst)
    }

    pub fn platform(&self) -> usize {
        self.platform_calls.load(Ordering::SeqCst)
    }

    fn issue(&self, label: &str) -> Result<ExchangedToken, TokenError> {
        self.outcome.clone().map(|()| ExchangedToken {
            token: SecretString::new(format!("{label}-token").into_boxed_str()),
            expires_in: Duration::from_secs(3600),
        })
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
        self.tenants.lock().push(tenant.to_string());
        self.issue("obo")
    }

    async fn acquire_platform(&self, _audience: &Audience) -> Result<ExchangedToken, TokenError> {
        self.platform_calls.fetch_add(1, Ordering::SeqCst);
        self.issue("platform")
    }
}

// ============================================================================
// SECTION: Resource Probe
// ============================================================================

/// Fake ARM probe; subscriptions named `denied-*` answer 403.
#[derive(Default)]
pub struct FakeProbe {
    pub calls: AtomicUsize,
    pub tokens_seen: Mutex<Vec<String>>,
}

impl FakeProbe {
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
        if target.subscription_id.as_str().starts_with("denied-") {
            return Err(ProbeError::Unauthorized {
                subscription: target.subscription_id.clone(),
            });
        }
        Ok(RegionCapacity {
            usages: vec![QuotaUsage {
                name: "cores".to_string(),
                localized_name: "Total Regional vCPUs".to_string(),
                current_value: 4,
                limit: 100,
                unit: "Count".to_string(),
            }],
            skus: Vec::new(),
        })
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

// ============================================================================
// SECTION: Audit
// ============================================================================

/// Audit sink that keeps every event.
#[derive(Default)]
pub struct RecordingAuditSink {
    pub events: Mutex<Vec<AuditEvent>>,
}

impl AuditSink for RecordingAuditSink {
    fn record(&self, event: &AuditEvent) {
        self.events.lock().push(event.clone());
    }
}

impl RecordingAuditSink {
    pub fn decisions(&self) -> Vec<(&'static str, String)> {
        self.events.lock().iter().map(|event| (event.decision, event.action.clone())).collect()
    }
}

// ============================================================================
// SECTION: Builders
// ============================================================================

/// Assembled server under test.
pub struct Harness {
    pub server: McpServer,
    pub exchanger: Arc<FakeExchanger>,
    pub probe: Arc<FakeProbe>,
    pub audit: Arc<RecordingAuditSink>,
}

/// Builds a server over the fakes with default scan targets.
pub fn harness(exchanger: FakeExchanger) -> Harness {
    harness_with_subscriptions(exchanger, &["sub-1", "sub-2"])
}

/// Builds a server whose configured scan subscriptions are `subscriptions`.
pub fn harness_with_subscriptions(exchanger: FakeExchanger, subscriptions: &[&str]) -> Harness {
    let exchanger = Arc::new(exchanger);
    let probe = Arc::new(FakeProbe::default());
    let audit = Arc::new(RecordingAuditSink::default());
    let broker = Arc::new(TokenBroker::new(
        Arc::clone(&exchanger) as Arc<dyn TokenExchanger>,
        Arc::new(CredentialCache::new()),
        BrokerConfig {
            home_tenant: Some(TenantId::new("home-tenant")),
            ..BrokerConfig::default()
        },
    ));
    let coordinator = Arc::new(ScanCoordinator::new(
        broker,
        Arc::clone(&probe) as Arc<dyn ResourceProbe>,
        ScanCoordinatorConfig::default(),
    ));
    let router = ToolRouter::new(
        coordinator,
        ScanDefaults {
            subscriptions: subscriptions.iter().map(ToString::to_string).collect(),
            regions: vec!["westeurope".to_string()],
            include_skus: false,
        },
        Arc::clone(&audit) as Arc<dyn AuditSink>,
    );
    let server = McpServer::with_router(AzScoutConfig::default(), router, None);
    Harness {
        server,
        exchanger,
        probe,
        audit,
    }
}

/// Unsigned JWT carrying `payload`.
pub fn jwt(payload: &serde_json::Value) -> String {
    format!("e30.{}.sig", URL_SAFE_NO_PAD.encode(payload.to_string()))
}

/// JWT for a signed-in user.
pub fn user_token(oid: &str, tid: &str) -> String {
    jwt(&json!({"oid": oid, "tid": tid}))
}

// ============================================================================
// SECTION: Provider Token Client
// ============================================================================

/// Recorded provider redemption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redeemed {
    Code {
        code: String,
        verifier: String,
        redirect_uri: String,
    },
    Refresh {
        refresh_token: String,
    },
}

/// Fake provider token endpoint.
#[derive(Default)]
pub struct FakeProviderClient {
    pub redeemed: Mutex<Vec<Redeemed>>,
}

#[async_trait]
impl ProviderTokenClient for FakeProviderClient {
    async fn redeem(&self, grant: ProviderGrant) -> Result<ProviderTokenResponse, ProxyError> {
        let record = match grant {
            ProviderGrant::AuthorizationCode {
                code,
                code_verifier,
                redirect_uri,
                ..
            } => Redeemed::Code {
                code: code.expose_secret().to_string(),
                verifier: code_verifier,
                redirect_uri,
            },
            ProviderGrant::RefreshToken {
                refresh_token,
                ..
            } => Redeemed::Refresh {
                refresh_token: refresh_token.expose_secret().to_string(),
            },
        };
        self.redeemed.lock().push(record);
        Ok(ProviderTokenResponse {
            status: 200,
            body: json!({"access_token": "issued", "token_type": "Bearer", "expires_in": 3600}),
        })
    }
}
