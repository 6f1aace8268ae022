// crates/az-scout-core/src/runtime/broker.rs
// ============================================================================
// Module: Token Broker
// Description: Per-request credential routing, caching, and exchange coordination.
// Purpose: Resolve the downstream token a principal presents to the control plane.
// Dependencies: crate::{core, interfaces, runtime::cache, runtime::retry}, parking_lot, tokio
// ============================================================================

//! ## Overview
//! The broker decides which route a principal's token comes from, serves it
//! from the [`CredentialCache`] when possible, and otherwise performs exactly
//! one exchange per cache key at a time.
//!
//! Routing is a strict function of principal kind and configuration:
//! delegated principals use On-Behalf-Of whenever delegated credentials are
//! configured, and everything else uses the platform identity. A delegated
//! exchange that fails is reported as an error and is never retried through
//! the platform identity, which could see subscriptions the caller cannot.
//!
//! Platform tokens do not depend on the caller's tenant, so every platform
//! acquisition shares one cache key per audience regardless of the tenant a
//! caller names.
//!
//! Security posture: the broker never logs token material. Recent consent
//! failures are remembered briefly so a caller who must re-authenticate does
//! not trigger repeated exchanges.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use crate::core::AccessToken;
use crate::core::AcquisitionRoute;
use crate::core::Audience;
use crate::core::CallerAssertion;
use crate::core::PLATFORM_SUBJECT;
use crate::core::Principal;
use crate::core::PrincipalKind;
use crate::core::SubjectId;
use crate::core::TenantId;
use crate::interfaces::ExchangedToken;
use crate::interfaces::TokenError;
use crate::interfaces::TokenExchanger;
use crate::runtime::cache::CacheKey;
use crate::runtime::cache::CachedToken;
use crate::runtime::cache::CredentialCache;
use crate::runtime::retry::RetryPolicy;
use crate::runtime::retry::with_retry;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Tenant used in cache keys and authorities when nothing more specific is known.
pub const FALLBACK_TENANT: &str = "organizations";

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Broker tuning parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Tenant whose authority performs exchanges when no override is given.
    pub home_tenant: Option<TenantId>,
    /// Subtracted from provider-stated lifetimes before caching.
    pub expiry_skew: Duration,
    /// How long a consent failure is served from memory. Zero disables.
    pub consent_negative_ttl: Duration,
    /// Retry policy for transient exchange failures.
    pub retry: RetryPolicy,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            home_tenant: None,
            expiry_skew: Duration::from_secs(60),
            consent_negative_ttl: Duration::from_secs(30),
            retry: RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(200),
                max_backoff: Duration::from_secs(2),
                max_total_wait: Duration::from_secs(5),
            },
        }
    }
}

// ============================================================================
// SECTION: Broker
// ============================================================================

/// Remembered consent failure.
struct ConsentDenial {
    /// Instant after which the denial is forgotten.
    until: OffsetDateTime,
    /// Sanitized provider detail.
    detail: String,
}

/// Per-request token broker.
///
/// # Invariants
/// - At most one exchange is in flight per cache key.
/// - A failed exchange leaves no cache entry for its key.
pub struct TokenBroker {
    /// Identity provider used for exchanges.
    exchanger: Arc<dyn TokenExchanger>,
    /// Shared credential cache.
    cache: Arc<CredentialCache>,
    /// Broker configuration.
    config: BrokerConfig,
    /// Singleflight guards keyed by cache key.
    inflight: Mutex<HashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>>,
    /// Recent consent failures keyed by cache key.
    denials: Mutex<HashMap<CacheKey, ConsentDenial>>,
}

impl TokenBroker {
    /// Creates a broker over `exchanger` and a shared `cache`.
    #[must_use]
    pub fn new(
        exchanger: Arc<dyn TokenExchanger>,
        cache: Arc<CredentialCache>,
        config: BrokerConfig,
    ) -> Self {
        Self {
            exchanger,
            cache,
            config,
            inflight: Mutex::new(HashMap::new()),
            denials: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true when delegated credentials are configured.
    #[must_use]
    pub fn delegated_enabled(&self) -> bool {
        self.exchanger.delegated_enabled()
    }

    /// Returns the number of remembered consent failures.
    #[must_use]
    pub fn remembered_denials(&self) -> usize {
        self.denials.lock().len()
    }

    /// Returns the shared credential cache.
    #[must_use]
    pub const fn cache(&self) -> &Arc<CredentialCache> {
        &self.cache
    }

    /// Selects the acquisition route for `principal`.
    #[must_use]
    pub fn route_for(&self, principal: &Principal) -> AcquisitionRoute {
        match (principal.kind(), self.delegated_enabled()) {
            (PrincipalKind::Delegated, true) => AcquisitionRoute::OnBehalfOf,
            (PrincipalKind::Delegated, false) | (PrincipalKind::Platform, _) => {
                AcquisitionRoute::Platform
            }
        }
    }

    /// Acquires a token for `principal` scoped to `audience`.
    ///
    /// `tenant_override` selects a different authority for an On-Behalf-Of
    /// exchange and is ignored on the platform route.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError`] when the route is unusable or the exchange fails.
    /// A cancelled acquisition reports [`TokenError::Transient`].
    pub async fn acquire(
        &self,
        principal: &Principal,
        assertion: Option<&CallerAssertion>,
        audience: &Audience,
        tenant_override: Option<&TenantId>,
        cancel: &CancellationToken,
    ) -> Result<AccessToken, TokenError> {
        let route = self.route_for(principal);
        let assertion = match route {
            AcquisitionRoute::OnBehalfOf => Some(assertion.ok_or_else(|| {
                TokenError::InvalidCaller("delegated request carries no assertion".to_string())
            })?),
            AcquisitionRoute::Platform => None,
        };
        let key = self.cache_key(principal, route, audience, tenant_override);

        if let Some(token) = self.lookup(&key)? {
            return Ok(token);
        }
        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        let guard = self.flow_guard(&key);
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(cancelled()),
            result = async {
                let _flow = guard.lock().await;
                match self.lookup(&key) {
                    Ok(Some(token)) => Ok(token),
                    Err(err) => Err(err),
                    Ok(None) => self.exchange(&key, route, assertion, audience, cancel).await,
                }
            } => result,
        };
        self.release_flow_guard(&key, &guard);
        result
    }

    /// Checks the negative cache and then the credential cache.
    fn lookup(&self, key: &CacheKey) -> Result<Option<AccessToken>, TokenError> {
        let now = OffsetDateTime::now_utc();
        {
            let mut denials = self.denials.lock();
            match denials.get(key).map(|denial| (now < denial.until, denial.detail.clone())) {
                Some((true, detail)) => return Err(TokenError::ConsentRequired(detail)),
                Some((false, _)) => {
                    denials.remove(key);
                }
                None => {}
            }
        }
        Ok(self.cache.get_at(key, now).map(|entry| entry.access_token()))
    }

    /// Performs the exchange and records its outcome.
    async fn exchange(
        &self,
        key: &CacheKey,
        route: AcquisitionRoute,
        assertion: Option<&CallerAssertion>,
        audience: &Audience,
        cancel: &CancellationToken,
    ) -> Result<AccessToken, TokenError> {
        let exchanger = &self.exchanger;
        let tenant = &key.tenant;
        let attempt = move || async move {
            match (route, assertion) {
                (AcquisitionRoute::OnBehalfOf, Some(assertion)) => {
                    exchanger.exchange_on_behalf_of(assertion, tenant, audience).await
                }
                (AcquisitionRoute::OnBehalfOf, None) => Err(TokenError::InvalidCaller(
                    "delegated request carries no assertion".to_string(),
                )),
                (AcquisitionRoute::Platform, _) => exchanger.acquire_platform(audience).await,
            }
        };
        let outcome = with_retry(
            &self.config.retry,
            "token_exchange",
            cancel,
            TokenError::is_transient,
            attempt,
        )
        .await;

        match outcome {
            Ok(exchanged) => Ok(self.store(key, route, exchanged)),
            Err(err) => {
                self.cache.invalidate(key);
                if let TokenError::ConsentRequired(detail) = &err {
                    self.remember_denial(key, detail);
                }
                tracing::warn!(
                    route = route.label(),
                    tenant = %key.tenant,
                    audience = %key.audience,
                    error = err.label(),
                    "token acquisition failed"
                );
                Err(err)
            }
        }
    }

    /// Caches an exchanged token and returns it.
    fn store(&self, key: &CacheKey, route: AcquisitionRoute, exchanged: ExchangedToken) -> AccessToken {
        let now = OffsetDateTime::now_utc();
        let lifetime = exchanged.expires_in;
        let Some(cacheable) = lifetime.checked_sub(self.config.expiry_skew).filter(|d| !d.is_zero())
        else {
            tracing::debug!(
                route = route.label(),
                lifetime_secs = lifetime.as_secs(),
                "token lifetime within expiry skew; not cached"
            );
            return AccessToken::new(exchanged.token, now + lifetime, route);
        };
        let entry = CachedToken {
            key: key.clone(),
            token: exchanged.token,
            expires_at: now + cacheable,
            acquired_via: route,
        };
        let token = entry.access_token();
        self.cache.put(entry);
        tracing::debug!(
            route = route.label(),
            tenant = %key.tenant,
            audience = %key.audience,
            "token cached"
        );
        token
    }

    /// Records a consent failure for the negative-cache window.
    fn remember_denial(&self, key: &CacheKey, detail: &str) {
        if self.config.consent_negative_ttl.is_zero() {
            return;
        }
        let now = OffsetDateTime::now_utc();
        let until = now + self.config.consent_negative_ttl;
        let mut denials = self.denials.lock();
        denials.retain(|_, denial| now < denial.until);
        denials.insert(
            key.clone(),
            ConsentDenial {
                until,
                detail: detail.to_string(),
            },
        );
    }

    /// Builds the cache key for a route.
    fn cache_key(
        &self,
        principal: &Principal,
        route: AcquisitionRoute,
        audience: &Audience,
        tenant_override: Option<&TenantId>,
    ) -> CacheKey {
        let (subject, tenant) = match route {
            AcquisitionRoute::OnBehalfOf => (
                principal.subject_id().clone(),
                tenant_override
                    .or(self.config.home_tenant.as_ref())
                    .or_else(|| principal.tenant_id())
                    .cloned(),
            ),
            AcquisitionRoute::Platform => {
                (SubjectId::new(PLATFORM_SUBJECT), self.config.home_tenant.clone())
            }
        };
        let tenant = tenant.unwrap_or_else(|| TenantId::new(FALLBACK_TENANT));
        CacheKey {
            subject,
            tenant,
            audience: audience.clone(),
        }
    }

    /// Returns the singleflight guard for `key`, creating it if needed.
    fn flow_guard(&self, key: &CacheKey) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.inflight.lock().entry(key.clone()).or_default())
    }

    /// Drops the guard entry once no other acquisition is waiting on it.
    fn release_flow_guard(&self, key: &CacheKey, guard: &Arc<tokio::sync::Mutex<()>>) {
        let mut inflight = self.inflight.lock();
        let idle = inflight
            .get(key)
            .is_some_and(|entry| Arc::ptr_eq(entry, guard) && Arc::strong_count(entry) <= 2);
        if idle {
            inflight.remove(key);
        }
    }
}

/// Error reported when the request is cancelled before a token is available.
fn cancelled() -> TokenError {
    TokenError::Transient("token acquisition cancelled".to_string())
}

impl fmt::Debug for TokenBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBroker")
            .field("cache", &self.cache)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
