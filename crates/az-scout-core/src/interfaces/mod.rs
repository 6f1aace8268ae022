// crates/az-scout-core/src/interfaces/mod.rs
// ============================================================================
// Module: az-scout Interfaces
// Description: Backend-agnostic seams for token exchange and resource probing.
// Purpose: Define the contract surfaces used by the az-scout runtime.
// Dependencies: crate::core, async-trait, secrecy, tokio-util
// ============================================================================

//! ## Overview
//! Interfaces keep the broker and coordinator independent of Entra ID and ARM
//! transport details. Production implementations live in `az-scout-providers`;
//! tests substitute in-memory fakes. Implementations must fail closed and must
//! never place token material in error details.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::core::AccessToken;
use crate::core::Audience;
use crate::core::CallerAssertion;
use crate::core::FailureKind;
use crate::core::RegionCapacity;
use crate::core::ScanOptions;
use crate::core::ScanResult;
use crate::core::ScanTarget;
use crate::core::SubscriptionId;
use crate::core::SubscriptionInfo;
use crate::core::TenantId;

// ============================================================================
// SECTION: Token Exchange
// ============================================================================

/// Token returned by an identity provider exchange.
#[derive(Debug, Clone)]
pub struct ExchangedToken {
    /// Raw access token.
    pub token: SecretString,
    /// Provider-stated lifetime, measured from the moment of the response.
    pub expires_in: Duration,
}

/// Token acquisition failures.
///
/// # Invariants
/// - Detail strings are sanitized: provider error codes only, never tokens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// The caller must re-authenticate interactively or grant consent.
    #[error("consent required: {0}")]
    ConsentRequired(String),
    /// The inbound assertion is malformed, expired, or rejected.
    #[error("invalid caller: {0}")]
    InvalidCaller(String),
    /// Network or provider-side failure that may succeed on retry.
    #[error("transient token failure: {0}")]
    Transient(String),
    /// The requested route has no credentials configured.
    #[error("identity not configured: {0}")]
    NotConfigured(String),
}

impl TokenError {
    /// Returns true when a bounded retry may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Returns true when the failure concerns the whole request rather than
    /// one unit of work.
    #[must_use]
    pub const fn is_request_scoped(&self) -> bool {
        !self.is_transient()
    }

    /// Returns a stable label for logs and audit events.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::ConsentRequired(_) => "consent_required",
            Self::InvalidCaller(_) => "invalid_caller",
            Self::Transient(_) => "transient",
            Self::NotConfigured(_) => "not_configured",
        }
    }
}

/// Identity provider that can mint downstream tokens.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    /// Returns true when delegated (On-Behalf-Of) credentials are configured.
    fn delegated_enabled(&self) -> bool;

    /// Exchanges a caller assertion for a token scoped to `audience`.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError`] classified by the provider response.
    async fn exchange_on_behalf_of(
        &self,
        assertion: &CallerAssertion,
        tenant: &TenantId,
        audience: &Audience,
    ) -> Result<ExchangedToken, TokenError>;

    /// Acquires a token for the service's own platform identity.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError`] when the platform identity endpoint fails.
    async fn acquire_platform(&self, audience: &Audience) -> Result<ExchangedToken, TokenError>;
}

// ============================================================================
// SECTION: Resource Probe
// ============================================================================

/// Unit-scoped probe failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    /// ARM rejected the token for this subscription.
    #[error("unauthorized for subscription {subscription}")]
    Unauthorized {
        /// Subscription that rejected the credential.
        subscription: SubscriptionId,
    },
    /// Throttling persisted past the retry budget.
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// Network or server failure persisted past the retry budget.
    #[error("transient probe failure: {0}")]
    Transient(String),
    /// Cancellation was observed.
    #[error("probe cancelled")]
    Cancelled,
    /// ARM returned a payload that could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ProbeError {
    /// Returns the unit failure kind for this error.
    #[must_use]
    pub const fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Unauthorized {
                ..
            } => FailureKind::Unauthorized,
            Self::RateLimited(_) => FailureKind::RateLimited,
            Self::Transient(_) => FailureKind::Transient,
            Self::Cancelled => FailureKind::Cancelled,
            Self::InvalidResponse(_) => FailureKind::InvalidResponse,
        }
    }
}

impl From<ProbeError> for ScanResult {
    fn from(error: ProbeError) -> Self {
        Self::failure(error.failure_kind(), error.to_string())
    }
}

/// Control-plane client that reads capacity data.
#[async_trait]
pub trait ResourceProbe: Send + Sync {
    /// Reads quota usages (and optionally SKU availability) for one unit.
    ///
    /// A missing subscription or region yields empty capacity, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError`] scoped to the unit.
    async fn probe(
        &self,
        target: &ScanTarget,
        token: &AccessToken,
        options: &ScanOptions,
        cancel: &CancellationToken,
    ) -> Result<RegionCapacity, ProbeError>;

    /// Lists subscriptions visible to the token's identity.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError`] when the listing fails.
    async fn list_subscriptions(
        &self,
        token: &AccessToken,
        cancel: &CancellationToken,
    ) -> Result<Vec<SubscriptionInfo>, ProbeError>;
}
