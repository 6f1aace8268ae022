// crates/az-scout-core/src/core/principal.rs
// ============================================================================
// Module: az-scout Principals
// Description: Caller identity, caller assertions, and issued access tokens.
// Purpose: Carry request-scoped identity without leaking token material.
// Dependencies: secrecy, serde, thiserror, time
// ============================================================================

//! ## Overview
//! A [`Principal`] is built once per inbound request from claims the gateway
//! has already validated. Delegated principals always travel with a
//! [`CallerAssertion`]; platform principals act as the service's own managed
//! identity and carry the fixed subject [`PLATFORM_SUBJECT`].
//!
//! Security posture: assertions and access tokens are secrets. Their `Debug`
//! output is redacted and they never appear in errors or logs.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use secrecy::ExposeSecret;
use secrecy::SecretString;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;

use crate::core::identifiers::SubjectId;
use crate::core::identifiers::TenantId;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Subject used for platform (managed identity) principals and cache keys.
pub const PLATFORM_SUBJECT: &str = "platform";

// ============================================================================
// SECTION: Principal
// ============================================================================

/// Kind of principal a request runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    /// Signed-in user whose assertion is exchanged On-Behalf-Of.
    Delegated,
    /// The service's own managed identity.
    Platform,
}

impl PrincipalKind {
    /// Returns a stable label for logs and audit events.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Delegated => "delegated",
            Self::Platform => "platform",
        }
    }
}

/// Errors raised while constructing principals.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrincipalError {
    /// Delegated principal is missing a subject.
    #[error("delegated principal requires a non-empty subject")]
    MissingSubject,
}

/// Request-scoped caller identity.
///
/// # Invariants
/// - Delegated principals have a non-empty subject.
/// - Platform principals have subject [`PLATFORM_SUBJECT`].
/// - Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    kind: PrincipalKind,
    subject_id: SubjectId,
    tenant_id: Option<TenantId>,
}

impl Principal {
    /// Builds a delegated principal.
    ///
    /// # Errors
    ///
    /// Returns [`PrincipalError::MissingSubject`] when `subject` is blank.
    pub fn delegated(
        subject: impl Into<String>,
        tenant_id: Option<TenantId>,
    ) -> Result<Self, PrincipalError> {
        let subject = subject.into();
        if subject.trim().is_empty() {
            return Err(PrincipalError::MissingSubject);
        }
        Ok(Self {
            kind: PrincipalKind::Delegated,
            subject_id: SubjectId::new(subject),
            tenant_id,
        })
    }

    /// Builds the platform principal.
    #[must_use]
    pub fn platform(tenant_id: Option<TenantId>) -> Self {
        Self {
            kind: PrincipalKind::Platform,
            subject_id: SubjectId::new(PLATFORM_SUBJECT),
            tenant_id,
        }
    }

    /// Returns the principal kind.
    #[must_use]
    pub const fn kind(&self) -> PrincipalKind {
        self.kind
    }

    /// Returns the subject identifier.
    #[must_use]
    pub const fn subject_id(&self) -> &SubjectId {
        &self.subject_id
    }

    /// Returns the home tenant reported by the caller's claims, if any.
    #[must_use]
    pub const fn tenant_id(&self) -> Option<&TenantId> {
        self.tenant_id.as_ref()
    }
}

// ============================================================================
// SECTION: Caller Assertion
// ============================================================================

/// Inbound bearer token of a delegated caller.
///
/// # Invariants
/// - Never printed by `Debug` and never serialized.
#[derive(Clone)]
pub struct CallerAssertion(SecretString);

impl CallerAssertion {
    /// Wraps a raw bearer token.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(SecretString::new(raw.into().into_boxed_str()))
    }

    /// Exposes the raw token for forwarding to the identity provider.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for CallerAssertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CallerAssertion([redacted])")
    }
}

// ============================================================================
// SECTION: Access Token
// ============================================================================

/// Route through which a downstream token was acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionRoute {
    /// On-Behalf-Of exchange of a delegated assertion.
    OnBehalfOf,
    /// Platform managed identity.
    Platform,
}

impl AcquisitionRoute {
    /// Returns a stable label for logs and audit events.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::OnBehalfOf => "obo",
            Self::Platform => "platform",
        }
    }
}

/// Downstream-scoped access token handed to resource probes.
#[derive(Clone)]
pub struct AccessToken {
    secret: SecretString,
    expires_at: OffsetDateTime,
    route: AcquisitionRoute,
}

impl AccessToken {
    /// Creates a new access token.
    #[must_use]
    pub const fn new(
        secret: SecretString,
        expires_at: OffsetDateTime,
        route: AcquisitionRoute,
    ) -> Self {
        Self {
            secret,
            expires_at,
            route,
        }
    }

    /// Exposes the raw bearer value for an outbound `Authorization` header.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.secret.expose_secret()
    }

    /// Returns the absolute expiry used for cache decisions.
    #[must_use]
    pub const fn expires_at(&self) -> OffsetDateTime {
        self.expires_at
    }

    /// Returns how the token was acquired.
    #[must_use]
    pub const fn route(&self) -> AcquisitionRoute {
        self.route
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .field("route", &self.route)
            .finish()
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::use_debug,
        reason = "Test assertions use unwrap and inspect Debug output."
    )]

    use super::*;

    #[test]
    fn delegated_requires_subject() {
        assert_eq!(Principal::delegated("  ", None), Err(PrincipalError::MissingSubject));
        let principal = Principal::delegated("oid-1", Some(TenantId::new("t1"))).unwrap();
        assert_eq!(principal.kind(), PrincipalKind::Delegated);
        assert_eq!(principal.subject_id().as_str(), "oid-1");
    }

    #[test]
    fn platform_uses_fixed_subject() {
        let principal = Principal::platform(None);
        assert_eq!(principal.subject_id().as_str(), PLATFORM_SUBJECT);
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let assertion = CallerAssertion::new("eyJ.secret.value");
        assert!(!format!("{assertion:?}").contains("secret"));
        let token = AccessToken::new(
            SecretString::new("arm-token-value".into()),
            OffsetDateTime::UNIX_EPOCH,
            AcquisitionRoute::Platform,
        );
        assert!(!format!("{token:?}").contains("arm-token-value"));
    }
}
