// crates/az-scout-mcp/src/identity.rs
// ============================================================================
// Module: Caller Identity
// Description: Extracts the caller token and claims from gateway headers.
// Purpose: Build the request-scoped principal for every tool call.
// Dependencies: axum, az-scout-core, base64, serde_json
// ============================================================================

//! ## Overview
//! The authenticating gateway in front of the server has already validated
//! inbound tokens. This module only locates the token (the EasyAuth header
//! first, then `Authorization: Bearer`) and reads `oid`/`sub` and
//! `tid`/`tenant_id` from the JWT payload. Signatures are not checked here.
//!
//! Requests without a caller token run as the platform principal. A token
//! that is present but unreadable is rejected rather than downgraded.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::IpAddr;

use axum::http::HeaderMap;
use az_scout_config::ServerTransport;
use az_scout_core::CallerAssertion;
use az_scout_core::Principal;
use az_scout_core::TenantId;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use thiserror::Error;

use crate::audit::token_fingerprint;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Header set by App Service authentication with the caller's access token.
pub const EASY_AUTH_TOKEN_HEADER: &str = "x-ms-token-aad-access-token";
/// Maximum accepted size of a credential header.
const MAX_AUTH_HEADER_BYTES: usize = 8 * 1024;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Caller resolution failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// The caller credential is present but unusable.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
}

// ============================================================================
// SECTION: Request Context
// ============================================================================

/// Per-request transport and credential context.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Transport used by the caller.
    pub transport: ServerTransport,
    /// Peer IP address when available.
    pub peer_ip: Option<IpAddr>,
    /// Caller token extracted from the request headers.
    pub caller: Result<Option<CallerAssertion>, IdentityError>,
    /// Optional request identifier for auditing.
    pub request_id: Option<String>,
}

impl RequestContext {
    /// Builds a stdio request context. Stdio callers run as the platform.
    #[must_use]
    pub const fn stdio() -> Self {
        Self {
            transport: ServerTransport::Stdio,
            peer_ip: None,
            caller: Ok(None),
            request_id: None,
        }
    }

    /// Builds an HTTP request context from inbound headers.
    #[must_use]
    pub fn http(peer_ip: Option<IpAddr>, headers: &HeaderMap) -> Self {
        Self {
            transport: ServerTransport::Http,
            peer_ip,
            caller: extract_caller_token(headers),
            request_id: None,
        }
    }

    /// Attaches a request identifier.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Returns a stable transport label.
    #[must_use]
    pub const fn transport_label(&self) -> &'static str {
        match self.transport {
            ServerTransport::Stdio => "stdio",
            ServerTransport::Http => "http",
        }
    }
}

// ============================================================================
// SECTION: Resolution
// ============================================================================

/// Principal and credential resolved for one request.
#[derive(Debug, Clone)]
pub struct ResolvedCaller {
    /// Request-scoped principal.
    pub principal: Principal,
    /// Caller assertion for delegated principals.
    pub assertion: Option<CallerAssertion>,
    /// Fingerprint of the caller token, for audit records.
    pub token_fingerprint: Option<String>,
}

/// Resolves the principal for `ctx`.
///
/// # Errors
///
/// Returns [`IdentityError::Unauthenticated`] when a caller token is present
/// but malformed or lacks a subject claim.
pub fn resolve_caller(ctx: &RequestContext) -> Result<ResolvedCaller, IdentityError> {
    let Some(assertion) = ctx.caller.clone()? else {
        return Ok(ResolvedCaller {
            principal: Principal::platform(None),
            assertion: None,
            token_fingerprint: None,
        });
    };
    let claims = decode_claims(assertion.expose())?;
    let subject = claims
        .oid
        .filter(|value| !value.trim().is_empty())
        .or(claims.sub)
        .unwrap_or_default();
    let tenant = claims
        .tid
        .filter(|value| !value.trim().is_empty())
        .or(claims.tenant_id)
        .filter(|value| !value.trim().is_empty())
        .map(TenantId::new);
    let principal = Principal::delegated(subject, tenant)
        .map_err(|_| IdentityError::Unauthenticated("token has no subject claim".to_string()))?;
    let fingerprint = token_fingerprint(assertion.expose());
    Ok(ResolvedCaller {
        principal,
        assertion: Some(assertion),
        token_fingerprint: Some(fingerprint),
    })
}

/// Locates the caller token in the request headers.
fn extract_caller_token(headers: &HeaderMap) -> Result<Option<CallerAssertion>, IdentityError> {
    if let Some(value) = headers.get(EASY_AUTH_TOKEN_HEADER) {
        let token = header_text(value.as_bytes())?.trim();
        if !token.is_empty() {
            return Ok(Some(CallerAssertion::new(token)));
        }
    }
    let Some(value) = headers.get(axum::http::header::AUTHORIZATION) else {
        return Ok(None);
    };
    parse_bearer_token(header_text(value.as_bytes())?).map(Some)
}

/// Validates header size and encoding.
fn header_text(raw: &[u8]) -> Result<&str, IdentityError> {
    if raw.len() > MAX_AUTH_HEADER_BYTES {
        return Err(IdentityError::Unauthenticated("credential header too large".to_string()));
    }
    std::str::from_utf8(raw)
        .map_err(|_| IdentityError::Unauthenticated("credential header is not utf-8".to_string()))
}

/// Parses an `Authorization: Bearer` value.
fn parse_bearer_token(header: &str) -> Result<CallerAssertion, IdentityError> {
    let mut parts = header.trim().splitn(2, ' ');
    let scheme = parts.next().unwrap_or_default();
    let token = parts.next().unwrap_or_default().trim();
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(IdentityError::Unauthenticated("unsupported authorization scheme".to_string()));
    }
    if token.is_empty() {
        return Err(IdentityError::Unauthenticated("missing bearer token".to_string()));
    }
    Ok(CallerAssertion::new(token))
}

// ============================================================================
// SECTION: Claims
// ============================================================================

/// Identity claims read from the token payload.
#[derive(Debug, Default, Deserialize)]
struct Claims {
    /// Object id of the signed-in user.
    #[serde(default)]
    oid: Option<String>,
    /// Subject claim.
    #[serde(default)]
    sub: Option<String>,
    /// Tenant id claim.
    #[serde(default)]
    tid: Option<String>,
    /// Alternate tenant claim.
    #[serde(default)]
    tenant_id: Option<String>,
}

/// Decodes the JWT payload segment without verifying the signature.
fn decode_claims(token: &str) -> Result<Claims, IdentityError> {
    let malformed = || IdentityError::Unauthenticated("malformed bearer token".to_string());
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (segments.next(), segments.next(), segments.next(), segments.next())
    else {
        return Err(malformed());
    };
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).map_err(|_| malformed())?;
    serde_json::from_slice(&bytes).map_err(|_| malformed())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
