// crates/az-scout-mcp/src/audit.rs
// ============================================================================
// Module: Security Audit
// Description: Audit events for caller resolution and authorization proxy flows.
// Purpose: Emit one structured record per security decision.
// Dependencies: serde, serde_json, sha2
// ============================================================================

//! ## Overview
//! Audit events record who a request was resolved to and why proxy flows were
//! refused. Events carry a SHA-256 fingerprint of the caller token, never the
//! token itself. Sinks are synchronous and must not fail the request.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt::Write as _;
use std::io::Write as _;

use az_scout_core::Principal;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

use crate::identity::RequestContext;

// ============================================================================
// SECTION: Events
// ============================================================================

/// Security audit record.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Decision outcome: `allow` or `deny`.
    pub decision: &'static str,
    /// Action or flow stage label.
    pub action: String,
    /// Transport label, when the event belongs to an MCP request.
    pub transport: Option<&'static str>,
    /// Caller IP address, when available.
    pub peer_ip: Option<String>,
    /// Principal kind label.
    pub principal: Option<&'static str>,
    /// Caller subject.
    pub subject: Option<String>,
    /// Caller tenant.
    pub tenant: Option<String>,
    /// Caller token fingerprint (sha256, hex).
    pub token_fingerprint: Option<String>,
    /// Failure reason for deny events.
    pub reason: Option<String>,
    /// Request identifier, when provided.
    pub request_id: Option<String>,
}

impl AuditEvent {
    /// Builds the event for a resolved caller.
    #[must_use]
    pub fn principal_resolved(
        ctx: &RequestContext,
        action: &str,
        principal: &Principal,
        token_fingerprint: Option<String>,
    ) -> Self {
        Self {
            event: "mcp_caller_resolution",
            decision: "allow",
            action: action.to_string(),
            transport: Some(ctx.transport_label()),
            peer_ip: ctx.peer_ip.map(|ip| ip.to_string()),
            principal: Some(principal.kind().label()),
            subject: Some(principal.subject_id().to_string()),
            tenant: principal.tenant_id().map(ToString::to_string),
            token_fingerprint,
            reason: None,
            request_id: ctx.request_id.clone(),
        }
    }

    /// Builds the event for a rejected caller.
    #[must_use]
    pub fn principal_rejected(ctx: &RequestContext, action: &str, reason: &str) -> Self {
        Self {
            event: "mcp_caller_resolution",
            decision: "deny",
            action: action.to_string(),
            transport: Some(ctx.transport_label()),
            peer_ip: ctx.peer_ip.map(|ip| ip.to_string()),
            principal: None,
            subject: None,
            tenant: None,
            token_fingerprint: None,
            reason: Some(reason.to_string()),
            request_id: ctx.request_id.clone(),
        }
    }

    /// Builds an authorization proxy event.
    #[must_use]
    pub fn proxy(stage: &str, allowed: bool, reason: Option<String>) -> Self {
        Self {
            event: "oauth_proxy",
            decision: if allowed { "allow" } else { "deny" },
            action: stage.to_string(),
            transport: None,
            peer_ip: None,
            principal: None,
            subject: None,
            tenant: None,
            token_fingerprint: None,
            reason,
            request_id: None,
        }
    }
}

/// Returns the hex SHA-256 digest of a caller token.
#[must_use]
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest.iter().fold(String::with_capacity(64), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Audit sink for security decisions.
pub trait AuditSink: Send + Sync {
    /// Records an audit event.
    fn record(&self, event: &AuditEvent);
}

/// Audit sink that writes JSON lines to stderr.
pub struct StderrAuditSink;

impl AuditSink for StderrAuditSink {
    fn record(&self, event: &AuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{payload}");
        }
    }
}

/// No-op audit sink.
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: &AuditEvent) {}
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test assertions use unwrap for clarity.")]

    use az_scout_core::TenantId;

    use super::*;

    #[test]
    fn fingerprint_is_lowercase_hex_sha256() {
        assert_eq!(
            token_fingerprint("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn resolved_event_serializes_without_token() {
        let principal = Principal::delegated("oid-1", Some(TenantId::new("tenant-a"))).unwrap();
        let event = AuditEvent::principal_resolved(
            &RequestContext::stdio(),
            "tools/call",
            &principal,
            Some(token_fingerprint("raw-token")),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["decision"], "allow");
        assert_eq!(json["principal"], "delegated");
        assert_eq!(json["subject"], "oid-1");
        assert_eq!(json["tenant"], "tenant-a");
        assert!(!json.to_string().contains("raw-token"));
    }
}
