// crates/az-scout-mcp/src/lib.rs
// ============================================================================
// Module: az-scout MCP Library
// Description: MCP server, caller identity, tool router, and OAuth proxy.
// Purpose: Expose the scan engine to MCP clients over HTTP and stdio.
// Dependencies: az-scout-config, az-scout-core, az-scout-providers, axum, tokio
// ============================================================================

//! ## Overview
//! `az-scout-mcp` hosts the JSON-RPC 2.0 MCP server. Requests are resolved to
//! a caller principal from gateway-supplied headers, dispatched through the
//! [`ToolRouter`], and answered with either a tool result or a JSON-RPC error.
//! When enabled, the [`OAuthProxy`] lets MCP clients sign in through the
//! server's registered Entra ID app.
//!
//! Security posture: inbound headers and bodies are untrusted; caller tokens
//! are never logged and appear in audit records only as fingerprints.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod identity;
pub mod oauth_proxy;
pub mod server;
pub mod tools;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::AuditEvent;
pub use audit::AuditSink;
pub use audit::NoopAuditSink;
pub use audit::StderrAuditSink;
pub use identity::IdentityError;
pub use identity::RequestContext;
pub use identity::ResolvedCaller;
pub use identity::resolve_caller;
pub use oauth_proxy::FlowState;
pub use oauth_proxy::OAuthProxy;
pub use oauth_proxy::ProviderTokenClient;
pub use oauth_proxy::ProxyError;
pub use oauth_proxy::ProxySettings;
pub use server::McpServer;
pub use server::McpServerError;
pub use server::RpcReply;
pub use tools::ScanDefaults;
pub use tools::ToolError;
pub use tools::ToolRouter;
