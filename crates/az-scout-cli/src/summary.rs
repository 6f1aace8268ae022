// crates/az-scout-cli/src/summary.rs
// ============================================================================
// Module: Config Summary
// Description: Redacted configuration report for `config check`.
// Purpose: Show operators what the server will run with, minus secrets.
// Dependencies: az-scout-config
// ============================================================================

//! ## Overview
//! Renders one `key: value` line per setting. Secrets are reported as `set`
//! or `unset`; their values never reach the output.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::SocketAddr;

use az_scout_config::AzScoutConfig;
use az_scout_config::LogFormat;
use az_scout_config::ServerTransport;

// ============================================================================
// SECTION: Rendering
// ============================================================================

/// Renders the redacted summary lines for `config`.
#[must_use]
pub fn render(config: &AzScoutConfig) -> Vec<String> {
    let identity = &config.identity;
    let proxy = &config.oauth_proxy;
    let mut lines = vec![format!("transport: {}", transport_label(config.server.transport))];
    if config.server.transport == ServerTransport::Http {
        lines.push(format!("bind: {}", config.server.bind));
        if config.server.bind_addr().is_ok_and(|addr: SocketAddr| !addr.ip().is_loopback()) {
            lines.push("bind_exposure: network (expects an authenticating gateway)".to_string());
        }
    }
    lines.push(format!("max_body_bytes: {}", config.server.max_body_bytes));
    lines.push(format!(
        "public_base_url: {}",
        config.server.public_base_url.as_deref().unwrap_or("-")
    ));

    lines.push(format!("obo: {}", if identity.obo_enabled() { "enabled" } else { "disabled" }));
    lines.push(format!("obo_client_id: {}", identity.obo_client_id.as_deref().unwrap_or("-")));
    lines.push(format!("obo_client_secret: {}", presence(identity.obo_client_secret.is_some())));
    lines.push(format!("obo_tenant_id: {}", identity.obo_tenant_id.as_deref().unwrap_or("-")));
    lines.push(format!(
        "managed_identity_client_id: {}",
        identity.managed_identity_client_id.as_deref().unwrap_or("-")
    ));
    lines.push(format!("authority_host: {}", identity.authority_host));
    lines.push(format!("arm_endpoint: {}", identity.arm_endpoint));
    lines.push(format!("arm_scope: {}", identity.arm_scope));

    lines.push(format!("scan.subscriptions: {}", config.scan.subscriptions.len()));
    lines.push(format!("scan.regions: {}", join_or_dash(&config.scan.regions)));
    lines.push(format!("scan.max_concurrency: {}", config.scan.max_concurrency));
    lines.push(format!("scan.max_targets: {}", config.scan.max_targets));
    lines.push(format!(
        "scan.deadline_ms: {}",
        config.scan.deadline_ms.map_or_else(|| "-".to_string(), |ms| ms.to_string())
    ));
    lines.push(format!("retry.max_attempts: {}", config.retry.max_attempts));

    lines.push(format!("oauth_proxy: {}", if proxy.enabled { "enabled" } else { "disabled" }));
    if proxy.enabled {
        lines.push(format!(
            "oauth_proxy.client_id: {}",
            proxy.effective_client_id(identity).unwrap_or("-")
        ));
        lines.push(format!(
            "oauth_proxy.client_secret: {}",
            presence(proxy.effective_client_secret(identity).is_some())
        ));
        lines.push(format!(
            "oauth_proxy.redirect_uris: {}",
            proxy.allowed_redirect_uris.len()
        ));
    }

    lines.push(format!("logging.level: {}", config.logging.level));
    lines.push(format!(
        "logging.format: {}",
        match config.logging.format {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
        }
    ));
    lines.push(format!("logging.audit: {}", config.logging.audit));
    lines
}

/// Transport label used in reports.
#[must_use]
pub const fn transport_label(transport: ServerTransport) -> &'static str {
    match transport {
        ServerTransport::Stdio => "stdio",
        ServerTransport::Http => "http",
    }
}

/// Returns `set` or `unset`.
const fn presence(present: bool) -> &'static str {
    if present { "set" } else { "unset" }
}

/// Joins values with commas, or `-` when empty.
fn join_or_dash(values: &[String]) -> String {
    if values.is_empty() { "-".to_string() } else { values.join(",") }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test assertions use unwrap for clarity.")]

    use super::*;

    fn config(toml: &str) -> AzScoutConfig {
        AzScoutConfig::from_toml_with_env(toml, |_| None).unwrap()
    }

    #[test]
    fn secrets_are_redacted() {
        let config = config(
            r#"
            [identity]
            obo_client_id = "app-id"
            obo_client_secret = "super-secret-value"
            obo_tenant_id = "tenant-a"
            "#,
        );
        let lines = render(&config);
        assert!(lines.contains(&"obo: enabled".to_string()));
        assert!(lines.contains(&"obo_client_secret: set".to_string()));
        assert!(lines.iter().all(|line| !line.contains("super-secret-value")));
    }

    #[test]
    fn network_binds_are_flagged() {
        let lines = render(&config("[server]\nbind = \"0.0.0.0:8080\"\n"));
        assert!(lines.iter().any(|line| line.starts_with("bind_exposure: network")));
        let lines = render(&config(""));
        assert!(lines.iter().all(|line| !line.starts_with("bind_exposure")));
    }
}
