// crates/az-scout-config/src/config.rs
// ============================================================================
// Module: az-scout Configuration
// Description: Configuration loading, environment overrides, and validation.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: az-scout-core, secrecy, serde, toml, url
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file resolved from the CLI argument,
//! the `AZ_SCOUT_CONFIG` environment variable, or `az-scout.toml` in the
//! working directory. Deployment environment variables then override the
//! delegated credentials and the subscription list. Missing or inconsistent
//! configuration fails closed: in particular, delegated credentials must be
//! supplied completely or not at all.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use az_scout_core::Audience;
use az_scout_core::BrokerConfig;
use az_scout_core::RetryPolicy;
use az_scout_core::ScanCoordinatorConfig;
use az_scout_core::ScanTarget;
use az_scout_core::TenantId;
use secrecy::ExposeSecret;
use secrecy::SecretString;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use url::Url;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "az-scout.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "AZ_SCOUT_CONFIG";
/// Environment variable carrying the delegated client id.
pub const OBO_CLIENT_ID_ENV: &str = "AZURE_OBO_CLIENT_ID";
/// Environment variable carrying the delegated client secret.
pub const OBO_CLIENT_SECRET_ENV: &str = "AZURE_OBO_CLIENT_SECRET";
/// Environment variable carrying the delegated app's tenant.
pub const OBO_TENANT_ID_ENV: &str = "AZURE_OBO_TENANT_ID";
/// Environment variable carrying a comma-separated subscription list.
pub const SUBSCRIPTIONS_ENV: &str = "AZ_SCOUT_SUBSCRIPTIONS";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum configured subscriptions.
pub(crate) const MAX_SUBSCRIPTIONS: usize = 1024;
/// Maximum configured regions.
pub(crate) const MAX_REGIONS: usize = 128;
/// Upper bound for scan concurrency.
pub(crate) const MAX_SCAN_CONCURRENCY: usize = 64;
/// Upper bound for targets in one scan.
pub(crate) const MAX_SCAN_TARGETS: usize = 4096;
/// Minimum scan deadline in milliseconds.
pub(crate) const MIN_SCAN_DEADLINE_MS: u64 = 100;
/// Maximum cancellation grace in milliseconds.
pub(crate) const MAX_CANCEL_GRACE_MS: u64 = 10_000;
/// Maximum retry attempts for any operation.
pub(crate) const MAX_RETRY_ATTEMPTS: u32 = 10;
/// Maximum honoured `Retry-After` in seconds.
pub(crate) const MAX_RETRY_AFTER_SECS: u64 = 300;
/// Minimum HTTP timeout in milliseconds.
pub(crate) const MIN_HTTP_TIMEOUT_MS: u64 = 100;
/// Maximum HTTP timeout in milliseconds.
pub(crate) const MAX_HTTP_TIMEOUT_MS: u64 = 120_000;
/// Maximum response body size accepted from Azure endpoints.
pub(crate) const MAX_RESPONSE_BYTES: usize = 64 * 1024 * 1024;
/// Minimum OAuth correlation record TTL in seconds.
pub(crate) const MIN_PROXY_RECORD_TTL_SECS: u64 = 30;
/// Maximum OAuth correlation record TTL in seconds.
pub(crate) const MAX_PROXY_RECORD_TTL_SECS: u64 = 3_600;
/// Maximum OAuth correlation records held at once.
pub(crate) const MAX_PROXY_RECORDS: usize = 100_000;

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// az-scout configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AzScoutConfig {
    /// Server transport configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Scan targets and fan-out limits.
    #[serde(default)]
    pub scan: ScanConfig,
    /// Retry policy for control-plane probes.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Identity provider and credential settings.
    #[serde(default)]
    pub identity: IdentityConfig,
    /// OAuth authorization proxy settings.
    #[serde(default)]
    pub oauth_proxy: OAuthProxyConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AzScoutConfig {
    /// Loads configuration from disk using the default resolution rules and
    /// the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |name| env::var(name).ok())
    }

    /// Loads configuration using `lookup` for environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load_with_env<F>(path: Option<&Path>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let resolved = resolve_path(path, &lookup)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml_with_env(content, lookup)
    }

    /// Parses, overrides, and validates configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_toml_with_env<F>(content: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.apply_env_overrides(lookup);
        config.validate()?;
        Ok(config)
    }

    /// Applies deployment environment overrides.
    ///
    /// Empty variables are ignored so an unset secret in a deployment template
    /// does not erase a value from the file.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty =
            |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        if let Some(client_id) = non_empty(OBO_CLIENT_ID_ENV) {
            self.identity.obo_client_id = Some(client_id);
        }
        if let Some(secret) = non_empty(OBO_CLIENT_SECRET_ENV) {
            self.identity.obo_client_secret = Some(SecretString::new(secret.into_boxed_str()));
        }
        if let Some(tenant) = non_empty(OBO_TENANT_ID_ENV) {
            self.identity.obo_tenant_id = Some(tenant);
        }
        if let Some(list) = non_empty(SUBSCRIPTIONS_ENV) {
            self.scan.subscriptions = list
                .split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(str::to_string)
                .collect();
        }
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.scan.validate()?;
        self.retry.validate()?;
        self.identity.validate()?;
        self.oauth_proxy.validate(&self.server, &self.identity)?;
        self.logging.validate()?;
        Ok(())
    }

    /// Returns the broker configuration derived from identity settings.
    #[must_use]
    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            home_tenant: self.identity.obo_tenant_id.as_deref().map(TenantId::new),
            expiry_skew: Duration::from_secs(self.identity.expiry_skew_secs),
            consent_negative_ttl: Duration::from_secs(self.identity.consent_negative_ttl_secs),
            retry: RetryPolicy {
                max_attempts: self.identity.exchange_attempts,
                ..self.retry.policy()
            },
        }
    }

    /// Returns the scan coordinator configuration.
    #[must_use]
    pub fn coordinator_config(&self) -> ScanCoordinatorConfig {
        ScanCoordinatorConfig {
            max_concurrency: self.scan.max_concurrency,
            max_targets: self.scan.max_targets,
            scan_deadline: self.scan.deadline_ms.map(Duration::from_millis),
            cancel_grace: Duration::from_millis(self.scan.cancel_grace_ms),
            audience: Audience::new(self.identity.arm_scope.clone()),
        }
    }
}

/// Supported MCP transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerTransport {
    /// Content-Length framed JSON-RPC over stdin/stdout.
    Stdio,
    /// JSON-RPC over HTTP behind the authenticating gateway.
    #[default]
    Http,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Transport type.
    #[serde(default)]
    pub transport: ServerTransport,
    /// Bind address for the HTTP transport.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum request body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Public base URL clients use to reach the server (OAuth metadata).
    #[serde(default)]
    pub public_base_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: ServerTransport::default(),
            bind: default_bind(),
            max_body_bytes: default_max_body_bytes(),
            public_base_url: None,
        }
    }
}

impl ServerConfig {
    /// Validates server transport configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_body_bytes == 0 {
            return Err(ConfigError::Invalid(
                "server.max_body_bytes must be greater than zero".to_string(),
            ));
        }
        if self.transport == ServerTransport::Http {
            self.bind_addr()?;
        }
        if let Some(base) = &self.public_base_url {
            validate_url("server.public_base_url", base, true)?;
        }
        Ok(())
    }

    /// Parses the bind address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the bind address is invalid.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid("server.bind is not a valid socket address".to_string()))
    }
}

/// Scan targets and fan-out limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScanConfig {
    /// Default subscriptions scanned when a request names none.
    #[serde(default)]
    pub subscriptions: Vec<String>,
    /// Default regions scanned when a request names none.
    #[serde(default)]
    pub regions: Vec<String>,
    /// Maximum concurrent probes per scan.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Maximum targets per scan.
    #[serde(default = "default_max_targets")]
    pub max_targets: usize,
    /// Scan wall-clock budget in milliseconds; unset disables the deadline.
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: Option<u64>,
    /// Grace period after cancellation in milliseconds.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
    /// Query SKU availability unless the request says otherwise.
    #[serde(default = "default_include_skus")]
    pub include_skus: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            subscriptions: Vec::new(),
            regions: Vec::new(),
            max_concurrency: default_max_concurrency(),
            max_targets: default_max_targets(),
            deadline_ms: default_deadline_ms(),
            cancel_grace_ms: default_cancel_grace_ms(),
            include_skus: default_include_skus(),
        }
    }
}

impl ScanConfig {
    /// Validates scan limits and default targets.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.subscriptions.len() > MAX_SUBSCRIPTIONS {
            return Err(ConfigError::Invalid("scan.subscriptions exceeds limit".to_string()));
        }
        if self.regions.len() > MAX_REGIONS {
            return Err(ConfigError::Invalid("scan.regions exceeds limit".to_string()));
        }
        if self.subscriptions.iter().any(|sub| sub.trim().is_empty()) {
            return Err(ConfigError::Invalid("scan.subscriptions entries must be non-empty".to_string()));
        }
        if self.regions.iter().any(|region| region.trim().is_empty()) {
            return Err(ConfigError::Invalid("scan.regions entries must be non-empty".to_string()));
        }
        if self.max_concurrency == 0 || self.max_concurrency > MAX_SCAN_CONCURRENCY {
            return Err(ConfigError::Invalid(format!(
                "scan.max_concurrency must be between 1 and {MAX_SCAN_CONCURRENCY}"
            )));
        }
        if self.max_targets == 0 || self.max_targets > MAX_SCAN_TARGETS {
            return Err(ConfigError::Invalid(format!(
                "scan.max_targets must be between 1 and {MAX_SCAN_TARGETS}"
            )));
        }
        if self.deadline_ms.is_some_and(|ms| ms < MIN_SCAN_DEADLINE_MS) {
            return Err(ConfigError::Invalid(format!(
                "scan.deadline_ms must be at least {MIN_SCAN_DEADLINE_MS}"
            )));
        }
        if self.cancel_grace_ms > MAX_CANCEL_GRACE_MS {
            return Err(ConfigError::Invalid(format!(
                "scan.cancel_grace_ms must be at most {MAX_CANCEL_GRACE_MS}"
            )));
        }
        Ok(())
    }

    /// Expands the configured subscriptions and regions into scan targets.
    #[must_use]
    pub fn default_targets(&self) -> Vec<ScanTarget> {
        self.subscriptions
            .iter()
            .flat_map(|sub| self.regions.iter().map(move |region| ScanTarget::new(sub.trim(), region)))
            .collect()
    }
}

/// Retry policy for control-plane probes.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts including the first.
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    /// First backoff delay in milliseconds.
    #[serde(default = "default_retry_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Maximum single backoff delay in milliseconds.
    #[serde(default = "default_retry_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Maximum total wait across retries in milliseconds.
    #[serde(default = "default_retry_max_total_wait_ms")]
    pub max_total_wait_ms: u64,
    /// Upper bound applied to server-provided `Retry-After` values.
    #[serde(default = "default_max_retry_after_secs")]
    pub max_retry_after_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            initial_backoff_ms: default_retry_initial_backoff_ms(),
            max_backoff_ms: default_retry_max_backoff_ms(),
            max_total_wait_ms: default_retry_max_total_wait_ms(),
            max_retry_after_secs: default_max_retry_after_secs(),
        }
    }
}

impl RetryConfig {
    /// Validates retry bounds.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 || self.max_attempts > MAX_RETRY_ATTEMPTS {
            return Err(ConfigError::Invalid(format!(
                "retry.max_attempts must be between 1 and {MAX_RETRY_ATTEMPTS}"
            )));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(ConfigError::Invalid(
                "retry.initial_backoff_ms must not exceed retry.max_backoff_ms".to_string(),
            ));
        }
        if self.max_total_wait_ms == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_total_wait_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_retry_after_secs > MAX_RETRY_AFTER_SECS {
            return Err(ConfigError::Invalid(format!(
                "retry.max_retry_after_secs must be at most {MAX_RETRY_AFTER_SECS}"
            )));
        }
        Ok(())
    }

    /// Returns the core retry policy.
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            max_total_wait: Duration::from_millis(self.max_total_wait_ms),
        }
    }

    /// Returns the cap applied to `Retry-After`.
    #[must_use]
    pub const fn max_retry_after(&self) -> Duration {
        Duration::from_secs(self.max_retry_after_secs)
    }
}

/// Identity provider and credential settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdentityConfig {
    /// Delegated (On-Behalf-Of) app client id.
    #[serde(default)]
    pub obo_client_id: Option<String>,
    /// Delegated app client secret.
    #[serde(default)]
    pub obo_client_secret: Option<SecretString>,
    /// Tenant of the delegated app; the default exchange authority.
    #[serde(default)]
    pub obo_tenant_id: Option<String>,
    /// Entra ID authority host.
    #[serde(default = "default_authority_host")]
    pub authority_host: String,
    /// Managed identity token endpoint.
    #[serde(default = "default_imds_endpoint")]
    pub imds_endpoint: String,
    /// Client id of a user-assigned managed identity.
    #[serde(default)]
    pub managed_identity_client_id: Option<String>,
    /// Azure Resource Manager endpoint.
    #[serde(default = "default_arm_endpoint")]
    pub arm_endpoint: String,
    /// Scope requested for ARM tokens.
    #[serde(default = "default_arm_scope")]
    pub arm_scope: String,
    /// Seconds subtracted from token lifetimes before caching.
    #[serde(default = "default_expiry_skew_secs")]
    pub expiry_skew_secs: u64,
    /// Seconds a consent failure is remembered; zero disables.
    #[serde(default = "default_consent_negative_ttl_secs")]
    pub consent_negative_ttl_secs: u64,
    /// Attempts for transient exchange failures.
    #[serde(default = "default_exchange_attempts")]
    pub exchange_attempts: u32,
    /// HTTP connect timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// HTTP request timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Maximum response body accepted from Azure endpoints.
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
    /// Permit `http://` authority and ARM endpoints (local testing only).
    #[serde(default)]
    pub allow_http: bool,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            obo_client_id: None,
            obo_client_secret: None,
            obo_tenant_id: None,
            authority_host: default_authority_host(),
            imds_endpoint: default_imds_endpoint(),
            managed_identity_client_id: None,
            arm_endpoint: default_arm_endpoint(),
            arm_scope: default_arm_scope(),
            expiry_skew_secs: default_expiry_skew_secs(),
            consent_negative_ttl_secs: default_consent_negative_ttl_secs(),
            exchange_attempts: default_exchange_attempts(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            max_response_bytes: default_max_response_bytes(),
            allow_http: false,
        }
    }
}

impl IdentityConfig {
    /// Validates identity settings.
    fn validate(&self) -> Result<(), ConfigError> {
        let present = [
            self.obo_client_id.as_deref().is_some_and(|v| !v.trim().is_empty()),
            self.obo_client_secret.as_ref().is_some_and(|v| !v.expose_secret().trim().is_empty()),
            self.obo_tenant_id.as_deref().is_some_and(|v| !v.trim().is_empty()),
        ];
        let count = present.iter().filter(|flag| **flag).count();
        if count != 0 && count != present.len() {
            return Err(ConfigError::Invalid(
                "identity OBO credentials require client id, client secret, and tenant id together"
                    .to_string(),
            ));
        }
        validate_url("identity.authority_host", &self.authority_host, !self.allow_http)?;
        validate_url("identity.arm_endpoint", &self.arm_endpoint, !self.allow_http)?;
        validate_url("identity.imds_endpoint", &self.imds_endpoint, false)?;
        if self.arm_scope.trim().is_empty() {
            return Err(ConfigError::Invalid("identity.arm_scope must be non-empty".to_string()));
        }
        if self.exchange_attempts == 0 || self.exchange_attempts > MAX_RETRY_ATTEMPTS {
            return Err(ConfigError::Invalid(format!(
                "identity.exchange_attempts must be between 1 and {MAX_RETRY_ATTEMPTS}"
            )));
        }
        for (field, value) in [
            ("identity.connect_timeout_ms", self.connect_timeout_ms),
            ("identity.request_timeout_ms", self.request_timeout_ms),
        ] {
            if !(MIN_HTTP_TIMEOUT_MS..=MAX_HTTP_TIMEOUT_MS).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{field} must be between {MIN_HTTP_TIMEOUT_MS} and {MAX_HTTP_TIMEOUT_MS}"
                )));
            }
        }
        if self.max_response_bytes == 0 || self.max_response_bytes > MAX_RESPONSE_BYTES {
            return Err(ConfigError::Invalid(format!(
                "identity.max_response_bytes must be between 1 and {MAX_RESPONSE_BYTES}"
            )));
        }
        Ok(())
    }

    /// Returns true when delegated credentials are configured.
    #[must_use]
    pub fn obo_enabled(&self) -> bool {
        self.obo_client_id.is_some() && self.obo_client_secret.is_some() && self.obo_tenant_id.is_some()
    }
}

/// OAuth authorization proxy settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OAuthProxyConfig {
    /// Enables the proxy endpoints.
    #[serde(default)]
    pub enabled: bool,
    /// Upstream app client id; defaults to the delegated client id.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Upstream app client secret; defaults to the delegated client secret.
    #[serde(default)]
    pub client_secret: Option<SecretString>,
    /// Tenant of the upstream authority; defaults to the delegated tenant.
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// Scopes requested from the identity provider.
    #[serde(default = "default_proxy_scopes")]
    pub scopes: Vec<String>,
    /// Allowed client redirect URIs (exact match or `*` suffix prefix match).
    #[serde(default)]
    pub allowed_redirect_uris: Vec<String>,
    /// Correlation record lifetime in seconds.
    #[serde(default = "default_proxy_record_ttl_secs")]
    pub record_ttl_secs: u64,
    /// Maximum outstanding correlation records.
    #[serde(default = "default_proxy_max_records")]
    pub max_records: usize,
}

impl Default for OAuthProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            client_id: None,
            client_secret: None,
            tenant_id: None,
            scopes: default_proxy_scopes(),
            allowed_redirect_uris: Vec::new(),
            record_ttl_secs: default_proxy_record_ttl_secs(),
            max_records: default_proxy_max_records(),
        }
    }
}

impl OAuthProxyConfig {
    /// Validates proxy settings against the server and identity sections.
    fn validate(&self, server: &ServerConfig, identity: &IdentityConfig) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        if server.transport != ServerTransport::Http {
            return Err(ConfigError::Invalid("oauth_proxy requires the http transport".to_string()));
        }
        if server.public_base_url.is_none() {
            return Err(ConfigError::Invalid(
                "oauth_proxy requires server.public_base_url".to_string(),
            ));
        }
        if self.effective_client_id(identity).is_none() {
            return Err(ConfigError::Invalid(
                "oauth_proxy requires client_id or identity.obo_client_id".to_string(),
            ));
        }
        if self.effective_tenant_id(identity).is_none() {
            return Err(ConfigError::Invalid(
                "oauth_proxy requires tenant_id or identity.obo_tenant_id".to_string(),
            ));
        }
        if self.scopes.is_empty() || self.scopes.iter().any(|scope| scope.trim().is_empty()) {
            return Err(ConfigError::Invalid("oauth_proxy.scopes must be non-empty".to_string()));
        }
        if self.allowed_redirect_uris.is_empty() {
            return Err(ConfigError::Invalid(
                "oauth_proxy.allowed_redirect_uris must list at least one uri".to_string(),
            ));
        }
        for uri in &self.allowed_redirect_uris {
            validate_url("oauth_proxy.allowed_redirect_uris", uri.trim_end_matches('*'), false)?;
        }
        if !(MIN_PROXY_RECORD_TTL_SECS..=MAX_PROXY_RECORD_TTL_SECS).contains(&self.record_ttl_secs) {
            return Err(ConfigError::Invalid(format!(
                "oauth_proxy.record_ttl_secs must be between {MIN_PROXY_RECORD_TTL_SECS} and \
                 {MAX_PROXY_RECORD_TTL_SECS}"
            )));
        }
        if self.max_records == 0 || self.max_records > MAX_PROXY_RECORDS {
            return Err(ConfigError::Invalid(format!(
                "oauth_proxy.max_records must be between 1 and {MAX_PROXY_RECORDS}"
            )));
        }
        Ok(())
    }

    /// Returns the upstream client id.
    #[must_use]
    pub fn effective_client_id<'a>(&'a self, identity: &'a IdentityConfig) -> Option<&'a str> {
        self.client_id.as_deref().or(identity.obo_client_id.as_deref())
    }

    /// Returns the upstream client secret.
    #[must_use]
    pub fn effective_client_secret<'a>(
        &'a self,
        identity: &'a IdentityConfig,
    ) -> Option<&'a SecretString> {
        self.client_secret.as_ref().or(identity.obo_client_secret.as_ref())
    }

    /// Returns the upstream tenant.
    #[must_use]
    pub fn effective_tenant_id<'a>(&'a self, identity: &'a IdentityConfig) -> Option<&'a str> {
        self.tenant_id.as_deref().or(identity.obo_tenant_id.as_deref())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
    /// Emit security audit events to stderr.
    #[serde(default = "default_audit_enabled")]
    pub audit: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            audit: default_audit_enabled(),
        }
    }
}

impl LoggingConfig {
    /// Validates logging settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.level.trim().is_empty() {
            return Err(ConfigError::Invalid("logging.level must be non-empty".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from CLI or environment defaults.
fn resolve_path<F>(path: Option<&Path>, lookup: &F) -> Result<PathBuf, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Some(env_path) = lookup(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against security limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates an absolute http(s) URL, optionally requiring https.
fn validate_url(field: &str, value: &str, require_https: bool) -> Result<(), ConfigError> {
    let url = Url::parse(value.trim())
        .map_err(|_| ConfigError::Invalid(format!("{field} must be an absolute url")))?;
    match url.scheme() {
        "https" => Ok(()),
        "http" if !require_https => Ok(()),
        "http" => Err(ConfigError::Invalid(format!("{field} must use https"))),
        _ => Err(ConfigError::Invalid(format!("{field} must use http or https"))),
    }
}

/// Default HTTP bind address.
fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

/// Default maximum request body size in bytes.
pub(crate) const fn default_max_body_bytes() -> usize {
    1024 * 1024
}

/// Default scan concurrency.
pub(crate) const fn default_max_concurrency() -> usize {
    8
}

/// Default maximum targets per scan.
pub(crate) const fn default_max_targets() -> usize {
    512
}

/// Default scan deadline in milliseconds.
pub(crate) const fn default_deadline_ms() -> Option<u64> {
    Some(120_000)
}

/// Default cancellation grace in milliseconds.
pub(crate) const fn default_cancel_grace_ms() -> u64 {
    250
}

/// SKUs are included by default.
pub(crate) const fn default_include_skus() -> bool {
    true
}

/// Default probe attempts.
pub(crate) const fn default_retry_max_attempts() -> u32 {
    4
}

/// Default first backoff in milliseconds.
pub(crate) const fn default_retry_initial_backoff_ms() -> u64 {
    500
}

/// Default backoff cap in milliseconds.
pub(crate) const fn default_retry_max_backoff_ms() -> u64 {
    8_000
}

/// Default total retry wait in milliseconds.
pub(crate) const fn default_retry_max_total_wait_ms() -> u64 {
    30_000
}

/// Default `Retry-After` cap in seconds.
pub(crate) const fn default_max_retry_after_secs() -> u64 {
    30
}

/// Default Entra ID authority host.
fn default_authority_host() -> String {
    "https://login.microsoftonline.com".to_string()
}

/// Default managed identity endpoint.
fn default_imds_endpoint() -> String {
    "http://169.254.169.254/metadata/identity/oauth2/token".to_string()
}

/// Default ARM endpoint.
fn default_arm_endpoint() -> String {
    "https://management.azure.com".to_string()
}

/// Default ARM scope.
fn default_arm_scope() -> String {
    Audience::ARM.to_string()
}

/// Default expiry skew in seconds.
pub(crate) const fn default_expiry_skew_secs() -> u64 {
    60
}

/// Default consent negative-cache TTL in seconds.
pub(crate) const fn default_consent_negative_ttl_secs() -> u64 {
    30
}

/// Default exchange attempts.
pub(crate) const fn default_exchange_attempts() -> u32 {
    2
}

/// Default connect timeout in milliseconds.
pub(crate) const fn default_connect_timeout_ms() -> u64 {
    2_000
}

/// Default request timeout in milliseconds.
pub(crate) const fn default_request_timeout_ms() -> u64 {
    15_000
}

/// Default maximum response size in bytes.
pub(crate) const fn default_max_response_bytes() -> usize {
    8 * 1024 * 1024
}

/// Default proxy scopes.
fn default_proxy_scopes() -> Vec<String> {
    vec!["openid".to_string(), "offline_access".to_string()]
}

/// Default proxy record TTL in seconds.
pub(crate) const fn default_proxy_record_ttl_secs() -> u64 {
    600
}

/// Default proxy record capacity.
pub(crate) const fn default_proxy_max_records() -> usize {
    1_024
}

/// Default log level.
fn default_log_level() -> String {
    "info".to_string()
}

/// Audit events are enabled by default.
pub(crate) const fn default_audit_enabled() -> bool {
    true
}
