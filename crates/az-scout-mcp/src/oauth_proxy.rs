// crates/az-scout-mcp/src/oauth_proxy.rs
// ============================================================================
// Module: OAuth Authorization Proxy
// Description: PKCE authorization-code proxy in front of Entra ID.
// Purpose: Let MCP clients sign in through the server's registered app.
// Dependencies: axum, base64, parking_lot, rand, reqwest, sha2, subtle, time
// ============================================================================

//! ## Overview
//! MCP clients discover the proxy through the two `.well-known` documents,
//! start at `/authorize`, and finish at `/token`. The proxy swaps the
//! client's redirect URI for its own `/oauth/callback`, correlates the
//! provider callback back to the client through a random state nonce, and
//! hands the client a one-time proxy code in place of the provider code.
//!
//! Each flow moves through [`FlowState`]:
//! `Idle → AwaitingProviderRedirect → AwaitingProviderCallback →
//! CodeExchanged → Complete`, with `Failed` reachable from every state.
//!
//! Security posture:
//! - State nonces and proxy codes are `selector.verifier` handles. The
//!   selector locates the record; the verifier is compared against its stored
//!   SHA-256 digest in constant time.
//! - Only `S256` PKCE is accepted. The client's challenge is forwarded to the
//!   provider unchanged and its verifier is checked locally before redemption.
//! - Unknown, expired, or mismatched handles fail the flow without contacting
//!   the provider. Records expire after a TTL and the table is bounded.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Form;
use axum::Json;
use axum::Router;
use axum::extract::Query;
use axum::extract::State;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::http::header::CACHE_CONTROL;
use axum::http::header::LOCATION;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use az_scout_providers::BodyReadError;
use az_scout_providers::HttpClientConfig;
use az_scout_providers::ProviderBuildError;
use az_scout_providers::build_client;
use az_scout_providers::read_body_limited;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use parking_lot::Mutex;
use rand::RngCore;
use rand::rngs::OsRng;
use secrecy::ExposeSecret;
use secrecy::SecretString;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use sha2::Digest;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use time::Duration;
use time::OffsetDateTime;
use url::Url;

use crate::audit::AuditEvent;
use crate::audit::AuditSink;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Path of the provider callback served by the proxy.
pub const CALLBACK_PATH: &str = "/oauth/callback";
/// Only supported PKCE method.
const PKCE_METHOD_S256: &str = "S256";
/// Random bytes in a handle selector.
const SELECTOR_BYTES: usize = 12;
/// Random bytes in a handle verifier.
const VERIFIER_BYTES: usize = 32;
/// PKCE value length bounds (RFC 7636).
const PKCE_MIN_LEN: usize = 43;
/// PKCE value length bounds (RFC 7636).
const PKCE_MAX_LEN: usize = 128;
/// Maximum accepted length of client-supplied parameters.
const MAX_PARAM_BYTES: usize = 2048;

// ============================================================================
// SECTION: Flow State
// ============================================================================

/// Lifecycle of one authorization flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    /// Nothing has been validated yet.
    Idle,
    /// The authorize request was accepted and a record stored.
    AwaitingProviderRedirect,
    /// The user agent was sent to the provider.
    AwaitingProviderCallback,
    /// The provider code was captured and a proxy code issued.
    CodeExchanged,
    /// The client redeemed the proxy code.
    Complete,
    /// The flow was abandoned; terminal.
    Failed,
}

impl FlowState {
    /// Returns true when `next` is a legal successor.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::AwaitingProviderRedirect)
                | (Self::AwaitingProviderRedirect, Self::AwaitingProviderCallback)
                | (Self::AwaitingProviderCallback, Self::CodeExchanged)
                | (Self::CodeExchanged, Self::Complete)
                | (
                    Self::Idle
                        | Self::AwaitingProviderRedirect
                        | Self::AwaitingProviderCallback
                        | Self::CodeExchanged,
                    Self::Failed
                )
        )
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Authorization proxy failures.
///
/// # Invariants
/// - Messages never contain nonces, codes, verifiers, or tokens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProxyError {
    /// A request parameter is missing or malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The client redirect URI is not allow-listed.
    #[error("redirect uri not allowed")]
    RedirectNotAllowed,
    /// Only the authorization code response type is supported.
    #[error("unsupported response type")]
    UnsupportedResponseType,
    /// The grant type is not supported.
    #[error("unsupported grant type")]
    UnsupportedGrantType,
    /// The proxy code or its bindings are invalid.
    #[error("invalid grant: {0}")]
    InvalidGrant(String),
    /// The state nonce is unknown or does not match.
    #[error("correlation mismatch")]
    CorrelationMismatch,
    /// The correlation record outlived its TTL.
    #[error("correlation expired")]
    CorrelationExpired,
    /// Too many outstanding flows.
    #[error("too many pending authorization flows")]
    Capacity,
    /// The provider could not be reached or answered unusably.
    #[error("identity provider unavailable: {0}")]
    Provider(String),
    /// Proxy setup is unusable.
    #[error("proxy misconfigured: {0}")]
    Config(String),
}

impl ProxyError {
    /// Returns the HTTP status and OAuth error code.
    #[must_use]
    pub const fn oauth_error(&self) -> (StatusCode, &'static str) {
        match self {
            Self::InvalidRequest(_)
            | Self::RedirectNotAllowed
            | Self::CorrelationMismatch
            | Self::CorrelationExpired => (StatusCode::BAD_REQUEST, "invalid_request"),
            Self::UnsupportedResponseType => {
                (StatusCode::BAD_REQUEST, "unsupported_response_type")
            }
            Self::UnsupportedGrantType => (StatusCode::BAD_REQUEST, "unsupported_grant_type"),
            Self::InvalidGrant(_) => (StatusCode::BAD_REQUEST, "invalid_grant"),
            Self::Capacity | Self::Provider(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "temporarily_unavailable")
            }
            Self::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error"),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, code) = self.oauth_error();
        let body = json!({
            "error": code,
            "error_description": self.to_string(),
        });
        (status, [(CACHE_CONTROL, HeaderValue::from_static("no-store"))], Json(body))
            .into_response()
    }
}

// ============================================================================
// SECTION: Provider Token Client
// ============================================================================

/// Grant forwarded to the provider token endpoint.
pub enum ProviderGrant {
    /// Authorization code captured at the callback.
    AuthorizationCode {
        /// Provider code.
        code: SecretString,
        /// Client PKCE verifier, forwarded unchanged.
        code_verifier: String,
        /// Callback URI used in the authorize request.
        redirect_uri: String,
        /// Requested scope.
        scope: String,
    },
    /// Refresh token supplied by the client.
    RefreshToken {
        /// Refresh token.
        refresh_token: SecretString,
        /// Requested scope.
        scope: String,
    },
}

/// Provider token endpoint answer, relayed to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderTokenResponse {
    /// HTTP status returned by the provider.
    pub status: u16,
    /// JSON body returned by the provider.
    pub body: Value,
}

/// Client for the provider token endpoint.
#[async_trait]
pub trait ProviderTokenClient: Send + Sync {
    /// Redeems a grant at the provider.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Provider`] when the provider cannot be reached or
    /// its answer is not JSON.
    async fn redeem(&self, grant: ProviderGrant) -> Result<ProviderTokenResponse, ProxyError>;
}

/// [`ProviderTokenClient`] for the Entra ID v2 token endpoint.
pub struct EntraTokenClient {
    /// Token endpoint of the configured tenant.
    endpoint: Url,
    /// Upstream app client id.
    client_id: String,
    /// Upstream app client secret; public clients have none.
    client_secret: Option<SecretString>,
    /// Shared HTTP client.
    client: reqwest::Client,
    /// Maximum accepted response size.
    max_response_bytes: usize,
}

impl EntraTokenClient {
    /// Builds a client for `settings`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderBuildError`] when the HTTP client cannot be created.
    pub fn new(settings: &ProxySettings, http: &HttpClientConfig) -> Result<Self, ProviderBuildError> {
        Ok(Self {
            endpoint: settings.provider_endpoint("token"),
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            client: build_client(http)?,
            max_response_bytes: http.max_response_bytes,
        })
    }
}

#[async_trait]
impl ProviderTokenClient for EntraTokenClient {
    async fn redeem(&self, grant: ProviderGrant) -> Result<ProviderTokenResponse, ProxyError> {
        let mut form: Vec<(&str, &str)> = vec![("client_id", self.client_id.as_str())];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.expose_secret()));
        }
        match &grant {
            ProviderGrant::AuthorizationCode {
                code,
                code_verifier,
                redirect_uri,
                scope,
            } => {
                form.push(("grant_type", "authorization_code"));
                form.push(("code", code.expose_secret()));
                form.push(("code_verifier", code_verifier));
                form.push(("redirect_uri", redirect_uri));
                form.push(("scope", scope));
            }
            ProviderGrant::RefreshToken {
                refresh_token,
                scope,
            } => {
                form.push(("grant_type", "refresh_token"));
                form.push(("refresh_token", refresh_token.expose_secret()));
                form.push(("scope", scope));
            }
        }
        let response = self
            .client
            .post(self.endpoint.clone())
            .form(&form)
            .send()
            .await
            .map_err(|_| ProxyError::Provider("token endpoint request failed".to_string()))?;
        let status = response.status().as_u16();
        let body = read_body_limited(response, self.max_response_bytes).await.map_err(|err| {
            ProxyError::Provider(
                match err {
                    BodyReadError::TooLarge => "token response exceeds size limit",
                    BodyReadError::Transport => "token response interrupted",
                }
                .to_string(),
            )
        })?;
        let body = serde_json::from_slice(&body)
            .map_err(|_| ProxyError::Provider("malformed token response".to_string()))?;
        Ok(ProviderTokenResponse {
            status,
            body,
        })
    }
}

// ============================================================================
// SECTION: Settings
// ============================================================================

/// Resolved proxy settings.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    /// Externally visible base URL of this server.
    pub public_base_url: Url,
    /// Identity provider authority host.
    pub authority_host: Url,
    /// Tenant of the upstream app.
    pub tenant_id: String,
    /// Upstream app client id.
    pub client_id: String,
    /// Upstream app client secret.
    pub client_secret: Option<SecretString>,
    /// Scopes requested when the client asks for none.
    pub scopes: Vec<String>,
    /// Allowed client redirect URIs; a trailing `*` matches by prefix.
    pub allowed_redirect_uris: Vec<String>,
    /// Correlation record lifetime.
    pub record_ttl: Duration,
    /// Maximum outstanding records.
    pub max_records: usize,
}

impl ProxySettings {
    /// Returns `{base}{path}` without a doubled slash.
    fn public_url(&self, path: &str) -> String {
        format!("{}{path}", self.public_base_url.as_str().trim_end_matches('/'))
    }

    /// Returns the provider's v2 `authorize` or `token` endpoint.
    fn provider_endpoint(&self, leaf: &str) -> Url {
        let mut url = self.authority_host.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend([self.tenant_id.as_str(), "oauth2", "v2.0", leaf]);
        }
        url
    }

    /// Returns true when `uri` is allow-listed.
    fn redirect_allowed(&self, uri: &str) -> bool {
        self.allowed_redirect_uris.iter().any(|allowed| {
            allowed
                .strip_suffix('*')
                .map_or_else(|| allowed == uri, |prefix| uri.starts_with(prefix))
        })
    }

    /// Returns the configured scopes as one space-separated string.
    fn default_scope(&self) -> String {
        self.scopes.join(" ")
    }
}

// ============================================================================
// SECTION: Requests
// ============================================================================

/// `GET /authorize` parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorizeRequest {
    /// Must be `code`.
    #[serde(default)]
    pub response_type: String,
    /// Client identifier the proxy code will be bound to.
    #[serde(default)]
    pub client_id: String,
    /// Client redirect URI.
    #[serde(default)]
    pub redirect_uri: String,
    /// Opaque client state echoed back on redirect.
    #[serde(default)]
    pub state: Option<String>,
    /// PKCE challenge.
    #[serde(default)]
    pub code_challenge: String,
    /// PKCE method; only `S256`.
    #[serde(default)]
    pub code_challenge_method: String,
    /// Requested scope.
    #[serde(default)]
    pub scope: Option<String>,
}

/// `GET /oauth/callback` parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackRequest {
    /// State nonce minted at authorize time.
    #[serde(default)]
    pub state: String,
    /// Provider authorization code.
    #[serde(default)]
    pub code: Option<String>,
    /// Provider error code.
    #[serde(default)]
    pub error: Option<String>,
}

/// `POST /token` form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    /// `authorization_code` or `refresh_token`.
    #[serde(default)]
    pub grant_type: String,
    /// Proxy code.
    #[serde(default)]
    pub code: Option<String>,
    /// PKCE verifier.
    #[serde(default)]
    pub code_verifier: Option<String>,
    /// Client redirect URI, which must match the authorize request.
    #[serde(default)]
    pub redirect_uri: Option<String>,
    /// Client identifier, which must match the authorize request.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Refresh token for `refresh_token` grants.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Requested scope for refresh grants.
    #[serde(default)]
    pub scope: Option<String>,
}

// ============================================================================
// SECTION: Correlation Store
// ============================================================================

/// One outstanding flow.
struct CorrelationRecord {
    /// Current flow state.
    state: FlowState,
    /// SHA-256 of the verifier half of the current handle.
    verifier_digest: [u8; 32],
    /// Client identifier.
    client_id: String,
    /// Client redirect URI.
    redirect_uri: String,
    /// Client state.
    client_state: Option<String>,
    /// Client PKCE challenge.
    code_challenge: String,
    /// Scope sent to the provider.
    scope: String,
    /// Provider code, once captured.
    provider_code: Option<SecretString>,
    /// Record expiry.
    expires_at: OffsetDateTime,
}

impl CorrelationRecord {
    /// Moves to `next` when the transition is legal.
    fn advance(&mut self, next: FlowState) -> Result<(), ProxyError> {
        if !self.state.can_transition_to(next) {
            return Err(ProxyError::CorrelationMismatch);
        }
        self.state = next;
        Ok(())
    }
}

/// Freshly minted `selector.verifier` handle.
struct Handle {
    /// Wire value handed out.
    wire: String,
    /// Lookup half.
    selector: String,
    /// Digest of the secret half.
    digest: [u8; 32],
}

impl Handle {
    /// Mints a random handle.
    fn mint() -> Self {
        let mut selector = [0u8; SELECTOR_BYTES];
        let mut verifier = [0u8; VERIFIER_BYTES];
        OsRng.fill_bytes(&mut selector);
        OsRng.fill_bytes(&mut verifier);
        let selector = URL_SAFE_NO_PAD.encode(selector);
        let verifier = URL_SAFE_NO_PAD.encode(verifier);
        Self {
            wire: format!("{selector}.{verifier}"),
            digest: sha256(verifier.as_bytes()),
            selector,
        }
    }
}

/// Splits a wire handle into selector and verifier.
fn split_handle(wire: &str) -> Option<(&str, &str)> {
    let (selector, verifier) = wire.split_once('.')?;
    (!selector.is_empty() && !verifier.is_empty()).then_some((selector, verifier))
}

/// SHA-256 helper.
fn sha256(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

// ============================================================================
// SECTION: Proxy
// ============================================================================

/// Authorization proxy state machine.
pub struct OAuthProxy {
    /// Resolved settings.
    settings: ProxySettings,
    /// Outstanding records keyed by the selector of their current handle.
    records: Mutex<HashMap<String, CorrelationRecord>>,
    /// Provider token endpoint client.
    provider: Arc<dyn ProviderTokenClient>,
    /// Security audit sink.
    audit: Arc<dyn AuditSink>,
}

impl OAuthProxy {
    /// Creates a proxy.
    #[must_use]
    pub fn new(
        settings: ProxySettings,
        provider: Arc<dyn ProviderTokenClient>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            settings,
            records: Mutex::new(HashMap::new()),
            provider,
            audit,
        }
    }

    /// Returns the number of outstanding records.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.records.lock().len()
    }

    /// Starts a flow and returns the provider authorize URL.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError`] for invalid parameters, disallowed redirects,
    /// and a full correlation table.
    pub fn authorize(&self, request: &AuthorizeRequest) -> Result<Url, ProxyError> {
        self.authorize_at(request, OffsetDateTime::now_utc())
    }

    /// [`Self::authorize`] at an explicit instant.
    ///
    /// # Errors
    ///
    /// See [`Self::authorize`].
    pub fn authorize_at(
        &self,
        request: &AuthorizeRequest,
        now: OffsetDateTime,
    ) -> Result<Url, ProxyError> {
        let result = self.start_flow(request, now);
        self.audit_stage("authorize", &result);
        result
    }

    /// Handles the provider callback and returns the client redirect URL.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::CorrelationMismatch`] or
    /// [`ProxyError::CorrelationExpired`] when the state nonce cannot be
    /// matched; the flow is then [`FlowState::Failed`] and no redirect happens.
    pub fn callback(&self, request: &CallbackRequest) -> Result<Url, ProxyError> {
        self.callback_at(request, OffsetDateTime::now_utc())
    }

    /// [`Self::callback`] at an explicit instant.
    ///
    /// # Errors
    ///
    /// See [`Self::callback`].
    pub fn callback_at(
        &self,
        request: &CallbackRequest,
        now: OffsetDateTime,
    ) -> Result<Url, ProxyError> {
        let result = self.finish_provider_leg(request, now);
        self.audit_stage("callback", &result);
        result
    }

    /// Redeems a proxy code or forwards a refresh grant.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError`] for unsupported grants, invalid or replayed
    /// proxy codes, binding mismatches, and provider transport failures.
    pub async fn token(&self, request: &TokenRequest) -> Result<ProviderTokenResponse, ProxyError> {
        self.token_at(request, OffsetDateTime::now_utc()).await
    }

    /// [`Self::token`] at an explicit instant.
    ///
    /// # Errors
    ///
    /// See [`Self::token`].
    pub async fn token_at(
        &self,
        request: &TokenRequest,
        now: OffsetDateTime,
    ) -> Result<ProviderTokenResponse, ProxyError> {
        let result = match request.grant_type.as_str() {
            "authorization_code" => self.redeem_code(request, now).await,
            "refresh_token" => self.forward_refresh(request).await,
            _ => Err(ProxyError::UnsupportedGrantType),
        };
        self.audit_stage("token", &result);
        result
    }

    /// Authorization server metadata (RFC 8414).
    #[must_use]
    pub fn authorization_server_metadata(&self) -> Value {
        json!({
            "issuer": self.settings.public_url(""),
            "authorization_endpoint": self.settings.public_url("/authorize"),
            "token_endpoint": self.settings.public_url("/token"),
            "response_types_supported": ["code"],
            "grant_types_supported": ["authorization_code", "refresh_token"],
            "code_challenge_methods_supported": [PKCE_METHOD_S256],
            "token_endpoint_auth_methods_supported": ["none"],
            "scopes_supported": self.settings.scopes,
        })
    }

    /// Protected resource metadata (RFC 9728).
    #[must_use]
    pub fn protected_resource_metadata(&self) -> Value {
        json!({
            "resource": self.settings.public_url(""),
            "authorization_servers": [self.settings.public_url("")],
            "bearer_methods_supported": ["header"],
            "scopes_supported": self.settings.scopes,
        })
    }

    // ------------------------------------------------------------------------
    // Flow steps
    // ------------------------------------------------------------------------

    /// Validates the authorize request and stores a record.
    fn start_flow(&self, request: &AuthorizeRequest, now: OffsetDateTime) -> Result<Url, ProxyError> {
        if request.response_type != "code" {
            return Err(ProxyError::UnsupportedResponseType);
        }
        require_param("client_id", &request.client_id)?;
        require_param("redirect_uri", &request.redirect_uri)?;
        if Url::parse(&request.redirect_uri).is_err()
            || !self.settings.redirect_allowed(&request.redirect_uri)
        {
            return Err(ProxyError::RedirectNotAllowed);
        }
        if request.code_challenge_method != PKCE_METHOD_S256 {
            return Err(ProxyError::InvalidRequest(
                "code_challenge_method must be S256".to_string(),
            ));
        }
        validate_pkce_value("code_challenge", &request.code_challenge)?;
        if let Some(state) = &request.state {
            require_param("state", state)?;
        }
        let scope = match request.scope.as_deref().map(str::trim) {
            Some(scope) if !scope.is_empty() => {
                require_param("scope", scope)?;
                scope.to_string()
            }
            _ => self.settings.default_scope(),
        };

        let mut record = CorrelationRecord {
            state: FlowState::Idle,
            verifier_digest: [0; 32],
            client_id: request.client_id.clone(),
            redirect_uri: request.redirect_uri.clone(),
            client_state: request.state.clone(),
            code_challenge: request.code_challenge.clone(),
            scope,
            provider_code: None,
            expires_at: now + self.settings.record_ttl,
        };
        let handle = Handle::mint();
        record.verifier_digest = handle.digest;
        record.advance(FlowState::AwaitingProviderRedirect)?;

        let mut url = self.settings.provider_endpoint("authorize");
        url.query_pairs_mut()
            .append_pair("client_id", &self.settings.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.settings.public_url(CALLBACK_PATH))
            .append_pair("response_mode", "query")
            .append_pair("scope", &record.scope)
            .append_pair("state", &handle.wire)
            .append_pair("code_challenge", &record.code_challenge)
            .append_pair("code_challenge_method", PKCE_METHOD_S256);
        record.advance(FlowState::AwaitingProviderCallback)?;

        let mut records = self.records.lock();
        records.retain(|_, existing| now < existing.expires_at);
        if records.len() >= self.settings.max_records {
            return Err(ProxyError::Capacity);
        }
        records.insert(handle.selector, record);
        drop(records);
        Ok(url)
    }

    /// Matches the callback to its record and issues a proxy code.
    fn finish_provider_leg(
        &self,
        request: &CallbackRequest,
        now: OffsetDateTime,
    ) -> Result<Url, ProxyError> {
        let mut record =
            self.take_record(&request.state, now, FlowState::AwaitingProviderCallback)?;
        let mut redirect = Url::parse(&record.redirect_uri)
            .map_err(|_| ProxyError::Config("stored redirect uri unparseable".to_string()))?;

        if let Some(error) = request.error.as_deref() {
            record.advance(FlowState::Failed)?;
            let code = if is_oauth_error_code(error) { error } else { "access_denied" };
            append_client_params(&mut redirect, "error", code, record.client_state.as_deref());
            return Ok(redirect);
        }
        let Some(code) = request.code.as_deref().filter(|code| !code.is_empty()) else {
            record.advance(FlowState::Failed)?;
            append_client_params(
                &mut redirect,
                "error",
                "server_error",
                record.client_state.as_deref(),
            );
            return Ok(redirect);
        };

        record.provider_code = Some(SecretString::new(code.into()));
        record.advance(FlowState::CodeExchanged)?;
        let handle = Handle::mint();
        record.verifier_digest = handle.digest;
        append_client_params(&mut redirect, "code", &handle.wire, record.client_state.as_deref());

        let mut records = self.records.lock();
        records.insert(handle.selector, record);
        drop(records);
        Ok(redirect)
    }

    /// Redeems a one-time proxy code.
    async fn redeem_code(
        &self,
        request: &TokenRequest,
        now: OffsetDateTime,
    ) -> Result<ProviderTokenResponse, ProxyError> {
        let code = request
            .code
            .as_deref()
            .ok_or_else(|| ProxyError::InvalidRequest("code is required".to_string()))?;
        let verifier = request
            .code_verifier
            .as_deref()
            .ok_or_else(|| ProxyError::InvalidRequest("code_verifier is required".to_string()))?;
        validate_pkce_value("code_verifier", verifier)?;

        let mut record = self.take_record(code, now, FlowState::CodeExchanged).map_err(|err| {
            match err {
                ProxyError::CorrelationMismatch => {
                    ProxyError::InvalidGrant("unknown or used code".to_string())
                }
                ProxyError::CorrelationExpired => ProxyError::InvalidGrant("code expired".to_string()),
                other => other,
            }
        })?;
        if request.client_id.as_deref() != Some(record.client_id.as_str()) {
            record.advance(FlowState::Failed)?;
            return Err(ProxyError::InvalidGrant("client_id mismatch".to_string()));
        }
        if request.redirect_uri.as_deref() != Some(record.redirect_uri.as_str()) {
            record.advance(FlowState::Failed)?;
            return Err(ProxyError::InvalidGrant("redirect_uri mismatch".to_string()));
        }
        let computed = URL_SAFE_NO_PAD.encode(sha256(verifier.as_bytes()));
        if !bool::from(computed.as_bytes().ct_eq(record.code_challenge.as_bytes())) {
            record.advance(FlowState::Failed)?;
            return Err(ProxyError::InvalidGrant("code_verifier mismatch".to_string()));
        }
        let Some(provider_code) = record.provider_code.take() else {
            record.advance(FlowState::Failed)?;
            return Err(ProxyError::InvalidGrant("no provider code".to_string()));
        };

        let response = self
            .provider
            .redeem(ProviderGrant::AuthorizationCode {
                code: provider_code,
                code_verifier: verifier.to_string(),
                redirect_uri: self.settings.public_url(CALLBACK_PATH),
                scope: record.scope.clone(),
            })
            .await?;
        record.advance(FlowState::Complete)?;
        Ok(response)
    }

    /// Forwards a refresh grant unchanged.
    async fn forward_refresh(
        &self,
        request: &TokenRequest,
    ) -> Result<ProviderTokenResponse, ProxyError> {
        let refresh_token = request
            .refresh_token
            .as_deref()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ProxyError::InvalidRequest("refresh_token is required".to_string()))?;
        let scope = match request.scope.as_deref().map(str::trim) {
            Some(scope) if !scope.is_empty() => scope.to_string(),
            _ => self.settings.default_scope(),
        };
        self.provider
            .redeem(ProviderGrant::RefreshToken {
                refresh_token: SecretString::new(refresh_token.into()),
                scope,
            })
            .await
    }

    /// Removes and verifies the record addressed by `wire`.
    ///
    /// The record leaves the table on every path, so a handle is usable once.
    fn take_record(
        &self,
        wire: &str,
        now: OffsetDateTime,
        expected: FlowState,
    ) -> Result<CorrelationRecord, ProxyError> {
        let (selector, verifier) = split_handle(wire).ok_or(ProxyError::CorrelationMismatch)?;
        let mut record =
            self.records.lock().remove(selector).ok_or(ProxyError::CorrelationMismatch)?;
        let digest = sha256(verifier.as_bytes());
        if !bool::from(digest.as_slice().ct_eq(record.verifier_digest.as_slice())) || record.state != expected {
            record.advance(FlowState::Failed)?;
            return Err(ProxyError::CorrelationMismatch);
        }
        if now >= record.expires_at {
            record.advance(FlowState::Failed)?;
            return Err(ProxyError::CorrelationExpired);
        }
        Ok(record)
    }

    /// Records an audit event for a flow step.
    fn audit_stage<T>(&self, stage: &str, result: &Result<T, ProxyError>) {
        let event = match result {
            Ok(_) => AuditEvent::proxy(stage, true, None),
            Err(err) => AuditEvent::proxy(stage, false, Some(err.to_string())),
        };
        self.audit.record(&event);
        if let Err(err) = result {
            tracing::warn!(stage, error = %err, "authorization proxy step failed");
        }
    }
}

// ============================================================================
// SECTION: Validation Helpers
// ============================================================================

/// Rejects empty or oversized parameters.
fn require_param(name: &str, value: &str) -> Result<(), ProxyError> {
    if value.trim().is_empty() {
        return Err(ProxyError::InvalidRequest(format!("{name} is required")));
    }
    if value.len() > MAX_PARAM_BYTES {
        return Err(ProxyError::InvalidRequest(format!("{name} too long")));
    }
    Ok(())
}

/// Validates a PKCE challenge or verifier (RFC 7636 unreserved characters).
fn validate_pkce_value(name: &str, value: &str) -> Result<(), ProxyError> {
    let valid_len = (PKCE_MIN_LEN..=PKCE_MAX_LEN).contains(&value.len());
    let valid_chars =
        value.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'));
    if valid_len && valid_chars {
        Ok(())
    } else {
        Err(ProxyError::InvalidRequest(format!("{name} is malformed")))
    }
}

/// Returns true for a plausible OAuth error code.
fn is_oauth_error_code(value: &str) -> bool {
    !value.is_empty() && value.len() <= 64 && value.bytes().all(|b| b.is_ascii_lowercase() || b == b'_')
}

/// Appends `key=value` and the client state to a client redirect.
fn append_client_params(url: &mut Url, key: &str, value: &str, client_state: Option<&str>) {
    let mut query = url.query_pairs_mut();
    query.append_pair(key, value);
    if let Some(state) = client_state {
        query.append_pair("state", state);
    }
}

// ============================================================================
// SECTION: HTTP Endpoints
// ============================================================================

/// Builds the proxy routes.
pub fn routes(proxy: Arc<OAuthProxy>) -> Router {
    Router::new()
        .route("/.well-known/oauth-authorization-server", get(authorization_server_metadata))
        .route("/.well-known/oauth-protected-resource", get(protected_resource_metadata))
        .route("/authorize", get(authorize))
        .route(CALLBACK_PATH, get(callback))
        .route("/token", post(token))
        .with_state(proxy)
}

/// `GET /.well-known/oauth-authorization-server`.
async fn authorization_server_metadata(State(proxy): State<Arc<OAuthProxy>>) -> Json<Value> {
    Json(proxy.authorization_server_metadata())
}

/// `GET /.well-known/oauth-protected-resource`.
async fn protected_resource_metadata(State(proxy): State<Arc<OAuthProxy>>) -> Json<Value> {
    Json(proxy.protected_resource_metadata())
}

/// `GET /authorize`.
async fn authorize(
    State(proxy): State<Arc<OAuthProxy>>,
    Query(request): Query<AuthorizeRequest>,
) -> Result<Response, ProxyError> {
    let url = proxy.authorize(&request)?;
    Ok(found(&url))
}

/// `GET /oauth/callback`.
async fn callback(
    State(proxy): State<Arc<OAuthProxy>>,
    Query(request): Query<CallbackRequest>,
) -> Result<Response, ProxyError> {
    let url = proxy.callback(&request)?;
    Ok(found(&url))
}

/// `POST /token`.
async fn token(
    State(proxy): State<Arc<OAuthProxy>>,
    Form(request): Form<TokenRequest>,
) -> Result<Response, ProxyError> {
    let response = proxy.token(&request).await?;
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    Ok((status, [(CACHE_CONTROL, HeaderValue::from_static("no-store"))], Json(response.body))
        .into_response())
}

/// Builds a `302 Found` redirect.
fn found(url: &Url) -> Response {
    match HeaderValue::from_str(url.as_str()) {
        Ok(location) => (StatusCode::FOUND, [(LOCATION, location)]).into_response(),
        Err(_) => ProxyError::Config("redirect url not a valid header".to_string()).into_response(),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test assertions use unwrap for clarity.")]

    use super::*;

    #[test]
    fn transitions_follow_the_flow() {
        assert!(FlowState::Idle.can_transition_to(FlowState::AwaitingProviderRedirect));
        assert!(FlowState::CodeExchanged.can_transition_to(FlowState::Complete));
        assert!(FlowState::AwaitingProviderCallback.can_transition_to(FlowState::Failed));
        assert!(!FlowState::Idle.can_transition_to(FlowState::CodeExchanged));
        assert!(!FlowState::Complete.can_transition_to(FlowState::Failed));
        assert!(!FlowState::Failed.can_transition_to(FlowState::Idle));
    }

    #[test]
    fn handles_split_on_first_dot() {
        let handle = Handle::mint();
        let (selector, verifier) = split_handle(&handle.wire).unwrap();
        assert_eq!(selector, handle.selector);
        assert_eq!(sha256(verifier.as_bytes()), handle.digest);
        assert!(split_handle("no-dot").is_none());
        assert!(split_handle(".verifier").is_none());
    }

    #[test]
    fn pkce_values_follow_rfc_7636() {
        assert!(validate_pkce_value("v", &"a".repeat(43)).is_ok());
        assert!(validate_pkce_value("v", &"a".repeat(42)).is_err());
        assert!(validate_pkce_value("v", &"a".repeat(129)).is_err());
        assert!(validate_pkce_value("v", &format!("{}+", "a".repeat(43))).is_err());
    }

    #[test]
    fn provider_error_codes_are_filtered() {
        assert!(is_oauth_error_code("access_denied"));
        assert!(!is_oauth_error_code("<script>"));
        assert!(!is_oauth_error_code(""));
    }
}
