// crates/az-scout-providers/src/entra.rs
// ============================================================================
// Module: Entra ID Token Exchanger
// Description: On-Behalf-Of exchange and managed identity token acquisition.
// Purpose: Implement `TokenExchanger` against the Microsoft identity platform.
// Dependencies: az-scout-core, reqwest, secrecy, serde
// ============================================================================

//! ## Overview
//! Delegated exchanges post a `jwt-bearer` grant with
//! `requested_token_use=on_behalf_of` to `{authority}/{tenant}/oauth2/v2.0/token`.
//! Platform tokens come from the managed identity endpoint with the
//! `Metadata: true` header. Provider failures are classified into the core
//! [`TokenError`] taxonomy from the OAuth `error` field and the first
//! `AADSTS` code; error descriptions are never copied into the result because
//! they can echo request parameters.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use az_scout_core::Audience;
use az_scout_core::CallerAssertion;
use az_scout_core::ExchangedToken;
use az_scout_core::TenantId;
use az_scout_core::TokenError;
use az_scout_core::TokenExchanger;
use reqwest::Client;
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use secrecy::SecretString;
use serde::Deserialize;
use serde::Deserializer;
use url::Url;

use crate::http::BodyReadError;
use crate::http::HttpClientConfig;
use crate::http::ProviderBuildError;
use crate::http::build_client;
use crate::http::read_body_limited;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// OAuth grant type for On-Behalf-Of exchanges.
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// Managed identity endpoint API version.
const IMDS_API_VERSION: &str = "2018-02-01";
/// AADSTS codes that require the user to consent or re-authenticate.
const CONSENT_CODES: &[u32] = &[65001, 65004, 50076, 50079, 50158, 53003];

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Delegated app registration used for On-Behalf-Of exchanges.
#[derive(Debug, Clone)]
pub struct OboCredentials {
    /// App (client) id.
    pub client_id: String,
    /// App client secret.
    pub client_secret: SecretString,
}

/// Entra ID exchanger configuration.
#[derive(Debug, Clone)]
pub struct EntraConfig {
    /// Authority host, for example `https://login.microsoftonline.com`.
    pub authority_host: String,
    /// Managed identity token endpoint.
    pub imds_endpoint: String,
    /// Client id of a user-assigned managed identity.
    pub managed_identity_client_id: Option<String>,
    /// Delegated credentials; `None` disables On-Behalf-Of.
    pub obo: Option<OboCredentials>,
    /// Transport limits.
    pub http: HttpClientConfig,
}

// ============================================================================
// SECTION: Exchanger
// ============================================================================

/// [`TokenExchanger`] backed by Entra ID.
pub struct EntraTokenExchanger {
    /// Exchanger configuration.
    config: EntraConfig,
    /// Parsed authority host.
    authority: Url,
    /// Parsed managed identity endpoint.
    imds: Url,
    /// Shared HTTP client.
    client: Client,
}

impl EntraTokenExchanger {
    /// Builds an exchanger.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderBuildError`] when an endpoint is not a valid URL or
    /// the HTTP client cannot be created.
    pub fn new(config: EntraConfig) -> Result<Self, ProviderBuildError> {
        let authority = Url::parse(config.authority_host.trim_end_matches('/'))
            .map_err(|_| ProviderBuildError::Endpoint("authority host".to_string()))?;
        let imds = Url::parse(&config.imds_endpoint)
            .map_err(|_| ProviderBuildError::Endpoint("managed identity endpoint".to_string()))?;
        let client = build_client(&config.http)?;
        Ok(Self {
            config,
            authority,
            imds,
            client,
        })
    }

    /// Returns the token endpoint for `tenant`.
    fn token_endpoint(&self, tenant: &TenantId) -> Result<Url, TokenError> {
        let mut url = self.authority.clone();
        url.path_segments_mut()
            .map_err(|()| TokenError::NotConfigured("authority host cannot be a base".to_string()))?
            .pop_if_empty()
            .extend([tenant.as_str(), "oauth2", "v2.0", "token"]);
        Ok(url)
    }

    /// Reads and decodes a token endpoint response.
    async fn read_token_response(
        &self,
        response: reqwest::Response,
    ) -> Result<ExchangedToken, TokenError> {
        let status = response.status();
        let body = read_body_limited(response, self.config.http.max_response_bytes)
            .await
            .map_err(|err| match err {
                BodyReadError::TooLarge => {
                    TokenError::Transient("token response exceeds size limit".to_string())
                }
                BodyReadError::Transport => {
                    TokenError::Transient("token response interrupted".to_string())
                }
            })?;
        if status.is_success() {
            let parsed: TokenResponse = serde_json::from_slice(&body)
                .map_err(|_| TokenError::Transient("malformed token response".to_string()))?;
            if parsed.access_token.is_empty() {
                return Err(TokenError::Transient("token response missing access_token".to_string()));
            }
            return Ok(ExchangedToken {
                token: SecretString::new(parsed.access_token.into_boxed_str()),
                expires_in: Duration::from_secs(parsed.expires_in),
            });
        }
        let error = serde_json::from_slice::<ErrorResponse>(&body).unwrap_or_default();
        Err(classify_failure(status, &error))
    }
}

#[async_trait]
impl TokenExchanger for EntraTokenExchanger {
    fn delegated_enabled(&self) -> bool {
        self.config.obo.is_some()
    }

    async fn exchange_on_behalf_of(
        &self,
        assertion: &CallerAssertion,
        tenant: &TenantId,
        audience: &Audience,
    ) -> Result<ExchangedToken, TokenError> {
        let Some(obo) = &self.config.obo else {
            return Err(TokenError::NotConfigured("delegated credentials absent".to_string()));
        };
        let url = self.token_endpoint(tenant)?;
        let form = [
            ("grant_type", JWT_BEARER_GRANT),
            ("client_id", obo.client_id.as_str()),
            ("client_secret", obo.client_secret.expose_secret()),
            ("assertion", assertion.expose()),
            ("scope", audience.as_str()),
            ("requested_token_use", "on_behalf_of"),
        ];
        let response = self
            .client
            .post(url)
            .form(&form)
            .send()
            .await
            .map_err(|err| TokenError::Transient(transport_detail(&err)))?;
        self.read_token_response(response).await
    }

    async fn acquire_platform(&self, audience: &Audience) -> Result<ExchangedToken, TokenError> {
        let mut url = self.imds.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("api-version", IMDS_API_VERSION);
            query.append_pair("resource", audience.resource());
            if let Some(client_id) = &self.config.managed_identity_client_id {
                query.append_pair("client_id", client_id);
            }
        }
        let response = self
            .client
            .get(url)
            .header("Metadata", "true")
            .send()
            .await
            .map_err(|err| TokenError::Transient(transport_detail(&err)))?;
        match self.read_token_response(response).await {
            Err(TokenError::InvalidCaller(detail) | TokenError::ConsentRequired(detail)) => {
                Err(TokenError::NotConfigured(format!("managed identity rejected request: {detail}")))
            }
            other => other,
        }
    }
}

// ============================================================================
// SECTION: Wire Types
// ============================================================================

/// Successful token endpoint response.
#[derive(Deserialize)]
struct TokenResponse {
    /// Issued token.
    #[serde(default)]
    access_token: String,
    /// Lifetime in seconds; managed identity reports it as a string.
    #[serde(deserialize_with = "number_or_string")]
    expires_in: u64,
}

/// OAuth error response.
#[derive(Debug, Default, Deserialize)]
struct ErrorResponse {
    /// OAuth error code.
    #[serde(default)]
    error: String,
    /// AADSTS numeric codes.
    #[serde(default)]
    error_codes: Vec<u32>,
    /// Conditional access claims challenge.
    #[serde(default)]
    suberror: Option<String>,
}

/// Accepts `3599` or `"3599"`.
fn number_or_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Number(value) => Ok(value),
        Raw::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

// ============================================================================
// SECTION: Classification
// ============================================================================

/// Maps a failed token response to the core taxonomy.
fn classify_failure(status: StatusCode, error: &ErrorResponse) -> TokenError {
    let code = error.error_codes.first().copied();
    let detail = match code {
        Some(code) => format!("AADSTS{code}"),
        None if error.error.is_empty() => format!("http {}", status.as_u16()),
        None => error.error.clone(),
    };
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || error.error == "temporarily_unavailable"
    {
        return TokenError::Transient(detail);
    }
    if code.is_some_and(|code| CONSENT_CODES.contains(&code))
        || matches!(error.error.as_str(), "interaction_required" | "consent_required")
        || error.suberror.is_some()
    {
        return TokenError::ConsentRequired(detail);
    }
    match error.error.as_str() {
        "invalid_client" | "unauthorized_client" => {
            TokenError::NotConfigured(format!("delegated app rejected: {detail}"))
        }
        _ => TokenError::InvalidCaller(detail),
    }
}

/// Sanitized transport failure description.
fn transport_detail(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "token endpoint timed out".to_string()
    } else if err.is_connect() {
        "token endpoint unreachable".to_string()
    } else {
        "token endpoint request failed".to_string()
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
