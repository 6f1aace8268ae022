// crates/az-scout-providers/src/http.rs
// ============================================================================
// Module: Provider HTTP Helpers
// Description: Shared client construction and bounded body reads.
// Purpose: Apply one set of timeouts and size limits to every outbound call.
// Dependencies: reqwest
// ============================================================================

//! ## Overview
//! Clients never follow redirects, so bearer tokens are only ever sent to the
//! configured host. Bodies are streamed chunk by chunk and rejected once they
//! pass the configured limit, whether or not `Content-Length` was honest.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use reqwest::Client;
use reqwest::Response;
use reqwest::header::HeaderMap;
use reqwest::header::RETRY_AFTER;
use reqwest::redirect::Policy;
use thiserror::Error;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Transport limits shared by all providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpClientConfig {
    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,
    /// Whole-request timeout.
    pub request_timeout: Duration,
    /// Maximum accepted response body.
    pub max_response_bytes: usize,
    /// User agent for outbound requests.
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(15),
            max_response_bytes: 8 * 1024 * 1024,
            user_agent: concat!("az-scout/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Provider construction failures.
#[derive(Debug, Error)]
pub enum ProviderBuildError {
    /// The HTTP client could not be created.
    #[error("http client build failed: {0}")]
    Client(String),
    /// A configured endpoint is unusable.
    #[error("invalid endpoint: {0}")]
    Endpoint(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds a client with redirects disabled.
///
/// # Errors
///
/// Returns [`ProviderBuildError::Client`] when the TLS backend cannot be initialized.
pub fn build_client(config: &HttpClientConfig) -> Result<Client, ProviderBuildError> {
    Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.request_timeout)
        .user_agent(config.user_agent.clone())
        .redirect(Policy::none())
        .build()
        .map_err(|err| ProviderBuildError::Client(err.to_string()))
}

/// Failure while reading a response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyReadError {
    /// The body exceeded the configured limit.
    TooLarge,
    /// The connection failed mid-body.
    Transport,
}

/// Reads the full body, failing once it exceeds `limit` bytes.
///
/// # Errors
///
/// Returns [`BodyReadError`] when the body is too large or the connection drops.
pub async fn read_body_limited(
    mut response: Response,
    limit: usize,
) -> Result<Vec<u8>, BodyReadError> {
    if let Some(declared) = response.content_length()
        && usize::try_from(declared).unwrap_or(usize::MAX) > limit
    {
        return Err(BodyReadError::TooLarge);
    }
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(|_| BodyReadError::Transport)? {
        if body.len().saturating_add(chunk.len()) > limit {
            return Err(BodyReadError::TooLarge);
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// Parses a delta-seconds `Retry-After` header.
///
/// HTTP-date values are ignored; the caller falls back to its own backoff.
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?;
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Converts a duration to whole milliseconds for log fields.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// SECTION: Tests
// ============================================================================
