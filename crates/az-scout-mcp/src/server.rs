// crates/az-scout-mcp/src/server.rs
// ============================================================================
// Module: MCP Server
// Description: JSON-RPC 2.0 MCP server over HTTP and stdio.
// Purpose: Wire configuration into the scan engine and expose it as MCP tools.
// Dependencies: axum, az-scout-config, az-scout-core, az-scout-providers, tokio
// ============================================================================

//! ## Overview
//! [`McpServer::from_config`] builds the whole stack: the Entra ID exchanger
//! and ARM probe, the shared credential cache, the token broker, the scan
//! coordinator, the tool router, and (when enabled) the authorization proxy.
//! Every request gets its own cancellation token; on HTTP it fires when the
//! client goes away and the handler future is dropped.
//!
//! Security posture: request bodies are size-limited before parsing, and
//! errors returned to clients carry sanitized messages only.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::ConnectInfo;
use axum::extract::DefaultBodyLimit;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::http::header::WWW_AUTHENTICATE;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::post;
use az_scout_config::AzScoutConfig;
use az_scout_config::ServerTransport;
use az_scout_core::CredentialCache;
use az_scout_core::ScanCoordinator;
use az_scout_core::TokenBroker;
use az_scout_providers::ArmProbeConfig;
use az_scout_providers::ArmResourceProbe;
use az_scout_providers::EntraConfig;
use az_scout_providers::EntraTokenExchanger;
use az_scout_providers::HttpClientConfig;
use az_scout_providers::OboCredentials;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use tokio::io::AsyncBufRead;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::audit::AuditSink;
use crate::audit::NoopAuditSink;
use crate::audit::StderrAuditSink;
use crate::identity::RequestContext;
use crate::oauth_proxy;
use crate::oauth_proxy::EntraTokenClient;
use crate::oauth_proxy::OAuthProxy;
use crate::oauth_proxy::ProxySettings;
use crate::tools::ScanDefaults;
use crate::tools::ToolDefinition;
use crate::tools::ToolError;
use crate::tools::ToolRouter;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// MCP protocol revision reported by `initialize`.
pub const MCP_PROTOCOL_VERSION: &str = "2025-06-18";
/// Server name reported by `initialize`.
const SERVER_NAME: &str = "az-scout";

// ============================================================================
// SECTION: MCP Server
// ============================================================================

/// MCP server instance.
pub struct McpServer {
    /// Server configuration.
    config: AzScoutConfig,
    /// Shared request-handling state.
    state: Arc<ServerState>,
    /// Authorization proxy, when enabled.
    proxy: Option<Arc<OAuthProxy>>,
}

/// State shared by all transports.
struct ServerState {
    /// Tool router for request dispatch.
    router: ToolRouter,
    /// Maximum accepted request body.
    max_body_bytes: usize,
    /// Challenge sent with 401 responses when the proxy is enabled.
    www_authenticate: Option<HeaderValue>,
}

impl McpServer {
    /// Builds a new MCP server from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`McpServerError`] when validation or provider setup fails.
    pub fn from_config(config: AzScoutConfig) -> Result<Self, McpServerError> {
        config.validate().map_err(|err| McpServerError::Config(err.to_string()))?;
        let http = http_client_config(&config);
        let audit: Arc<dyn AuditSink> = if config.logging.audit {
            Arc::new(StderrAuditSink)
        } else {
            Arc::new(NoopAuditSink)
        };

        let exchanger = EntraTokenExchanger::new(EntraConfig {
            authority_host: config.identity.authority_host.clone(),
            imds_endpoint: config.identity.imds_endpoint.clone(),
            managed_identity_client_id: config.identity.managed_identity_client_id.clone(),
            obo: obo_credentials(&config),
            http: http.clone(),
        })
        .map_err(|err| McpServerError::Init(err.to_string()))?;
        let probe = ArmResourceProbe::new(ArmProbeConfig {
            endpoint: config.identity.arm_endpoint.clone(),
            retry: config.retry.policy(),
            max_retry_after: config.retry.max_retry_after(),
            http: http.clone(),
            ..ArmProbeConfig::default()
        })
        .map_err(|err| McpServerError::Init(err.to_string()))?;

        let cache = Arc::new(CredentialCache::new());
        let broker = Arc::new(TokenBroker::new(Arc::new(exchanger), cache, config.broker_config()));
        let coordinator =
            Arc::new(ScanCoordinator::new(broker, Arc::new(probe), config.coordinator_config()));
        let router = ToolRouter::new(
            coordinator,
            ScanDefaults {
                subscriptions: config.scan.subscriptions.clone(),
                regions: config.scan.regions.clone(),
                include_skus: config.scan.include_skus,
            },
            Arc::clone(&audit),
        );

        let proxy = if config.oauth_proxy.enabled {
            let settings = proxy_settings(&config)?;
            let client = EntraTokenClient::new(&settings, &http)
                .map_err(|err| McpServerError::Init(err.to_string()))?;
            Some(Arc::new(OAuthProxy::new(settings, Arc::new(client), audit)))
        } else {
            None
        };
        tracing::info!(
            transport = match config.server.transport {
                ServerTransport::Stdio => "stdio",
                ServerTransport::Http => "http",
            },
            delegated = config.identity.obo_enabled(),
            oauth_proxy = proxy.is_some(),
            "mcp server configured"
        );
        Ok(Self::with_router(config, router, proxy))
    }

    /// Builds a server around an existing router.
    #[must_use]
    pub fn with_router(
        config: AzScoutConfig,
        router: ToolRouter,
        proxy: Option<Arc<OAuthProxy>>,
    ) -> Self {
        let www_authenticate = proxy.as_ref().and_then(|_| {
            let base = config.server.public_base_url.as_deref()?.trim_end_matches('/');
            HeaderValue::from_str(&format!(
                "Bearer resource_metadata=\"{base}/.well-known/oauth-protected-resource\""
            ))
            .ok()
        });
        let state = Arc::new(ServerState {
            router,
            max_body_bytes: config.server.max_body_bytes,
            www_authenticate,
        });
        Self {
            config,
            state,
            proxy,
        }
    }

    /// Handles one raw JSON-RPC payload.
    ///
    /// Returns `None` for notifications, which get no response.
    pub async fn handle_payload(
        &self,
        context: &RequestContext,
        bytes: &[u8],
        cancel: &CancellationToken,
    ) -> Option<RpcReply> {
        parse_request(&self.state, context, bytes, cancel).await
    }

    /// Builds the HTTP application: `/mcp` plus the proxy endpoints.
    #[must_use]
    pub fn http_app(&self) -> Router {
        let app = Router::new()
            .route("/mcp", post(handle_http))
            .layer(DefaultBodyLimit::max(self.state.max_body_bytes))
            .with_state(Arc::clone(&self.state));
        match &self.proxy {
            Some(proxy) => app.merge(oauth_proxy::routes(Arc::clone(proxy))),
            None => app,
        }
    }

    /// Serves requests on the configured transport until shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`McpServerError`] when the transport fails.
    pub async fn serve(self) -> Result<(), McpServerError> {
        match self.config.server.transport {
            ServerTransport::Stdio => {
                let mut reader = BufReader::new(tokio::io::stdin());
                let mut writer = tokio::io::stdout();
                serve_stdio(&self.state, &mut reader, &mut writer).await
            }
            ServerTransport::Http => self.serve_http().await,
        }
    }

    /// Serves JSON-RPC requests over HTTP.
    async fn serve_http(&self) -> Result<(), McpServerError> {
        let addr = self
            .config
            .server
            .bind_addr()
            .map_err(|err| McpServerError::Config(err.to_string()))?;
        let app = self.http_app();
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|_| McpServerError::Transport("http bind failed".to_string()))?;
        tracing::info!(%addr, "mcp http transport listening");
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|_| McpServerError::Transport("http server failed".to_string()))
    }
}

/// Maps identity transport limits onto the provider HTTP config.
fn http_client_config(config: &AzScoutConfig) -> HttpClientConfig {
    HttpClientConfig {
        connect_timeout: Duration::from_millis(config.identity.connect_timeout_ms),
        request_timeout: Duration::from_millis(config.identity.request_timeout_ms),
        max_response_bytes: config.identity.max_response_bytes,
        ..HttpClientConfig::default()
    }
}

/// Returns delegated credentials when all three values are configured.
fn obo_credentials(config: &AzScoutConfig) -> Option<OboCredentials> {
    let identity = &config.identity;
    match (&identity.obo_client_id, &identity.obo_client_secret, &identity.obo_tenant_id) {
        (Some(client_id), Some(client_secret), Some(_)) => Some(OboCredentials {
            client_id: client_id.clone(),
            client_secret: client_secret.clone(),
        }),
        _ => None,
    }
}

/// Resolves proxy settings from the validated configuration.
fn proxy_settings(config: &AzScoutConfig) -> Result<ProxySettings, McpServerError> {
    let proxy = &config.oauth_proxy;
    let identity = &config.identity;
    let missing = |field: &str| McpServerError::Config(format!("oauth_proxy requires {field}"));
    let public_base_url = config
        .server
        .public_base_url
        .as_deref()
        .ok_or_else(|| missing("server.public_base_url"))
        .and_then(|raw| Url::parse(raw).map_err(|_| missing("a valid server.public_base_url")))?;
    let authority_host = Url::parse(&identity.authority_host)
        .map_err(|_| missing("a valid identity.authority_host"))?;
    Ok(ProxySettings {
        public_base_url,
        authority_host,
        tenant_id: proxy.effective_tenant_id(identity).ok_or_else(|| missing("tenant_id"))?.to_string(),
        client_id: proxy.effective_client_id(identity).ok_or_else(|| missing("client_id"))?.to_string(),
        client_secret: proxy.effective_client_secret(identity).cloned(),
        scopes: proxy.scopes.clone(),
        allowed_redirect_uris: proxy.allowed_redirect_uris.clone(),
        record_ttl: time::Duration::seconds(i64::try_from(proxy.record_ttl_secs).unwrap_or(i64::MAX)),
        max_records: proxy.max_records,
    })
}

/// Resolves when the process receives Ctrl-C.
async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

// ============================================================================
// SECTION: Stdio Transport
// ============================================================================

/// Serves framed JSON-RPC requests until the reader reaches end of input.
async fn serve_stdio<R, W>(
    state: &ServerState,
    reader: &mut R,
    writer: &mut W,
) -> Result<(), McpServerError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let context = RequestContext::stdio();
    while let Some(bytes) = read_framed(reader, state.max_body_bytes).await? {
        let cancel = CancellationToken::new();
        let Some(reply) = parse_request(state, &context, &bytes, &cancel).await else {
            continue;
        };
        let payload = serde_json::to_vec(&reply.body)
            .map_err(|_| McpServerError::Transport("json-rpc serialization failed".to_string()))?;
        write_framed(writer, &payload).await?;
    }
    tracing::info!("stdio closed");
    Ok(())
}

// ============================================================================
// SECTION: HTTP Transport
// ============================================================================

/// Handles HTTP JSON-RPC requests.
async fn handle_http(
    State(state): State<Arc<ServerState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Response {
    let context = RequestContext::http(Some(peer.ip()), &headers);
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    let Some(reply) = parse_request(&state, &context, &bytes, &cancel).await else {
        return StatusCode::ACCEPTED.into_response();
    };
    let mut response = (reply.status, axum::Json(reply.body)).into_response();
    if reply.status == StatusCode::UNAUTHORIZED
        && let Some(challenge) = &state.www_authenticate
    {
        response.headers_mut().insert(WWW_AUTHENTICATE, challenge.clone());
    }
    response
}

// ============================================================================
// SECTION: JSON-RPC Handling
// ============================================================================

/// Incoming JSON-RPC request payload.
#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    /// JSON-RPC protocol version.
    jsonrpc: String,
    /// Request identifier; absent for notifications.
    #[serde(default)]
    id: Option<Value>,
    /// Method name.
    method: String,
    /// Optional method parameters.
    #[serde(default)]
    params: Option<Value>,
}

/// JSON-RPC response payload.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC protocol version.
    pub jsonrpc: &'static str,
    /// Request identifier.
    pub id: Value,
    /// Result payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC error payload.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i64,
    /// Error message.
    pub message: String,
}

/// Response plus the HTTP status it travels with.
#[derive(Debug)]
pub struct RpcReply {
    /// HTTP status.
    pub status: StatusCode,
    /// JSON-RPC body.
    pub body: JsonRpcResponse,
}

impl RpcReply {
    /// Builds a success reply.
    const fn ok(id: Value, result: Value) -> Self {
        Self {
            status: StatusCode::OK,
            body: JsonRpcResponse {
                jsonrpc: "2.0",
                id,
                result: Some(result),
                error: None,
            },
        }
    }

    /// Builds an error reply.
    fn error(status: StatusCode, id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            status,
            body: JsonRpcResponse {
                jsonrpc: "2.0",
                id,
                result: None,
                error: Some(JsonRpcError {
                    code,
                    message: message.into(),
                }),
            },
        }
    }
}

/// Tool call parameters.
#[derive(Debug, Deserialize)]
struct ToolCallParams {
    /// Tool name.
    name: String,
    /// Tool arguments.
    #[serde(default)]
    arguments: Value,
}

/// `tools/list` result.
#[derive(Debug, Serialize)]
struct ToolListResult {
    /// Tool catalog.
    tools: Vec<ToolDefinition>,
}

/// `tools/call` result.
#[derive(Debug, Serialize)]
struct ToolCallResult {
    /// Result content blocks.
    content: Vec<ToolContent>,
    /// Machine-readable copy of the result.
    #[serde(rename = "structuredContent")]
    structured_content: Value,
}

/// Tool result content block.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ToolContent {
    /// JSON rendered as text.
    Text {
        /// Rendered payload.
        text: String,
    },
}

/// Size-checks, parses, and dispatches one payload.
async fn parse_request(
    state: &ServerState,
    context: &RequestContext,
    bytes: &[u8],
    cancel: &CancellationToken,
) -> Option<RpcReply> {
    if bytes.len() > state.max_body_bytes {
        return Some(RpcReply::error(
            StatusCode::PAYLOAD_TOO_LARGE,
            Value::Null,
            -32070,
            "request body too large",
        ));
    }
    match serde_json::from_slice::<JsonRpcRequest>(bytes) {
        Ok(request) => handle_request(&state.router, context, request, cancel).await,
        Err(_) => Some(RpcReply::error(
            StatusCode::BAD_REQUEST,
            Value::Null,
            -32600,
            "invalid json-rpc request",
        )),
    }
}

/// Dispatches a parsed request.
async fn handle_request(
    router: &ToolRouter,
    base_context: &RequestContext,
    request: JsonRpcRequest,
    cancel: &CancellationToken,
) -> Option<RpcReply> {
    let Some(id) = request.id else {
        tracing::debug!(method = %request.method, "notification received");
        return None;
    };
    let context = base_context.clone().with_request_id(id.to_string());
    if request.jsonrpc != "2.0" {
        return Some(RpcReply::error(StatusCode::BAD_REQUEST, id, -32600, "invalid json-rpc version"));
    }
    let reply = match request.method.as_str() {
        "initialize" => RpcReply::ok(
            id,
            json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {"tools": {"listChanged": false}},
                "serverInfo": {"name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION")},
            }),
        ),
        "ping" => RpcReply::ok(id, json!({})),
        "tools/list" => match serde_json::to_value(ToolListResult {
            tools: router.list_tools(),
        }) {
            Ok(value) => RpcReply::ok(id, value),
            Err(_) => jsonrpc_error(id, ToolError::Serialization),
        },
        "tools/call" => {
            let params = request.params.unwrap_or(Value::Null);
            match serde_json::from_value::<ToolCallParams>(params) {
                Ok(call) => {
                    let outcome =
                        router.handle_tool_call(&context, &call.name, call.arguments, cancel).await;
                    match outcome.and_then(tool_call_result) {
                        Ok(value) => RpcReply::ok(id, value),
                        Err(err) => {
                            tracing::info!(tool = %call.name, error = %err, "tool call failed");
                            jsonrpc_error(id, err)
                        }
                    }
                }
                Err(_) => RpcReply::error(StatusCode::BAD_REQUEST, id, -32602, "invalid tool params"),
            }
        }
        _ => RpcReply::error(StatusCode::BAD_REQUEST, id, -32601, "method not found"),
    };
    Some(reply)
}

/// Wraps a tool result in MCP content blocks.
fn tool_call_result(result: Value) -> Result<Value, ToolError> {
    let text = serde_json::to_string(&result).map_err(|_| ToolError::Serialization)?;
    serde_json::to_value(ToolCallResult {
        content: vec![ToolContent::Text {
            text,
        }],
        structured_content: result,
    })
    .map_err(|_| ToolError::Serialization)
}

/// Builds a JSON-RPC error response for a tool failure.
fn jsonrpc_error(id: Value, error: ToolError) -> RpcReply {
    let (status, code) = match &error {
        ToolError::UnknownTool => (StatusCode::BAD_REQUEST, -32601),
        ToolError::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, -32001),
        ToolError::ConsentRequired(_) => (StatusCode::FORBIDDEN, -32003),
        ToolError::InvalidParams(_) => (StatusCode::BAD_REQUEST, -32602),
        ToolError::NotConfigured(_) => (StatusCode::OK, -32010),
        ToolError::Unavailable(_) => (StatusCode::OK, -32020),
        ToolError::Upstream(_) => (StatusCode::OK, -32030),
        ToolError::Serialization => (StatusCode::OK, -32060),
    };
    RpcReply::error(status, id, code, error.to_string())
}

// ============================================================================
// SECTION: Framing Helpers
// ============================================================================

/// Reads a framed stdio payload using MCP Content-Length headers.
///
/// Returns `None` when the input ends cleanly before a new frame.
async fn read_framed<R>(
    reader: &mut R,
    max_body_bytes: usize,
) -> Result<Option<Vec<u8>>, McpServerError>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut saw_header = false;
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = reader
            .read_line(&mut line)
            .await
            .map_err(|_| McpServerError::Transport("stdio read failed".to_string()))?;
        if bytes == 0 {
            if saw_header {
                return Err(McpServerError::Transport("stdio closed mid-frame".to_string()));
            }
            return Ok(None);
        }
        if line.trim().is_empty() {
            if saw_header {
                break;
            }
            continue;
        }
        saw_header = true;
        if let Some((name, value)) = line.split_once(':')
            && name.trim().eq_ignore_ascii_case("content-length")
        {
            let parsed = value
                .trim()
                .parse::<usize>()
                .map_err(|_| McpServerError::Transport("invalid content length".to_string()))?;
            content_length = Some(parsed);
        }
    }
    let len = content_length
        .ok_or_else(|| McpServerError::Transport("missing content length".to_string()))?;
    if len > max_body_bytes {
        return Err(McpServerError::Transport("payload too large".to_string()));
    }
    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|_| McpServerError::Transport("stdio read failed".to_string()))?;
    Ok(Some(buf))
}

/// Writes a framed stdio payload using MCP Content-Length headers.
async fn write_framed<W>(writer: &mut W, payload: &[u8]) -> Result<(), McpServerError>
where
    W: AsyncWrite + Unpin,
{
    let header = format!("Content-Length: {}\r\n\r\n", payload.len());
    writer
        .write_all(header.as_bytes())
        .await
        .map_err(|_| McpServerError::Transport("stdio write failed".to_string()))?;
    writer
        .write_all(payload)
        .await
        .map_err(|_| McpServerError::Transport("stdio write failed".to_string()))?;
    writer.flush().await.map_err(|_| McpServerError::Transport("stdio write failed".to_string()))
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// MCP server errors.
#[derive(Debug, thiserror::Error)]
pub enum McpServerError {
    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),
    /// Initialization errors.
    #[error("init error: {0}")]
    Init(String),
    /// Transport errors.
    #[error("transport error: {0}")]
    Transport(String),
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only framing assertions."
    )]

    use super::read_framed;
    use super::write_framed;

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut framed = format!("Content-Length: {}\r\n\r\n", payload.len()).into_bytes();
        framed.extend_from_slice(payload);
        framed
    }

    #[tokio::test]
    async fn read_framed_rejects_payload_over_limit() {
        let payload = br#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#;
        let framed = frame(payload);
        let mut reader = &framed[..];
        assert!(read_framed(&mut reader, payload.len() - 1).await.is_err());
    }

    #[tokio::test]
    async fn read_framed_accepts_payload_at_limit_and_ends_cleanly() {
        let payload = br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#;
        let mut framed = frame(payload);
        framed.extend_from_slice(&frame(payload));
        let mut reader = &framed[..];
        let first = read_framed(&mut reader, payload.len()).await.unwrap().unwrap();
        assert_eq!(first, payload);
        let second = read_framed(&mut reader, payload.len()).await.unwrap().unwrap();
        assert_eq!(second, payload);
        assert!(read_framed(&mut reader, payload.len()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn read_framed_requires_content_length() {
        let mut reader = &b"Content-Type: application/json\r\n\r\n{}"[..];
        assert!(read_framed(&mut reader, 1024).await.is_err());
    }

    #[tokio::test]
    async fn read_framed_rejects_truncated_frames() {
        let mut reader = &b"Content-Length: 10\r\n"[..];
        assert!(read_framed(&mut reader, 1024).await.is_err());
    }

    #[tokio::test]
    async fn write_framed_prefixes_content_length() {
        let mut out = Vec::new();
        write_framed(&mut out, b"{}").await.unwrap();
        assert_eq!(out, b"Content-Length: 2\r\n\r\n{}");
    }
}
