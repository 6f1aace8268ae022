// crates/az-scout-mcp/src/tools.rs
// ============================================================================
// Module: MCP Tool Router
// Description: Tool catalog and dispatch onto the scan coordinator.
// Purpose: Resolve the caller, validate tool arguments, and shape results.
// Dependencies: az-scout-core, serde, serde_json, tokio-util
// ============================================================================

//! ## Overview
//! Three tools are exposed: `scan_capacity`, `list_subscriptions`, and
//! `check_tenant_auth`. Every call first resolves the caller principal from
//! the request context (audited), then runs against the shared coordinator.
//! Request-scoped failures surface as [`ToolError`]; unit-scoped failures
//! stay inside the aggregate result.
//!
//! When subscriptions are configured they are also the scan allow-list:
//! callers may narrow a scan to some of them but never name others.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use az_scout_core::AcquisitionRoute;
use az_scout_core::ScanCoordinator;
use az_scout_core::ScanError;
use az_scout_core::ScanOptions;
use az_scout_core::ScanTarget;
use az_scout_core::TenantId;
use az_scout_core::TokenError;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::audit::AuditEvent;
use crate::audit::AuditSink;
use crate::identity::RequestContext;
use crate::identity::ResolvedCaller;
use crate::identity::resolve_caller;

// ============================================================================
// SECTION: Tool Names
// ============================================================================

/// Supported tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolName {
    /// Quota usage and SKU availability across (subscription, region) units.
    ScanCapacity,
    /// Subscriptions visible to the caller's identity.
    ListSubscriptions,
    /// Whether a token can be acquired for a tenant.
    CheckTenantAuth,
}

impl ToolName {
    /// All tools in catalog order.
    pub const ALL: [Self; 3] = [Self::ScanCapacity, Self::ListSubscriptions, Self::CheckTenantAuth];

    /// Parses a tool name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.as_str() == name)
    }

    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ScanCapacity => "scan_capacity",
            Self::ListSubscriptions => "list_subscriptions",
            Self::CheckTenantAuth => "check_tenant_auth",
        }
    }
}

/// Tool catalog entry returned by `tools/list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// JSON Schema of the tool arguments.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Request-scoped tool failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    /// Tool name not recognized.
    #[error("unknown tool")]
    UnknownTool,
    /// The caller must re-authenticate.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    /// The caller must grant consent or satisfy an interactive challenge.
    #[error("consent required: {0}")]
    ConsentRequired(String),
    /// Tool arguments are invalid.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
    /// The identity route needed for the call is not configured.
    #[error("not configured: {0}")]
    NotConfigured(String),
    /// Token acquisition failed transiently.
    #[error("temporarily unavailable: {0}")]
    Unavailable(String),
    /// A request-scoped Resource Manager call failed.
    #[error("upstream failure: {0}")]
    Upstream(String),
    /// Tool payload serialization failed.
    #[error("serialization failure")]
    Serialization,
}

impl From<TokenError> for ToolError {
    fn from(error: TokenError) -> Self {
        match error {
            TokenError::ConsentRequired(detail) => Self::ConsentRequired(detail),
            TokenError::InvalidCaller(detail) => Self::Unauthenticated(detail),
            TokenError::Transient(detail) => Self::Unavailable(detail),
            TokenError::NotConfigured(detail) => Self::NotConfigured(detail),
        }
    }
}

impl From<ScanError> for ToolError {
    fn from(error: ScanError) -> Self {
        match error {
            ScanError::EmptyTargets
            | ScanError::TooManyTargets {
                ..
            }
            | ScanError::InvalidTarget(_) => Self::InvalidParams(error.to_string()),
            ScanError::Token(err) => err.into(),
            ScanError::Probe(err) => Self::Upstream(err.to_string()),
        }
    }
}

// ============================================================================
// SECTION: Arguments
// ============================================================================

/// Explicit (subscription, region) pair.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TargetArg {
    /// Subscription id.
    subscription_id: String,
    /// Region name; normalized before scanning.
    region: String,
}

/// `scan_capacity` arguments.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScanCapacityArgs {
    /// Subscriptions to scan; defaults to the configured list.
    #[serde(default)]
    subscriptions: Option<Vec<String>>,
    /// Regions to scan; defaults to the configured list.
    #[serde(default)]
    regions: Option<Vec<String>>,
    /// Explicit units; exclusive with `subscriptions`/`regions`.
    #[serde(default)]
    targets: Option<Vec<TargetArg>>,
    /// Overrides the configured SKU lookup setting.
    #[serde(default)]
    include_skus: Option<bool>,
}

/// `list_subscriptions` arguments.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ListSubscriptionsArgs {}

/// `check_tenant_auth` arguments.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CheckTenantAuthArgs {
    /// Tenant whose authority should issue the token.
    tenant_id: String,
}

/// Decodes tool arguments, treating `null` as an empty object.
fn decode_args<T>(payload: Value) -> Result<T, ToolError>
where
    T: for<'de> Deserialize<'de>,
{
    let payload = if payload.is_null() { json!({}) } else { payload };
    serde_json::from_value(payload).map_err(|err| ToolError::InvalidParams(err.to_string()))
}

// ============================================================================
// SECTION: Router
// ============================================================================

/// Scan defaults applied when tool arguments omit them.
#[derive(Debug, Clone, Default)]
pub struct ScanDefaults {
    /// Default subscriptions.
    pub subscriptions: Vec<String>,
    /// Default regions.
    pub regions: Vec<String>,
    /// Default SKU lookup setting.
    pub include_skus: bool,
}

/// Routes MCP tool calls.
#[derive(Clone)]
pub struct ToolRouter {
    /// Shared scan coordinator.
    coordinator: Arc<ScanCoordinator>,
    /// Scan defaults.
    defaults: Arc<ScanDefaults>,
    /// Security audit sink.
    audit: Arc<dyn AuditSink>,
}

impl ToolRouter {
    /// Creates a router.
    #[must_use]
    pub fn new(
        coordinator: Arc<ScanCoordinator>,
        defaults: ScanDefaults,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            coordinator,
            defaults: Arc::new(defaults),
            audit,
        }
    }

    /// Returns the tool catalog.
    #[must_use]
    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        ToolName::ALL.into_iter().map(tool_definition).collect()
    }

    /// Handles one tool call.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] for unknown tools, invalid arguments, caller
    /// resolution failures, and request-scoped acquisition failures.
    pub async fn handle_tool_call(
        &self,
        context: &RequestContext,
        name: &str,
        payload: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, ToolError> {
        let tool = ToolName::parse(name).ok_or(ToolError::UnknownTool)?;
        let caller = self.resolve(context, tool)?;
        match tool {
            ToolName::ScanCapacity => self.scan_capacity(&caller, payload, cancel).await,
            ToolName::ListSubscriptions => self.list_subscriptions(&caller, payload, cancel).await,
            ToolName::CheckTenantAuth => self.check_tenant_auth(&caller, payload, cancel).await,
        }
    }

    /// Resolves and audits the caller.
    fn resolve(&self, context: &RequestContext, tool: ToolName) -> Result<ResolvedCaller, ToolError> {
        match resolve_caller(context) {
            Ok(caller) => {
                self.audit.record(&AuditEvent::principal_resolved(
                    context,
                    tool.as_str(),
                    &caller.principal,
                    caller.token_fingerprint.clone(),
                ));
                Ok(caller)
            }
            Err(err) => {
                let reason = err.to_string();
                self.audit.record(&AuditEvent::principal_rejected(context, tool.as_str(), &reason));
                Err(ToolError::Unauthenticated(reason))
            }
        }
    }

    /// Runs `scan_capacity`.
    async fn scan_capacity(
        &self,
        caller: &ResolvedCaller,
        payload: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, ToolError> {
        let args: ScanCapacityArgs = decode_args(payload)?;
        let options = ScanOptions {
            include_skus: args.include_skus.unwrap_or(self.defaults.include_skus),
        };
        let targets = self.targets_for(args)?;
        let response = self
            .coordinator
            .scan(&caller.principal, caller.assertion.as_ref(), &targets, options, cancel)
            .await?;
        serde_json::to_value(response).map_err(|_| ToolError::Serialization)
    }

    /// Expands scan arguments into targets.
    fn targets_for(&self, args: ScanCapacityArgs) -> Result<Vec<ScanTarget>, ToolError> {
        if let Some(targets) = args.targets {
            if args.subscriptions.is_some() || args.regions.is_some() {
                return Err(ToolError::InvalidParams(
                    "targets cannot be combined with subscriptions or regions".to_string(),
                ));
            }
            self.check_allowed(targets.iter().map(|target| target.subscription_id.as_str()))?;
            return Ok(targets
                .into_iter()
                .map(|target| ScanTarget::new(target.subscription_id, target.region))
                .collect());
        }
        let subscriptions = match args.subscriptions {
            Some(requested) => {
                self.check_allowed(requested.iter().map(String::as_str))?;
                requested
            }
            None => self.defaults.subscriptions.clone(),
        };
        let regions = args.regions.unwrap_or_else(|| self.defaults.regions.clone());
        if subscriptions.is_empty() {
            return Err(ToolError::InvalidParams(
                "no subscriptions given and none configured".to_string(),
            ));
        }
        if regions.is_empty() {
            return Err(ToolError::InvalidParams("no regions given and none configured".to_string()));
        }
        Ok(subscriptions
            .iter()
            .flat_map(|subscription| {
                regions.iter().map(move |region| ScanTarget::new(subscription.clone(), region))
            })
            .collect())
    }

    /// Rejects subscriptions outside the configured list, when one exists.
    fn check_allowed<'a>(
        &self,
        mut requested: impl Iterator<Item = &'a str>,
    ) -> Result<(), ToolError> {
        let allowed = &self.defaults.subscriptions;
        if allowed.is_empty() {
            return Ok(());
        }
        match requested.find(|id| !allowed.iter().any(|entry| entry.as_str() == id.trim())) {
            Some(id) => Err(ToolError::InvalidParams(format!(
                "subscription '{id}' is not in the configured scan list"
            ))),
            None => Ok(()),
        }
    }

    /// Runs `list_subscriptions`.
    async fn list_subscriptions(
        &self,
        caller: &ResolvedCaller,
        payload: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, ToolError> {
        let _args: ListSubscriptionsArgs = decode_args(payload)?;
        let subscriptions = self
            .coordinator
            .list_subscriptions(&caller.principal, caller.assertion.as_ref(), cancel)
            .await?;
        Ok(json!({
            "count": subscriptions.len(),
            "subscriptions": subscriptions,
        }))
    }

    /// Runs `check_tenant_auth`.
    ///
    /// Acquisition failures are part of the answer, not tool errors. Only the
    /// On-Behalf-Of route can target a tenant, so callers on the platform
    /// route get a negative answer without any exchange.
    async fn check_tenant_auth(
        &self,
        caller: &ResolvedCaller,
        payload: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, ToolError> {
        let args: CheckTenantAuthArgs = decode_args(payload)?;
        let tenant_id = args.tenant_id.trim();
        if tenant_id.is_empty() {
            return Err(ToolError::InvalidParams("tenant_id must be non-empty".to_string()));
        }
        let tenant = TenantId::new(tenant_id);
        let broker = self.coordinator.broker();
        let audience = &self.coordinator.config().audience;
        let route = broker.route_for(&caller.principal);
        if route == AcquisitionRoute::Platform {
            return Ok(json!({
                "tenant_id": tenant.as_str(),
                "authenticated": false,
                "route": route.label(),
                "reason": "delegated_not_configured",
                "detail": "tenant checks require a delegated caller and On-Behalf-Of credentials",
            }));
        }
        let outcome = broker
            .acquire(&caller.principal, caller.assertion.as_ref(), audience, Some(&tenant), cancel)
            .await;
        Ok(match outcome {
            Ok(token) => json!({
                "tenant_id": tenant.as_str(),
                "authenticated": true,
                "route": token.route().label(),
            }),
            Err(err) => json!({
                "tenant_id": tenant.as_str(),
                "authenticated": false,
                "route": route.label(),
                "reason": err.label(),
                "detail": err.to_string(),
            }),
        })
    }
}

/// Returns the catalog entry for `tool`.
fn tool_definition(tool: ToolName) -> ToolDefinition {
    match tool {
        ToolName::ScanCapacity => ToolDefinition {
            name: tool.as_str(),
            description: "Report compute quota usage and VM SKU availability for each \
                          (subscription, region) pair. Failed pairs are reported individually.",
            input_schema: json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "subscriptions": {"type": "array", "items": {"type": "string"}},
                    "regions": {"type": "array", "items": {"type": "string"}},
                    "targets": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "additionalProperties": false,
                            "required": ["subscription_id", "region"],
                            "properties": {
                                "subscription_id": {"type": "string"},
                                "region": {"type": "string"}
                            }
                        }
                    },
                    "include_skus": {"type": "boolean"}
                }
            }),
        },
        ToolName::ListSubscriptions => ToolDefinition {
            name: tool.as_str(),
            description: "List the subscriptions visible to the caller's identity.",
            input_schema: json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {}
            }),
        },
        ToolName::CheckTenantAuth => ToolDefinition {
            name: tool.as_str(),
            description: "Check whether a Resource Manager token can be acquired for the \
                          caller in the given tenant.",
            input_schema: json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["tenant_id"],
                "properties": {
                    "tenant_id": {"type": "string"}
                }
            }),
        },
    }
}
