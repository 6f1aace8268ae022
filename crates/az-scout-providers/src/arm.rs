// crates/az-scout-providers/src/arm.rs
// ============================================================================
// Module: ARM Resource Probe
// Description: Compute quota usages and SKU availability from Resource Manager.
// Purpose: Implement `ResourceProbe` with bounded retries and body limits.
// Dependencies: az-scout-core, reqwest, serde, tokio-util
// ============================================================================

//! ## Overview
//! Each probe issues a usages read and, when requested, a paginated SKU read
//! filtered to the unit's region. Responses are classified per attempt:
//! - 429 waits for `Retry-After` (capped) and retries within the policy.
//! - 401 and 403 are final `Unauthorized` failures.
//! - 404 means the subscription or region has nothing to report.
//! - 408, 5xx, and transport errors back off with jitter and retry.
//!
//! Cancellation is checked before every attempt and interrupts both
//! in-flight requests and backoff sleeps. `nextLink` URLs must stay on the
//! configured ARM origin so the bearer token never leaves it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use az_scout_core::AccessToken;
use az_scout_core::ProbeError;
use az_scout_core::QuotaUsage;
use az_scout_core::RegionCapacity;
use az_scout_core::ResourceProbe;
use az_scout_core::RetryPolicy;
use az_scout_core::ScanOptions;
use az_scout_core::ScanTarget;
use az_scout_core::SkuAvailability;
use az_scout_core::SubscriptionId;
use az_scout_core::SubscriptionInfo;
use az_scout_core::TenantId;
use reqwest::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::http::BodyReadError;
use crate::http::HttpClientConfig;
use crate::http::ProviderBuildError;
use crate::http::build_client;
use crate::http::millis;
use crate::http::read_body_limited;
use crate::http::retry_after;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// ARM probe configuration.
#[derive(Debug, Clone)]
pub struct ArmProbeConfig {
    /// Resource Manager endpoint, for example `https://management.azure.com`.
    pub endpoint: String,
    /// API version for compute usages.
    pub usages_api_version: String,
    /// API version for resource SKUs.
    pub skus_api_version: String,
    /// API version for subscription listing.
    pub subscriptions_api_version: String,
    /// Retry policy for throttled and transient responses.
    pub retry: RetryPolicy,
    /// Cap applied to server-provided `Retry-After`.
    pub max_retry_after: Duration,
    /// Maximum pages followed through `nextLink`.
    pub max_pages: usize,
    /// Transport limits.
    pub http: HttpClientConfig,
}

impl Default for ArmProbeConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://management.azure.com".to_string(),
            usages_api_version: "2023-09-01".to_string(),
            skus_api_version: "2021-07-01".to_string(),
            subscriptions_api_version: "2022-12-01".to_string(),
            retry: RetryPolicy {
                max_attempts: 4,
                ..RetryPolicy::default()
            },
            max_retry_after: Duration::from_secs(30),
            max_pages: 20,
            http: HttpClientConfig::default(),
        }
    }
}

// ============================================================================
// SECTION: Probe
// ============================================================================

/// [`ResourceProbe`] backed by Azure Resource Manager.
pub struct ArmResourceProbe {
    /// Probe configuration.
    config: ArmProbeConfig,
    /// Parsed endpoint.
    endpoint: Url,
    /// Shared HTTP client.
    client: Client,
}

impl ArmResourceProbe {
    /// Builds a probe.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderBuildError`] when the endpoint is invalid or the
    /// HTTP client cannot be created.
    pub fn new(config: ArmProbeConfig) -> Result<Self, ProviderBuildError> {
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|_| ProviderBuildError::Endpoint("arm endpoint".to_string()))?;
        if endpoint.cannot_be_a_base() {
            return Err(ProviderBuildError::Endpoint("arm endpoint".to_string()));
        }
        let client = build_client(&config.http)?;
        Ok(Self {
            config,
            endpoint,
            client,
        })
    }

    /// Builds `{endpoint}/{segments}?api-version=...` plus extra query pairs.
    fn url(&self, segments: &[&str], api_version: &str, query: &[(&str, &str)]) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("api-version", api_version);
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        url
    }

    /// Validates that a `nextLink` stays on the configured origin.
    fn next_page(&self, link: &str) -> Result<Url, ProbeError> {
        let url = Url::parse(link)
            .map_err(|_| ProbeError::InvalidResponse("nextLink is not a url".to_string()))?;
        if url.origin() != self.endpoint.origin() {
            return Err(ProbeError::InvalidResponse("nextLink leaves the arm endpoint".to_string()));
        }
        Ok(url)
    }

    /// Reads every page of a list endpoint. A list longer than `max_pages`
    /// fails rather than returning a partial result.
    async fn get_all_pages<T: DeserializeOwned>(
        &self,
        first: Url,
        token: &AccessToken,
        subscription: &SubscriptionId,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>, ProbeError> {
        let mut items = Vec::new();
        let mut next = Some(first);
        let mut pages = 0usize;
        while let Some(url) = next.take() {
            if pages >= self.config.max_pages {
                tracing::warn!(
                    subscription = %subscription,
                    max_pages = self.config.max_pages,
                    "page limit reached before the list ended"
                );
                return Err(ProbeError::InvalidResponse(format!(
                    "list exceeds {} pages",
                    self.config.max_pages
                )));
            }
            pages += 1;
            let Some(page) = self.get_json::<Page<T>>(url, token, subscription, cancel).await?
            else {
                break;
            };
            items.extend(page.value);
            next = page.next_link.as_deref().map(|link| self.next_page(link)).transpose()?;
        }
        Ok(items)
    }

    /// Issues one GET with retries; `Ok(None)` means 404.
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        token: &AccessToken,
        subscription: &SubscriptionId,
        cancel: &CancellationToken,
    ) -> Result<Option<T>, ProbeError> {
        let policy = &self.config.retry;
        let mut attempt: u32 = 0;
        let mut waited = Duration::ZERO;
        loop {
            if cancel.is_cancelled() {
                return Err(ProbeError::Cancelled);
            }
            let outcome = tokio::select! {
                () = cancel.cancelled() => return Err(ProbeError::Cancelled),
                outcome = self.attempt(&url, token, subscription) => outcome,
            };
            let (error, proposed) = match outcome {
                Attempt::Done(body) => {
                    return match body {
                        None => Ok(None),
                        Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|_| {
                            ProbeError::InvalidResponse("malformed arm payload".to_string())
                        }),
                    };
                }
                Attempt::Fatal(error) => return Err(error),
                Attempt::Throttled(hint) => (
                    ProbeError::RateLimited(format!("throttled on {subscription}")),
                    hint.map_or_else(
                        || policy.backoff(attempt),
                        |hint| hint.min(self.config.max_retry_after),
                    ),
                ),
                Attempt::Transient(detail) => {
                    (ProbeError::Transient(detail), policy.backoff(attempt))
                }
            };
            let Some(delay) = policy.next_delay(attempt, waited, proposed) else {
                tracing::debug!(
                    subscription = %subscription,
                    attempts = attempt + 1,
                    error = %error,
                    "arm retry budget exhausted"
                );
                return Err(error);
            };
            tracing::debug!(
                subscription = %subscription,
                attempt = attempt + 1,
                delay_ms = millis(delay),
                error = %error,
                "retrying arm request"
            );
            tokio::select! {
                () = cancel.cancelled() => return Err(ProbeError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
            waited = waited.saturating_add(delay);
            attempt += 1;
        }
    }

    /// Performs a single request and classifies the response.
    async fn attempt(&self, url: &Url, token: &AccessToken, subscription: &SubscriptionId) -> Attempt {
        let response =
            match self.client.get(url.clone()).bearer_auth(token.expose()).send().await {
                Ok(response) => response,
                Err(err) if err.is_timeout() => {
                    return Attempt::Transient("arm request timed out".to_string());
                }
                Err(_) => return Attempt::Transient("arm request failed".to_string()),
            };
        let status = response.status();
        match status {
            StatusCode::NOT_FOUND => Attempt::Done(None),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Attempt::Fatal(ProbeError::Unauthorized {
                    subscription: subscription.clone(),
                })
            }
            StatusCode::TOO_MANY_REQUESTS => Attempt::Throttled(retry_after(response.headers())),
            StatusCode::REQUEST_TIMEOUT => Attempt::Transient("arm request timeout (408)".to_string()),
            status if status.is_server_error() => {
                Attempt::Transient(format!("arm server error ({})", status.as_u16()))
            }
            status if status.is_success() => {
                match read_body_limited(response, self.config.http.max_response_bytes).await {
                    Ok(body) => Attempt::Done(Some(body)),
                    Err(BodyReadError::TooLarge) => Attempt::Fatal(ProbeError::InvalidResponse(
                        "arm response exceeds size limit".to_string(),
                    )),
                    Err(BodyReadError::Transport) => {
                        Attempt::Transient("arm response interrupted".to_string())
                    }
                }
            }
            status => Attempt::Fatal(ProbeError::InvalidResponse(format!(
                "unexpected arm status {}",
                status.as_u16()
            ))),
        }
    }
}

#[async_trait]
impl ResourceProbe for ArmResourceProbe {
    async fn probe(
        &self,
        target: &ScanTarget,
        token: &AccessToken,
        options: &ScanOptions,
        cancel: &CancellationToken,
    ) -> Result<RegionCapacity, ProbeError> {
        let sub = target.subscription_id.as_str();
        let region = target.region.as_str();
        let usages_url = self.url(
            &["subscriptions", sub, "providers", "Microsoft.Compute", "locations", region, "usages"],
            &self.config.usages_api_version,
            &[],
        );
        let usages: Vec<UsageWire> =
            self.get_all_pages(usages_url, token, &target.subscription_id, cancel).await?;
        let mut capacity = RegionCapacity {
            usages: usages.into_iter().map(UsageWire::into_usage).collect(),
            skus: Vec::new(),
        };
        if options.include_skus {
            let filter = format!("location eq '{region}'");
            let skus_url = self.url(
                &["subscriptions", sub, "providers", "Microsoft.Compute", "skus"],
                &self.config.skus_api_version,
                &[("$filter", filter.as_str())],
            );
            let skus: Vec<SkuWire> =
                self.get_all_pages(skus_url, token, &target.subscription_id, cancel).await?;
            capacity.skus = skus.into_iter().filter_map(|sku| sku.into_availability(region)).collect();
        }
        tracing::debug!(
            unit = %target,
            usages = capacity.usages.len(),
            skus = capacity.skus.len(),
            "probe complete"
        );
        Ok(capacity)
    }

    async fn list_subscriptions(
        &self,
        token: &AccessToken,
        cancel: &CancellationToken,
    ) -> Result<Vec<SubscriptionInfo>, ProbeError> {
        let url = self.url(&["subscriptions"], &self.config.subscriptions_api_version, &[]);
        let listing = SubscriptionId::new("*");
        let subscriptions: Vec<SubscriptionWire> =
            self.get_all_pages(url, token, &listing, cancel).await?;
        Ok(subscriptions
            .into_iter()
            .map(|sub| SubscriptionInfo {
                subscription_id: SubscriptionId::new(sub.subscription_id),
                display_name: sub.display_name,
                state: sub.state,
                tenant_id: sub.tenant_id.map(TenantId::new),
            })
            .collect())
    }
}

// ============================================================================
// SECTION: Attempt Classification
// ============================================================================

/// Classified outcome of one request.
enum Attempt {
    /// Final body; `None` for 404.
    Done(Option<Vec<u8>>),
    /// Non-retryable failure.
    Fatal(ProbeError),
    /// 429 with an optional `Retry-After` hint.
    Throttled(Option<Duration>),
    /// Retryable failure.
    Transient(String),
}

// ============================================================================
// SECTION: Wire Types
// ============================================================================

/// ARM list page.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page<T> {
    /// Page items.
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    /// Continuation URL.
    #[serde(default)]
    next_link: Option<String>,
}

/// Usage entry name.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageName {
    #[serde(default)]
    value: String,
    #[serde(default)]
    localized_value: String,
}

/// Compute usage entry.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageWire {
    name: UsageName,
    #[serde(default)]
    current_value: i64,
    #[serde(default)]
    limit: i64,
    #[serde(default)]
    unit: String,
}

impl UsageWire {
    fn into_usage(self) -> QuotaUsage {
        QuotaUsage {
            name: self.name.value,
            localized_name: self.name.localized_value,
            current_value: self.current_value,
            limit: self.limit,
            unit: self.unit,
        }
    }
}

/// Zone availability for one location.
#[derive(Deserialize)]
struct LocationInfoWire {
    #[serde(default)]
    location: String,
    #[serde(default)]
    zones: Vec<String>,
}

/// Restricted values inside a restriction.
#[derive(Deserialize, Default)]
struct RestrictionInfoWire {
    #[serde(default)]
    zones: Vec<String>,
}

/// SKU restriction.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestrictionWire {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    reason_code: Option<String>,
    #[serde(default)]
    restriction_info: Option<RestrictionInfoWire>,
}

/// Resource SKU entry.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SkuWire {
    #[serde(default)]
    resource_type: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    family: Option<String>,
    #[serde(default)]
    location_info: Vec<LocationInfoWire>,
    #[serde(default)]
    restrictions: Vec<RestrictionWire>,
}

impl SkuWire {
    /// Converts a virtual machine SKU; other resource types are skipped.
    fn into_availability(self, region: &str) -> Option<SkuAvailability> {
        if !self.resource_type.eq_ignore_ascii_case("virtualMachines") {
            return None;
        }
        let mut zones: BTreeSet<String> = self
            .location_info
            .into_iter()
            .filter(|info| info.location.replace(' ', "").eq_ignore_ascii_case(region))
            .flat_map(|info| info.zones)
            .collect();
        let mut restricted = false;
        let mut reasons = BTreeSet::new();
        for restriction in self.restrictions {
            if let Some(reason) = restriction.reason_code {
                reasons.insert(reason);
            }
            if restriction.kind.eq_ignore_ascii_case("Location") {
                restricted = true;
            } else if restriction.kind.eq_ignore_ascii_case("Zone") {
                for zone in restriction.restriction_info.unwrap_or_default().zones {
                    zones.remove(&zone);
                }
            }
        }
        Some(SkuAvailability {
            name: self.name,
            family: self.family,
            restricted,
            zones: zones.into_iter().collect(),
            restriction_reasons: reasons.into_iter().collect(),
        })
    }
}

/// Subscription entry.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionWire {
    subscription_id: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    tenant_id: Option<String>,
}

// ============================================================================
// SECTION: Tests
// ============================================================================
