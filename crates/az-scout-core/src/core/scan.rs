// crates/az-scout-core/src/core/scan.rs
// ============================================================================
// Module: az-scout Scan Model
// Description: Scan targets, per-unit results, and the aggregate response.
// Purpose: Define the serializable payloads produced by capacity scans.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A scan is a list of [`ScanTarget`] units. Every unit resolves to exactly
//! one [`ScanResult`]: capacity data on success, or a typed failure that stays
//! scoped to that unit. The [`AggregateResponse`] keeps units in submission
//! order and is built fresh for every request.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::Region;
use crate::core::identifiers::SubscriptionId;
use crate::core::identifiers::TenantId;

// ============================================================================
// SECTION: Targets
// ============================================================================

/// One (subscription, region) unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanTarget {
    /// Subscription to query.
    pub subscription_id: SubscriptionId,
    /// Normalized region to query.
    pub region: Region,
}

impl ScanTarget {
    /// Creates a scan target, normalizing the region.
    #[must_use]
    pub fn new(subscription_id: impl Into<String>, region: impl AsRef<str>) -> Self {
        Self {
            subscription_id: SubscriptionId::new(subscription_id),
            region: Region::new(region),
        }
    }
}

impl fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.subscription_id, self.region)
    }
}

/// Per-request probe options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOptions {
    /// Also query SKU availability (one extra paginated call per unit).
    #[serde(default = "default_include_skus")]
    pub include_skus: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            include_skus: default_include_skus(),
        }
    }
}

const fn default_include_skus() -> bool {
    true
}

// ============================================================================
// SECTION: Capacity Data
// ============================================================================

/// Compute quota usage entry for a region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsage {
    /// Quota name (for example `standardDSv3Family`).
    pub name: String,
    /// Human-readable quota name.
    pub localized_name: String,
    /// Current usage.
    pub current_value: i64,
    /// Quota limit.
    pub limit: i64,
    /// Usage unit (usually `Count`).
    pub unit: String,
}

/// SKU availability entry for a region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkuAvailability {
    /// SKU name (for example `Standard_D2s_v3`).
    pub name: String,
    /// SKU family, when reported.
    pub family: Option<String>,
    /// True when the subscription cannot deploy this SKU in the region.
    pub restricted: bool,
    /// Availability zones offered for the SKU.
    pub zones: Vec<String>,
    /// Restriction reason codes reported by ARM.
    pub restriction_reasons: Vec<String>,
}

/// Capacity data for one scan unit.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegionCapacity {
    /// Compute quota usages.
    pub usages: Vec<QuotaUsage>,
    /// SKU availability entries (empty when SKUs were not requested).
    pub skus: Vec<SkuAvailability>,
}

/// Subscription visible to the acting identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    /// Subscription identifier.
    pub subscription_id: SubscriptionId,
    /// Display name.
    pub display_name: String,
    /// Subscription state (`Enabled`, `Disabled`, ...).
    pub state: String,
    /// Owning tenant, when reported.
    pub tenant_id: Option<TenantId>,
}

// ============================================================================
// SECTION: Results
// ============================================================================

/// Unit-scoped failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// ARM rejected the credential for this subscription (401/403).
    Unauthorized,
    /// ARM throttled the unit and retries were exhausted.
    RateLimited,
    /// Network or server error persisted after retries.
    Transient,
    /// The scan was cancelled before the unit resolved.
    Cancelled,
    /// ARM returned a payload that could not be interpreted.
    InvalidResponse,
}

impl FailureKind {
    /// Returns a stable label for this failure kind.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::RateLimited => "rate_limited",
            Self::Transient => "transient",
            Self::Cancelled => "cancelled",
            Self::InvalidResponse => "invalid_response",
        }
    }
}

/// Outcome of one scan unit.
///
/// # Invariants
/// - Exactly one of capacity data or failure is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScanResult {
    /// The probe succeeded.
    Success(RegionCapacity),
    /// The probe failed; the failure is scoped to this unit.
    Failure {
        /// Failure classification.
        kind: FailureKind,
        /// Sanitized detail (never token material).
        detail: String,
    },
}

impl ScanResult {
    /// Builds a failure result.
    #[must_use]
    pub fn failure(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            detail: detail.into(),
        }
    }

    /// Builds the result reported for units that never resolved.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::failure(FailureKind::Cancelled, "scan cancelled before unit completed")
    }

    /// Returns true for successful results.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns the failure kind, if any.
    #[must_use]
    pub const fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success(_) => None,
            Self::Failure {
                kind, ..
            } => Some(*kind),
        }
    }
}

/// Result for one submitted target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanUnitReport {
    /// The submitted target (normalized).
    pub target: ScanTarget,
    /// The unit's result.
    pub result: ScanResult,
}

/// Counts across all submitted targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScanSummary {
    /// Number of submitted targets (duplicates included).
    pub total: usize,
    /// Successful units.
    pub succeeded: usize,
    /// Failed units other than cancellations.
    pub failed: usize,
    /// Units that never resolved because the scan was cancelled.
    pub cancelled: usize,
}

/// Aggregate scan response in submission order.
///
/// # Invariants
/// - `results[i].target` equals the i-th submitted target.
/// - `summary.total == results.len()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateResponse {
    /// Per-target results.
    pub results: Vec<ScanUnitReport>,
    /// Summary counts.
    pub summary: ScanSummary,
}

impl AggregateResponse {
    /// Builds an aggregate and computes its summary.
    #[must_use]
    pub fn from_reports(results: Vec<ScanUnitReport>) -> Self {
        let mut summary = ScanSummary {
            total: results.len(),
            ..ScanSummary::default()
        };
        for report in &results {
            match report.result.failure_kind() {
                None => summary.succeeded += 1,
                Some(FailureKind::Cancelled) => summary.cancelled += 1,
                Some(_) => summary.failed += 1,
            }
        }
        Self {
            results,
            summary,
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
