// crates/az-scout-core/src/core/mod.rs
// ============================================================================
// Module: az-scout Core Types
// Description: Canonical identity and scan data model.
// Purpose: Provide stable, serializable types shared by every az-scout crate.
// Dependencies: serde, secrecy, time
// ============================================================================

//! ## Overview
//! Core types describe who is asking (principals and caller assertions), what
//! they are asking about (scan targets), and what comes back (per-unit results
//! and the aggregate response). These types are the canonical source of truth
//! for the MCP tool payloads.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod identifiers;
pub mod principal;
pub mod scan;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use identifiers::Audience;
pub use identifiers::Region;
pub use identifiers::SubjectId;
pub use identifiers::SubscriptionId;
pub use identifiers::TenantId;
pub use principal::AccessToken;
pub use principal::AcquisitionRoute;
pub use principal::CallerAssertion;
pub use principal::PLATFORM_SUBJECT;
pub use principal::Principal;
pub use principal::PrincipalError;
pub use principal::PrincipalKind;
pub use scan::AggregateResponse;
pub use scan::FailureKind;
pub use scan::QuotaUsage;
pub use scan::RegionCapacity;
pub use scan::ScanOptions;
pub use scan::ScanResult;
pub use scan::ScanSummary;
pub use scan::ScanTarget;
pub use scan::ScanUnitReport;
pub use scan::SkuAvailability;
pub use scan::SubscriptionInfo;
