// crates/az-scout-providers/src/lib.rs
// ============================================================================
// Module: az-scout Providers
// Description: HTTP implementations of the token exchanger and resource probe.
// Purpose: Connect the az-scout runtime to Entra ID and Azure Resource Manager.
// Dependencies: az-scout-core, reqwest, serde_json
// ============================================================================

//! ## Overview
//! [`EntraTokenExchanger`] performs On-Behalf-Of exchanges against the Entra
//! ID token endpoint and acquires platform tokens from the managed identity
//! endpoint. [`ArmResourceProbe`] reads compute quota usages and SKU
//! availability from Azure Resource Manager with bounded retries, size-limited
//! bodies, and cancellation checks between attempts.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod arm;
pub mod entra;
pub mod http;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use arm::ArmProbeConfig;
pub use arm::ArmResourceProbe;
pub use entra::EntraConfig;
pub use entra::EntraTokenExchanger;
pub use entra::OboCredentials;
pub use http::BodyReadError;
pub use http::HttpClientConfig;
pub use http::ProviderBuildError;
pub use http::build_client;
pub use http::read_body_limited;
