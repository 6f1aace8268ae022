// crates/az-scout-core/src/lib.rs
// ============================================================================
// Module: az-scout Core Library
// Description: Public API surface for the az-scout scanning engine.
// Purpose: Expose core types, interfaces, and runtime components.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! az-scout core resolves which credential to present to Azure Resource
//! Manager for a caller, caches those credentials with strict expiry, and fans
//! capacity probes out over (subscription, region) units with bounded
//! concurrency. Transport concerns (HTTP, MCP, Entra ID) live behind the
//! interfaces defined here so the engine can be exercised with fakes.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use interfaces::ExchangedToken;
pub use interfaces::ProbeError;
pub use interfaces::ResourceProbe;
pub use interfaces::TokenError;
pub use interfaces::TokenExchanger;
pub use runtime::BrokerConfig;
pub use runtime::CacheKey;
pub use runtime::CachedToken;
pub use runtime::CredentialCache;
pub use runtime::RetryPolicy;
pub use runtime::ScanCoordinator;
pub use runtime::ScanCoordinatorConfig;
pub use runtime::ScanError;
pub use runtime::TokenBroker;
