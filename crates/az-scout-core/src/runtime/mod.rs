// crates/az-scout-core/src/runtime/mod.rs
// ============================================================================
// Module: az-scout Runtime
// Description: Credential cache, token broker, retry policy, and scan coordinator.
// Purpose: Execute identity-delegated capacity scans over the core interfaces.
// Dependencies: crate::{core, interfaces}, parking_lot, tokio, tracing
// ============================================================================

//! ## Overview
//! The runtime composes the core data model with the interface seams. The
//! [`TokenBroker`] owns credential routing and caching, and the
//! [`ScanCoordinator`] owns fan-out, ordering, and cancellation. Neither
//! performs I/O directly.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod broker;
pub mod cache;
pub mod coordinator;
pub mod retry;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use broker::BrokerConfig;
pub use broker::TokenBroker;
pub use cache::CacheKey;
pub use cache::CachedToken;
pub use cache::CredentialCache;
pub use coordinator::ScanCoordinator;
pub use coordinator::ScanCoordinatorConfig;
pub use coordinator::ScanError;
pub use retry::RetryPolicy;
pub use retry::with_retry;
