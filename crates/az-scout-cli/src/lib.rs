// crates/az-scout-cli/src/lib.rs
// ============================================================================
// Module: az-scout CLI Library
// Description: Shared helpers for the az-scout binary.
// Purpose: Keep logging setup and config summaries testable outside main.
// Dependencies: az-scout-config, tracing-subscriber
// ============================================================================

//! ## Overview
//! Library half of the `az-scout` binary. [`logging`] installs the global
//! `tracing` subscriber and [`summary`] renders the redacted configuration
//! report printed by `config check`.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod logging;
pub mod summary;
