// crates/az-scout-config/src/lib.rs
// ============================================================================
// Module: az-scout Config Library
// Description: Canonical config model, environment overrides, and validation.
// Purpose: Single source of truth for az-scout.toml semantics.
// Dependencies: az-scout-core, secrecy, serde, toml, url
// ============================================================================

//! ## Overview
//! `az-scout-config` defines the configuration model for az-scout. Files are
//! loaded with strict size and path limits, deployment environment variables
//! override selected fields, and every section is validated fail-closed
//! before the server starts.
//!
//! Security posture: config inputs are untrusted and may carry client
//! secrets; secrets are held as [`secrecy::SecretString`] and never printed.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
