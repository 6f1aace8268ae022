// crates/az-scout-cli/src/logging.rs
// ============================================================================
// Module: Logging Setup
// Description: Global tracing subscriber installation.
// Purpose: Route operational logs to stderr with env or config filtering.
// Dependencies: az-scout-config, tracing-subscriber
// ============================================================================

//! ## Overview
//! Logs always go to stderr; stdout belongs to the stdio transport. The
//! filter comes from `RUST_LOG` when set, otherwise from `logging.level`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use az_scout_config::LogFormat;
use az_scout_config::LoggingConfig;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Environment variable overriding the configured filter.
pub const RUST_LOG_ENV: &str = "RUST_LOG";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Logging setup failures.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The filter directive did not parse.
    #[error("invalid log filter `{directive}`: {reason}")]
    Filter {
        /// Offending directive.
        directive: String,
        /// Parser message.
        reason: String,
    },
    /// A global subscriber was already installed.
    #[error("logging already initialized: {0}")]
    Init(String),
}

// ============================================================================
// SECTION: Setup
// ============================================================================

/// Picks the env directive when set and non-blank, else the configured one.
#[must_use]
pub fn select_directive<'a>(env: Option<&'a str>, configured: &'a str) -> &'a str {
    env.map(str::trim).filter(|value| !value.is_empty()).unwrap_or(configured)
}

/// Builds the filter from an optional env value and the configured level.
///
/// # Errors
///
/// Returns [`LoggingError::Filter`] when the chosen directive is invalid.
pub fn resolve_filter(env: Option<&str>, configured: &str) -> Result<EnvFilter, LoggingError> {
    let directive = select_directive(env, configured);
    EnvFilter::try_new(directive).map_err(|err| LoggingError::Filter {
        directive: directive.to_string(),
        reason: err.to_string(),
    })
}

/// Installs the global subscriber for `config`.
///
/// # Errors
///
/// Returns [`LoggingError`] when the filter is invalid or a subscriber is
/// already installed.
pub fn init(config: &LoggingConfig) -> Result<(), LoggingError> {
    let env = std::env::var(RUST_LOG_ENV).ok();
    let filter = resolve_filter(env.as_deref(), &config.level)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    let installed = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|err| LoggingError::Init(err.to_string()))
}

// ============================================================================
// SECTION: Tests
// ============================================================================
