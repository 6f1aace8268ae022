// crates/az-scout-cli/src/main.rs
// ============================================================================
// Module: az-scout CLI Entry Point
// Description: Command dispatcher for the az-scout MCP server.
// Purpose: Start the server or check its configuration.
// Dependencies: clap, az-scout-config, az-scout-mcp, thiserror, tokio, tracing
// ============================================================================

//! ## Overview
//! `az-scout serve` loads the configuration, installs logging, and runs the
//! MCP server on the configured transport until it exits or receives Ctrl-C.
//! `az-scout config check` loads and validates the configuration and prints a
//! redacted summary. Errors go to stderr and produce a failure exit code.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use az_scout_cli::logging;
use az_scout_cli::summary;
use az_scout_config::AzScoutConfig;
use az_scout_mcp::McpServer;
use clap::ArgAction;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use thiserror::Error;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "az-scout", disable_help_subcommand = true, disable_version_flag = true)]
struct Cli {
    /// Print version information and exit.
    #[arg(long = "version", action = ArgAction::SetTrue, global = true)]
    show_version: bool,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the az-scout MCP server.
    Serve(ConfigArgs),
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

/// Configuration subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Validate a configuration file and print a redacted summary.
    Check(ConfigArgs),
}

/// Shared `--config` argument.
#[derive(Args, Debug)]
struct ConfigArgs {
    /// Path to `az-scout.toml` (defaults to `AZ_SCOUT_CONFIG`, then the
    /// working directory).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
async fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    if cli.show_version {
        write_stdout_line(&format!("az-scout {}", env!("CARGO_PKG_VERSION")))?;
        return Ok(ExitCode::SUCCESS);
    }
    match cli.command {
        Some(Commands::Serve(args)) => command_serve(args).await,
        Some(Commands::Config {
            command: ConfigCommand::Check(args),
        }) => command_config_check(&args),
        None => {
            write_stderr_line("usage: az-scout <serve|config check> [--config PATH]")?;
            Ok(ExitCode::FAILURE)
        }
    }
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Runs the MCP server until it exits.
async fn command_serve(args: ConfigArgs) -> CliResult<ExitCode> {
    let config = load_config(&args)?;
    logging::init(&config.logging).map_err(|err| CliError::new(err.to_string()))?;
    tracing::info!(
        transport = summary::transport_label(config.server.transport),
        obo = config.identity.obo_enabled(),
        oauth_proxy = config.oauth_proxy.enabled,
        "starting az-scout"
    );
    let server = McpServer::from_config(config)
        .map_err(|err| CliError::new(format!("server init failed: {err}")))?;
    server.serve().await.map_err(|err| {
        tracing::error!(error = %err, "server stopped with an error");
        CliError::new(format!("server failed: {err}"))
    })?;
    Ok(ExitCode::SUCCESS)
}

/// Validates the configuration and prints the redacted summary.
fn command_config_check(args: &ConfigArgs) -> CliResult<ExitCode> {
    let config = load_config(args)?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "config ok").map_err(|err| output_error("stdout", &err))?;
    for line in summary::render(&config) {
        writeln!(stdout, "  {line}").map_err(|err| output_error("stdout", &err))?;
    }
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Loads and validates the configuration named by `args`.
fn load_config(args: &ConfigArgs) -> CliResult<AzScoutConfig> {
    AzScoutConfig::load(args.config.as_deref())
        .map_err(|err| CliError::new(format!("failed to load config: {err}")))
}

/// Writes a line to stdout.
fn write_stdout_line(message: &str) -> CliResult<()> {
    writeln!(std::io::stdout().lock(), "{message}").map_err(|err| output_error("stdout", &err))
}

/// Writes a line to stderr.
fn write_stderr_line(message: &str) -> CliResult<()> {
    writeln!(std::io::stderr().lock(), "{message}").map_err(|err| output_error("stderr", &err))
}

/// Formats an output failure.
fn output_error(stream: &str, error: &std::io::Error) -> CliError {
    CliError::new(format!("failed to write to {stream}: {error}"))
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = writeln!(std::io::stderr().lock(), "az-scout: {message}");
    ExitCode::FAILURE
}
