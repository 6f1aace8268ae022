// crates/az-scout-config/tests/common/mod.rs
// ============================================================================
// Module: Config Test Helpers
// Description: Shared builders for config validation tests.
// ============================================================================

#![allow(dead_code, reason = "Shared helpers are not used by every test binary.")]

use az_scout_config::AzScoutConfig;
use az_scout_config::ConfigError;

pub type TestResult = Result<(), String>;

/// Parses `toml` with an empty environment.
pub fn config_from_toml(toml: &str) -> Result<AzScoutConfig, ConfigError> {
    AzScoutConfig::from_toml_with_env(toml, |_| None)
}

/// Parses `toml` with the given environment pairs.
pub fn config_with_env(toml: &str, vars: &[(&str, &str)]) -> Result<AzScoutConfig, ConfigError> {
    AzScoutConfig::from_toml_with_env(toml, |name| {
        vars.iter().find(|(key, _)| *key == name).map(|(_, value)| (*value).to_string())
    })
}

/// Smallest valid configuration.
pub fn minimal_config() -> Result<AzScoutConfig, ConfigError> {
    config_from_toml("")
}

/// Configuration with delegated credentials.
pub fn obo_config() -> Result<AzScoutConfig, ConfigError> {
    config_from_toml(
        r#"
[identity]
obo_client_id = "client"
obo_client_secret = "secret"
obo_tenant_id = "home-tenant"
"#,
    )
}

/// Asserts an error message contains `needle`.
pub fn assert_invalid<T>(result: Result<T, ConfigError>, needle: &str) -> TestResult {
    match result {
        Err(error) => {
            let message = error.to_string();
            if message.contains(needle) {
                Ok(())
            } else {
                Err(format!("error {message} did not contain {needle}"))
            }
        }
        Ok(_) => Err("expected invalid config".to_string()),
    }
}
