// crates/az-scout-config/tests/identity_validation.rs
// ============================================================================
// Module: Identity Config Validation Tests
// Description: Delegated credential completeness and environment overrides.
// Purpose: Ensure partial credentials fail closed.
// ============================================================================
//! Identity config validation tests for az-scout-config.

use std::time::Duration;

use az_scout_config::OBO_CLIENT_ID_ENV;
use az_scout_config::OBO_CLIENT_SECRET_ENV;
use az_scout_config::OBO_TENANT_ID_ENV;
use az_scout_config::SUBSCRIPTIONS_ENV;
use az_scout_core::TenantId;
use common::TestResult;
use common::assert_invalid;
use secrecy::ExposeSecret;

mod common;

#[test]
fn partial_obo_credentials_are_rejected() -> TestResult {
    assert_invalid(
        common::config_from_toml("[identity]\nobo_client_id = \"client\"\n"),
        "OBO credentials require client id, client secret, and tenant id together",
    )
}

#[test]
fn partial_obo_credentials_from_environment_are_rejected() -> TestResult {
    assert_invalid(
        common::config_with_env("", &[(OBO_CLIENT_ID_ENV, "client"), (OBO_TENANT_ID_ENV, "t")]),
        "OBO credentials require",
    )
}

#[test]
fn environment_supplies_complete_obo_credentials() -> TestResult {
    let config = common::config_with_env(
        "",
        &[
            (OBO_CLIENT_ID_ENV, "client"),
            (OBO_CLIENT_SECRET_ENV, "secret"),
            (OBO_TENANT_ID_ENV, "home-tenant"),
        ],
    )
    .map_err(|err| err.to_string())?;
    if !config.identity.obo_enabled() {
        return Err("expected delegated credentials".to_string());
    }
    let secret = config.identity.obo_client_secret.as_ref().map(|s| s.expose_secret().to_string());
    if secret.as_deref() != Some("secret") {
        return Err("secret not applied".to_string());
    }
    let broker = config.broker_config();
    if broker.home_tenant != Some(TenantId::new("home-tenant")) {
        return Err("broker home tenant should be the delegated tenant".to_string());
    }
    Ok(())
}

#[test]
fn empty_environment_values_do_not_override_file() -> TestResult {
    let config = common::config_with_env(
        "[identity]\nobo_client_id = \"file-client\"\nobo_client_secret = \"s\"\nobo_tenant_id = \"t\"\n",
        &[(OBO_CLIENT_ID_ENV, "  ")],
    )
    .map_err(|err| err.to_string())?;
    if config.identity.obo_client_id.as_deref() != Some("file-client") {
        return Err("blank env value replaced file value".to_string());
    }
    Ok(())
}

#[test]
fn subscriptions_env_replaces_list() -> TestResult {
    let config = common::config_with_env(
        "[scan]\nsubscriptions = [\"old\"]\nregions = [\"westeurope\"]\n",
        &[(SUBSCRIPTIONS_ENV, "a, b,,c")],
    )
    .map_err(|err| err.to_string())?;
    if config.scan.subscriptions != ["a", "b", "c"] {
        return Err(format!("unexpected subscriptions {:?}", config.scan.subscriptions));
    }
    if config.scan.default_targets().len() != 3 {
        return Err("expected one target per subscription and region".to_string());
    }
    Ok(())
}

#[test]
fn authority_requires_https_unless_allowed() -> TestResult {
    assert_invalid(
        common::config_from_toml("[identity]\nauthority_host = \"http://localhost:9000\"\n"),
        "identity.authority_host must use https",
    )?;
    let config = common::config_from_toml(
        "[identity]\nauthority_host = \"http://localhost:9000\"\nallow_http = true\n",
    )
    .map_err(|err| err.to_string())?;
    if !config.identity.allow_http {
        return Err("allow_http not applied".to_string());
    }
    Ok(())
}

#[test]
fn exchange_attempts_and_timeouts_are_bounded() -> TestResult {
    assert_invalid(
        common::config_from_toml("[identity]\nexchange_attempts = 0\n"),
        "identity.exchange_attempts must be between",
    )?;
    assert_invalid(
        common::config_from_toml("[identity]\nrequest_timeout_ms = 10\n"),
        "identity.request_timeout_ms must be between",
    )
}

#[test]
fn broker_config_carries_skew_and_consent_ttl() -> TestResult {
    let config = common::config_from_toml(
        "[identity]\nexpiry_skew_secs = 90\nconsent_negative_ttl_secs = 0\nexchange_attempts = 3\n",
    )
    .map_err(|err| err.to_string())?;
    let broker = config.broker_config();
    if broker.expiry_skew != Duration::from_secs(90)
        || !broker.consent_negative_ttl.is_zero()
        || broker.retry.max_attempts != 3
    {
        return Err("broker config not derived from identity section".to_string());
    }
    Ok(())
}
