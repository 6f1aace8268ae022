// crates/az-scout-providers/tests/entra_exchanger.rs
// ============================================================================
// Module: Entra Exchanger Tests
// Description: On-Behalf-Of and managed identity requests against a stub.
// Purpose: Verify request shape, response decoding, and error classification.
// ============================================================================
//! Entra ID exchanger tests for az-scout-providers.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test assertions use expect/unwrap for clarity."
)]

mod common;

use std::time::Duration;

use az_scout_core::Audience;
use az_scout_core::CallerAssertion;
use az_scout_core::TenantId;
use az_scout_core::TokenError;
use az_scout_core::TokenExchanger;
use az_scout_providers::EntraConfig;
use az_scout_providers::EntraTokenExchanger;
use az_scout_providers::HttpClientConfig;
use az_scout_providers::OboCredentials;
use common::Reply;
use common::StubServer;
use secrecy::ExposeSecret;
use secrecy::SecretString;

fn exchanger(server: &StubServer, delegated: bool) -> EntraTokenExchanger {
    EntraTokenExchanger::new(EntraConfig {
        authority_host: server.base.clone(),
        imds_endpoint: format!("{}/metadata/identity/oauth2/token", server.base),
        managed_identity_client_id: None,
        obo: delegated.then(|| OboCredentials {
            client_id: "app-client".to_string(),
            client_secret: SecretString::new("app-secret".into()),
        }),
        http: HttpClientConfig::default(),
    })
    .unwrap()
}

fn assertion() -> CallerAssertion {
    CallerAssertion::new("caller.jwt.value")
}

#[tokio::test(flavor = "multi_thread")]
async fn obo_exchange_posts_jwt_bearer_grant_to_tenant_authority() {
    let server = StubServer::start(|_, _| {
        Reply::json(200, r#"{"token_type":"Bearer","access_token":"arm-token","expires_in":3599}"#)
    });
    let exchanger = exchanger(&server, true);

    let token = exchanger
        .exchange_on_behalf_of(&assertion(), &TenantId::new("tenant-a"), &Audience::arm())
        .await
        .unwrap();

    assert_eq!(token.token.expose_secret(), "arm-token");
    assert_eq!(token.expires_in, Duration::from_secs(3599));
    let request = &server.recorded()[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.url, "/tenant-a/oauth2/v2.0/token");
    assert!(request.body.contains("requested_token_use=on_behalf_of"));
    assert!(request.body.contains("assertion=caller.jwt.value"));
    assert!(request.body.contains("grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer"));
    assert!(request.body.contains("scope=https%3A%2F%2Fmanagement.azure.com%2F.default"));
}

#[tokio::test(flavor = "multi_thread")]
async fn consent_error_is_classified_without_description() {
    let server = StubServer::start(|_, _| {
        Reply::json(
            400,
            r#"{"error":"invalid_grant","error_description":"AADSTS65001: The user has not consented. caller.jwt.value","error_codes":[65001]}"#,
        )
    });
    let exchanger = exchanger(&server, true);

    let err = exchanger
        .exchange_on_behalf_of(&assertion(), &TenantId::new("tenant-a"), &Audience::arm())
        .await
        .unwrap_err();

    assert_eq!(err, TokenError::ConsentRequired("AADSTS65001".to_string()));
    assert!(!err.to_string().contains("caller.jwt.value"));
}

#[tokio::test(flavor = "multi_thread")]
async fn expired_assertion_is_invalid_caller() {
    let server = StubServer::start(|_, _| {
        Reply::json(400, r#"{"error":"invalid_grant","error_codes":[500133]}"#)
    });
    let err = exchanger(&server, true)
        .exchange_on_behalf_of(&assertion(), &TenantId::new("tenant-a"), &Audience::arm())
        .await
        .unwrap_err();

    assert_eq!(err, TokenError::InvalidCaller("AADSTS500133".to_string()));
}

#[tokio::test(flavor = "multi_thread")]
async fn server_errors_are_transient() {
    let server = StubServer::start(|_, _| Reply::json(503, "{}"));
    let err = exchanger(&server, true)
        .exchange_on_behalf_of(&assertion(), &TenantId::new("tenant-a"), &Audience::arm())
        .await
        .unwrap_err();

    assert!(err.is_transient());
}

#[tokio::test(flavor = "multi_thread")]
async fn obo_without_credentials_is_not_configured() {
    let server = StubServer::start(|_, _| Reply::json(200, "{}"));
    let exchanger = exchanger(&server, false);

    assert!(!exchanger.delegated_enabled());
    let err = exchanger
        .exchange_on_behalf_of(&assertion(), &TenantId::new("tenant-a"), &Audience::arm())
        .await
        .unwrap_err();
    assert!(matches!(err, TokenError::NotConfigured(_)));
    assert_eq!(server.count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn managed_identity_request_sends_metadata_header_and_resource() {
    let server = StubServer::start(|_, _| {
        Reply::json(200, r#"{"access_token":"mi-token","expires_in":"86399","token_type":"Bearer"}"#)
    });
    let exchanger = exchanger(&server, false);

    let token = exchanger.acquire_platform(&Audience::arm()).await.unwrap();

    assert_eq!(token.token.expose_secret(), "mi-token");
    assert_eq!(token.expires_in, Duration::from_secs(86_399));
    let request = &server.recorded()[0];
    assert_eq!(request.method, "GET");
    assert_eq!(request.header("Metadata"), Some("true"));
    assert!(request.url.starts_with("/metadata/identity/oauth2/token?api-version=2018-02-01"));
    assert!(request.url.contains("resource=https%3A%2F%2Fmanagement.azure.com"));
}

#[tokio::test(flavor = "multi_thread")]
async fn managed_identity_rejection_is_not_configured() {
    let server = StubServer::start(|_, _| {
        Reply::json(400, r#"{"error":"invalid_request","error_description":"Identity not found"}"#)
    });
    let err = exchanger(&server, false).acquire_platform(&Audience::arm()).await.unwrap_err();

    assert!(matches!(err, TokenError::NotConfigured(_)));
}
