// crates/az-scout-core/tests/broker.rs
// ============================================================================
// Module: Token Broker Tests
// Description: Routing, caching, singleflight, and failure classification.
// ============================================================================
//! ## Overview
//! Exercises the token broker against a scripted exchanger.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test assertions use expect/unwrap for clarity."
)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use az_scout_core::AcquisitionRoute;
use az_scout_core::Audience;
use az_scout_core::BrokerConfig;
use az_scout_core::CallerAssertion;
use az_scout_core::Principal;
use az_scout_core::TenantId;
use az_scout_core::TokenError;
use common::Exchange;
use common::FakeExchanger;
use common::broker;
use common::fast_broker_config;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

fn alice() -> Principal {
    Principal::delegated("alice-oid", Some(TenantId::new("alice-tenant"))).unwrap()
}

fn assertion() -> CallerAssertion {
    CallerAssertion::new("inbound.jwt.value")
}

fn live() -> CancellationToken {
    CancellationToken::new()
}

#[tokio::test]
async fn delegated_principal_uses_obo_and_caches_result() {
    let exchanger = Arc::new(FakeExchanger::issuing(true));
    let broker = broker(Arc::clone(&exchanger), fast_broker_config());
    let audience = Audience::arm();

    let first = broker.acquire(&alice(), Some(&assertion()), &audience, None, &live()).await.unwrap();
    let second = broker.acquire(&alice(), Some(&assertion()), &audience, None, &live()).await.unwrap();

    assert_eq!(first.route(), AcquisitionRoute::OnBehalfOf);
    assert_eq!(first.expose(), second.expose());
    assert_eq!(exchanger.obo(), 1);
    assert_eq!(exchanger.platform(), 0);
    assert_eq!(exchanger.tenants.lock().as_slice(), &[TenantId::new("home-tenant")]);
}

#[tokio::test]
async fn delegated_principal_without_obo_config_uses_platform() {
    let exchanger = Arc::new(FakeExchanger::issuing(false));
    let broker = broker(Arc::clone(&exchanger), fast_broker_config());

    let token =
        broker.acquire(&alice(), Some(&assertion()), &Audience::arm(), None, &live()).await.unwrap();

    assert_eq!(token.route(), AcquisitionRoute::Platform);
    assert_eq!(exchanger.obo(), 0);
    assert_eq!(exchanger.platform(), 1);
}

#[tokio::test]
async fn platform_principal_never_uses_obo() {
    let exchanger = Arc::new(FakeExchanger::issuing(true));
    let broker = broker(Arc::clone(&exchanger), fast_broker_config());

    let token = broker.acquire(&Principal::platform(None), None, &Audience::arm(), None, &live()).await.unwrap();

    assert_eq!(token.route(), AcquisitionRoute::Platform);
    assert_eq!(exchanger.obo(), 0);
}

#[tokio::test]
async fn delegated_request_without_assertion_is_invalid_caller() {
    let exchanger = Arc::new(FakeExchanger::issuing(true));
    let broker = broker(Arc::clone(&exchanger), fast_broker_config());

    let err = broker.acquire(&alice(), None, &Audience::arm(), None, &live()).await.unwrap_err();

    assert!(matches!(err, TokenError::InvalidCaller(_)));
    assert_eq!(exchanger.obo() + exchanger.platform(), 0);
}

#[tokio::test]
async fn failed_delegated_exchange_never_falls_back_to_platform() {
    let exchanger = Arc::new(FakeExchanger::scripted(
        true,
        Vec::new(),
        Exchange::Fail(TokenError::InvalidCaller("AADSTS50013".to_string())),
    ));
    let broker = broker(Arc::clone(&exchanger), fast_broker_config());

    let err = broker.acquire(&alice(), Some(&assertion()), &Audience::arm(), None, &live()).await.unwrap_err();

    assert!(matches!(err, TokenError::InvalidCaller(_)));
    assert_eq!(exchanger.obo(), 1);
    assert_eq!(exchanger.platform(), 0);
    assert!(broker.cache().is_empty());
}

#[tokio::test]
async fn consent_required_is_not_retried_and_is_remembered() {
    let exchanger = Arc::new(FakeExchanger::scripted(
        true,
        Vec::new(),
        Exchange::Fail(TokenError::ConsentRequired("AADSTS65001".to_string())),
    ));
    let broker = broker(Arc::clone(&exchanger), fast_broker_config());
    let audience = Audience::arm();

    for _ in 0..3 {
        let err = broker.acquire(&alice(), Some(&assertion()), &audience, None, &live()).await.unwrap_err();
        assert_eq!(err, TokenError::ConsentRequired("AADSTS65001".to_string()));
    }
    assert_eq!(exchanger.obo(), 1);
}

#[tokio::test]
async fn consent_negative_cache_can_be_disabled() {
    let exchanger = Arc::new(FakeExchanger::scripted(
        true,
        Vec::new(),
        Exchange::Fail(TokenError::ConsentRequired("AADSTS65001".to_string())),
    ));
    let config = BrokerConfig {
        consent_negative_ttl: Duration::ZERO,
        ..fast_broker_config()
    };
    let broker = broker(Arc::clone(&exchanger), config);

    for _ in 0..2 {
        let _ = broker.acquire(&alice(), Some(&assertion()), &Audience::arm(), None, &live()).await;
    }
    assert_eq!(exchanger.obo(), 2);
}

#[tokio::test]
async fn transient_failures_retry_within_attempt_budget() {
    let exchanger = Arc::new(FakeExchanger::scripted(
        true,
        vec![Exchange::Fail(TokenError::Transient("503".to_string()))],
        Exchange::Issue(Duration::from_secs(3600)),
    ));
    let broker = broker(Arc::clone(&exchanger), fast_broker_config());

    let token = broker.acquire(&alice(), Some(&assertion()), &Audience::arm(), None, &live()).await;

    assert!(token.is_ok());
    assert_eq!(exchanger.obo(), 2);
}

#[tokio::test]
async fn persistent_transient_failure_surfaces_after_two_attempts() {
    let exchanger = Arc::new(FakeExchanger::scripted(
        true,
        Vec::new(),
        Exchange::Fail(TokenError::Transient("timeout".to_string())),
    ));
    let broker = broker(Arc::clone(&exchanger), fast_broker_config());

    let err = broker.acquire(&alice(), Some(&assertion()), &Audience::arm(), None, &live()).await.unwrap_err();

    assert!(err.is_transient());
    assert_eq!(exchanger.obo(), 2);
    assert!(broker.cache().is_empty());
}

#[tokio::test]
async fn concurrent_misses_share_one_exchange() {
    let exchanger = Arc::new(FakeExchanger::issuing(true).with_delay(Duration::from_millis(50)));
    let broker = broker(Arc::clone(&exchanger), fast_broker_config());

    let mut tasks = JoinSet::new();
    for _ in 0..16 {
        let broker = Arc::clone(&broker);
        tasks.spawn(async move {
            broker.acquire(&alice(), Some(&assertion()), &Audience::arm(), None, &live()).await
        });
    }
    while let Some(joined) = tasks.join_next().await {
        assert!(joined.unwrap().is_ok());
    }
    assert_eq!(exchanger.obo(), 1);
}

#[tokio::test]
async fn lifetime_inside_skew_is_returned_but_not_cached() {
    let exchanger = Arc::new(FakeExchanger::scripted(
        true,
        Vec::new(),
        Exchange::Issue(Duration::from_secs(30)),
    ));
    let broker = broker(Arc::clone(&exchanger), fast_broker_config());

    broker.acquire(&alice(), Some(&assertion()), &Audience::arm(), None, &live()).await.unwrap();
    broker.acquire(&alice(), Some(&assertion()), &Audience::arm(), None, &live()).await.unwrap();

    assert_eq!(exchanger.obo(), 2);
    assert!(broker.cache().is_empty());
}

#[tokio::test]
async fn tenant_override_uses_distinct_cache_entry_and_authority() {
    let exchanger = Arc::new(FakeExchanger::issuing(true));
    let broker = broker(Arc::clone(&exchanger), fast_broker_config());
    let other = TenantId::new("other-tenant");

    broker.acquire(&alice(), Some(&assertion()), &Audience::arm(), None, &live()).await.unwrap();
    broker.acquire(&alice(), Some(&assertion()), &Audience::arm(), Some(&other), &live()).await.unwrap();

    assert_eq!(exchanger.obo(), 2);
    assert_eq!(broker.cache().len(), 2);
    assert_eq!(exchanger.tenants.lock().last(), Some(&other));
}

#[tokio::test]
async fn distinct_callers_do_not_share_tokens() {
    let exchanger = Arc::new(FakeExchanger::issuing(true));
    let broker = broker(Arc::clone(&exchanger), fast_broker_config());
    let bob = Principal::delegated("bob-oid", None).unwrap();

    broker.acquire(&alice(), Some(&assertion()), &Audience::arm(), None, &live()).await.unwrap();
    broker.acquire(&bob, Some(&assertion()), &Audience::arm(), None, &live()).await.unwrap();

    assert_eq!(exchanger.obo(), 2);
}

#[tokio::test]
async fn platform_route_ignores_caller_tenant() {
    let exchanger = Arc::new(FakeExchanger::issuing(false));
    let broker = broker(Arc::clone(&exchanger), fast_broker_config());

    for i in 0..20 {
        let tenant = TenantId::new(format!("bogus-{i}"));
        let token = broker
            .acquire(&Principal::platform(None), None, &Audience::arm(), Some(&tenant), &live())
            .await
            .unwrap();
        assert_eq!(token.route(), AcquisitionRoute::Platform);
    }

    assert_eq!(exchanger.platform(), 1);
    assert_eq!(broker.cache().len(), 1);
}

#[tokio::test]
async fn expired_consent_denials_are_pruned() {
    let exchanger = Arc::new(FakeExchanger::scripted(
        true,
        Vec::new(),
        Exchange::Fail(TokenError::ConsentRequired("AADSTS65001".to_string())),
    ));
    let config = BrokerConfig {
        consent_negative_ttl: Duration::from_millis(20),
        ..fast_broker_config()
    };
    let broker = broker(Arc::clone(&exchanger), config);
    let bob = Principal::delegated("bob-oid", None).unwrap();

    let _ = broker.acquire(&alice(), Some(&assertion()), &Audience::arm(), None, &live()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let _ = broker.acquire(&bob, Some(&assertion()), &Audience::arm(), None, &live()).await;

    assert_eq!(broker.remembered_denials(), 1);
}

#[tokio::test]
async fn cancellation_interrupts_a_pending_exchange() {
    let exchanger = Arc::new(FakeExchanger::issuing(true).with_delay(Duration::from_secs(30)));
    let broker = broker(Arc::clone(&exchanger), fast_broker_config());
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        broker.acquire(&alice(), Some(&assertion()), &Audience::arm(), None, &cancel),
    )
    .await
    .expect("acquisition returned after cancellation")
    .unwrap_err();

    assert!(err.is_transient());
    assert!(broker.cache().is_empty());
}

#[tokio::test]
async fn already_cancelled_request_does_not_exchange() {
    let exchanger = Arc::new(FakeExchanger::issuing(true));
    let broker = broker(Arc::clone(&exchanger), fast_broker_config());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = broker.acquire(&alice(), Some(&assertion()), &Audience::arm(), None, &cancel).await;

    assert!(result.is_err());
    assert_eq!(exchanger.obo(), 0);
}
