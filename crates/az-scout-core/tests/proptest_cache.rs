// crates/az-scout-core/tests/proptest_cache.rs
// ============================================================================
// Module: Credential Cache Property Tests
// Description: Expiry and round-trip properties of the credential cache.
// ============================================================================
//! ## Overview
//! Property tests: an entry is served exactly when the lookup instant is
//! before its expiry, expired lookups evict, and stored token bytes come back
//! unchanged.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Property tests use unwrap for clarity."
)]

use az_scout_core::AcquisitionRoute;
use az_scout_core::Audience;
use az_scout_core::CacheKey;
use az_scout_core::CachedToken;
use az_scout_core::CredentialCache;
use az_scout_core::SubjectId;
use az_scout_core::TenantId;
use proptest::prelude::*;
use secrecy::ExposeSecret;
use secrecy::SecretString;
use time::Duration;
use time::OffsetDateTime;

fn key(subject: &str) -> CacheKey {
    CacheKey {
        subject: SubjectId::new(subject),
        tenant: TenantId::new("tenant"),
        audience: Audience::arm(),
    }
}

fn base_instant() -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(1_800_000_000).unwrap()
}

proptest! {
    #[test]
    fn expired_entries_are_never_served(
        lifetime_secs in -3_600i64..3_600,
        lookup_offset_secs in -3_600i64..7_200,
    ) {
        let cache = CredentialCache::new();
        let base = base_instant();
        let expires_at = base + Duration::seconds(lifetime_secs);
        cache.put(CachedToken {
            key: key("subject"),
            token: SecretString::new("token".into()),
            expires_at,
            acquired_via: AcquisitionRoute::OnBehalfOf,
        });

        let now = base + Duration::seconds(lookup_offset_secs);
        let hit = cache.get_at(&key("subject"), now);

        if now < expires_at {
            prop_assert!(hit.is_some());
            prop_assert_eq!(cache.len(), 1);
        } else {
            prop_assert!(hit.is_none());
            prop_assert_eq!(cache.len(), 0);
        }
    }

    #[test]
    fn stored_tokens_round_trip_byte_identical(raw in "\\PC{1,256}", subject in "[a-z0-9-]{1,36}") {
        let cache = CredentialCache::new();
        let base = base_instant();
        cache.put(CachedToken {
            key: key(&subject),
            token: SecretString::new(raw.clone().into_boxed_str()),
            expires_at: base + Duration::hours(1),
            acquired_via: AcquisitionRoute::Platform,
        });

        let hit = cache.get_at(&key(&subject), base).unwrap();
        prop_assert_eq!(hit.token.expose_secret().as_bytes(), raw.as_bytes());
        let access = hit.access_token();
        prop_assert_eq!(access.expose(), raw.as_str());
    }
}
