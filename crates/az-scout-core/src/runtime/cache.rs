// crates/az-scout-core/src/runtime/cache.rs
// ============================================================================
// Module: Credential Cache
// Description: In-memory store of downstream access tokens keyed by identity.
// Purpose: Serve unexpired tokens without repeating identity provider exchanges.
// Dependencies: parking_lot, secrecy, time
// ============================================================================

//! ## Overview
//! The credential cache maps `{subject, tenant, audience}` to the most recent
//! token acquired for that key. An entry is never served at or past its
//! `expires_at`: expired entries are treated as absent and removed during the
//! lookup that observes them. Entries are replaced on refresh rather than
//! mutated.
//!
//! The cache is injected as an `Arc` and performs no I/O; its critical
//! sections are short and synchronous.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use secrecy::SecretString;
use time::OffsetDateTime;

use crate::core::AccessToken;
use crate::core::AcquisitionRoute;
use crate::core::Audience;
use crate::core::SubjectId;
use crate::core::TenantId;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Cache key for a downstream token.
///
/// # Invariants
/// - Platform acquisitions use subject [`crate::core::PLATFORM_SUBJECT`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Caller subject, or the platform subject.
    pub subject: SubjectId,
    /// Tenant whose authority issued the token.
    pub tenant: TenantId,
    /// Audience the token is scoped to.
    pub audience: Audience,
}

/// Cached downstream token.
///
/// # Invariants
/// - `expires_at` already includes the configured skew.
#[derive(Clone)]
pub struct CachedToken {
    /// Key the entry is stored under.
    pub key: CacheKey,
    /// Raw access token.
    pub token: SecretString,
    /// Absolute UTC instant at which the entry stops being served.
    pub expires_at: OffsetDateTime,
    /// Route that produced the token.
    pub acquired_via: AcquisitionRoute,
}

impl CachedToken {
    /// Returns true while the entry may be served at `now`.
    #[must_use]
    pub fn is_live_at(&self, now: OffsetDateTime) -> bool {
        now < self.expires_at
    }

    /// Converts the entry into an access token for probes.
    #[must_use]
    pub fn access_token(&self) -> AccessToken {
        AccessToken::new(self.token.clone(), self.expires_at, self.acquired_via)
    }
}

impl fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedToken")
            .field("key", &self.key)
            .field("token", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .field("acquired_via", &self.acquired_via)
            .finish()
    }
}

// ============================================================================
// SECTION: Cache
// ============================================================================

/// Thread-safe credential cache.
#[derive(Default)]
pub struct CredentialCache {
    /// Entries protected by a short-lived lock.
    entries: Mutex<HashMap<CacheKey, CachedToken>>,
}

impl CredentialCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live entry for `key`, evicting it if it has expired.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<CachedToken> {
        self.get_at(key, OffsetDateTime::now_utc())
    }

    /// Returns the entry for `key` if it is live at `now`.
    ///
    /// An entry observed expired is removed before returning `None`.
    #[must_use]
    pub fn get_at(&self, key: &CacheKey, now: OffsetDateTime) -> Option<CachedToken> {
        let mut entries = self.entries.lock();
        match entries.get(key).map(|entry| entry.is_live_at(now)) {
            Some(true) => entries.get(key).cloned(),
            Some(false) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Stores `token`, replacing any entry under the same key.
    pub fn put(&self, token: CachedToken) {
        self.entries.lock().insert(token.key.clone(), token);
    }

    /// Removes the entry for `key`. Returns true when an entry was present.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Returns the number of stored entries, live or not yet evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true when no entries are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCache").field("entries", &self.len()).finish()
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
