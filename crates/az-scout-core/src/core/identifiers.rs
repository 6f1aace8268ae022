// crates/az-scout-core/src/core/identifiers.rs
// ============================================================================
// Module: az-scout Identifiers
// Description: Opaque identifiers for tenants, subjects, subscriptions, and regions.
// Purpose: Provide strongly typed, serializable IDs with stable string forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Identifiers are opaque strings that serialize transparently. Only
//! [`Region`] normalizes its input: Azure accepts display names such as
//! `"West Europe"` while ARM paths require the programmatic form
//! `"westeurope"`, so regions are folded on construction.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Identifier Types
// ============================================================================

/// Entra ID tenant identifier (directory GUID or verified domain).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Creates a new tenant identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TenantId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Subject identifier of a caller (the `oid` claim, falling back to `sub`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    /// Creates a new subject identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Azure subscription identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Creates a new subscription identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for SubscriptionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Downstream audience (OAuth scope) a token is acquired for.
///
/// # Invariants
/// - Stored verbatim; `https://management.azure.com/.default` is the ARM scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Audience(String);

impl Audience {
    /// Azure Resource Manager default scope.
    pub const ARM: &'static str = "https://management.azure.com/.default";

    /// Creates a new audience.
    #[must_use]
    pub fn new(scope: impl Into<String>) -> Self {
        Self(scope.into())
    }

    /// Returns the ARM audience.
    #[must_use]
    pub fn arm() -> Self {
        Self::new(Self::ARM)
    }

    /// Returns the audience as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the resource URI for the audience (the scope without `/.default`).
    ///
    /// Managed identity endpoints take a resource rather than a scope.
    #[must_use]
    pub fn resource(&self) -> &str {
        self.0.strip_suffix("/.default").unwrap_or(&self.0)
    }
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Azure region in programmatic form.
///
/// # Invariants
/// - Always lowercase ASCII with no whitespace (`"West Europe"` becomes `"westeurope"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Region(String);

impl Region {
    /// Creates a normalized region name.
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        let normalized = name
            .as_ref()
            .chars()
            .filter(|ch| !ch.is_whitespace())
            .flat_map(char::to_lowercase)
            .collect();
        Self(normalized)
    }

    /// Returns the region as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for Region {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Region {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<Region> for String {
    fn from(value: Region) -> Self {
        value.0
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_folds_display_names() {
        assert_eq!(Region::new("West Europe").as_str(), "westeurope");
        assert_eq!(Region::new(" East US 2 ").as_str(), "eastus2");
        assert_eq!(Region::new("swedencentral").as_str(), "swedencentral");
    }

    #[test]
    fn region_normalizes_on_deserialize() {
        let region: Region = serde_json::from_str("\"North Europe\"").unwrap_or_else(|_| Region::new(""));
        assert_eq!(region.as_str(), "northeurope");
    }

    #[test]
    fn audience_resource_strips_default_suffix() {
        assert_eq!(Audience::arm().resource(), "https://management.azure.com");
        assert_eq!(Audience::new("api://custom").resource(), "api://custom");
    }
}
