//! Identity types for cart state.
//!
//! Cart lines are identified by a string id derived deterministically from
//! the product and its selected options, so the same product with different
//! options is a distinct line. Persistence records are scoped to a browsing
//! session via a random [`SessionId`] token.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identity for a cart line.
///
/// Derived from `(product_id, variant_id?, language?)` - the variant and
/// language act as discriminators, so two lines for the same product with
/// different options never collide, while repeated adds of the same
/// configuration always resolve to the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineId(String);

impl LineId {
    /// Derive the line id for a product configuration.
    ///
    /// The derivation is deterministic: equal inputs always produce equal
    /// ids, and any differing discriminator produces a different id.
    #[must_use]
    pub fn derive(product_id: &str, variant_id: Option<&str>, language: Option<&str>) -> Self {
        let mut id = String::from(product_id);
        if let Some(variant) = variant_id {
            id.push(':');
            id.push_str(variant);
        }
        if let Some(language) = language {
            id.push('@');
            id.push_str(language);
        }
        Self(id)
    }

    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for LineId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for LineId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for LineId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<LineId> for String {
    fn from(id: LineId) -> Self {
        id.0
    }
}

/// Random token scoped to a single browsing session.
///
/// Written into persistence records so session-scoped policies can reject
/// records left behind by another session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random session token.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for SessionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(token: String) -> Self {
        Self(token)
    }
}
