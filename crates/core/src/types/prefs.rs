//! User-facing cart sync preferences.

use serde::{Deserialize, Serialize};

/// Where (and for how long) the cart survives outside the in-memory replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PersistMode {
    /// No local persistence; nothing survives a reload.
    Disabled,
    /// Ephemeral, session-scoped storage; lost when the session ends.
    Session,
    /// Durable storage, honored regardless of session or age.
    Persistent,
    /// Durable storage with expiry on both creation and last-access age.
    ///
    /// The default: keeps carts convenient across reloads without
    /// accumulating abandoned ones forever.
    #[default]
    Smart,
}

impl PersistMode {
    /// Whether this mode writes to the reload-surviving durable medium.
    #[must_use]
    pub const fn is_durable(self) -> bool {
        matches!(self, Self::Persistent | Self::Smart)
    }
}

/// User/config-level settings controlling cart persistence and lifecycle.
///
/// Owned by the settings surface; the engine re-reads these on every
/// persistence operation rather than caching them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPreferences {
    /// Active persistence policy.
    pub mode: PersistMode,
    /// Expiry window in hours. Only meaningful for `Persistent`/`Smart`.
    pub expiry_hours: i64,
    /// Clear the cart when checkout completes.
    pub clear_on_checkout: bool,
    /// Clear the cart on sign-out.
    pub clear_on_sign_out: bool,
}

impl Default for SyncPreferences {
    fn default() -> Self {
        Self {
            mode: PersistMode::Smart,
            expiry_hours: 24,
            clear_on_checkout: true,
            clear_on_sign_out: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mode_is_smart() {
        let prefs = SyncPreferences::default();
        assert_eq!(prefs.mode, PersistMode::Smart);
        assert_eq!(prefs.expiry_hours, 24);
        assert!(prefs.clear_on_checkout);
        assert!(prefs.clear_on_sign_out);
    }

    #[test]
    fn test_durable_modes() {
        assert!(!PersistMode::Disabled.is_durable());
        assert!(!PersistMode::Session.is_durable());
        assert!(PersistMode::Persistent.is_durable());
        assert!(PersistMode::Smart.is_durable());
    }

    #[test]
    fn test_mode_serde_snake_case() {
        let json = serde_json::to_string(&PersistMode::Smart).expect("serialize");
        assert_eq!(json, "\"smart\"");
        let mode: PersistMode = serde_json::from_str("\"session\"").expect("deserialize");
        assert_eq!(mode, PersistMode::Session);
    }
}
