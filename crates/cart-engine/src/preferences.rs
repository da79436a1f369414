//! Live view of the user's sync preferences.
//!
//! Preferences are owned by the settings surface. The engine never caches
//! them: every persistence operation calls [`PreferencesSource::current`]
//! so a settings change takes effect on the very next save or load.

use std::sync::RwLock;

use meridian_core::SyncPreferences;

/// Source of the preferences in effect right now.
pub trait PreferencesSource: Send + Sync {
    /// The current preferences. Implementations fall back to
    /// [`SyncPreferences::default`] when nothing has been configured.
    fn current(&self) -> SyncPreferences;
}

/// Shared mutable preferences, updated by the settings surface and read by
/// the engine.
#[derive(Debug, Default)]
pub struct SharedPreferences {
    inner: RwLock<SyncPreferences>,
}

impl SharedPreferences {
    /// Create with the `smart` defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with explicit starting preferences.
    #[must_use]
    pub fn with(prefs: SyncPreferences) -> Self {
        Self {
            inner: RwLock::new(prefs),
        }
    }

    /// Replace the preferences. Called by the settings surface.
    pub fn update(&self, prefs: SyncPreferences) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = prefs;
        }
    }
}

impl PreferencesSource for SharedPreferences {
    fn current(&self) -> SyncPreferences {
        // A poisoned lock means a writer panicked mid-update; recover with
        // the defaults rather than propagate.
        self.inner
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}
