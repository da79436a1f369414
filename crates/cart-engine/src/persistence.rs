//! Policy-driven durable cart snapshots.
//!
//! The adapter mirrors the in-memory replica into a key/value medium chosen
//! by the active [`PersistMode`], and owns the expiry and session-scoping
//! bookkeeping that decides whether a stored snapshot is still worth
//! honoring on the next load. Preferences are re-read on every operation -
//! a settings change applies to the very next call.
//!
//! Failure policy: a record that cannot be parsed is cleared and treated as
//! absent; storage trouble degrades to "no snapshot". Nothing in this
//! module surfaces an error to its caller.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use meridian_core::{CartItem, PersistMode, SessionId, SyncPreferences};

use crate::preferences::PreferencesSource;
use crate::storage::KeyValueStore;

/// Storage key for the cart snapshot, identical in both media.
const CART_KEY: &str = "meridian.cart";

/// Age past which `age_info` flags the snapshot as stale (hours).
///
/// Presentation uses this to warn about aging carts; it is unrelated to the
/// `smart` policy's expiry window.
pub const DEFAULT_STALE_AFTER_HOURS: f64 = 4.0;

/// The durable snapshot, serialized as JSON into the storage medium.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistenceRecord {
    items: Vec<CartItem>,
    /// First write timestamp; preserved across rewrites of the same record.
    created_at: DateTime<Utc>,
    /// Updated on every successful load under the `smart` policy.
    last_access_at: DateTime<Utc>,
    session_id: SessionId,
    /// The policy in effect when the record was written.
    policy: PersistMode,
}

/// Read-only diagnostic describing the age of the stored snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CartAge {
    /// Hours since the record was first written. `None` when no record
    /// exists or persistence is disabled.
    pub hours_old: Option<f64>,
    /// Whether the record is old enough to warn about.
    pub is_stale: bool,
}

impl CartAge {
    const fn absent() -> Self {
        Self {
            hours_old: None,
            is_stale: false,
        }
    }
}

/// Reads and writes the serialized cart snapshot to the medium chosen by
/// the active policy.
#[derive(Clone)]
pub struct PersistenceAdapter {
    session_store: Arc<dyn KeyValueStore>,
    durable_store: Arc<dyn KeyValueStore>,
    prefs: Arc<dyn PreferencesSource>,
    session_id: SessionId,
    stale_after_hours: f64,
}

impl PersistenceAdapter {
    /// Create an adapter over the two storage media.
    ///
    /// A fresh [`SessionId`] is generated; records written by other
    /// sessions are ignored under the session-scoped policy.
    #[must_use]
    pub fn new(
        session_store: Arc<dyn KeyValueStore>,
        durable_store: Arc<dyn KeyValueStore>,
        prefs: Arc<dyn PreferencesSource>,
    ) -> Self {
        Self {
            session_store,
            durable_store,
            prefs,
            session_id: SessionId::generate(),
            stale_after_hours: DEFAULT_STALE_AFTER_HOURS,
        }
    }

    /// Override the staleness threshold used by [`Self::age_info`].
    #[must_use]
    pub const fn with_stale_after_hours(mut self, hours: f64) -> Self {
        self.stale_after_hours = hours;
        self
    }

    /// The session token this adapter stamps into its records.
    #[must_use]
    pub const fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// The preferences in effect right now (re-read, never cached).
    #[must_use]
    pub fn preferences(&self) -> SyncPreferences {
        self.prefs.current()
    }

    fn store_for(&self, mode: PersistMode) -> &Arc<dyn KeyValueStore> {
        if mode.is_durable() {
            &self.durable_store
        } else {
            &self.session_store
        }
    }

    /// Read and parse the record in `store`, clearing it when corrupted.
    fn read_record(&self, store: &Arc<dyn KeyValueStore>) -> Option<PersistenceRecord> {
        let raw = store.get(CART_KEY)?;
        match serde_json::from_str::<PersistenceRecord>(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(error = %e, "Discarding corrupted cart snapshot");
                store.remove(CART_KEY);
                None
            }
        }
    }

    fn write_record(store: &Arc<dyn KeyValueStore>, record: &PersistenceRecord) {
        match serde_json::to_string(record) {
            Ok(raw) => store.set(CART_KEY, raw),
            Err(e) => warn!(error = %e, "Failed to serialize cart snapshot"),
        }
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Load the stored snapshot under the current policy.
    ///
    /// Returns an empty collection whenever the policy forbids persistence,
    /// the record is absent, corrupted, expired, or belongs to another
    /// session. Under the `smart` policy a successful load refreshes
    /// `last_access_at`.
    #[instrument(skip(self))]
    #[must_use]
    pub fn load(&self) -> Vec<CartItem> {
        let prefs = self.prefs.current();
        match prefs.mode {
            PersistMode::Disabled => Vec::new(),
            PersistMode::Session => self.load_session(),
            PersistMode::Persistent => self
                .read_record(&self.durable_store)
                .map(|record| record.items)
                .unwrap_or_default(),
            PersistMode::Smart => self.load_smart(&prefs),
        }
    }

    fn load_session(&self) -> Vec<CartItem> {
        let Some(record) = self.read_record(&self.session_store) else {
            return Vec::new();
        };
        if record.session_id != self.session_id {
            debug!("Ignoring session-scoped snapshot from another session");
            self.session_store.remove(CART_KEY);
            return Vec::new();
        }
        record.items
    }

    fn load_smart(&self, prefs: &SyncPreferences) -> Vec<CartItem> {
        let Some(mut record) = self.read_record(&self.durable_store) else {
            return Vec::new();
        };

        let now = Utc::now();
        let window = Duration::hours(prefs.expiry_hours.max(0));
        if now - record.created_at > window || now - record.last_access_at > window {
            debug!(
                expiry_hours = prefs.expiry_hours,
                "Expiring aged cart snapshot"
            );
            self.durable_store.remove(CART_KEY);
            return Vec::new();
        }

        // A successful load counts as access and extends the idle window.
        record.last_access_at = now;
        Self::write_record(&self.durable_store, &record);
        record.items
    }

    /// Mirror `items` into the policy's storage medium.
    ///
    /// `created_at` of an existing record is preserved so rewrites do not
    /// reset the expiry clock; the inactive medium is cleared so a policy
    /// switch never resurrects an older cart.
    #[instrument(skip(self, items), fields(count = items.len()))]
    pub fn save(&self, items: &[CartItem]) {
        let prefs = self.prefs.current();
        if prefs.mode == PersistMode::Disabled {
            return;
        }

        let store = self.store_for(prefs.mode);
        let now = Utc::now();
        let created_at = self
            .read_record(store)
            .map_or(now, |existing| existing.created_at);

        let record = PersistenceRecord {
            items: items.to_vec(),
            created_at,
            last_access_at: now,
            session_id: self.session_id.clone(),
            policy: prefs.mode,
        };
        Self::write_record(store, &record);

        // Only one tier holds a snapshot at a time.
        if prefs.mode.is_durable() {
            self.session_store.remove(CART_KEY);
        } else {
            self.durable_store.remove(CART_KEY);
        }
    }

    /// Remove the snapshot from both media.
    #[instrument(skip(self))]
    pub fn clear(&self) {
        self.session_store.remove(CART_KEY);
        self.durable_store.remove(CART_KEY);
    }

    /// Age of the stored snapshot, for presentation-side staleness warnings.
    ///
    /// Does not refresh `last_access_at` - reading the age is not an
    /// access.
    #[must_use]
    pub fn age_info(&self) -> CartAge {
        let prefs = self.prefs.current();
        if prefs.mode == PersistMode::Disabled {
            return CartAge::absent();
        }

        let Some(record) = self.read_record(self.store_for(prefs.mode)) else {
            return CartAge::absent();
        };

        let elapsed = Utc::now() - record.created_at;
        #[allow(clippy::cast_precision_loss)] // Second counts stay well inside f64 precision
        let hours_old = elapsed.num_seconds() as f64 / 3600.0;
        CartAge {
            hours_old: Some(hours_old),
            is_stale: hours_old >= self.stale_after_hours,
        }
    }
}

impl std::fmt::Debug for PersistenceAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceAdapter")
            .field("session_id", &self.session_id)
            .field("stale_after_hours", &self.stale_after_hours)
            .finish_non_exhaustive()
    }
}
