//! The cart engine facade.
//!
//! This is the surface the presentation layer talks to: synchronous,
//! optimistic mutations over the in-memory replica, each mirrored to the
//! persistence adapter and handed to the sync coordinator for a debounced
//! remote write. Rendering, formatting, and user prompts stay with the
//! presentation layer; the engine only keeps the three replicas consistent.

use std::sync::{Arc, Mutex};

use rust_decimal::Decimal;
use tracing::{info, instrument};

use meridian_core::{CartItem, LineId};

use crate::config::{EngineConfig, SyncTimings};
use crate::coordinator::SyncCoordinator;
use crate::error::EngineError;
use crate::persistence::{CartAge, PersistenceAdapter};
use crate::preferences::PreferencesSource;
use crate::remote::{RemoteCart, RemoteCartClient};
use crate::replica::CartReplica;
use crate::storage::KeyValueStore;

/// The cart engine: optimistic local mutation with debounced remote sync.
///
/// Cheaply cloneable; clones share the same replica, coordinator, and
/// stores. Mutations are synchronous but must be called from within a
/// tokio runtime so the coordinator can arm its timers.
pub struct CartEngine<R: RemoteCart> {
    replica: Arc<Mutex<CartReplica>>,
    coordinator: SyncCoordinator<R>,
    persistence: PersistenceAdapter,
}

impl<R: RemoteCart> Clone for CartEngine<R> {
    fn clone(&self) -> Self {
        Self {
            replica: Arc::clone(&self.replica),
            coordinator: self.coordinator.clone(),
            persistence: self.persistence.clone(),
        }
    }
}

impl CartEngine<RemoteCartClient> {
    /// Build a production engine from configuration and the two storage
    /// media provided by the host.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote cart client cannot be constructed.
    pub fn from_config(
        config: &EngineConfig,
        session_store: Arc<dyn KeyValueStore>,
        durable_store: Arc<dyn KeyValueStore>,
        prefs: Arc<dyn PreferencesSource>,
    ) -> Result<Self, EngineError> {
        let remote = RemoteCartClient::new(&config.remote)?;
        let persistence = PersistenceAdapter::new(session_store, durable_store, prefs)
            .with_stale_after_hours(config.stale_after_hours);
        Ok(Self::new(remote, persistence, config.timings))
    }
}

impl<R: RemoteCart> CartEngine<R> {
    /// Create an engine over an explicit remote client and persistence
    /// adapter.
    #[must_use]
    pub fn new(remote: R, persistence: PersistenceAdapter, timings: SyncTimings) -> Self {
        let replica = Arc::new(Mutex::new(CartReplica::new()));
        let coordinator = SyncCoordinator::new(
            remote,
            Arc::clone(&replica),
            persistence.clone(),
            timings,
        );
        Self {
            replica,
            coordinator,
            persistence,
        }
    }

    /// Mirror the replica to durable storage and schedule the debounced
    /// remote write for the touched lines.
    fn after_mutation(&self, dirty: Vec<LineId>) {
        if dirty.is_empty() {
            return;
        }
        let snapshot = self.snapshot();
        self.persistence.save(&snapshot);
        self.coordinator.note_mutation(dirty);
    }

    fn snapshot(&self) -> Vec<CartItem> {
        self.replica
            .lock()
            .map(|replica| replica.snapshot())
            .unwrap_or_default()
    }

    fn with_replica<T>(&self, f: impl FnOnce(&mut CartReplica) -> T) -> Option<T> {
        self.replica.lock().ok().map(|mut replica| f(&mut replica))
    }

    // =========================================================================
    // Item Mutations
    // =========================================================================

    /// Add `qty` of `item` to the cart (increments an existing line).
    pub fn add_item(&self, item: CartItem, qty: u32) {
        let dirty = self
            .with_replica(|r| r.add_item(item, qty))
            .unwrap_or_default();
        self.after_mutation(dirty);
    }

    /// Remove the line with `id`.
    pub fn remove_item(&self, id: &LineId) {
        let dirty = self
            .with_replica(|r| r.remove_item(id))
            .unwrap_or_default();
        self.after_mutation(dirty);
    }

    /// Set a line's quantity; zero removes the line.
    pub fn set_quantity(&self, id: &LineId, qty: u32) {
        let dirty = self
            .with_replica(|r| r.set_quantity(id, qty))
            .unwrap_or_default();
        self.after_mutation(dirty);
    }

    /// Empty the cart (saved-for-later is kept).
    pub fn clear(&self) {
        let dirty = self.with_replica(CartReplica::clear).unwrap_or_default();
        self.after_mutation(dirty);
    }

    // =========================================================================
    // Selection
    // =========================================================================

    /// Select a line for bulk operations.
    pub fn select(&self, id: &LineId) {
        self.with_replica(|r| r.select(id));
    }

    /// Deselect a line.
    pub fn deselect(&self, id: &LineId) {
        self.with_replica(|r| r.deselect(id));
    }

    /// Select every line.
    pub fn select_all(&self) {
        self.with_replica(CartReplica::select_all);
    }

    /// Clear the selection.
    pub fn clear_selection(&self) {
        self.with_replica(CartReplica::clear_selection);
    }

    /// Remove every selected line.
    pub fn remove_selected(&self) {
        let dirty = self
            .with_replica(CartReplica::remove_selected)
            .unwrap_or_default();
        self.after_mutation(dirty);
    }

    /// Set the quantity of every selected line; zero removes them.
    pub fn set_quantity_for_selected(&self, qty: u32) {
        let dirty = self
            .with_replica(|r| r.set_quantity_for_selected(qty))
            .unwrap_or_default();
        self.after_mutation(dirty);
    }

    /// Move every selected line to saved-for-later.
    pub fn move_selected_to_saved(&self) {
        let dirty = self
            .with_replica(CartReplica::move_selected_to_saved)
            .unwrap_or_default();
        self.after_mutation(dirty);
    }

    /// Restore a saved line back into the cart.
    pub fn restore_from_saved(&self, id: &LineId) {
        let dirty = self
            .with_replica(|r| r.restore_from_saved(id))
            .unwrap_or_default();
        self.after_mutation(dirty);
    }

    // =========================================================================
    // Sync
    // =========================================================================

    /// Startup reconciliation: seed the replica from the durable snapshot,
    /// then reconcile against the remote cart.
    #[instrument(skip(self))]
    pub async fn load_cart(&self) -> Vec<CartItem> {
        let stored = self.persistence.load();
        if !stored.is_empty() {
            info!(lines = stored.len(), "Seeding cart from local snapshot");
            self.with_replica(|r| r.replace_items(stored));
        }
        self.coordinator.force_sync().await
    }

    /// Forced full reconciliation (throttled; see
    /// [`SyncCoordinator::force_sync`]).
    pub async fn force_sync(&self) -> Vec<CartItem> {
        self.coordinator.force_sync().await
    }

    /// Flush any pending debounced write immediately.
    pub async fn sync_with_server(&self) {
        self.coordinator.flush_now().await;
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Checkout completed. Clears the cart when the active preferences say
    /// so; the backend owns emptying the authoritative cart as part of
    /// order placement, so nothing is pushed.
    #[instrument(skip(self))]
    pub fn complete_checkout(&self) {
        if !self.persistence.preferences().clear_on_checkout {
            return;
        }
        info!("Clearing cart after checkout");
        self.coordinator.shutdown();
        self.with_replica(|r| {
            r.clear();
        });
        self.persistence.clear();
    }

    /// The user signed out. Clears all session cart state when the active
    /// preferences say so.
    #[instrument(skip(self))]
    pub fn sign_out(&self) {
        if !self.persistence.preferences().clear_on_sign_out {
            return;
        }
        info!("Clearing cart on sign-out");
        self.coordinator.shutdown();
        self.with_replica(|r| *r = CartReplica::new());
        self.persistence.clear();
    }

    /// Cancel pending timers. Call on teardown of the hosting context.
    pub fn shutdown(&self) {
        self.coordinator.shutdown();
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// The cart lines, in order.
    #[must_use]
    pub fn items(&self) -> Vec<CartItem> {
        self.snapshot()
    }

    /// The saved-for-later lines.
    #[must_use]
    pub fn saved_items(&self) -> Vec<CartItem> {
        self.replica
            .lock()
            .map(|replica| replica.saved_items().to_vec())
            .unwrap_or_default()
    }

    /// The selected line ids.
    #[must_use]
    pub fn selected_ids(&self) -> Vec<LineId> {
        self.replica
            .lock()
            .map(|replica| replica.selected_ids().iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Cart subtotal (saved-for-later excluded).
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.replica
            .lock()
            .map(|replica| replica.total())
            .unwrap_or_default()
    }

    /// Total units across all lines.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.replica
            .lock()
            .map(|replica| replica.count())
            .unwrap_or_default()
    }

    /// Whether the cart holds no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.replica
            .lock()
            .map(|replica| replica.is_empty())
            .unwrap_or(true)
    }

    /// Whether a reconciliation is currently running.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.coordinator.is_syncing()
    }

    /// Age of the stored snapshot, for staleness banners.
    #[must_use]
    pub fn cart_age(&self) -> CartAge {
        self.persistence.age_info()
    }
}

impl<R: RemoteCart> std::fmt::Debug for CartEngine<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartEngine")
            .field("count", &self.count())
            .field("loading", &self.is_loading())
            .finish_non_exhaustive()
    }
}
