//! Sync orchestration: debounce, throttle, and forced reconciliation.
//!
//! The coordinator owns every piece of timing state in the engine - one
//! re-armable debounce timer, one timestamp gate for the forced-sync
//! throttle, and one in-flight flag for reconciliation mutual exclusion -
//! all per instance, nothing module-global.
//!
//! - Local mutations are debounced: after a quiet window the *entire
//!   current* replica is written to the remote cart in one call, so a burst
//!   of rapid edits costs one network round trip. Last write wins;
//!   intermediate states are never transmitted.
//! - Forced reconciliations are throttled to one per cool-down window and
//!   mutually excluded; calls that lose either gate return the current
//!   replica snapshot without touching the network.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use meridian_core::{CartItem, LineId};

use crate::config::SyncTimings;
use crate::persistence::PersistenceAdapter;
use crate::remote::RemoteCart;
use crate::replica::CartReplica;
use crate::resolver::merge;

/// Debounces local mutations into batched remote writes and runs the
/// forced reconciliation protocol.
///
/// Cheaply cloneable via `Arc`; the replica handle is shared with the
/// [`CartEngine`](crate::engine::CartEngine) that owns the mutation API.
pub struct SyncCoordinator<R: RemoteCart> {
    inner: Arc<CoordinatorInner<R>>,
}

impl<R: RemoteCart> Clone for SyncCoordinator<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct CoordinatorInner<R> {
    remote: R,
    replica: Arc<Mutex<CartReplica>>,
    persistence: PersistenceAdapter,
    timings: SyncTimings,
    /// Ids touched since the last flush. Bookkeeping for diagnostics; the
    /// flush itself always transmits the whole snapshot.
    dirty: Mutex<HashSet<LineId>>,
    /// The single pending debounce timer, if armed.
    debounce_task: Mutex<Option<JoinHandle<()>>>,
    /// When the last forced reconciliation was admitted.
    last_forced: Mutex<Option<Instant>>,
    /// Reconciliation mutual exclusion.
    in_flight: AtomicBool,
    /// Whether a reconciliation is currently running (exposed to
    /// presentation as the loading flag).
    loading: AtomicBool,
}

impl<R: RemoteCart> SyncCoordinator<R> {
    /// Create a coordinator over a shared replica.
    #[must_use]
    pub fn new(
        remote: R,
        replica: Arc<Mutex<CartReplica>>,
        persistence: PersistenceAdapter,
        timings: SyncTimings,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                remote,
                replica,
                persistence,
                timings,
                dirty: Mutex::new(HashSet::new()),
                debounce_task: Mutex::new(None),
                last_forced: Mutex::new(None),
                in_flight: AtomicBool::new(false),
                loading: AtomicBool::new(false),
            }),
        }
    }

    fn snapshot(&self) -> Vec<CartItem> {
        self.inner
            .replica
            .lock()
            .map(|replica| replica.snapshot())
            .unwrap_or_default()
    }

    // =========================================================================
    // Debounced Writes
    // =========================================================================

    /// Record mutated line ids and (re)arm the debounce timer.
    ///
    /// A mutation arriving inside the quiet window resets the timer, so a
    /// burst of edits coalesces into a single remote write of the final
    /// state. Must be called from within a tokio runtime.
    pub fn note_mutation(&self, dirty_ids: Vec<LineId>) {
        if dirty_ids.is_empty() {
            return;
        }
        if let Ok(mut dirty) = self.inner.dirty.lock() {
            dirty.extend(dirty_ids);
        }

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            tokio::time::sleep(inner.timings.debounce).await;
            Self::flush_inner(&inner).await;
        });

        if let Ok(mut slot) = self.inner.debounce_task.lock()
            && let Some(previous) = slot.replace(task)
        {
            previous.abort();
        }
    }

    /// Flush the pending debounced write immediately, if anything is dirty.
    pub async fn flush_now(&self) {
        self.cancel_debounce();
        Self::flush_inner(&self.inner).await;
    }

    async fn flush_inner(inner: &Arc<CoordinatorInner<R>>) {
        let flushed: Vec<LineId> = match inner.dirty.lock() {
            Ok(mut dirty) => dirty.drain().collect(),
            Err(_) => Vec::new(),
        };
        if flushed.is_empty() {
            return;
        }

        let snapshot = inner
            .replica
            .lock()
            .map(|replica| replica.snapshot())
            .unwrap_or_default();

        debug!(
            dirty = flushed.len(),
            lines = snapshot.len(),
            "Flushing debounced cart write"
        );
        if !inner.remote.save_cart(snapshot).await {
            // The optimistic local state stays; the next reconciliation or
            // flush will retry the full snapshot.
            warn!("Debounced cart write failed, keeping local state");
        }
    }

    fn cancel_debounce(&self) {
        if let Ok(mut slot) = self.inner.debounce_task.lock()
            && let Some(task) = slot.take()
        {
            task.abort();
        }
    }

    // =========================================================================
    // Forced Reconciliation
    // =========================================================================

    /// Run a full reconciliation against the remote cart.
    ///
    /// Rate-limited to once per cool-down window and mutually excluded with
    /// any reconciliation already in flight; a call that loses either gate
    /// returns the current replica snapshot without network traffic.
    pub async fn force_sync(&self) -> Vec<CartItem> {
        // Throttle gate.
        {
            let Ok(last_forced) = self.inner.last_forced.lock() else {
                return self.snapshot();
            };
            if let Some(admitted) = *last_forced
                && admitted.elapsed() < self.inner.timings.force_sync_cooldown
            {
                debug!("Force sync throttled, returning last known state");
                return self.snapshot();
            }
        }

        // Mutual exclusion: only one reconciliation at a time.
        if self
            .inner
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Reconciliation already in flight, returning last known state");
            return self.snapshot();
        }

        // Only an admitted reconciliation restarts the cool-down; a call
        // that lost the guard did no work and must not throttle the next.
        if let Ok(mut last_forced) = self.inner.last_forced.lock() {
            *last_forced = Some(Instant::now());
        }

        self.inner.loading.store(true, Ordering::Release);
        let resolved = self.reconcile().await;
        self.inner.loading.store(false, Ordering::Release);
        self.inner.in_flight.store(false, Ordering::Release);
        resolved
    }

    /// The reconciliation protocol proper.
    ///
    /// The local snapshot is captured *after* the remote fetch completes,
    /// so mutations that land during the network wait take part in the
    /// merge instead of being overwritten by the install.
    async fn reconcile(&self) -> Vec<CartItem> {
        let remote_items = self.inner.remote.fetch_cart().await;

        // Decide and install synchronously under the replica lock; no
        // mutation can interleave mid-merge.
        let (resolved, push) = {
            let Ok(mut replica) = self.inner.replica.lock() else {
                return Vec::new();
            };
            let local_items = replica.snapshot();

            let (resolved, push) = match (local_items.is_empty(), remote_items.is_empty()) {
                // Remote has nothing we do not: push, keep local canonical.
                (false, true) => (local_items, true),
                // Fresh replica adopts the authoritative remote cart.
                (true, false) => (remote_items, false),
                // Divergent replicas: merge, adopt locally, push upstream.
                (false, false) => (merge(&local_items, &remote_items), true),
                // Nothing anywhere: last-resort recovery from the durable
                // snapshot.
                (true, true) => {
                    let recovered = self.inner.persistence.load();
                    if recovered.is_empty() {
                        (Vec::new(), false)
                    } else {
                        info!(lines = recovered.len(), "Recovered cart from local snapshot");
                        (recovered, true)
                    }
                }
            };

            replica.replace_items(resolved.clone());
            (resolved, push)
        };

        self.inner.persistence.save(&resolved);

        if push && !self.inner.remote.save_cart(resolved.clone()).await {
            // Local wins over a failed write; the merged state stays
            // adopted and a later flush retries.
            warn!("Reconciliation push failed, keeping local state");
        }

        resolved
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Whether a reconciliation is currently running.
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.inner.loading.load(Ordering::Acquire)
    }

    /// Cancel the pending debounce timer so nothing fires against a
    /// torn-down context.
    pub fn shutdown(&self) {
        self.cancel_debounce();
    }
}

impl<R> Drop for CoordinatorInner<R> {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.debounce_task.lock()
            && let Some(task) = slot.take()
        {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use rust_decimal::Decimal;

    use meridian_core::{PersistMode, SyncPreferences};

    use crate::preferences::SharedPreferences;
    use crate::storage::MemoryStore;

    use super::*;

    fn item(product: &str, qty: u32) -> CartItem {
        CartItem::new(product, product, Decimal::new(5_00, 2), qty, None, None)
    }

    /// Recording fake remote with an optional artificial fetch delay.
    #[derive(Clone)]
    struct FakeRemote {
        state: Arc<FakeRemoteState>,
    }

    struct FakeRemoteState {
        cart: Mutex<Vec<CartItem>>,
        saves: Mutex<Vec<Vec<CartItem>>>,
        fetches: AtomicUsize,
        save_ok: AtomicBool,
        fetch_delay: Mutex<Duration>,
    }

    impl FakeRemote {
        fn with_cart(cart: Vec<CartItem>) -> Self {
            Self {
                state: Arc::new(FakeRemoteState {
                    cart: Mutex::new(cart),
                    saves: Mutex::new(Vec::new()),
                    fetches: AtomicUsize::new(0),
                    save_ok: AtomicBool::new(true),
                    fetch_delay: Mutex::new(Duration::ZERO),
                }),
            }
        }

        fn empty() -> Self {
            Self::with_cart(Vec::new())
        }

        fn saves(&self) -> Vec<Vec<CartItem>> {
            self.state.saves.lock().expect("saves lock").clone()
        }

        fn fetches(&self) -> usize {
            self.state.fetches.load(Ordering::SeqCst)
        }

        fn set_fetch_delay(&self, delay: Duration) {
            *self.state.fetch_delay.lock().expect("delay lock") = delay;
        }
    }

    impl RemoteCart for FakeRemote {
        fn fetch_cart(&self) -> impl std::future::Future<Output = Vec<CartItem>> + Send {
            let state = Arc::clone(&self.state);
            async move {
                let delay = *state.fetch_delay.lock().expect("delay lock");
                if delay > Duration::ZERO {
                    tokio::time::sleep(delay).await;
                }
                state.fetches.fetch_add(1, Ordering::SeqCst);
                state.cart.lock().expect("cart lock").clone()
            }
        }

        fn save_cart(&self, items: Vec<CartItem>) -> impl std::future::Future<Output = bool> + Send {
            let state = Arc::clone(&self.state);
            async move {
                state.saves.lock().expect("saves lock").push(items.clone());
                if state.save_ok.load(Ordering::SeqCst) {
                    *state.cart.lock().expect("cart lock") = items;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn persistence() -> PersistenceAdapter {
        PersistenceAdapter::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryStore::new()),
            Arc::new(SharedPreferences::new()),
        )
    }

    fn coordinator(
        remote: FakeRemote,
        timings: SyncTimings,
    ) -> (SyncCoordinator<FakeRemote>, Arc<Mutex<CartReplica>>) {
        let replica = Arc::new(Mutex::new(CartReplica::new()));
        let coordinator =
            SyncCoordinator::new(remote, Arc::clone(&replica), persistence(), timings);
        (coordinator, replica)
    }

    fn mutate(
        replica: &Arc<Mutex<CartReplica>>,
        coordinator: &SyncCoordinator<FakeRemote>,
        product: &str,
        qty: u32,
    ) {
        let dirty = replica
            .lock()
            .expect("replica lock")
            .add_item(item(product, qty), qty);
        coordinator.note_mutation(dirty);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_coalesces_burst_into_one_write() {
        let remote = FakeRemote::empty();
        let (coordinator, replica) = coordinator(remote.clone(), SyncTimings::default());

        for qty in 1..=5 {
            mutate(&replica, &coordinator, "a", qty);
        }

        // No write inside the quiet window.
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(remote.saves().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        tokio::task::yield_now().await;

        let saves = remote.saves();
        assert_eq!(saves.len(), 1);
        // The one write carries the final coalesced state (1+2+3+4+5).
        let written = saves.first().expect("one save");
        assert_eq!(written.first().map(|i| i.quantity), Some(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutation_inside_window_resets_timer() {
        let remote = FakeRemote::empty();
        let (coordinator, replica) = coordinator(remote.clone(), SyncTimings::default());

        mutate(&replica, &coordinator, "a", 1);
        tokio::time::sleep(Duration::from_millis(600)).await;
        mutate(&replica, &coordinator, "b", 1);
        tokio::time::sleep(Duration::from_millis(600)).await;

        // 1.2s after the first mutation, but only 0.6s after the second.
        assert!(remote.saves().is_empty());

        tokio::time::sleep(Duration::from_millis(500)).await;
        tokio::task::yield_now().await;
        assert_eq!(remote.saves().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_dirty_set_never_writes() {
        let remote = FakeRemote::empty();
        let (coordinator, _replica) = coordinator(remote.clone(), SyncTimings::default());

        coordinator.note_mutation(Vec::new());
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(remote.saves().is_empty());

        coordinator.flush_now().await;
        assert!(remote.saves().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_now_writes_immediately() {
        let remote = FakeRemote::empty();
        let (coordinator, replica) = coordinator(remote.clone(), SyncTimings::default());

        mutate(&replica, &coordinator, "a", 2);
        coordinator.flush_now().await;

        assert_eq!(remote.saves().len(), 1);

        // The aborted timer must not produce a second write later.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(remote.saves().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_drops_second_forced_sync() {
        let remote = FakeRemote::with_cart(vec![item("a", 2)]);
        let (coordinator, _replica) = coordinator(remote.clone(), SyncTimings::default());

        let first = coordinator.force_sync().await;
        assert_eq!(first.len(), 1);
        assert_eq!(remote.fetches(), 1);

        // Inside the cool-down: no fetch, last known state returned.
        let second = coordinator.force_sync().await;
        assert_eq!(second, first);
        assert_eq!(remote.fetches(), 1);

        // Past the cool-down the gate opens again.
        tokio::time::sleep(Duration::from_millis(2100)).await;
        let _ = coordinator.force_sync().await;
        assert_eq!(remote.fetches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_reconciliation_excludes_concurrent_calls() {
        let remote = FakeRemote::with_cart(vec![item("a", 1)]);
        remote.set_fetch_delay(Duration::from_millis(500));
        // Zero cool-down so only the in-flight guard is exercised.
        let timings = SyncTimings {
            force_sync_cooldown: Duration::ZERO,
            ..SyncTimings::default()
        };
        let (coordinator, _replica) = coordinator(remote.clone(), timings);

        let slow = coordinator.clone();
        let racing = coordinator.clone();
        let (first, second) = tokio::join!(slow.force_sync(), async move {
            // Let the first call enter its fetch before racing it.
            tokio::time::sleep(Duration::from_millis(100)).await;
            racing.force_sync().await
        });

        assert_eq!(first.len(), 1);
        // The racing call hit the in-flight guard and never fetched.
        assert!(second.is_empty());
        assert_eq!(remote.fetches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_loss_does_not_restart_cooldown() {
        let remote = FakeRemote::with_cart(vec![item("a", 1)]);
        remote.set_fetch_delay(Duration::from_millis(2500));
        let (coordinator, _replica) = coordinator(remote.clone(), SyncTimings::default());

        let slow = coordinator.clone();
        let running = tokio::spawn(async move { slow.force_sync().await });

        // Past the cool-down but with the first reconciliation still in
        // flight: this call loses the guard and does no work.
        tokio::time::sleep(Duration::from_millis(2100)).await;
        let _ = coordinator.force_sync().await;
        assert_eq!(remote.fetches(), 0);

        running.await.expect("first sync");
        assert_eq!(remote.fetches(), 1);
        remote.set_fetch_delay(Duration::ZERO);

        // 2.6s after the only admitted reconciliation began, the gate must
        // be open; a guard-losing call restarting the clock would throttle
        // this one.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = coordinator.force_sync().await;
        assert_eq!(remote.fetches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_pushes_local_when_remote_empty() {
        let remote = FakeRemote::empty();
        let (coordinator, replica) = coordinator(remote.clone(), SyncTimings::default());
        replica
            .lock()
            .expect("replica lock")
            .add_item(item("a", 2), 2);

        let resolved = coordinator.force_sync().await;

        assert_eq!(resolved.first().map(|i| i.quantity), Some(2));
        let saves = remote.saves();
        assert_eq!(saves.len(), 1);
        assert_eq!(
            saves.first().and_then(|s| s.first()).map(|i| i.quantity),
            Some(2)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_adopts_remote_when_local_empty() {
        let remote = FakeRemote::with_cart(vec![item("c", 1)]);
        let (coordinator, replica) = coordinator(remote.clone(), SyncTimings::default());

        let resolved = coordinator.force_sync().await;

        assert_eq!(resolved.len(), 1);
        assert_eq!(
            replica.lock().expect("replica lock").items().len(),
            1
        );
        // Adoption is not a divergence: nothing to push.
        assert!(remote.saves().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_merges_divergent_replicas() {
        let remote = FakeRemote::with_cart(vec![item("a", 3), item("b", 1)]);
        let (coordinator, replica) = coordinator(remote.clone(), SyncTimings::default());
        replica
            .lock()
            .expect("replica lock")
            .add_item(item("a", 1), 1);

        let resolved = coordinator.force_sync().await;

        let mut quantities: Vec<_> = resolved
            .iter()
            .map(|i| (i.id.to_string(), i.quantity))
            .collect();
        quantities.sort();
        assert_eq!(
            quantities,
            vec![("a".to_string(), 1), ("b".to_string(), 1)]
        );
        // The merged result was pushed upstream.
        assert_eq!(remote.saves().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_keeps_local_when_push_fails() {
        let remote = FakeRemote::empty();
        remote.state.save_ok.store(false, Ordering::SeqCst);
        let (coordinator, replica) = coordinator(remote.clone(), SyncTimings::default());
        replica
            .lock()
            .expect("replica lock")
            .add_item(item("a", 2), 2);

        let resolved = coordinator.force_sync().await;

        // Never silently discard user-entered items.
        assert_eq!(resolved.len(), 1);
        assert_eq!(replica.lock().expect("replica lock").count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_recovers_from_durable_snapshot_when_both_empty() {
        let remote = FakeRemote::empty();
        let replica = Arc::new(Mutex::new(CartReplica::new()));
        let persistence = PersistenceAdapter::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryStore::new()),
            Arc::new(SharedPreferences::with(SyncPreferences {
                mode: PersistMode::Smart,
                ..SyncPreferences::default()
            })),
        );
        persistence.save(&[item("a", 4)]);

        let coordinator = SyncCoordinator::new(
            remote.clone(),
            Arc::clone(&replica),
            persistence,
            SyncTimings::default(),
        );

        let resolved = coordinator.force_sync().await;

        assert_eq!(resolved.first().map(|i| i.quantity), Some(4));
        // Recovered items are pushed upstream.
        assert_eq!(remote.saves().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_quantity_to_zero_debounces_empty_cart_write() {
        let remote = FakeRemote::empty();
        let (coordinator, replica) = coordinator(remote.clone(), SyncTimings::default());

        mutate(&replica, &coordinator, "a", 2);
        let dirty = replica
            .lock()
            .expect("replica lock")
            .set_quantity(&LineId::from("a"), 0);
        coordinator.note_mutation(dirty);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        tokio::task::yield_now().await;

        let saves = remote.saves();
        assert_eq!(saves.len(), 1);
        assert!(saves.first().expect("one save").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_timer() {
        let remote = FakeRemote::empty();
        let (coordinator, replica) = coordinator(remote.clone(), SyncTimings::default());

        mutate(&replica, &coordinator, "a", 1);
        coordinator.shutdown();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(remote.saves().is_empty());
    }
}
