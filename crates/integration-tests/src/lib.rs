//! Integration tests for the Meridian cart engine.
//!
//! The suites under `tests/` drive the full [`CartEngine`] facade the way a
//! storefront session would, over in-memory storage and a recording remote
//! fake:
//!
//! - `cart_reconciliation` - startup and forced merges between replicas
//! - `sync_timing` - debounce, throttle, and in-flight exclusion
//! - `persistence_policy` - policy routing, expiry, and corruption recovery
//!
//! Timing-sensitive suites run under tokio's paused clock
//! (`#[tokio::test(start_paused = true)]`), so they are deterministic and
//! finish in milliseconds of wall time.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;

use meridian_cart_engine::{
    CartEngine, KeyValueStore, MemoryStore, PersistenceAdapter, PreferencesSource, RemoteCart,
    SharedPreferences, SyncTimings,
};
use meridian_core::{CartItem, SyncPreferences};

/// Storage key the persistence adapter writes under, in both tiers.
pub const CART_KEY: &str = "meridian.cart";

// =============================================================================
// Recording Remote
// =============================================================================

/// In-process stand-in for the remote cart API.
///
/// Holds the authoritative cart in memory, counts fetches and saves, and can
/// be told to fail writes or to answer slowly. Clones share state: the test
/// keeps one handle while the engine owns another.
#[derive(Clone, Default)]
pub struct RecordingRemote {
    cart: Arc<Mutex<Vec<CartItem>>>,
    fetches: Arc<AtomicUsize>,
    saves: Arc<AtomicUsize>,
    fail_saves: Arc<AtomicBool>,
    fetch_delay: Arc<Mutex<Duration>>,
}

impl RecordingRemote {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the authoritative cart, as if another device had written it.
    pub fn seed(&self, items: Vec<CartItem>) {
        *self.cart.lock().expect("cart mutex poisoned") = items;
    }

    /// The authoritative cart as the fake currently holds it.
    #[must_use]
    pub fn cart(&self) -> Vec<CartItem> {
        self.cart.lock().expect("cart mutex poisoned").clone()
    }

    /// How many times the cart has been fetched.
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// How many saves have been attempted (failed ones included).
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make subsequent saves fail until called again with `false`.
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Delay every fetch, to hold a reconciliation open mid-flight.
    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().expect("delay mutex poisoned") = delay;
    }
}

impl RemoteCart for RecordingRemote {
    fn fetch_cart(&self) -> impl Future<Output = Vec<CartItem>> + Send {
        let this = self.clone();
        async move {
            this.fetches.fetch_add(1, Ordering::SeqCst);
            let delay = *this.fetch_delay.lock().expect("delay mutex poisoned");
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            this.cart.lock().expect("cart mutex poisoned").clone()
        }
    }

    fn save_cart(&self, items: Vec<CartItem>) -> impl Future<Output = bool> + Send {
        let this = self.clone();
        async move {
            this.saves.fetch_add(1, Ordering::SeqCst);
            if this.fail_saves.load(Ordering::SeqCst) {
                return false;
            }
            *this.cart.lock().expect("cart mutex poisoned") = items;
            true
        }
    }
}

// =============================================================================
// Engine Harness
// =============================================================================

/// A fully wired engine plus handles to everything around it.
pub struct EngineHarness {
    pub engine: CartEngine<RecordingRemote>,
    pub remote: RecordingRemote,
    pub prefs: Arc<SharedPreferences>,
    pub session_store: Arc<MemoryStore>,
    pub durable_store: Arc<MemoryStore>,
}

impl EngineHarness {
    /// Build an engine over fresh in-memory stores with the given
    /// preferences and the default production timings.
    #[must_use]
    pub fn new(preferences: SyncPreferences) -> Self {
        Self::with_timings(preferences, SyncTimings::default())
    }

    /// Build an engine with explicit timings, for suites that need to
    /// silence one of the gates.
    #[must_use]
    pub fn with_timings(preferences: SyncPreferences, timings: SyncTimings) -> Self {
        let remote = RecordingRemote::new();
        let prefs = Arc::new(SharedPreferences::with(preferences));
        let session_store = Arc::new(MemoryStore::new());
        let durable_store = Arc::new(MemoryStore::new());
        let persistence = PersistenceAdapter::new(
            Arc::clone(&session_store) as _,
            Arc::clone(&durable_store) as _,
            Arc::clone(&prefs) as Arc<dyn PreferencesSource>,
        );
        let engine = CartEngine::new(remote.clone(), persistence, timings);
        Self {
            engine,
            remote,
            prefs,
            session_store,
            durable_store,
        }
    }

    /// Build an engine with the default preferences (smart persistence).
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(SyncPreferences::default())
    }

    /// Simulate a page reload: a new engine (and thus a new session) over
    /// the same stores, preferences, and remote.
    #[must_use]
    pub fn restarted(&self) -> Self {
        let persistence = PersistenceAdapter::new(
            Arc::clone(&self.session_store) as _,
            Arc::clone(&self.durable_store) as _,
            Arc::clone(&self.prefs) as Arc<dyn PreferencesSource>,
        );
        let engine = CartEngine::new(self.remote.clone(), persistence, SyncTimings::default());
        Self {
            engine,
            remote: self.remote.clone(),
            prefs: Arc::clone(&self.prefs),
            session_store: Arc::clone(&self.session_store),
            durable_store: Arc::clone(&self.durable_store),
        }
    }
}

/// A cart item with a derived id and a flat test price.
#[must_use]
pub fn item(product: &str, qty: u32) -> CartItem {
    CartItem::new(product, product, Decimal::new(10_00, 2), qty, None, None)
}

/// Write a smart-policy snapshot directly into the durable store with
/// back-dated timestamps, the way an earlier session would have left it.
///
/// The session id is arbitrary: durable policies do not session-scope.
pub fn plant_smart_snapshot(harness: &EngineHarness, items: &[CartItem], hours_ago: i64) {
    let stamp = Utc::now() - chrono::Duration::hours(hours_ago);
    let record = serde_json::json!({
        "items": items,
        "created_at": stamp,
        "last_access_at": stamp,
        "session_id": "00000000-0000-0000-0000-000000000000",
        "policy": "smart",
    });
    harness.durable_store.set(CART_KEY, record.to_string());
}
