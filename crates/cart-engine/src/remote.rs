//! Remote cart API client.
//!
//! The backend owns the authoritative cart: `GET` returns the full item
//! list for the current identity, `POST` replaces it wholesale. Both calls
//! are bounded by a request timeout, and a short-lived `moka` read cache
//! (30-second TTL) absorbs bursts of reads from components that each want
//! the cart in quick succession. A successful save refreshes the cache so
//! subsequent reads are not stale.
//!
//! Failure policy: `fetch_cart` degrades to the last successful in-memory
//! read (or empty) and `save_cart` reports a boolean, so callers decide
//! whether to retain optimistic local state. Neither propagates an error.

use std::future::Future;
use std::sync::{Arc, Mutex};

use moka::future::Cache;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use meridian_core::CartItem;

use crate::config::RemoteCartConfig;

/// Single cache slot: the engine only ever reads one cart.
const CART_CACHE_KEY: &str = "cart";

/// Errors from the remote cart API. Logged, never surfaced to callers.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Transport failure: timeout, DNS, connection, or body decode.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("unexpected status: {0}")]
    Status(reqwest::StatusCode),
}

/// Wire payload for the full-cart endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CartPayload {
    items: Vec<CartItem>,
}

/// The seam the sync coordinator is generic over.
///
/// Production uses [`RemoteCartClient`]; tests inject recording fakes.
pub trait RemoteCart: Send + Sync + 'static {
    /// Read the authoritative cart. Degrades to the best available
    /// fallback on failure - never errors.
    fn fetch_cart(&self) -> impl Future<Output = Vec<CartItem>> + Send;

    /// Replace the authoritative cart with `items`. Returns whether the
    /// write succeeded.
    fn save_cart(&self, items: Vec<CartItem>) -> impl Future<Output = bool> + Send;
}

// =============================================================================
// RemoteCartClient
// =============================================================================

/// HTTP client for the remote cart API.
///
/// Cheaply cloneable via `Arc`; the read cache and last-good fallback are
/// owned by the instance, not process-wide, so tests can construct isolated
/// clients.
#[derive(Clone)]
pub struct RemoteCartClient {
    inner: Arc<RemoteCartClientInner>,
}

struct RemoteCartClientInner {
    client: reqwest::Client,
    endpoint: String,
    access_token: SecretString,
    cache: Cache<&'static str, Vec<CartItem>>,
    /// Last successfully fetched or saved cart, kept beyond the cache TTL
    /// as the fallback for failed fetches.
    last_good: Mutex<Option<Vec<CartItem>>>,
}

impl RemoteCartClient {
    /// Create a new cart API client.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(config: &RemoteCartConfig) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        let cache = Cache::builder()
            .max_capacity(1)
            .time_to_live(config.read_cache_ttl)
            .build();

        Ok(Self {
            inner: Arc::new(RemoteCartClientInner {
                client,
                endpoint: config.endpoint.to_string(),
                access_token: config.access_token.clone(),
                cache,
                last_good: Mutex::new(None),
            }),
        })
    }

    async fn try_fetch(&self) -> Result<Vec<CartItem>, RemoteError> {
        let response = self
            .inner
            .client
            .get(&self.inner.endpoint)
            .bearer_auth(self.inner.access_token.expose_secret())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status(status));
        }

        let payload: CartPayload = response.json().await?;
        Ok(payload.items)
    }

    async fn try_save(&self, items: &[CartItem]) -> Result<(), RemoteError> {
        let response = self
            .inner
            .client
            .post(&self.inner.endpoint)
            .bearer_auth(self.inner.access_token.expose_secret())
            .json(&CartPayload {
                items: items.to_vec(),
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status(status));
        }
        Ok(())
    }

    fn remember(&self, items: &[CartItem]) {
        if let Ok(mut last_good) = self.inner.last_good.lock() {
            *last_good = Some(items.to_vec());
        }
    }

    fn last_good(&self) -> Vec<CartItem> {
        self.inner
            .last_good
            .lock()
            .map(|guard| guard.clone().unwrap_or_default())
            .unwrap_or_default()
    }
}

impl RemoteCart for RemoteCartClient {
    fn fetch_cart(&self) -> impl Future<Output = Vec<CartItem>> + Send {
        async move {
            if let Some(items) = self.inner.cache.get(CART_CACHE_KEY).await {
                debug!("Read cache hit for remote cart");
                return items;
            }

            match self.try_fetch().await {
                Ok(items) => {
                    self.inner.cache.insert(CART_CACHE_KEY, items.clone()).await;
                    self.remember(&items);
                    items
                }
                Err(e) => {
                    warn!(error = %e, "Cart fetch failed, using last known state");
                    self.last_good()
                }
            }
        }
    }

    fn save_cart(&self, items: Vec<CartItem>) -> impl Future<Output = bool> + Send {
        async move {
            match self.try_save(&items).await {
                Ok(()) => {
                    // Refresh the read cache so the next fetch sees what was
                    // just written instead of a pre-save snapshot.
                    self.inner.cache.insert(CART_CACHE_KEY, items.clone()).await;
                    self.remember(&items);
                    true
                }
                Err(e) => {
                    warn!(error = %e, "Cart save failed");
                    false
                }
            }
        }
    }
}

impl std::fmt::Debug for RemoteCartClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCartClient")
            .field("endpoint", &self.inner.endpoint)
            .field("access_token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use rust_decimal::Decimal;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use url::Url;

    use super::*;

    fn item(product: &str, qty: u32) -> CartItem {
        CartItem::new(product, product, Decimal::new(5_00, 2), qty, None, None)
    }

    /// Minimal in-process cart API: GET answers with the configured items,
    /// POST stores them. A raw HTTP/1.1 responder is enough for reqwest.
    struct FakeApi {
        cart: Mutex<Vec<CartItem>>,
        gets: AtomicUsize,
        posts: AtomicUsize,
        fail: AtomicBool,
    }

    impl FakeApi {
        fn new(initial: Vec<CartItem>) -> Arc<Self> {
            Arc::new(Self {
                cart: Mutex::new(initial),
                gets: AtomicUsize::new(0),
                posts: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            })
        }

        async fn spawn(self: &Arc<Self>) -> SocketAddr {
            let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
            let addr = listener.local_addr().expect("local addr");
            let api = Arc::clone(self);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let api = Arc::clone(&api);
                    tokio::spawn(async move {
                        api.handle(stream).await;
                    });
                }
            });
            addr
        }

        async fn handle(&self, mut stream: tokio::net::TcpStream) {
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            let header_end = loop {
                let Ok(n) = stream.read(&mut chunk).await else {
                    return;
                };
                if n == 0 {
                    return;
                }
                buf.extend_from_slice(chunk.get(..n).unwrap_or_default());
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };

            let head = String::from_utf8_lossy(buf.get(..header_end).unwrap_or_default())
                .to_string();
            let is_post = head.starts_with("POST");

            if is_post {
                let content_length = head
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())?
                    })
                    .unwrap_or(0);
                while buf.len() < header_end + content_length {
                    let Ok(n) = stream.read(&mut chunk).await else {
                        return;
                    };
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(chunk.get(..n).unwrap_or_default());
                }
                self.posts.fetch_add(1, Ordering::SeqCst);
                if let Ok(payload) = serde_json::from_slice::<CartPayload>(
                    buf.get(header_end..).unwrap_or_default(),
                ) && let Ok(mut cart) = self.cart.lock()
                {
                    *cart = payload.items;
                }
            } else {
                self.gets.fetch_add(1, Ordering::SeqCst);
            }

            let response = if self.fail.load(Ordering::SeqCst) {
                "HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\nconnection: close\r\n\r\n".to_string()
            } else {
                let items = self
                    .cart
                    .lock()
                    .map(|cart| cart.clone())
                    .unwrap_or_default();
                let body = serde_json::to_string(&CartPayload { items }).expect("serialize");
                format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                )
            };
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
    }

    fn client_for(addr: SocketAddr, cache_ttl: Duration) -> RemoteCartClient {
        let config = RemoteCartConfig {
            endpoint: Url::parse(&format!("http://{addr}/cart")).expect("url"),
            access_token: SecretString::from("test-token-0123456789abcdef"),
            request_timeout: Duration::from_secs(2),
            read_cache_ttl: cache_ttl,
        };
        RemoteCartClient::new(&config).expect("client")
    }

    #[tokio::test]
    async fn test_fetch_returns_remote_items() {
        let api = FakeApi::new(vec![item("a", 2)]);
        let addr = api.spawn().await;
        let client = client_for(addr, Duration::from_secs(30));

        let items = client.fetch_cart().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items.first().map(|i| i.quantity), Some(2));
    }

    #[tokio::test]
    async fn test_read_cache_absorbs_repeated_fetches() {
        let api = FakeApi::new(vec![item("a", 1)]);
        let addr = api.spawn().await;
        let client = client_for(addr, Duration::from_secs(30));

        let _ = client.fetch_cart().await;
        let _ = client.fetch_cart().await;
        let _ = client.fetch_cart().await;

        assert_eq!(api.gets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_save_refreshes_read_cache() {
        let api = FakeApi::new(vec![item("a", 1)]);
        let addr = api.spawn().await;
        let client = client_for(addr, Duration::from_secs(30));

        // Warm the cache with the pre-save state.
        let _ = client.fetch_cart().await;

        assert!(client.save_cart(vec![item("a", 7)]).await);

        // Served from the refreshed cache, not the stale pre-save read.
        let items = client.fetch_cart().await;
        assert_eq!(items.first().map(|i| i.quantity), Some(7));
        assert_eq!(api.gets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_falls_back_to_last_good_on_server_error() {
        let api = FakeApi::new(vec![item("a", 3)]);
        let addr = api.spawn().await;
        // Tiny TTL so the second fetch cannot be served by the cache.
        let client = client_for(addr, Duration::from_millis(1));

        let first = client.fetch_cart().await;
        assert_eq!(first.len(), 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        api.fail.store(true, Ordering::SeqCst);
        let fallback = client.fetch_cart().await;
        assert_eq!(fallback, first);
    }

    #[tokio::test]
    async fn test_fetch_with_no_history_degrades_to_empty() {
        // Nothing is listening on this address.
        let config = RemoteCartConfig {
            endpoint: Url::parse("http://127.0.0.1:9/cart").expect("url"),
            access_token: SecretString::from("test-token-0123456789abcdef"),
            request_timeout: Duration::from_millis(500),
            read_cache_ttl: Duration::from_secs(30),
        };
        let client = RemoteCartClient::new(&config).expect("client");

        assert!(client.fetch_cart().await.is_empty());
        assert!(!client.save_cart(vec![item("a", 1)]).await);
    }

    #[tokio::test]
    async fn test_save_failure_reports_false_and_keeps_cache() {
        let api = FakeApi::new(vec![item("a", 1)]);
        let addr = api.spawn().await;
        let client = client_for(addr, Duration::from_secs(30));

        let before = client.fetch_cart().await;
        api.fail.store(true, Ordering::SeqCst);

        assert!(!client.save_cart(vec![item("a", 9)]).await);
        // The failed write must not poison the cached read.
        assert_eq!(client.fetch_cart().await, before);
    }
}
