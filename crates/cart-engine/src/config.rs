//! Engine configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `MERIDIAN_CART_API_URL` - Remote cart API endpoint
//! - `MERIDIAN_CART_API_TOKEN` - Bearer token for the cart API
//!
//! ## Optional
//! - `MERIDIAN_CART_DEBOUNCE_MS` - Quiet window before a debounced remote
//!   write (default: 1000)
//! - `MERIDIAN_CART_FORCE_SYNC_COOLDOWN_MS` - Minimum gap between forced
//!   reconciliations (default: 2000)
//! - `MERIDIAN_CART_REQUEST_TIMEOUT_SECS` - Network timeout for cart API
//!   calls (default: 10)
//! - `MERIDIAN_CART_READ_CACHE_TTL_SECS` - TTL of the remote read cache
//!   (default: 30)
//! - `MERIDIAN_CART_STALE_AFTER_HOURS` - Age past which presentation warns
//!   about an old cart (default: 4)

use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Cart engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Remote cart API configuration.
    pub remote: RemoteCartConfig,
    /// Debounce/throttle windows.
    pub timings: SyncTimings,
    /// Hours after which `age_info` flags the stored cart as stale.
    pub stale_after_hours: f64,
}

/// Remote cart API configuration.
///
/// Implements `Debug` manually to redact the access token.
#[derive(Clone)]
pub struct RemoteCartConfig {
    /// Cart endpoint; GET returns the authoritative cart, POST replaces it.
    pub endpoint: Url,
    /// Bearer token (server-side only).
    pub access_token: SecretString,
    /// Per-request network timeout.
    pub request_timeout: Duration,
    /// TTL of the short-lived read cache.
    pub read_cache_ttl: Duration,
}

impl std::fmt::Debug for RemoteCartConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCartConfig")
            .field("endpoint", &self.endpoint.as_str())
            .field("access_token", &"[REDACTED]")
            .field("request_timeout", &self.request_timeout)
            .field("read_cache_ttl", &self.read_cache_ttl)
            .finish()
    }
}

/// Timing windows owned by the sync coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTimings {
    /// Quiet window after the last mutation before the remote write fires.
    pub debounce: Duration,
    /// Cool-down between forced reconciliations.
    pub force_sync_cooldown: Duration,
}

impl Default for SyncTimings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(1000),
            force_sync_cooldown: Duration::from_millis(2000),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or any
    /// variable fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let endpoint = get_required_env("MERIDIAN_CART_API_URL")?;
        let endpoint = Url::parse(&endpoint).map_err(|e| {
            ConfigError::InvalidEnvVar("MERIDIAN_CART_API_URL".to_string(), e.to_string())
        })?;
        let access_token = SecretString::from(get_required_env("MERIDIAN_CART_API_TOKEN")?);

        let debounce_ms: u64 = parse_env_or("MERIDIAN_CART_DEBOUNCE_MS", 1000)?;
        let cooldown_ms: u64 = parse_env_or("MERIDIAN_CART_FORCE_SYNC_COOLDOWN_MS", 2000)?;
        let timeout_secs: u64 = parse_env_or("MERIDIAN_CART_REQUEST_TIMEOUT_SECS", 10)?;
        let cache_ttl_secs: u64 = parse_env_or("MERIDIAN_CART_READ_CACHE_TTL_SECS", 30)?;
        let stale_after_hours: f64 = parse_env_or("MERIDIAN_CART_STALE_AFTER_HOURS", 4.0)?;

        Ok(Self {
            remote: RemoteCartConfig {
                endpoint,
                access_token,
                request_timeout: Duration::from_secs(timeout_secs),
                read_cache_ttl: Duration::from_secs(cache_ttl_secs),
            },
            timings: SyncTimings {
                debounce: Duration::from_millis(debounce_ms),
                force_sync_cooldown: Duration::from_millis(cooldown_ms),
            },
            stale_after_hours,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Parse an optional environment variable, falling back to a default.
fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_timings_defaults() {
        let timings = SyncTimings::default();
        assert_eq!(timings.debounce, Duration::from_millis(1000));
        assert_eq!(timings.force_sync_cooldown, Duration::from_millis(2000));
    }

    #[test]
    fn test_parse_env_or_uses_default_when_unset() {
        let value: u64 = parse_env_or("MERIDIAN_TEST_UNSET_VARIABLE", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_remote_config_debug_redacts_token() {
        let config = RemoteCartConfig {
            endpoint: Url::parse("https://api.example.com/cart").unwrap(),
            access_token: SecretString::from("super_secret_token_value"),
            request_timeout: Duration::from_secs(10),
            read_cache_ttl: Duration::from_secs(30),
        };

        let debug_output = format!("{config:?}");
        assert!(debug_output.contains("https://api.example.com/cart"));
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_token_value"));
    }
}
