//! Meridian cart synchronization & persistence engine.
//!
//! Keeps a shopping cart consistent across three independent state holders:
//!
//! - an in-memory [`CartReplica`] the presentation layer reads and mutates,
//! - a durable local snapshot managed by the [`PersistenceAdapter`],
//! - the authoritative remote cart behind the [`RemoteCart`] client.
//!
//! Mutations apply optimistically and synchronously to the replica; the
//! [`SyncCoordinator`] debounces them into batched remote writes, throttles
//! forced reconciliations, and merges divergent replicas through the
//! [`resolver`]. Every failure path degrades to the best available local
//! state - the engine never surfaces a blocking error for network or
//! storage trouble.
//!
//! # Modules
//!
//! - [`replica`] - in-memory cart aggregate (items, selection, saved-for-later)
//! - [`coordinator`] - debounce/throttle/force-sync orchestration
//! - [`resolver`] - two-way conflict resolution between replicas
//! - [`persistence`] - policy-driven durable snapshots with expiry
//! - [`remote`] - remote cart client with timeout and read cache
//! - [`storage`] - key/value media the persistence layer writes through
//! - [`preferences`] - live view of the user's sync preferences
//! - [`engine`] - the facade presentation code talks to
//! - [`config`] - environment-driven configuration

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod persistence;
pub mod preferences;
pub mod remote;
pub mod replica;
pub mod resolver;
pub mod storage;

pub use config::{ConfigError, EngineConfig, RemoteCartConfig, SyncTimings};
pub use coordinator::SyncCoordinator;
pub use engine::CartEngine;
pub use error::EngineError;
pub use persistence::{CartAge, PersistenceAdapter};
pub use preferences::{PreferencesSource, SharedPreferences};
pub use remote::{RemoteCart, RemoteCartClient, RemoteError};
pub use replica::CartReplica;
pub use resolver::merge;
pub use storage::{FileStore, KeyValueStore, MemoryStore, StorageError};
