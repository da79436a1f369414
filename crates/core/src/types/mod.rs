//! Core types for Meridian.
//!
//! This module provides the domain types for cart state: line items with
//! derived identity, session tokens, and user-facing sync preferences.

pub mod id;
pub mod item;
pub mod prefs;

pub use id::{LineId, SessionId};
pub use item::CartItem;
pub use prefs::{PersistMode, SyncPreferences};
