//! Meridian Core - Shared cart domain types.
//!
//! This crate provides the types shared between the cart engine and the
//! components that surround it:
//! - `cart-engine` - Cart synchronization & persistence engine
//! - the storefront presentation layer (external)
//! - the settings surface (external)
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no timers, no HTTP clients.
//! This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Cart line items, derived line identity, session tokens, and
//!   sync preferences

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
