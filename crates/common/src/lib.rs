//! # Shelfkeeper Common Library
//!
//! Shared code for the Shelfkeeper operation core:
//! - Error taxonomy
//! - Event types and the event hub (`EventHub`)
//! - Sortable id generation
//! - Configuration loading
//! - Time helpers

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod time;

pub use error::{Error, Result};
pub use events::{Event, EventHub, EventKind, Filter, Subscription};
