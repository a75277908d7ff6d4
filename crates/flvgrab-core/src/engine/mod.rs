//! Capture engine
//!
//! Streams remote FLV sources to disk:
//! - Durable task records (SQLite)
//! - Per-title registry of running captures
//! - Cooperative cancellation with partial-file cleanup
//! - One http/https toggle when the first guess is wrong

mod fetch;
mod manager;
mod persistence;
mod registry;

pub use fetch::*;
pub use manager::*;
pub use persistence::*;
pub use registry::*;
