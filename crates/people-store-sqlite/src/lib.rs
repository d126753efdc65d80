//! SQLite backend for the people registry.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Multi-table writes run inside a single
//! transaction.

mod encode;
mod schema;
mod secret;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use secret::Base64Codec;
pub use store::{MAX_ACTIVE_BATCH, SqliteStore};

#[cfg(test)]
mod tests;
