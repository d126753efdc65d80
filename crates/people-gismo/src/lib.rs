//! Organization feed: CERIF XML messages projected onto stored
//! organizations.
//!
//! Decoding is pure and synchronous; projection goes through any
//! [`people_core::store::OrganizationStore`].
//!
//! # Quick start
//!
//! ```no_run
//! # async fn run(store: people_store_sqlite::SqliteStore) -> people_gismo::Result<()> {
//! use people_gismo::{OrganizationProjector, parse_message};
//!
//! let xml = std::fs::read("message.xml").map_err(|e| people_gismo::Error::Xml(e.to_string()))?;
//! let msg = parse_message(&xml)?;
//! let outcome = OrganizationProjector::new(store).apply(&msg, chrono::Utc::now()).await?;
//! println!("{}", serde_json::to_string(&outcome).unwrap());
//! # Ok(())
//! # }
//! ```

pub mod cerif;
pub mod error;
mod projector;

pub use cerif::{Intent, Message, parse_message};
pub use error::{Error, Result};
pub use projector::{OrganizationProjector, Outcome};
