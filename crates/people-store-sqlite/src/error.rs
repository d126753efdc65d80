//! Error type for `people-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] people_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("unexpected column value: {0}")]
  InvalidColumn(String),

  /// More ids were passed to a bulk update than one statement may carry.
  #[error("batch of {size} exceeds the maximum of {max}")]
  BatchTooLarge { size: usize, max: usize },

  /// Tried to update or delete an entity that was never persisted.
  #[error("entity has no id")]
  NotStored,

  #[error("person not found: {0}")]
  PersonNotFound(uuid::Uuid),

  #[error("organization not found: {0}")]
  OrganizationNotFound(uuid::Uuid),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
