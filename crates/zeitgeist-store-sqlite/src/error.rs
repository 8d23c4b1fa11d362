//! Error type for `zeitgeist-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] zeitgeist_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  /// A stored row id no longer fits the public event id type.
  #[error("event id {0} is out of range")]
  IdOutOfRange(i64),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
