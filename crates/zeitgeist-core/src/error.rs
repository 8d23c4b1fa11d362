//! Error types for `zeitgeist-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid time range: begin {begin} is after end {end}")]
  InvalidTimeRange { begin: i64, end: i64 },

  #[error("illegal event: {0}")]
  InvalidEvent(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
