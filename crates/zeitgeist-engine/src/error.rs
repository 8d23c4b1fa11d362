//! Error types for `zeitgeist-engine`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("monitor {owner}:{path} is already installed")]
  MonitorAlreadyInstalled { owner: String, path: String },

  #[error("no monitor installed for {owner}:{path}")]
  MonitorNotFound { owner: String, path: String },

  #[error("data source not found: {0}")]
  DataSourceNotFound(String),

  #[error("blacklist template not found: {0}")]
  BlacklistNotFound(String),

  #[error("unknown method: {0}")]
  UnknownMethod(String),

  #[error("method {method} is already provided by {owner}")]
  MethodConflict { method: String, owner: String },

  #[error("unknown extension: {0}")]
  UnknownExtension(String),

  #[error("invalid arguments: {0}")]
  InvalidArguments(String),

  #[error("engine is closed")]
  Closed,

  #[error(transparent)]
  Core(#[from] zeitgeist_core::Error),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("bus error: {0}")]
  Bus(String),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("manifest error: {0}")]
  Manifest(#[from] toml::de::Error),
}

impl Error {
  /// True for errors caused by the caller rather than the engine.
  pub fn is_user_error(&self) -> bool {
    matches!(
      self,
      Self::MonitorAlreadyInstalled { .. }
        | Self::MonitorNotFound { .. }
        | Self::DataSourceNotFound(_)
        | Self::BlacklistNotFound(_)
        | Self::UnknownMethod(_)
        | Self::InvalidArguments(_)
        | Self::Core(_)
    )
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
