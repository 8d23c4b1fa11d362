//! Daemon configuration.
//!
//! Read from an optional TOML file and `ZEITGEIST_*` environment variables,
//! the latter taking precedence. Every field has a default, so an empty
//! configuration is valid.

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use serde::Deserialize;

pub const ENV_PREFIX: &str = "ZEITGEIST";

/// Shipped extension manifests.
pub const SYSTEM_EXTENSION_DIR: &str = "/usr/share/zeitgeist/extensions";

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
  /// Per-user state directory.
  #[serde(default = "default_data_path")]
  pub data_path:            PathBuf,
  /// Defaults to `<data_path>/activity.sqlite`.
  #[serde(default)]
  pub database_path:        Option<PathBuf>,
  #[serde(default = "default_system_extension_dir")]
  pub system_extension_dir: PathBuf,
  /// Defaults to `<data_path>/extensions`.
  #[serde(default)]
  pub user_extension_dir:   Option<PathBuf>,
  #[serde(default = "default_flush_interval_secs")]
  pub flush_interval_secs:  u64,
  #[serde(default = "default_volume_poll_secs")]
  pub volume_poll_secs:     u64,
}

fn default_data_path() -> PathBuf {
  if let Some(dir) = std::env::var_os("XDG_DATA_HOME").filter(|d| !d.is_empty()) {
    return PathBuf::from(dir).join("zeitgeist");
  }
  let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default();
  home.join(".local/share/zeitgeist")
}

fn default_system_extension_dir() -> PathBuf { PathBuf::from(SYSTEM_EXTENSION_DIR) }

fn default_flush_interval_secs() -> u64 { 300 }

fn default_volume_poll_secs() -> u64 { 5 }

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      data_path:            default_data_path(),
      database_path:        None,
      system_extension_dir: default_system_extension_dir(),
      user_extension_dir:   None,
      flush_interval_secs:  default_flush_interval_secs(),
      volume_poll_secs:     default_volume_poll_secs(),
    }
  }
}

impl EngineConfig {
  /// Assemble the configuration from `file` (if it exists) and the
  /// environment.
  pub fn load(file: &Path) -> Result<Self, config::ConfigError> {
    config::Config::builder()
      .add_source(config::File::from(file).required(false))
      .add_source(config::Environment::with_prefix(ENV_PREFIX))
      .build()?
      .try_deserialize()
  }

  pub fn database_path(&self) -> PathBuf {
    self.database_path.clone().unwrap_or_else(|| self.data_path.join("activity.sqlite"))
  }

  pub fn user_extension_dir(&self) -> PathBuf {
    self.user_extension_dir.clone().unwrap_or_else(|| self.data_path.join("extensions"))
  }

  pub fn flush_interval(&self) -> Duration { Duration::from_secs(self.flush_interval_secs.max(1)) }

  pub fn volume_poll_interval(&self) -> Duration { Duration::from_secs(self.volume_poll_secs.max(1)) }
}
