//! zeitgeist-daemon binary.
//!
//! Reads `zeitgeist.toml` (or the path given with `--config`) and
//! `ZEITGEIST_*` environment variables, opens the activity log, loads the
//! extensions and runs the engine until interrupted.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use zeitgeist_engine::{
  Daemon, Engine, EngineConfig, ExtensionContext,
  bus::LocalBus,
  extension::loader::Discovery,
  extensions::{builtin_catalog, default_extensions},
  network::{NetworkProvider, WatchedProvider},
  volume::MountTableVolumeMonitor,
};
use zeitgeist_store_sqlite::SqliteLog;

const ENGINE_BUS_NAME: &str = "org.gnome.zeitgeist.Engine";

#[derive(Parser)]
#[command(author, version, about = "Zeitgeist activity-log daemon")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "zeitgeist.toml")]
  config: PathBuf,

  /// Start without loading any extension.
  #[arg(long)]
  no_extensions: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let mut cfg = EngineConfig::load(&cli.config).context("failed to read configuration")?;
  cfg.data_path = expand_tilde(&cfg.data_path);
  cfg.database_path = cfg.database_path.as_deref().map(expand_tilde);
  cfg.user_extension_dir = cfg.user_extension_dir.as_deref().map(expand_tilde);

  std::fs::create_dir_all(&cfg.data_path)
    .with_context(|| format!("failed to create data directory {:?}", cfg.data_path))?;

  let database_path = cfg.database_path();
  let store = SqliteLog::open(&database_path)
    .await
    .with_context(|| format!("failed to open activity log at {database_path:?}"))?;

  let bus = LocalBus::new();
  bus.connect(ENGINE_BUS_NAME);

  let volumes = Arc::new(MountTableVolumeMonitor::system());
  let poller = volumes.clone().poll_every(cfg.volume_poll_interval());

  let network_providers: Vec<Arc<dyn NetworkProvider>> = vec![
    Arc::new(WatchedProvider::connman()),
    Arc::new(WatchedProvider::network_manager()),
  ];

  let ctx = ExtensionContext {
    bus: Arc::new(bus.clone()),
    data_path: cfg.data_path.clone(),
    volumes,
    network_providers,
  };

  let mut engine = Engine::new(store, ctx.bus.clone());
  let names = if cli.no_extensions {
    Vec::new()
  } else {
    Discovery::from_env(
      Some(cfg.user_extension_dir()),
      Some(cfg.system_extension_dir.clone()),
      default_extensions(),
    )
    .names()
  };
  engine.load_extensions(&builtin_catalog(), &names, &ctx);

  let (daemon, _handle) = Daemon::new(engine, &ctx, cfg.flush_interval());

  tracing::info!(data_path = ?cfg.data_path, "zeitgeist engine started");
  daemon
    .run(async {
      if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(%error, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
      }
    })
    .await;

  poller.abort();
  bus.disconnect(ENGINE_BUS_NAME);
  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
