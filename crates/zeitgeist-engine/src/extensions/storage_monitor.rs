//! The storage monitor.
//!
//! Tracks which storage media are available and stamps every subject that
//! arrives without a `storage` value with the id of the medium its URI lives
//! on. Removable volumes come from the [`VolumeMonitor`]; network
//! reachability from the first [`NetworkProvider`] present on the bus.
//!
//! The storage table lives in `storage.sqlite` and is written through on
//! every change. Rows are never deleted, so old events keep a resolvable
//! medium id.

use std::{collections::BTreeMap, path::Path, sync::Arc};

use serde_json::Value;
use url::Url;
use zeitgeist_core::{
  Event,
  storage::{LOCAL, NET, StorageDescriptor, StorageMedium, StorageState, UNKNOWN},
};

use crate::{
  Error, Result,
  bus::{SessionBus, Signal},
  extension::{Extension, ExtensionContext, Notification},
  network::{NetworkProvider, select_provider},
  volume::{MountLookup, VolumeMonitor},
};

pub const NAME: &str = "zeitgeist.extensions.StorageMonitor";
pub const FILE_NAME: &str = "storage.sqlite";

pub const GET_STORAGES: &str = "get_storages";

pub const NET_ICON: &str = "stock_internet";
pub const NET_DISPLAY_NAME: &str = "Internet";

/// URI schemes whose resources live on the network.
pub const REMOTE_SCHEMES: &[&str] = &["http", "https", "ftp", "sftp", "ssh", "mailto"];

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS storage (
  value        TEXT    PRIMARY KEY,
  state        INTEGER NOT NULL,
  icon         TEXT    NOT NULL DEFAULT '',
  display_name TEXT    NOT NULL DEFAULT ''
);
";

// ─── Table ───────────────────────────────────────────────────────────────────

/// The storage table, mirrored in memory. The in-memory copy is
/// authoritative; a failed write is logged and otherwise ignored.
struct StorageTable {
  conn: Option<rusqlite::Connection>,
  rows: BTreeMap<String, StorageMedium>,
}

fn open_connection(path: &Path) -> rusqlite::Result<rusqlite::Connection> {
  if let Some(parent) = path.parent()
    && let Err(error) = std::fs::create_dir_all(parent)
  {
    tracing::warn!(?parent, %error, "cannot create storage table directory");
  }
  let conn = rusqlite::Connection::open(path)?;
  conn.execute_batch(SCHEMA)?;
  Ok(conn)
}

fn load_rows(conn: &rusqlite::Connection) -> rusqlite::Result<BTreeMap<String, StorageMedium>> {
  let mut stmt = conn.prepare("SELECT value, state, icon, display_name FROM storage")?;
  let rows = stmt.query_map([], |row| {
    let state: i64 = row.get(1)?;
    Ok(StorageMedium {
      id:           row.get(0)?,
      state:        if state == StorageState::Available as i64 {
        StorageState::Available
      } else {
        StorageState::NotAvailable
      },
      icon:         row.get(2)?,
      display_name: row.get(3)?,
    })
  })?;
  rows.map(|r| r.map(|m| (m.id.clone(), m))).collect()
}

impl StorageTable {
  /// Open the table at `path`. A damaged file is abandoned for an empty
  /// in-memory table.
  fn open(path: &Path) -> Self {
    let opened = open_connection(path).and_then(|conn| {
      let rows = load_rows(&conn)?;
      Ok((conn, rows))
    });
    match opened {
      Ok((conn, rows)) => Self { conn: Some(conn), rows },
      Err(error) => {
        tracing::warn!(?path, %error, "cannot open storage table; starting empty");
        let conn = rusqlite::Connection::open_in_memory()
          .and_then(|c| c.execute_batch(SCHEMA).map(|()| c))
          .ok();
        Self { conn, rows: BTreeMap::new() }
      }
    }
  }

  fn write(&self, medium: &StorageMedium) {
    let Some(conn) = &self.conn else { return };
    let result = conn.execute(
      "INSERT INTO storage (value, state, icon, display_name) VALUES (?1, ?2, ?3, ?4)
       ON CONFLICT(value) DO UPDATE SET
         state = excluded.state,
         icon = excluded.icon,
         display_name = excluded.display_name",
      rusqlite::params![medium.id, medium.state as i64, medium.icon, medium.display_name],
    );
    if let Err(error) = result {
      tracing::warn!(id = %medium.id, %error, "failed to update storage state");
    }
  }

  fn set_available(&mut self, id: &str, icon: &str, display_name: &str) -> StorageDescriptor {
    let medium = StorageMedium {
      id:           id.to_owned(),
      state:        StorageState::Available,
      icon:         icon.to_owned(),
      display_name: display_name.to_owned(),
    };
    self.write(&medium);
    let descriptor = medium.descriptor();
    self.rows.insert(id.to_owned(), medium);
    descriptor
  }

  /// Mark `id` unavailable, keeping its icon and name.
  fn set_unavailable(&mut self, id: &str) {
    let medium = self.rows.entry(id.to_owned()).or_insert_with(|| StorageMedium {
      id:           id.to_owned(),
      state:        StorageState::NotAvailable,
      icon:         String::new(),
      display_name: String::new(),
    });
    medium.state = StorageState::NotAvailable;
    let medium = medium.clone();
    self.write(&medium);
  }
}

// ─── Extension ───────────────────────────────────────────────────────────────

pub struct StorageMonitor {
  table:   StorageTable,
  bus:     Arc<dyn SessionBus>,
  volumes: Arc<dyn VolumeMonitor>,
  network: Option<Arc<dyn NetworkProvider>>,
}

impl StorageMonitor {
  /// Open the table, record every attached volume and the current network
  /// state.
  pub fn new(ctx: &ExtensionContext) -> Self {
    let mut monitor = Self {
      table:   StorageTable::open(&ctx.data_path.join(FILE_NAME)),
      bus:     ctx.bus.clone(),
      volumes: ctx.volumes.clone(),
      network: select_provider(ctx.bus.as_ref(), &ctx.network_providers),
    };

    for volume in monitor.volumes.volumes() {
      monitor.add_available(volume.id(), &volume.icon, &volume.name);
    }
    if let Some(provider) = monitor.network.clone() {
      monitor.network_changed(provider.is_connected());
    }
    monitor
  }

  pub fn add_available(&mut self, id: &str, icon: &str, display_name: &str) {
    tracing::debug!(%id, %display_name, "storage medium available");
    let descriptor = self.table.set_available(id, icon, display_name);
    self.bus.emit(Signal::StorageAvailable { id: id.to_owned(), descriptor });
  }

  pub fn remove_available(&mut self, id: &str) {
    tracing::debug!(%id, "storage medium not available");
    self.table.set_unavailable(id);
    self.bus.emit(Signal::StorageUnavailable { id: id.to_owned() });
  }

  /// Every known medium with a non-empty id.
  pub fn get_all(&self) -> Vec<(String, StorageDescriptor)> {
    self
      .table
      .rows
      .values()
      .filter(|m| !m.id.is_empty())
      .map(|m| (m.id.clone(), m.descriptor()))
      .collect()
  }

  /// Synthetic media are always available; others as last recorded.
  pub fn is_available(&self, id: &str) -> bool {
    StorageMedium::is_synthetic(id)
      || self.table.rows.get(id).is_some_and(|m| m.state.is_available())
  }

  /// The well-known bus name of the network provider in use, if any.
  pub fn network_provider(&self) -> Option<&str> { self.network.as_deref().map(|p| p.bus_name()) }

  /// The id of the medium `uri` resides on.
  pub fn find_storage(&self, uri: &str) -> String {
    let Ok(url) = Url::parse(uri) else {
      return UNKNOWN.to_owned();
    };
    match url.scheme() {
      scheme if REMOTE_SCHEMES.contains(&scheme) => NET.to_owned(),
      "file" => match url.to_file_path() {
        Ok(path) => match self.volumes.find_enclosing_mount(&path) {
          MountLookup::Mounted(volume) => volume.id().to_owned(),
          MountLookup::NotRemovable => LOCAL.to_owned(),
          MountLookup::Unresolved => UNKNOWN.to_owned(),
        },
        Err(()) => UNKNOWN.to_owned(),
      },
      _ => UNKNOWN.to_owned(),
    }
  }

  fn network_changed(&mut self, connected: bool) {
    if connected {
      self.add_available(NET, NET_ICON, NET_DISPLAY_NAME);
    } else {
      self.remove_available(NET);
    }
  }
}

impl Extension for StorageMonitor {
  fn name(&self) -> &'static str { NAME }

  fn public_methods(&self) -> &'static [&'static str] { &[GET_STORAGES] }

  fn pre_insert_event(&mut self, mut event: Event, _sender: &str) -> Result<Option<Event>> {
    for subject in event.subjects.iter_mut().filter(|s| s.storage.is_empty()) {
      subject.storage = self.find_storage(&subject.uri);
    }
    Ok(Some(event))
  }

  fn call(&mut self, method: &str, _args: Value, _sender: &str) -> Result<Value> {
    match method {
      GET_STORAGES => Ok(serde_json::to_value(self.get_all())?),
      _ => Err(Error::UnknownMethod(method.to_owned())),
    }
  }

  fn notify(&mut self, notification: &Notification) -> Result<()> {
    match notification {
      Notification::VolumeAdded(volume) => {
        self.add_available(volume.id(), &volume.icon, &volume.name);
      }
      Notification::VolumeRemoved(volume) => self.remove_available(volume.id()),
      Notification::NetworkChanged { bus_name, connected } => {
        if self.network_provider() == Some(bus_name.as_str()) {
          self.network_changed(*connected);
        }
      }
      _ => {}
    }
    Ok(())
  }
}
