//! Volume discovery.
//!
//! [`VolumeMonitor`] is the capability the storage monitor consumes.
//! [`MountTableVolumeMonitor`] implements it on Linux by reading the kernel
//! mount table and the `/dev/disk/by-*` symlink farms.

use std::{
  collections::HashMap,
  fs, io,
  path::{Path, PathBuf},
  sync::{Arc, Mutex, PoisonError},
  time::Duration,
};

use tokio::{sync::broadcast, task::JoinHandle};
use zeitgeist_core::storage::UNKNOWN;

/// Mount points below these directories belong to removable media.
pub const REMOVABLE_ROOTS: &[&str] = &["/media", "/run/media", "/mnt"];

pub const REMOVABLE_ICON: &str = "drive-removable-media";

// ─── Capability ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Volume {
  pub uuid:            String,
  /// Partition-table UUID; used when the filesystem has none.
  pub identifier_uuid: String,
  pub label:           String,
  pub name:            String,
  pub icon:            String,
  pub mount_point:     PathBuf,
}

impl Volume {
  /// Best-effort stable identifier: UUID, then partition UUID, then label,
  /// then name, then `"unknown"`.
  pub fn id(&self) -> &str {
    [&self.uuid, &self.identifier_uuid, &self.label, &self.name]
      .into_iter()
      .find(|s| !s.is_empty())
      .map_or(UNKNOWN, String::as_str)
  }
}

/// Where a path lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountLookup {
  Mounted(Volume),
  /// On a fixed, non-removable filesystem.
  NotRemovable,
  Unresolved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeEvent {
  Added(Volume),
  Removed(Volume),
}

pub trait VolumeMonitor: Send + Sync {
  /// Currently attached removable volumes.
  fn volumes(&self) -> Vec<Volume>;

  fn find_enclosing_mount(&self, path: &Path) -> MountLookup;

  fn subscribe(&self) -> broadcast::Receiver<VolumeEvent>;
}

// ─── Mount table ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
struct MountEntry {
  mount_point: PathBuf,
  /// `Some` for removable mounts.
  volume:      Option<Volume>,
}

/// Undo the escapes used in `/proc/self/mounts` (`\040` for space) and in
/// `/dev/disk/by-label` (`\x20`).
fn unescape(field: &str) -> String {
  let bytes = field.as_bytes();
  let mut out = Vec::with_capacity(bytes.len());
  let mut i = 0;
  while i < bytes.len() {
    if bytes[i] == b'\\'
      && let Some(byte) = escaped_byte(&bytes[i + 1..])
    {
      out.push(byte);
      i += 4;
      continue;
    }
    out.push(bytes[i]);
    i += 1;
  }
  String::from_utf8_lossy(&out).into_owned()
}

/// The byte encoded by the three bytes following a backslash.
fn escaped_byte(rest: &[u8]) -> Option<u8> {
  match rest {
    [b'x', hi, lo, ..] => {
      let digits = [*hi, *lo];
      u8::from_str_radix(std::str::from_utf8(&digits).ok()?, 16).ok()
    }
    [a, b, c, ..] if [a, b, c].iter().all(|d| (b'0'..=b'7').contains(*d)) => {
      let value = u16::from(a - b'0') * 64 + u16::from(b - b'0') * 8 + u16::from(c - b'0');
      u8::try_from(value).ok()
    }
    _ => None,
  }
}

/// `(device, mount point)` pairs from a mount table.
fn parse_mount_table(text: &str) -> Vec<(String, PathBuf)> {
  text
    .lines()
    .filter_map(|line| {
      let mut fields = line.split_whitespace();
      let device = fields.next()?;
      let mount_point = fields.next()?;
      Some((unescape(device), PathBuf::from(unescape(mount_point))))
    })
    .collect()
}

fn is_removable(mount_point: &Path) -> bool {
  REMOVABLE_ROOTS
    .iter()
    .any(|root| mount_point != Path::new(root) && mount_point.starts_with(root))
}

/// Map each symlink target in `dir` to the link's (unescaped) name.
fn links_by_target(dir: &Path) -> HashMap<PathBuf, String> {
  let Ok(entries) = fs::read_dir(dir) else {
    return HashMap::new();
  };
  entries
    .filter_map(|entry| {
      let entry = entry.ok()?;
      let target = fs::canonicalize(entry.path()).ok()?;
      Some((target, unescape(&entry.file_name().to_string_lossy())))
    })
    .collect()
}

/// A [`VolumeMonitor`] over the kernel mount table.
///
/// The table is re-read by [`refresh`](Self::refresh); differences in the
/// set of removable mounts are broadcast as [`VolumeEvent`]s.
pub struct MountTableVolumeMonitor {
  mount_table: PathBuf,
  disk_dir:    PathBuf,
  entries:     Mutex<Vec<MountEntry>>,
  events:      broadcast::Sender<VolumeEvent>,
}

impl MountTableVolumeMonitor {
  /// Monitor `/proc/self/mounts`, resolving ids through `/dev/disk`.
  pub fn system() -> Self { Self::new("/proc/self/mounts", "/dev/disk") }

  /// Monitor `mount_table`; `disk_dir` holds `by-uuid`, `by-partuuid` and
  /// `by-label` directories. The table is read once immediately; a missing
  /// table leaves every lookup unresolved.
  pub fn new(mount_table: impl Into<PathBuf>, disk_dir: impl Into<PathBuf>) -> Self {
    let (events, _) = broadcast::channel(64);
    let monitor = Self {
      mount_table: mount_table.into(),
      disk_dir: disk_dir.into(),
      entries: Mutex::new(Vec::new()),
      events,
    };
    if let Err(error) = monitor.refresh() {
      tracing::warn!(path = ?monitor.mount_table, %error, "cannot read mount table");
    }
    monitor
  }

  fn read_entries(&self) -> io::Result<Vec<MountEntry>> {
    let text = fs::read_to_string(&self.mount_table)?;
    let uuids = links_by_target(&self.disk_dir.join("by-uuid"));
    let part_uuids = links_by_target(&self.disk_dir.join("by-partuuid"));
    let labels = links_by_target(&self.disk_dir.join("by-label"));

    let entries = parse_mount_table(&text)
      .into_iter()
      .map(|(device, mount_point)| {
        let volume = is_removable(&mount_point).then(|| {
          let device = fs::canonicalize(&device).unwrap_or_else(|_| PathBuf::from(&device));
          let lookup = |map: &HashMap<PathBuf, String>| map.get(&device).cloned().unwrap_or_default();
          Volume {
            uuid:            lookup(&uuids),
            identifier_uuid: lookup(&part_uuids),
            label:           lookup(&labels),
            name:            mount_point
              .file_name()
              .map(|n| n.to_string_lossy().into_owned())
              .unwrap_or_default(),
            icon:            REMOVABLE_ICON.to_owned(),
            mount_point:     mount_point.clone(),
          }
        });
        MountEntry { mount_point, volume }
      })
      .collect();
    Ok(entries)
  }

  /// Re-read the mount table and broadcast what changed.
  pub fn refresh(&self) -> io::Result<()> {
    let fresh = self.read_entries()?;
    let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

    let removable = |list: &[MountEntry]| -> Vec<Volume> {
      list.iter().filter_map(|e| e.volume.clone()).collect()
    };
    let before = removable(&entries);
    let after = removable(&fresh);

    for volume in before.iter().filter(|v| !after.contains(v)) {
      tracing::debug!(id = volume.id(), "volume removed");
      let _ = self.events.send(VolumeEvent::Removed(volume.clone()));
    }
    for volume in after.iter().filter(|v| !before.contains(v)) {
      tracing::debug!(id = volume.id(), "volume added");
      let _ = self.events.send(VolumeEvent::Added(volume.clone()));
    }

    *entries = fresh;
    Ok(())
  }

  /// Refresh every `period` until the returned task is aborted.
  pub fn poll_every(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(period);
      ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        if let Err(error) = self.refresh() {
          tracing::warn!(%error, "mount table refresh failed");
        }
      }
    })
  }
}

impl VolumeMonitor for MountTableVolumeMonitor {
  fn volumes(&self) -> Vec<Volume> {
    let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
    entries.iter().filter_map(|e| e.volume.clone()).collect()
  }

  fn find_enclosing_mount(&self, path: &Path) -> MountLookup {
    let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
    let enclosing = entries
      .iter()
      .filter(|e| path.starts_with(&e.mount_point))
      .max_by_key(|e| e.mount_point.components().count());

    match enclosing {
      Some(MountEntry { volume: Some(volume), .. }) => MountLookup::Mounted(volume.clone()),
      Some(_) => MountLookup::NotRemovable,
      None => MountLookup::Unresolved,
    }
  }

  fn subscribe(&self) -> broadcast::Receiver<VolumeEvent> { self.events.subscribe() }
}
