//! Test doubles shared by the engine's unit tests.

use std::{
  path::{Path, PathBuf},
  sync::{Arc, Mutex},
};

use tokio::sync::broadcast;
use zeitgeist_core::Event;

use crate::{
  Result,
  bus::LocalBus,
  extension::{Extension, ExtensionContext},
  network::NetworkProvider,
  volume::{MountLookup, Volume, VolumeEvent, VolumeMonitor},
};

/// A [`VolumeMonitor`] with a fixed set of removable mounts; everything
/// else is on a fixed local disk.
pub struct FixedVolumes {
  volumes: Vec<Volume>,
  events:  broadcast::Sender<VolumeEvent>,
}

impl FixedVolumes {
  pub fn new(volumes: Vec<Volume>) -> Self {
    let (events, _) = broadcast::channel(16);
    Self { volumes, events }
  }

  pub fn none() -> Self { Self::new(Vec::new()) }
}

impl VolumeMonitor for FixedVolumes {
  fn volumes(&self) -> Vec<Volume> { self.volumes.clone() }

  fn find_enclosing_mount(&self, path: &Path) -> MountLookup {
    self
      .volumes
      .iter()
      .find(|v| path.starts_with(&v.mount_point))
      .map_or(MountLookup::NotRemovable, |v| MountLookup::Mounted(v.clone()))
  }

  fn subscribe(&self) -> broadcast::Receiver<VolumeEvent> { self.events.subscribe() }
}

pub fn usb_stick() -> Volume {
  Volume {
    uuid:        "1234-ABCD".into(),
    name:        "Stick".into(),
    icon:        "drive-removable-media".into(),
    mount_point: PathBuf::from("/media/u/Stick"),
    ..Volume::default()
  }
}

pub fn context(data_path: &Path, bus: &LocalBus) -> ExtensionContext {
  context_with(data_path, bus, FixedVolumes::none(), Vec::new())
}

pub fn context_with(
  data_path: &Path,
  bus: &LocalBus,
  volumes: FixedVolumes,
  network_providers: Vec<Arc<dyn NetworkProvider>>,
) -> ExtensionContext {
  ExtensionContext {
    bus: Arc::new(bus.clone()),
    data_path: data_path.to_path_buf(),
    volumes: Arc::new(volumes),
    network_providers,
  }
}

/// Records the hooks it sees into a shared log.
pub struct Recorder {
  name: &'static str,
  log:  Arc<Mutex<Vec<String>>>,
}

impl Recorder {
  pub fn new(name: &'static str, log: Arc<Mutex<Vec<String>>>) -> Self { Self { name, log } }

  fn push(&self, entry: String) {
    if let Ok(mut log) = self.log.lock() {
      log.push(entry);
    }
  }
}

impl Extension for Recorder {
  fn name(&self) -> &'static str { self.name }

  fn pre_insert_event(&mut self, event: Event, _sender: &str) -> Result<Option<Event>> {
    self.push(format!("pre_insert {}", event.actor));
    Ok(Some(event))
  }

  fn post_insert_event(&mut self, event: &Event, _sender: &str) -> Result<()> {
    self.push(format!("post_insert {}", event.id));
    Ok(())
  }

  fn post_delete_events(&mut self, ids: &[u32], _sender: &str) -> Result<()> {
    self.push(format!("post_delete {ids:?}"));
    Ok(())
  }

  fn unload(&mut self) { self.push(format!("unload {}", self.name)); }
}

/// Drops events from one actor.
pub struct DropActor(pub &'static str);

impl Extension for DropActor {
  fn name(&self) -> &'static str { "test.DropActor" }

  fn pre_insert_event(&mut self, event: Event, _sender: &str) -> Result<Option<Event>> {
    Ok((event.actor != self.0).then_some(event))
  }
}

/// Fills an empty interpretation, either on the way in or on the way out.
pub struct FillInterpretation {
  value:  &'static str,
  on_get: bool,
}

impl FillInterpretation {
  pub const ON_INSERT: &'static str = "test.FillInterpretationOnInsert";
  pub const ON_GET: &'static str = "test.FillInterpretationOnGet";

  pub fn on_insert(value: &'static str) -> Self { Self { value, on_get: false } }

  pub fn on_get(value: &'static str) -> Self { Self { value, on_get: true } }

  fn fill(&self, mut event: Event) -> Event {
    if event.interpretation.is_empty() {
      event.interpretation = self.value.to_owned();
    }
    event
  }
}

impl Extension for FillInterpretation {
  fn name(&self) -> &'static str { if self.on_get { Self::ON_GET } else { Self::ON_INSERT } }

  fn pre_insert_event(&mut self, event: Event, _sender: &str) -> Result<Option<Event>> {
    Ok(Some(if self.on_get { event } else { self.fill(event) }))
  }

  fn get_event(&mut self, event: Event, _sender: &str) -> Result<Option<Event>> {
    Ok(Some(if self.on_get { self.fill(event) } else { event }))
  }
}
