//! The session bus as seen by the engine.
//!
//! The engine needs four things from the bus: a broadcast of connection
//! names coming and going, a way to ask whether a well-known name has an
//! owner, proxies for remote monitor objects, and a way to emit signals.
//! [`SessionBus`] captures exactly that. [`LocalBus`] is an in-process bus
//! used by the daemon binary and by tests.

use std::{
  collections::{HashMap, HashSet},
  sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use zeitgeist_core::{
  Event, EventId, TimeRange, datasource::DataSource, storage::StorageDescriptor,
};

use crate::{Error, Result};

const BROADCAST_CAPACITY: usize = 256;

// ─── Bus messages ────────────────────────────────────────────────────────────

/// The bus daemon's `NameOwnerChanged` broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameOwnerChanged {
  pub name:      String,
  pub old_owner: String,
  pub new_owner: String,
}

impl NameOwnerChanged {
  /// The name lost its owner and nobody took it over.
  pub fn is_disappearance(&self) -> bool {
    self.new_owner.is_empty() && !self.old_owner.is_empty()
  }
}

/// Signals emitted by the engine's extensions.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
  DataSourceRegistered(DataSource),
  DataSourceEnabled { unique_id: String, enabled: bool },
  DataSourceDisconnected(DataSource),
  StorageAvailable { id: String, descriptor: StorageDescriptor },
  StorageUnavailable { id: String },
  TemplateAdded { id: String, template: Event },
  TemplateRemoved { id: String, template: Event },
}

// ─── Traits ──────────────────────────────────────────────────────────────────

/// A client-side monitor object, reached through the bus.
///
/// Both calls are one-way from the engine's point of view: an error only
/// ever ends up in the log.
#[async_trait]
pub trait RemoteMonitor: Send + Sync {
  async fn notify_insert(&self, time_range: TimeRange, events: Vec<Event>) -> Result<()>;

  async fn notify_delete(&self, time_range: TimeRange, ids: Vec<EventId>) -> Result<()>;
}

pub trait SessionBus: Send + Sync {
  fn subscribe_name_owner_changed(&self) -> broadcast::Receiver<NameOwnerChanged>;

  fn name_has_owner(&self, name: &str) -> bool;

  /// A proxy for the object at `path` owned by `owner`.
  ///
  /// Construction is lazy: the object does not have to exist yet.
  fn monitor_proxy(&self, owner: &str, path: &str) -> Result<Arc<dyn RemoteMonitor>>;

  fn emit(&self, signal: Signal);
}

// ─── LocalBus ────────────────────────────────────────────────────────────────

type ObjectKey = (String, String);

struct Inner {
  names:         Mutex<HashSet<String>>,
  objects:       Mutex<HashMap<ObjectKey, Arc<dyn RemoteMonitor>>>,
  owner_changes: broadcast::Sender<NameOwnerChanged>,
  signals:       broadcast::Sender<Signal>,
  next_unique:   Mutex<u64>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An in-process session bus.
///
/// Cloning is cheap; all clones share the same name registry, objects and
/// broadcast channels.
#[derive(Clone)]
pub struct LocalBus {
  inner: Arc<Inner>,
}

impl Default for LocalBus {
  fn default() -> Self { Self::new() }
}

impl LocalBus {
  pub fn new() -> Self {
    let (owner_changes, _) = broadcast::channel(BROADCAST_CAPACITY);
    let (signals, _) = broadcast::channel(BROADCAST_CAPACITY);
    Self {
      inner: Arc::new(Inner {
        names: Mutex::new(HashSet::new()),
        objects: Mutex::new(HashMap::new()),
        owner_changes,
        signals,
        next_unique: Mutex::new(1),
      }),
    }
  }

  /// Allocate a fresh unique connection name (`:1.N`) and connect it.
  pub fn open_connection(&self) -> String {
    let name = {
      let mut next = lock(&self.inner.next_unique);
      let name = format!(":1.{next}");
      *next += 1;
      name
    };
    self.connect(&name);
    name
  }

  /// Claim `name`. Claiming an owned name is a no-op.
  pub fn connect(&self, name: &str) {
    if !lock(&self.inner.names).insert(name.to_owned()) {
      return;
    }
    let _ = self.inner.owner_changes.send(NameOwnerChanged {
      name:      name.to_owned(),
      old_owner: String::new(),
      new_owner: name.to_owned(),
    });
  }

  /// Release `name` and every object it exported.
  pub fn disconnect(&self, name: &str) {
    if !lock(&self.inner.names).remove(name) {
      return;
    }
    lock(&self.inner.objects).retain(|(owner, _), _| owner != name);
    tracing::debug!(%name, "connection closed");
    let _ = self.inner.owner_changes.send(NameOwnerChanged {
      name:      name.to_owned(),
      old_owner: name.to_owned(),
      new_owner: String::new(),
    });
  }

  /// Make `monitor` reachable at `(owner, path)`.
  pub fn export_monitor(&self, owner: &str, path: &str, monitor: Arc<dyn RemoteMonitor>) {
    lock(&self.inner.objects).insert((owner.to_owned(), path.to_owned()), monitor);
  }

  pub fn subscribe_signals(&self) -> broadcast::Receiver<Signal> {
    self.inner.signals.subscribe()
  }
}

impl SessionBus for LocalBus {
  fn subscribe_name_owner_changed(&self) -> broadcast::Receiver<NameOwnerChanged> {
    self.inner.owner_changes.subscribe()
  }

  fn name_has_owner(&self, name: &str) -> bool { lock(&self.inner.names).contains(name) }

  fn monitor_proxy(&self, owner: &str, path: &str) -> Result<Arc<dyn RemoteMonitor>> {
    Ok(Arc::new(LocalProxy {
      inner: self.inner.clone(),
      key:   (owner.to_owned(), path.to_owned()),
    }))
  }

  fn emit(&self, signal: Signal) {
    tracing::debug!(?signal, "emitting signal");
    let _ = self.inner.signals.send(signal);
  }
}

/// Resolves the exported object on every call.
struct LocalProxy {
  inner: Arc<Inner>,
  key:   ObjectKey,
}

impl LocalProxy {
  fn target(&self) -> Result<Arc<dyn RemoteMonitor>> {
    lock(&self.inner.objects).get(&self.key).cloned().ok_or_else(|| {
      Error::Bus(format!("no object at {} on {}", self.key.1, self.key.0))
    })
  }
}

#[async_trait]
impl RemoteMonitor for LocalProxy {
  async fn notify_insert(&self, time_range: TimeRange, events: Vec<Event>) -> Result<()> {
    self.target()?.notify_insert(time_range, events).await
  }

  async fn notify_delete(&self, time_range: TimeRange, ids: Vec<EventId>) -> Result<()> {
    self.target()?.notify_delete(time_range, ids).await
  }
}

// ─── ChannelMonitor ──────────────────────────────────────────────────────────

/// One notification received by a [`ChannelMonitor`].
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorCall {
  Insert { time_range: TimeRange, events: Vec<Event> },
  Delete { time_range: TimeRange, ids: Vec<EventId> },
}

/// An in-process monitor object that forwards notifications to a channel.
pub struct ChannelMonitor {
  tx: mpsc::UnboundedSender<MonitorCall>,
}

impl ChannelMonitor {
  pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MonitorCall>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(Self { tx }), rx)
  }

  fn forward(&self, call: MonitorCall) -> Result<()> {
    self
      .tx
      .send(call)
      .map_err(|_| Error::Bus("monitor receiver dropped".into()))
  }
}

#[async_trait]
impl RemoteMonitor for ChannelMonitor {
  async fn notify_insert(&self, time_range: TimeRange, events: Vec<Event>) -> Result<()> {
    self.forward(MonitorCall::Insert { time_range, events })
  }

  async fn notify_delete(&self, time_range: TimeRange, ids: Vec<EventId>) -> Result<()> {
    self.forward(MonitorCall::Delete { time_range, ids })
  }
}
