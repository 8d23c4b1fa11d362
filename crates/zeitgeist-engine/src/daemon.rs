//! The daemon main loop.
//!
//! A [`Daemon`] owns the [`Engine`] and drives it from a single task, so
//! hooks, monitor bookkeeping and extension state never need locking.
//! Clients talk to it through a cloneable [`Handle`].

use std::{future::Future, sync::Arc, time::Duration};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::{
  sync::{broadcast, mpsc, oneshot, watch},
  time::{self, Instant},
};
use zeitgeist_core::{
  Event, EventId, TimeRange,
  datasource::DataSource,
  storage::StorageDescriptor,
  store::{EventQuery, LogStore},
};

use crate::{
  Engine, Error, Result,
  bus::SessionBus,
  extension::{ExtensionContext, Notification},
  extensions::{blacklist, datasource_registry, storage_monitor},
  network::select_provider,
  volume::{VolumeEvent, VolumeMonitor},
};

const REQUEST_QUEUE: usize = 64;

type Reply<T> = oneshot::Sender<Result<T>>;

enum Request {
  InsertEvents { events: Vec<Event>, sender: String, reply: Reply<Vec<EventId>> },
  GetEvents { ids: Vec<EventId>, sender: String, reply: Reply<Vec<Option<Event>>> },
  FindEventIds { query: EventQuery, reply: Reply<Vec<EventId>> },
  FindEvents { query: EventQuery, sender: String, reply: Reply<Vec<Event>> },
  DeleteEvents { ids: Vec<EventId>, sender: String, reply: Reply<Vec<EventId>> },
  InstallMonitor {
    owner:      String,
    path:       String,
    time_range: TimeRange,
    templates:  Vec<Event>,
    reply:      Reply<()>,
  },
  RemoveMonitor { owner: String, path: String, reply: Reply<()> },
  CallMethod { method: String, args: Value, sender: String, reply: Reply<Value> },
}

// ─── Daemon ──────────────────────────────────────────────────────────────────

pub struct Daemon<S: LogStore> {
  engine:         Engine<S>,
  bus:            Arc<dyn SessionBus>,
  volumes:        Arc<dyn VolumeMonitor>,
  network:        Option<(String, watch::Receiver<bool>)>,
  flush_interval: Duration,
  requests:       mpsc::Receiver<Request>,
}

impl<S: LogStore> Daemon<S> {
  /// Wrap `engine`, whose extensions were loaded with `ctx`.
  pub fn new(engine: Engine<S>, ctx: &ExtensionContext, flush_interval: Duration) -> (Self, Handle) {
    let (tx, requests) = mpsc::channel(REQUEST_QUEUE);
    let network = select_provider(ctx.bus.as_ref(), &ctx.network_providers)
      .map(|provider| (provider.bus_name().to_owned(), provider.subscribe()));
    let daemon = Self {
      engine,
      bus: ctx.bus.clone(),
      volumes: ctx.volumes.clone(),
      network,
      flush_interval,
      requests,
    };
    (daemon, Handle { tx })
  }

  /// Serve until `shutdown` resolves or every [`Handle`] is gone, then close
  /// the engine.
  pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
    let mut owners = Some(self.bus.subscribe_name_owner_changed());
    let mut volume_events = Some(self.volumes.subscribe());
    let mut flush = time::interval_at(Instant::now() + self.flush_interval, self.flush_interval);
    tokio::pin!(shutdown);

    tracing::info!("daemon running");
    loop {
      tokio::select! {
        biased;

        change = next_broadcast(&mut owners, "name owner changes") => match change {
          Received::Value(change) if change.is_disappearance() => {
            tracing::debug!(name = %change.name, "bus name vanished");
            self.engine.dispatch(&Notification::NameOwnerLost(change.name));
          }
          Received::Value(_) => {}
          Received::Lagged => {
            let lost = self.engine.resync_owners(self.bus.as_ref());
            tracing::info!(lost, "resynchronised bus name owners");
          }
        },
        () = &mut shutdown => {
          tracing::info!("shutdown requested");
          break;
        }
        request = self.requests.recv() => match request {
          Some(request) => self.handle(request).await,
          None => {
            tracing::info!("all clients gone");
            break;
          }
        },
        event = next_broadcast(&mut volume_events, "volume events") => {
          let notification = match event {
            Received::Value(VolumeEvent::Added(volume)) => Notification::VolumeAdded(volume),
            Received::Value(VolumeEvent::Removed(volume)) => Notification::VolumeRemoved(volume),
            Received::Lagged => continue,
          };
          self.engine.dispatch(&notification);
        }
        (bus_name, connected) = next_network_state(&mut self.network) => {
          self.engine.dispatch(&Notification::NetworkChanged { bus_name, connected });
        }
        _ = flush.tick() => self.engine.dispatch(&Notification::FlushTimer),
      }
    }

    self.engine.close().await;
  }

  async fn handle(&mut self, request: Request) {
    let engine = &mut self.engine;
    match request {
      Request::InsertEvents { events, sender, reply } => {
        let _ = reply.send(engine.insert_events(events, &sender).await);
      }
      Request::GetEvents { ids, sender, reply } => {
        let _ = reply.send(engine.get_events(ids, &sender).await);
      }
      Request::FindEventIds { query, reply } => {
        let _ = reply.send(engine.find_event_ids(&query).await);
      }
      Request::FindEvents { query, sender, reply } => {
        let _ = reply.send(engine.find_events(&query, &sender).await);
      }
      Request::DeleteEvents { ids, sender, reply } => {
        let _ = reply.send(engine.delete_events(ids, &sender).await);
      }
      Request::InstallMonitor { owner, path, time_range, templates, reply } => {
        let _ = reply.send(engine.install_monitor(&owner, &path, time_range, templates));
      }
      Request::RemoveMonitor { owner, path, reply } => {
        let _ = reply.send(engine.remove_monitor(&owner, &path));
      }
      Request::CallMethod { method, args, sender, reply } => {
        let _ = reply.send(engine.call_extension_method(&method, args, &sender));
      }
    }
  }
}

enum Received<T> {
  Value(T),
  /// Messages were dropped before this receiver could see them.
  Lagged,
}

/// The next value of a broadcast, or never once it has closed.
async fn next_broadcast<T: Clone>(rx: &mut Option<broadcast::Receiver<T>>, what: &str) -> Received<T> {
  loop {
    let Some(inner) = rx.as_mut() else {
      return std::future::pending().await;
    };
    match inner.recv().await {
      Ok(value) => return Received::Value(value),
      Err(broadcast::error::RecvError::Lagged(skipped)) => {
        tracing::warn!(what, skipped, "notifications lost");
        return Received::Lagged;
      }
      Err(broadcast::error::RecvError::Closed) => *rx = None,
    }
  }
}

async fn next_network_state(network: &mut Option<(String, watch::Receiver<bool>)>) -> (String, bool) {
  let Some((bus_name, rx)) = network.as_mut() else {
    return std::future::pending().await;
  };
  if rx.changed().await.is_err() {
    tracing::debug!(%bus_name, "network provider went away");
    *network = None;
    return std::future::pending().await;
  }
  let connected = *rx.borrow_and_update();
  (bus_name.clone(), connected)
}

// ─── Handle ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct RegisterArgs<'a> {
  unique_id:       &'a str,
  name:            &'a str,
  description:     &'a str,
  event_templates: &'a [Event],
}

#[derive(Serialize)]
struct SetEnabledArgs<'a> {
  unique_id: &'a str,
  enabled:   bool,
}

#[derive(Serialize)]
struct IdArgs<'a> {
  unique_id: &'a str,
}

#[derive(Serialize)]
struct AddBlacklistArgs<'a> {
  id:       &'a str,
  template: &'a Event,
}

#[derive(Serialize)]
struct RemoveBlacklistArgs<'a> {
  id: &'a str,
}

/// The client side of a running [`Daemon`]. Every call fails with
/// [`Error::Closed`] once the daemon has stopped.
#[derive(Clone)]
pub struct Handle {
  tx: mpsc::Sender<Request>,
}

impl Handle {
  async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Request) -> Result<T> {
    let (reply, rx) = oneshot::channel();
    self.tx.send(make(reply)).await.map_err(|_| Error::Closed)?;
    rx.await.map_err(|_| Error::Closed)?
  }

  async fn call<A: Serialize, T: DeserializeOwned>(&self, method: &str, args: &A, sender: &str) -> Result<T> {
    let args = serde_json::to_value(args)?;
    let value = self
      .request(|reply| Request::CallMethod {
        method: method.to_owned(),
        args,
        sender: sender.to_owned(),
        reply,
      })
      .await?;
    Ok(serde_json::from_value(value)?)
  }

  // Log

  pub async fn insert_events(&self, events: Vec<Event>, sender: &str) -> Result<Vec<EventId>> {
    let sender = sender.to_owned();
    self.request(|reply| Request::InsertEvents { events, sender, reply }).await
  }

  pub async fn get_events(&self, ids: Vec<EventId>, sender: &str) -> Result<Vec<Option<Event>>> {
    let sender = sender.to_owned();
    self.request(|reply| Request::GetEvents { ids, sender, reply }).await
  }

  pub async fn find_event_ids(&self, query: EventQuery) -> Result<Vec<EventId>> {
    self.request(|reply| Request::FindEventIds { query, reply }).await
  }

  pub async fn find_events(&self, query: EventQuery, sender: &str) -> Result<Vec<Event>> {
    let sender = sender.to_owned();
    self.request(|reply| Request::FindEvents { query, sender, reply }).await
  }

  pub async fn delete_events(&self, ids: Vec<EventId>, sender: &str) -> Result<Vec<EventId>> {
    let sender = sender.to_owned();
    self.request(|reply| Request::DeleteEvents { ids, sender, reply }).await
  }

  // Monitors

  pub async fn install_monitor(
    &self,
    owner: &str,
    path: &str,
    time_range: TimeRange,
    templates: Vec<Event>,
  ) -> Result<()> {
    let (owner, path) = (owner.to_owned(), path.to_owned());
    self
      .request(|reply| Request::InstallMonitor { owner, path, time_range, templates, reply })
      .await
  }

  pub async fn remove_monitor(&self, owner: &str, path: &str) -> Result<()> {
    let (owner, path) = (owner.to_owned(), path.to_owned());
    self.request(|reply| Request::RemoveMonitor { owner, path, reply }).await
  }

  // Data-source registry

  /// Returns whether the source is enabled.
  pub async fn register_data_source(
    &self,
    unique_id: &str,
    name: &str,
    description: &str,
    event_templates: &[Event],
    sender: &str,
  ) -> Result<bool> {
    let args = RegisterArgs { unique_id, name, description, event_templates };
    self.call(datasource_registry::REGISTER_DATA_SOURCE, &args, sender).await
  }

  pub async fn get_data_sources(&self) -> Result<Vec<DataSource>> {
    self.call(datasource_registry::GET_DATA_SOURCES, &Value::Null, "").await
  }

  /// Returns whether `unique_id` is known.
  pub async fn set_data_source_enabled(&self, unique_id: &str, enabled: bool) -> Result<bool> {
    let args = SetEnabledArgs { unique_id, enabled };
    self.call(datasource_registry::SET_DATA_SOURCE_ENABLED, &args, "").await
  }

  pub async fn get_data_source_from_id(&self, unique_id: &str) -> Result<DataSource> {
    self.call(datasource_registry::GET_DATA_SOURCE_FROM_ID, &IdArgs { unique_id }, "").await
  }

  // Storage monitor

  pub async fn get_storages(&self) -> Result<Vec<(String, StorageDescriptor)>> {
    self.call(storage_monitor::GET_STORAGES, &Value::Null, "").await
  }

  // Blacklist

  pub async fn add_blacklist(&self, id: &str, template: &Event) -> Result<()> {
    let _: Value = self.call(blacklist::ADD_BLACKLIST, &AddBlacklistArgs { id, template }, "").await?;
    Ok(())
  }

  pub async fn remove_blacklist(&self, id: &str) -> Result<Event> {
    self.call(blacklist::REMOVE_BLACKLIST, &RemoveBlacklistArgs { id }, "").await
  }

  pub async fn get_blacklist(&self) -> Result<std::collections::BTreeMap<String, Event>> {
    self.call(blacklist::GET_BLACKLIST, &Value::Null, "").await
  }
}

#[cfg(test)]
mod tests {
  use zeitgeist_core::Subject;
  use zeitgeist_store_sqlite::SqliteLog;

  use super::*;
  use crate::{
    bus::{ChannelMonitor, LocalBus, MonitorCall, Signal},
    extensions,
    network::{CONNMAN_BUS_NAME, NetworkProvider, WatchedProvider},
    testing::{self, FixedVolumes},
  };

  struct Running {
    handle:   Handle,
    shutdown: oneshot::Sender<()>,
    task:     tokio::task::JoinHandle<()>,
  }

  impl Running {
    async fn stop(self) {
      let _ = self.shutdown.send(());
      self.task.await.unwrap();
    }
  }

  async fn start(ctx: ExtensionContext, flush_interval: Duration) -> Running {
    let store = SqliteLog::open_in_memory().await.unwrap();
    let mut engine = Engine::new(store, ctx.bus.clone());
    engine.load_extensions(&extensions::builtin_catalog(), &extensions::default_extensions(), &ctx);

    let (daemon, handle) = Daemon::new(engine, &ctx, flush_interval);
    let (shutdown, stop) = oneshot::channel::<()>();
    let task = tokio::spawn(daemon.run(async {
      let _ = stop.await;
    }));
    Running { handle, shutdown, task }
  }

  fn event(timestamp: i64, uri: &str) -> Event {
    Event::new(timestamp).with_actor("app://a").with_subject(Subject::new(uri))
  }

  #[tokio::test]
  async fn handle_drives_the_whole_engine() {
    let dir = tempfile::tempdir().unwrap();
    let bus = LocalBus::new();
    let running = start(testing::context(dir.path(), &bus), Duration::from_secs(300)).await;
    let h = &running.handle;

    assert!(h.register_data_source("org.test.A", "A", "", &[], ":1.10").await.unwrap());
    let ids = h.insert_events(vec![event(100, "http://example.com/")], ":1.10").await.unwrap();
    assert_eq!(ids.len(), 1);

    let found = h.find_events(EventQuery::default(), ":1.1").await.unwrap();
    assert_eq!(found[0].subjects[0].storage, "net");

    h.add_blacklist("no-a", &Event::template().with_actor("app://a")).await.unwrap();
    assert!(h.insert_events(vec![event(200, "file:///x")], ":1.1").await.unwrap().is_empty());
    assert_eq!(h.remove_blacklist("no-a").await.unwrap().actor, "app://a");
    assert!(h.get_blacklist().await.unwrap().is_empty());

    assert!(matches!(
      h.get_data_source_from_id("org.test.Missing").await,
      Err(Error::DataSourceNotFound(_))
    ));
    assert_eq!(h.delete_events(ids.clone(), ":1.1").await.unwrap(), ids);

    let handle = running.handle.clone();
    running.stop().await;
    assert!(matches!(handle.find_event_ids(EventQuery::default()).await, Err(Error::Closed)));
  }

  #[tokio::test]
  async fn vanished_clients_lose_monitors_and_data_sources() {
    let dir = tempfile::tempdir().unwrap();
    let bus = LocalBus::new();
    let mut signals = bus.subscribe_signals();
    let running = start(testing::context(dir.path(), &bus), Duration::from_secs(300)).await;
    let h = &running.handle;

    let client = bus.open_connection();
    let (monitor, _calls) = ChannelMonitor::new();
    bus.export_monitor(&client, "/m", monitor);
    h.install_monitor(&client, "/m", TimeRange::always(), Vec::new()).await.unwrap();
    h.register_data_source("org.test.A", "A", "", &[], &client).await.unwrap();

    bus.disconnect(&client);

    loop {
      if let Signal::DataSourceDisconnected(source) = signals.recv().await.unwrap() {
        assert_eq!(source.unique_id, "org.test.A");
        assert!(!source.running);
        break;
      }
    }
    assert!(matches!(h.remove_monitor(&client, "/m").await, Err(Error::MonitorNotFound { .. })));
    running.stop().await;
  }

  #[tokio::test]
  async fn disconnect_is_seen_before_a_later_request() {
    let dir = tempfile::tempdir().unwrap();
    let bus = LocalBus::new();
    let running = start(testing::context(dir.path(), &bus), Duration::from_secs(300)).await;
    let h = &running.handle;

    for _ in 0..16 {
      let client = bus.open_connection();
      let (monitor, _calls) = ChannelMonitor::new();
      bus.export_monitor(&client, "/m", monitor);
      h.install_monitor(&client, "/m", TimeRange::always(), Vec::new()).await.unwrap();

      bus.disconnect(&client);
      assert!(matches!(h.remove_monitor(&client, "/m").await, Err(Error::MonitorNotFound { .. })));
    }
    running.stop().await;
  }

  #[tokio::test]
  async fn missed_disconnects_are_caught_up_after_a_burst() {
    let dir = tempfile::tempdir().unwrap();
    let bus = LocalBus::new();
    let running = start(testing::context(dir.path(), &bus), Duration::from_secs(300)).await;
    let h = &running.handle;

    let client = bus.open_connection();
    let (monitor, _calls) = ChannelMonitor::new();
    bus.export_monitor(&client, "/m", monitor);
    h.install_monitor(&client, "/m", TimeRange::always(), Vec::new()).await.unwrap();
    h.register_data_source("org.test.A", "A", "", &[], &client).await.unwrap();

    // More owner changes than the broadcast holds, with the client's own
    // disappearance among the oldest.
    bus.disconnect(&client);
    for _ in 0..300 {
      let passerby = bus.open_connection();
      bus.disconnect(&passerby);
    }

    assert!(!h.get_data_source_from_id("org.test.A").await.unwrap().running);
    assert!(matches!(h.remove_monitor(&client, "/m").await, Err(Error::MonitorNotFound { .. })));
    running.stop().await;
  }

  #[tokio::test]
  async fn monitors_receive_inserts_through_the_loop() {
    let dir = tempfile::tempdir().unwrap();
    let bus = LocalBus::new();
    let running = start(testing::context(dir.path(), &bus), Duration::from_secs(300)).await;
    let h = &running.handle;

    let client = bus.open_connection();
    let (monitor, mut calls) = ChannelMonitor::new();
    bus.export_monitor(&client, "/m", monitor);
    h.install_monitor(&client, "/m", TimeRange::always(), Vec::new()).await.unwrap();

    let ids = h.insert_events(vec![event(100, "file:///x")], ":1.1").await.unwrap();
    let Some(MonitorCall::Insert { events, .. }) = calls.recv().await else {
      panic!("expected an insert notification");
    };
    assert_eq!(events[0].id, ids[0]);
    running.stop().await;
  }

  #[tokio::test]
  async fn volume_and_network_changes_reach_the_storage_monitor() {
    let dir = tempfile::tempdir().unwrap();
    let bus = LocalBus::new();
    bus.connect(CONNMAN_BUS_NAME);
    let connman = Arc::new(WatchedProvider::connman());
    let providers: Vec<Arc<dyn NetworkProvider>> = vec![connman.clone()];
    let ctx = testing::context_with(dir.path(), &bus, FixedVolumes::none(), providers);
    let mut signals = bus.subscribe_signals();
    let running = start(ctx, Duration::from_secs(300)).await;

    connman.set_connman_state("online");
    loop {
      if let Signal::StorageAvailable { id, .. } = signals.recv().await.unwrap() {
        assert_eq!(id, "net");
        break;
      }
    }
    let storages = running.handle.get_storages().await.unwrap();
    assert!(storages.iter().any(|(id, d)| id == "net" && d.available));
    running.stop().await;
  }

  #[tokio::test]
  async fn shutdown_flushes_the_registry() {
    let dir = tempfile::tempdir().unwrap();
    let bus = LocalBus::new();
    let running = start(testing::context(dir.path(), &bus), Duration::from_secs(300)).await;
    running.handle.register_data_source("org.test.A", "A", "", &[], ":1.10").await.unwrap();
    running.stop().await;

    let path = dir.path().join(datasource_registry::FILE_NAME);
    let written = std::fs::read_to_string(path).unwrap();
    assert!(written.contains("org.test.A"));
  }
}
