//! Remote monitors and their notification fan-out.
//!
//! Each installed monitor owns an unbounded queue drained by its own
//! delivery task. Dispatch only enqueues, so `notify_*` never waits on a
//! remote, and a monitor sees deliveries in the order the engine produced
//! them. Monitors are independent: a slow or failing remote delays nobody
//! else.

use std::{
  collections::{HashMap, HashSet},
  sync::Arc,
};

use tokio::{
  sync::{mpsc, oneshot},
  task::JoinHandle,
};
use zeitgeist_core::{Event, EventId, TimeRange};

use crate::{
  Error, Result,
  bus::{RemoteMonitor, SessionBus},
};

type MonitorKey = (String, String);

enum Delivery {
  Insert(TimeRange, Vec<Event>),
  Delete(TimeRange, Vec<EventId>),
  /// Answered once everything queued before it has been handed over.
  Barrier(oneshot::Sender<()>),
}

struct Monitor {
  time_range: TimeRange,
  templates:  Vec<Event>,
  queue:      mpsc::UnboundedSender<Delivery>,
  task:       JoinHandle<()>,
}

impl Monitor {
  fn enqueue(&self, key: &MonitorKey, delivery: Delivery) {
    if self.queue.send(delivery).is_err() {
      tracing::warn!(owner = %key.0, path = %key.1, "monitor delivery task is gone");
    }
  }
}

async fn deliver(key: MonitorKey, remote: Arc<dyn RemoteMonitor>, mut queue: mpsc::UnboundedReceiver<Delivery>) {
  let (owner, path) = &key;
  while let Some(delivery) = queue.recv().await {
    let result = match delivery {
      Delivery::Insert(range, events) => remote.notify_insert(range, events).await,
      Delivery::Delete(range, ids) => remote.notify_delete(range, ids).await,
      Delivery::Barrier(done) => {
        let _ = done.send(());
        Ok(())
      }
    };
    if let Err(error) = result {
      tracing::warn!(%owner, %path, %error, "failed to notify monitor");
    }
  }
  tracing::debug!(%owner, %path, "monitor delivery task finished");
}

/// The set of installed monitors.
pub struct MonitorManager {
  bus:      Arc<dyn SessionBus>,
  monitors: HashMap<MonitorKey, Monitor>,
  /// Owner → paths it has installed.
  owners:   HashMap<String, HashSet<String>>,
}

impl MonitorManager {
  pub fn new(bus: Arc<dyn SessionBus>) -> Self {
    Self { bus, monitors: HashMap::new(), owners: HashMap::new() }
  }

  pub fn len(&self) -> usize { self.monitors.len() }

  pub fn is_empty(&self) -> bool { self.monitors.is_empty() }

  pub fn is_installed(&self, owner: &str, path: &str) -> bool {
    self.monitors.contains_key(&(owner.to_owned(), path.to_owned()))
  }

  /// Connections that currently own at least one monitor.
  pub fn owners(&self) -> impl Iterator<Item = &str> { self.owners.keys().map(String::as_str) }

  /// Register a monitor. No past events are replayed to it.
  pub fn install(
    &mut self,
    owner: &str,
    path: &str,
    time_range: TimeRange,
    templates: Vec<Event>,
  ) -> Result<()> {
    if owner.is_empty() {
      return Err(Error::InvalidArguments("monitor owner must not be empty".into()));
    }
    let key = (owner.to_owned(), path.to_owned());
    if self.monitors.contains_key(&key) {
      return Err(Error::MonitorAlreadyInstalled { owner: key.0, path: key.1 });
    }

    let remote = self.bus.monitor_proxy(owner, path)?;
    let (queue, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(deliver(key.clone(), remote, rx));

    tracing::debug!(%owner, %path, "installing monitor");
    self.owners.entry(key.0.clone()).or_default().insert(key.1.clone());
    self.monitors.insert(key, Monitor { time_range, templates, queue, task });
    Ok(())
  }

  /// Unregister a monitor. Deliveries already queued are still sent.
  pub fn remove(&mut self, owner: &str, path: &str) -> Result<()> {
    let key = (owner.to_owned(), path.to_owned());
    if self.monitors.remove(&key).is_none() {
      return Err(Error::MonitorNotFound { owner: key.0, path: key.1 });
    }
    if let Some(paths) = self.owners.get_mut(owner) {
      paths.remove(path);
      if paths.is_empty() {
        self.owners.remove(owner);
      }
    }
    tracing::debug!(%owner, %path, "removed monitor");
    Ok(())
  }

  /// Drop every monitor of a vanished bus connection, abandoning anything
  /// still queued for them. Returns how many were removed.
  pub fn owner_lost(&mut self, owner: &str) -> usize {
    let Some(paths) = self.owners.remove(owner) else {
      return 0;
    };
    for path in &paths {
      if let Some(monitor) = self.monitors.remove(&(owner.to_owned(), path.clone())) {
        monitor.task.abort();
      }
    }
    tracing::debug!(%owner, count = paths.len(), "removed monitors of disconnected client");
    paths.len()
  }

  /// Queue `events` for every monitor whose range and templates match.
  ///
  /// `time_range` must span the batch. Each monitor receives the
  /// intersection of that range with its own, and only the events inside it.
  pub fn notify_insert(&self, time_range: TimeRange, events: &[Event]) {
    for (key, monitor) in &self.monitors {
      let Some(range) = time_range.intersect(&monitor.time_range) else {
        continue;
      };
      let matching: Vec<Event> = events
        .iter()
        .filter(|e| range.contains(e.timestamp) && e.matches_any(&monitor.templates))
        .cloned()
        .collect();
      if !matching.is_empty() {
        monitor.enqueue(key, Delivery::Insert(range, matching));
      }
    }
  }

  /// Queue deleted ids for every monitor whose range intersects. Templates
  /// are not consulted.
  pub fn notify_delete(&self, time_range: TimeRange, ids: &[EventId]) {
    if ids.is_empty() {
      return;
    }
    for (key, monitor) in &self.monitors {
      if let Some(range) = time_range.intersect(&monitor.time_range) {
        monitor.enqueue(key, Delivery::Delete(range, ids.to_vec()));
      }
    }
  }

  /// Wait until everything queued so far has been handed to the remotes.
  pub async fn drained(&self) {
    let barriers: Vec<_> = self
      .monitors
      .iter()
      .map(|(key, monitor)| {
        let (tx, rx) = oneshot::channel();
        monitor.enqueue(key, Delivery::Barrier(tx));
        rx
      })
      .collect();
    for barrier in barriers {
      let _ = barrier.await;
    }
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use proptest::prelude::*;
  use zeitgeist_core::Subject;

  use super::*;
  use crate::bus::{ChannelMonitor, LocalBus, MonitorCall};

  fn ev(id: EventId, timestamp: i64, actor: &str) -> Event {
    let mut e = Event::new(timestamp).with_actor(actor).with_subject(Subject::new("file:///x"));
    e.id = id;
    e
  }

  fn setup() -> (LocalBus, MonitorManager) {
    let bus = LocalBus::new();
    let manager = MonitorManager::new(Arc::new(bus.clone()));
    (bus, manager)
  }

  fn export(bus: &LocalBus, owner: &str, path: &str) -> mpsc::UnboundedReceiver<MonitorCall> {
    bus.connect(owner);
    let (monitor, rx) = ChannelMonitor::new();
    bus.export_monitor(owner, path, monitor);
    rx
  }

  fn span(events: &[Event]) -> TimeRange {
    TimeRange::spanning(events.iter().map(|e| e.timestamp)).unwrap()
  }

  #[tokio::test]
  async fn time_range_filters_events() {
    let (bus, mut m) = setup();
    let mut rx = export(&bus, ":1.7", "/m");
    m.install(":1.7", "/m", TimeRange::new(1000, 2000).unwrap(), vec![]).unwrap();

    let batch = [ev(1, 500, "a"), ev(2, 1500, "a"), ev(3, 2500, "a")];
    m.notify_insert(span(&batch), &batch);
    m.drained().await;

    match rx.try_recv().unwrap() {
      MonitorCall::Insert { time_range, events } => {
        assert!(time_range.begin >= 1000 && time_range.end <= 2000);
        assert_eq!(events.iter().map(|e| e.timestamp).collect::<Vec<_>>(), [1500]);
      }
      other => panic!("unexpected {other:?}"),
    }
    assert!(rx.try_recv().is_err());
  }

  #[tokio::test]
  async fn templates_filter_events() {
    let (bus, mut m) = setup();
    let mut rx = export(&bus, ":1.7", "/m");
    let templates = vec![Event::template().with_actor("app://a")];
    m.install(":1.7", "/m", TimeRange::always(), templates).unwrap();

    let batch = [ev(1, 100, "app://a"), ev(2, 101, "app://b"), ev(3, 102, "app://a")];
    m.notify_insert(span(&batch), &batch);
    m.drained().await;

    let Ok(MonitorCall::Insert { events, .. }) = rx.try_recv() else {
      panic!("expected an insert notification");
    };
    assert_eq!(events.iter().map(|e| e.id).collect::<Vec<_>>(), [1, 3]);
  }

  #[tokio::test]
  async fn nothing_is_sent_when_nothing_matches() {
    let (bus, mut m) = setup();
    let mut rx = export(&bus, ":1.7", "/m");
    m.install(":1.7", "/m", TimeRange::new(0, 10).unwrap(), vec![]).unwrap();

    let batch = [ev(1, 100, "a")];
    m.notify_insert(span(&batch), &batch);
    m.notify_delete(TimeRange::new(50, 60).unwrap(), &[1]);
    m.drained().await;
    assert!(rx.try_recv().is_err());
  }

  #[tokio::test]
  async fn deletes_ignore_templates() {
    let (bus, mut m) = setup();
    let mut rx = export(&bus, ":1.7", "/m");
    let templates = vec![Event::template().with_actor("app://nobody")];
    m.install(":1.7", "/m", TimeRange::new(0, 1000).unwrap(), templates).unwrap();

    m.notify_delete(TimeRange::new(500, 5000).unwrap(), &[4, 5]);
    m.drained().await;
    assert_eq!(
      rx.try_recv().unwrap(),
      MonitorCall::Delete { time_range: TimeRange::new(500, 1000).unwrap(), ids: vec![4, 5] }
    );
  }

  #[tokio::test]
  async fn deliveries_keep_call_order_per_monitor() {
    let (bus, mut m) = setup();
    let mut rx = export(&bus, ":1.7", "/m");
    m.install(":1.7", "/m", TimeRange::always(), vec![]).unwrap();

    for i in 1..=20 {
      let batch = [ev(i, i64::from(i), "a")];
      m.notify_insert(span(&batch), &batch);
    }
    m.drained().await;

    let mut seen = Vec::new();
    while let Ok(MonitorCall::Insert { events, .. }) = rx.try_recv() {
      seen.extend(events.into_iter().map(|e| e.id));
    }
    assert_eq!(seen, (1..=20).collect::<Vec<_>>());
  }

  #[test]
  fn install_twice_fails_and_remove_unknown_fails() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let _guard = rt.enter();
    let (_bus, mut m) = setup();

    m.install(":1.7", "/m", TimeRange::always(), vec![]).unwrap();
    assert!(matches!(
      m.install(":1.7", "/m", TimeRange::always(), vec![]),
      Err(Error::MonitorAlreadyInstalled { .. })
    ));
    assert!(matches!(m.install("", "/m", TimeRange::always(), vec![]), Err(Error::InvalidArguments(_))));

    m.remove(":1.7", "/m").unwrap();
    assert!(matches!(m.remove(":1.7", "/m"), Err(Error::MonitorNotFound { .. })));
  }

  #[tokio::test]
  async fn lost_owners_take_all_their_monitors() {
    let (bus, mut m) = setup();
    let mut rx1 = export(&bus, ":1.20", "/m/1");
    let mut rx2 = export(&bus, ":1.20", "/m/2");
    let mut other = export(&bus, ":1.21", "/m/1");
    m.install(":1.20", "/m/1", TimeRange::always(), vec![]).unwrap();
    m.install(":1.20", "/m/2", TimeRange::always(), vec![]).unwrap();
    m.install(":1.21", "/m/1", TimeRange::always(), vec![]).unwrap();

    assert_eq!(m.owner_lost(":1.20"), 2);
    assert_eq!(m.owner_lost(":1.20"), 0);
    assert!(!m.is_installed(":1.20", "/m/1"));
    assert!(matches!(m.remove(":1.20", "/m/1"), Err(Error::MonitorNotFound { .. })));

    let batch = [ev(1, 100, "a")];
    m.notify_insert(span(&batch), &batch);
    m.drained().await;

    assert!(rx1.try_recv().is_err());
    assert!(rx2.try_recv().is_err());
    assert!(other.try_recv().is_ok());
  }

  #[tokio::test]
  async fn a_failing_remote_does_not_affect_others() {
    let (bus, mut m) = setup();
    bus.connect(":1.8");
    // Nothing exported at :1.8 /gone, so every delivery fails.
    m.install(":1.8", "/gone", TimeRange::always(), vec![]).unwrap();
    let mut rx = export(&bus, ":1.9", "/m");
    m.install(":1.9", "/m", TimeRange::always(), vec![]).unwrap();

    let batch = [ev(1, 100, "a")];
    m.notify_insert(span(&batch), &batch);
    tokio::time::timeout(Duration::from_secs(5), m.drained()).await.unwrap();
    assert!(rx.try_recv().is_ok());
  }

  proptest! {
    #[test]
    fn monitors_never_see_events_outside_their_range(
      begin in 0i64..1000,
      len in 0i64..1000,
      stamps in proptest::collection::vec(0i64..3000, 1..20),
    ) {
      let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
      let received = rt.block_on(async {
        let (bus, mut m) = setup();
        let mut rx = export(&bus, ":1.7", "/m");
        let range = TimeRange::new(begin, begin + len).unwrap();
        m.install(":1.7", "/m", range, vec![]).unwrap();

        let batch: Vec<Event> = stamps.iter().enumerate()
          .map(|(i, ts)| ev(i as EventId + 1, *ts, "a"))
          .collect();
        m.notify_insert(span(&batch), &batch);
        m.drained().await;

        let mut received = Vec::new();
        while let Ok(MonitorCall::Insert { events, .. }) = rx.try_recv() {
          received.extend(events);
        }
        received
      });

      let expected = stamps.iter().filter(|ts| (begin..=begin + len).contains(*ts)).count();
      prop_assert_eq!(received.len(), expected);
      for e in received {
        prop_assert!(begin <= e.timestamp && e.timestamp <= begin + len);
      }
    }

    #[test]
    fn monitors_never_see_unmatched_events(actors in proptest::collection::vec("app://[ab]", 1..12)) {
      let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
      let received = rt.block_on(async {
        let (bus, mut m) = setup();
        let mut rx = export(&bus, ":1.7", "/m");
        m.install(":1.7", "/m", TimeRange::always(), vec![Event::template().with_actor("app://a")]).unwrap();

        let batch: Vec<Event> = actors.iter().enumerate()
          .map(|(i, a)| ev(i as EventId + 1, 100 + i as i64, a))
          .collect();
        m.notify_insert(span(&batch), &batch);
        m.drained().await;

        let mut received = Vec::new();
        while let Ok(MonitorCall::Insert { events, .. }) = rx.try_recv() {
          received.extend(events);
        }
        received
      });

      prop_assert!(received.iter().all(|e| e.actor == "app://a"));
      prop_assert_eq!(received.len(), actors.iter().filter(|a| *a == "app://a").count());
    }
  }
}
