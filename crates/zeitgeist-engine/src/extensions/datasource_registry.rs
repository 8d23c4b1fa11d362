//! The data-source registry.
//!
//! Keeps track of the components that insert events, whether any of their
//! clients is currently connected and whether they are allowed to log.
//! Events from a disabled data source are dropped in `pre_insert_event`.
//!
//! Records are persisted to `datasources.json`. Writes are batched: every
//! mutation marks the registry dirty and the file is rewritten on the next
//! [`Notification::FlushTimer`] and at unload. The `running` flag is never
//! persisted.

use std::{
  collections::{BTreeMap, HashMap, HashSet},
  path::PathBuf,
  sync::Arc,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use zeitgeist_core::{Event, datasource::DataSource, timestamp_for_now};

use crate::{
  Error, Result,
  bus::{SessionBus, Signal},
  extension::{Extension, ExtensionContext, Notification, parse_args},
  persist,
};

pub const NAME: &str = "zeitgeist.extensions.DataSourceRegistry";
pub const FILE_NAME: &str = "datasources.json";

pub const REGISTER_DATA_SOURCE: &str = "register_data_source";
pub const GET_DATA_SOURCES: &str = "get_data_sources";
pub const SET_DATA_SOURCE_ENABLED: &str = "set_data_source_enabled";
pub const GET_DATA_SOURCE_FROM_ID: &str = "get_data_source_from_id";

// ─── Persisted form ──────────────────────────────────────────────────────────

/// On-disk record. Unknown fields are ignored and missing ones defaulted so
/// the file can grow new fields.
#[derive(Debug, Serialize, Deserialize)]
struct StoredDataSource {
  unique_id:       String,
  #[serde(default)]
  name:            String,
  #[serde(default)]
  description:     String,
  #[serde(default)]
  event_templates: Vec<Event>,
  #[serde(default)]
  last_seen:       i64,
  #[serde(default = "enabled_by_default")]
  enabled:         bool,
}

fn enabled_by_default() -> bool { true }

impl From<&DataSource> for StoredDataSource {
  fn from(ds: &DataSource) -> Self {
    Self {
      unique_id:       ds.unique_id.clone(),
      name:            ds.name.clone(),
      description:     ds.description.clone(),
      event_templates: ds.event_templates.clone(),
      last_seen:       ds.last_seen,
      enabled:         ds.enabled,
    }
  }
}

impl From<StoredDataSource> for DataSource {
  fn from(s: StoredDataSource) -> Self {
    Self {
      unique_id:       s.unique_id,
      name:            s.name,
      description:     s.description,
      event_templates: s.event_templates,
      running:         false,
      last_seen:       s.last_seen,
      enabled:         s.enabled,
    }
  }
}

// ─── Method arguments ────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RegisterArgs {
  unique_id:       String,
  name:            String,
  #[serde(default)]
  description:     String,
  #[serde(default)]
  event_templates: Vec<Event>,
}

#[derive(Deserialize)]
struct SetEnabledArgs {
  unique_id: String,
  enabled:   bool,
}

#[derive(Deserialize)]
struct IdArgs {
  unique_id: String,
}

// ─── Registry ────────────────────────────────────────────────────────────────

pub struct DataSourceRegistry {
  path:    PathBuf,
  bus:     Arc<dyn SessionBus>,
  sources: BTreeMap<String, DataSource>,
  /// unique_id → bus connections currently claiming it.
  running: HashMap<String, HashSet<String>>,
  dirty:   bool,
}

impl DataSourceRegistry {
  pub fn new(ctx: &ExtensionContext) -> Self {
    let path = ctx.data_path.join(FILE_NAME);
    let stored: Vec<StoredDataSource> = persist::read_json(&path).unwrap_or_default();
    let sources = stored
      .into_iter()
      .map(|s| (s.unique_id.clone(), DataSource::from(s)))
      .collect();
    Self { path, bus: ctx.bus.clone(), sources, running: HashMap::new(), dirty: false }
  }

  /// Create or update a data source and mark `sender` as running it.
  /// Returns whether the source is enabled.
  pub fn register(
    &mut self,
    unique_id: &str,
    name: &str,
    description: &str,
    event_templates: Vec<Event>,
    sender: &str,
  ) -> bool {
    let source = self
      .sources
      .entry(unique_id.to_owned())
      .or_insert_with(|| DataSource::new(unique_id, "", "", Vec::new()));
    source.name = name.to_owned();
    source.description = description.to_owned();
    source.event_templates = event_templates;
    source.running = true;

    self.running.entry(unique_id.to_owned()).or_default().insert(sender.to_owned());
    self.dirty = true;

    tracing::debug!(%unique_id, %sender, "data source registered");
    let enabled = source.enabled;
    self.bus.emit(Signal::DataSourceRegistered(source.clone()));
    enabled
  }

  pub fn get_all(&self) -> Vec<DataSource> { self.sources.values().cloned().collect() }

  /// Returns whether `unique_id` is known.
  pub fn set_enabled(&mut self, unique_id: &str, enabled: bool) -> bool {
    let Some(source) = self.sources.get_mut(unique_id) else {
      return false;
    };
    if source.enabled != enabled {
      source.enabled = enabled;
      self.dirty = true;
      self.bus.emit(Signal::DataSourceEnabled { unique_id: unique_id.to_owned(), enabled });
    }
    true
  }

  pub fn get_by_id(&self, unique_id: &str) -> Result<DataSource> {
    self
      .sources
      .get(unique_id)
      .cloned()
      .ok_or_else(|| Error::DataSourceNotFound(unique_id.to_owned()))
  }

  pub fn is_dirty(&self) -> bool { self.dirty }

  /// Persist if anything changed since the last flush. Failures are logged
  /// and leave the registry dirty.
  pub fn flush(&mut self) {
    if !self.dirty {
      return;
    }
    let stored: Vec<StoredDataSource> = self.sources.values().map(StoredDataSource::from).collect();
    match persist::write_json(&self.path, &stored) {
      Ok(()) => {
        self.dirty = false;
        tracing::debug!(path = ?self.path, "data-source registry written");
      }
      Err(error) => tracing::warn!(path = ?self.path, %error, "failed to write data-source registry"),
    }
  }

  fn client_disconnected(&mut self, owner: &str) {
    let now = timestamp_for_now();
    let claimed: Vec<String> = self
      .running
      .iter()
      .filter(|(_, owners)| owners.contains(owner))
      .map(|(id, _)| id.clone())
      .collect();

    for unique_id in claimed {
      let Some(owners) = self.running.get_mut(&unique_id) else { continue };
      owners.remove(owner);
      let last_gone = owners.is_empty();
      if last_gone {
        self.running.remove(&unique_id);
      }

      let Some(source) = self.sources.get_mut(&unique_id) else { continue };
      source.last_seen = now;
      self.dirty = true;
      tracing::debug!(%unique_id, %owner, "data-source client disconnected");
      if last_gone {
        source.running = false;
        self.bus.emit(Signal::DataSourceDisconnected(source.clone()));
      }
    }
  }
}

impl Extension for DataSourceRegistry {
  fn name(&self) -> &'static str { NAME }

  fn public_methods(&self) -> &'static [&'static str] {
    &[REGISTER_DATA_SOURCE, GET_DATA_SOURCES, SET_DATA_SOURCE_ENABLED, GET_DATA_SOURCE_FROM_ID]
  }

  fn pre_insert_event(&mut self, event: Event, sender: &str) -> Result<Option<Event>> {
    let now = timestamp_for_now();
    let mut allowed = true;
    for (unique_id, owners) in &self.running {
      if !owners.contains(sender) {
        continue;
      }
      if let Some(source) = self.sources.get_mut(unique_id) {
        source.last_seen = now;
        self.dirty = true;
        allowed &= source.enabled;
      }
    }
    if !allowed {
      tracing::debug!(%sender, "dropping event from disabled data source");
    }
    Ok(allowed.then_some(event))
  }

  fn call(&mut self, method: &str, args: Value, sender: &str) -> Result<Value> {
    match method {
      REGISTER_DATA_SOURCE => {
        let a: RegisterArgs = parse_args(args)?;
        let enabled = self.register(&a.unique_id, &a.name, &a.description, a.event_templates, sender);
        Ok(Value::Bool(enabled))
      }
      GET_DATA_SOURCES => Ok(serde_json::to_value(self.get_all())?),
      SET_DATA_SOURCE_ENABLED => {
        let a: SetEnabledArgs = parse_args(args)?;
        Ok(Value::Bool(self.set_enabled(&a.unique_id, a.enabled)))
      }
      GET_DATA_SOURCE_FROM_ID => {
        let a: IdArgs = parse_args(args)?;
        Ok(serde_json::to_value(self.get_by_id(&a.unique_id)?)?)
      }
      _ => Err(Error::UnknownMethod(method.to_owned())),
    }
  }

  fn notify(&mut self, notification: &Notification) -> Result<()> {
    match notification {
      Notification::NameOwnerLost(owner) => self.client_disconnected(owner),
      Notification::FlushTimer => self.flush(),
      _ => {}
    }
    Ok(())
  }

  fn bus_clients(&self) -> Vec<String> { self.running.values().flatten().cloned().collect() }

  fn unload(&mut self) { self.flush(); }
}

#[cfg(test)]
mod tests {
  use proptest::prelude::*;
  use serde_json::json;
  use tokio::sync::broadcast;
  use zeitgeist_core::Subject;

  use super::*;
  use crate::{bus::LocalBus, testing};

  fn registry(dir: &std::path::Path, bus: &LocalBus) -> DataSourceRegistry {
    DataSourceRegistry::new(&testing::context(dir, bus))
  }

  fn event() -> Event {
    Event::new(1000).with_actor("app://a").with_subject(Subject::new("file:///tmp/x"))
  }

  fn drain(rx: &mut broadcast::Receiver<Signal>) -> Vec<Signal> {
    let mut out = Vec::new();
    while let Ok(s) = rx.try_recv() {
      out.push(s);
    }
    out
  }

  #[test]
  fn disabled_sources_have_their_events_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let bus = LocalBus::new();
    let mut r = registry(dir.path(), &bus);

    assert!(r.register("org.test.A", "A", "", vec![], ":1.10"));
    assert!(r.set_enabled("org.test.A", false));

    let before = timestamp_for_now();
    assert!(r.pre_insert_event(event(), ":1.10").unwrap().is_none());
    assert!(r.get_by_id("org.test.A").unwrap().last_seen >= before);

    // Other senders are unaffected.
    assert!(r.pre_insert_event(event(), ":1.99").unwrap().is_some());
  }

  #[test]
  fn re_registering_keeps_enabled_and_updates_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let bus = LocalBus::new();
    let mut r = registry(dir.path(), &bus);

    r.register("org.test.A", "A", "old", vec![], ":1.10");
    r.set_enabled("org.test.A", false);
    assert!(!r.register("org.test.A", "A2", "new", vec![Event::template()], ":1.10"));

    let all = r.get_all();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].name, "A2");
    assert_eq!(all[0].description, "new");
    assert!(all[0].running);
    assert!(!all[0].enabled);
  }

  #[test]
  fn enabled_signal_only_on_change() {
    let dir = tempfile::tempdir().unwrap();
    let bus = LocalBus::new();
    let mut rx = bus.subscribe_signals();
    let mut r = registry(dir.path(), &bus);

    r.register("org.test.A", "A", "", vec![], ":1.10");
    assert!(r.set_enabled("org.test.A", true));
    assert!(r.set_enabled("org.test.A", false));
    assert!(!r.set_enabled("org.test.Unknown", false));

    let signals = drain(&mut rx);
    assert_eq!(signals.len(), 2);
    assert!(matches!(signals[0], Signal::DataSourceRegistered(_)));
    assert_eq!(
      signals[1],
      Signal::DataSourceEnabled { unique_id: "org.test.A".into(), enabled: false }
    );
  }

  #[test]
  fn unknown_ids_are_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let bus = LocalBus::new();
    let mut r = registry(dir.path(), &bus);
    assert!(matches!(r.get_by_id("nope"), Err(Error::DataSourceNotFound(_))));
    assert!(matches!(
      r.call(GET_DATA_SOURCE_FROM_ID, json!({ "unique_id": "nope" }), ":1.1"),
      Err(Error::DataSourceNotFound(_))
    ));
  }

  #[test]
  fn disconnect_of_last_owner_stops_running_once() {
    let dir = tempfile::tempdir().unwrap();
    let bus = LocalBus::new();
    let mut rx = bus.subscribe_signals();
    let mut r = registry(dir.path(), &bus);

    r.register("org.test.A", "A", "", vec![], ":1.10");
    r.register("org.test.A", "A", "", vec![], ":1.11");
    drain(&mut rx);

    r.notify(&Notification::NameOwnerLost(":1.10".into())).unwrap();
    assert!(r.get_by_id("org.test.A").unwrap().running);
    assert!(drain(&mut rx).is_empty());

    r.notify(&Notification::NameOwnerLost(":1.11".into())).unwrap();
    r.notify(&Notification::NameOwnerLost(":1.11".into())).unwrap();
    assert!(!r.get_by_id("org.test.A").unwrap().running);

    let signals = drain(&mut rx);
    assert_eq!(signals.len(), 1);
    assert!(matches!(&signals[0], Signal::DataSourceDisconnected(ds) if !ds.running));
  }

  #[test]
  fn running_owners_are_reported_as_bus_clients() {
    let dir = tempfile::tempdir().unwrap();
    let bus = LocalBus::new();
    let mut r = registry(dir.path(), &bus);
    assert!(r.bus_clients().is_empty());

    r.register("org.test.A", "A", "", vec![], ":1.10");
    r.register("org.test.B", "B", "", vec![], ":1.11");
    let mut clients = r.bus_clients();
    clients.sort();
    assert_eq!(clients, [":1.10", ":1.11"]);

    r.notify(&Notification::NameOwnerLost(":1.10".into())).unwrap();
    assert_eq!(r.bus_clients(), [":1.11"]);
  }

  #[test]
  fn writes_are_batched_until_flush() {
    let dir = tempfile::tempdir().unwrap();
    let bus = LocalBus::new();
    let mut r = registry(dir.path(), &bus);

    r.register("org.test.A", "A", "", vec![], ":1.10");
    assert!(r.is_dirty());
    assert!(!dir.path().join(FILE_NAME).exists());

    r.notify(&Notification::FlushTimer).unwrap();
    assert!(!r.is_dirty());
    assert!(dir.path().join(FILE_NAME).exists());
  }

  #[test]
  fn old_files_with_fewer_or_extra_fields_load() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
      dir.path().join(FILE_NAME),
      r#"[{"unique_id":"org.old","name":"Old","future_field":[1,2,3]}]"#,
    )
    .unwrap();
    let bus = LocalBus::new();
    let r = registry(dir.path(), &bus);

    let old = r.get_by_id("org.old").unwrap();
    assert_eq!(old.name, "Old");
    assert!(old.enabled);
    assert!(!old.running);
  }

  #[test]
  fn corrupt_file_means_cold_start() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(FILE_NAME), "not json").unwrap();
    let bus = LocalBus::new();
    assert!(registry(dir.path(), &bus).get_all().is_empty());
  }

  #[test]
  fn registering_through_the_method_table() {
    let dir = tempfile::tempdir().unwrap();
    let bus = LocalBus::new();
    let mut r = registry(dir.path(), &bus);

    let reply = r
      .call(
        REGISTER_DATA_SOURCE,
        json!({ "unique_id": "org.test.A", "name": "A", "description": "d", "event_templates": [] }),
        ":1.10",
      )
      .unwrap();
    assert_eq!(reply, Value::Bool(true));

    let all = r.call(GET_DATA_SOURCES, Value::Null, ":1.10").unwrap();
    assert_eq!(all[0]["unique_id"], "org.test.A");
    assert_eq!(all[0]["running"], true);
  }

  proptest! {
    #[test]
    fn registering_twice_yields_one_running_record(
      id in "[a-z]{1,8}\\.[a-z]{1,8}",
      first in "[A-Za-z ]{0,12}",
      second in "[A-Za-z ]{0,12}",
    ) {
      let dir = tempfile::tempdir().unwrap();
      let bus = LocalBus::new();
      let mut r = registry(dir.path(), &bus);

      r.register(&id, &first, "", vec![], ":1.10");
      r.register(&id, &second, "", vec![], ":1.10");

      let all = r.get_all();
      prop_assert_eq!(all.len(), 1);
      prop_assert_eq!(&all[0].name, &second);
      prop_assert!(all[0].running);
    }

    #[test]
    fn persisted_registry_reloads_identically(
      sources in proptest::collection::btree_map("[a-z]{1,6}", ("[A-Za-z]{0,6}", "[a-z ]{0,10}", any::<bool>()), 0..6),
    ) {
      let dir = tempfile::tempdir().unwrap();
      let bus = LocalBus::new();
      let mut r = registry(dir.path(), &bus);
      for (id, (name, description, enabled)) in &sources {
        r.register(id, name, description, vec![], ":1.10");
        r.set_enabled(id, *enabled);
      }
      r.unload();

      let reloaded = registry(dir.path(), &bus);
      let tuples: Vec<_> = reloaded
        .get_all()
        .into_iter()
        .map(|ds| {
          prop_assert!(!ds.running);
          Ok((ds.unique_id, (ds.name, ds.description, ds.enabled)))
        })
        .collect::<Result<_, TestCaseError>>()?;
      let expected: Vec<_> = sources.into_iter().collect();
      prop_assert_eq!(tuples, expected);
    }
  }
}
