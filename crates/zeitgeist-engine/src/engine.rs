//! The engine façade.
//!
//! [`Engine`] owns the log, the extension pipeline and the monitors, and is
//! the only writer of the log. Every mutation runs the matching hooks and
//! then fans out to the monitors before returning.

use std::{collections::HashMap, sync::Arc};

use serde_json::Value;
use zeitgeist_core::{
  Event, EventId, TimeRange,
  storage::{self, StorageDescriptor, StorageState},
  store::{EventQuery, LogStore},
};

use crate::{
  Error, Result,
  bus::SessionBus,
  extension::{
    ExtensionCollection, ExtensionContext, Notification,
    loader::{self, Catalog},
  },
  extensions::storage_monitor,
  monitor::MonitorManager,
};

fn store_error<E: std::error::Error + Send + Sync + 'static>(error: E) -> Error {
  Error::Store(Box::new(error))
}

pub struct Engine<S: LogStore> {
  store:      S,
  extensions: ExtensionCollection,
  monitors:   MonitorManager,
  closed:     bool,
}

impl<S: LogStore> Engine<S> {
  /// An engine over `store` with no extensions loaded.
  pub fn new(store: S, bus: Arc<dyn SessionBus>) -> Self {
    Self {
      store,
      extensions: ExtensionCollection::new(),
      monitors: MonitorManager::new(bus),
      closed: false,
    }
  }

  /// Instantiate and load `names` from `catalog`. See
  /// [`loader::load_extensions`].
  pub fn load_extensions(&mut self, catalog: &Catalog, names: &[String], ctx: &ExtensionContext) -> usize {
    loader::load_extensions(&mut self.extensions, catalog, names, ctx)
  }

  pub fn store(&self) -> &S { &self.store }

  pub fn extensions(&self) -> &ExtensionCollection { &self.extensions }

  pub fn extensions_mut(&mut self) -> &mut ExtensionCollection { &mut self.extensions }

  pub fn monitors(&self) -> &MonitorManager { &self.monitors }

  pub fn is_closed(&self) -> bool { self.closed }

  fn ensure_open(&self) -> Result<()> {
    if self.closed { Err(Error::Closed) } else { Ok(()) }
  }

  // ─── Log ───────────────────────────────────────────────────────────────────

  /// Validate, filter and persist `events`. Returns the ids of the events
  /// that made it into the log, in input order.
  ///
  /// A single invalid event fails the whole call before anything is stored.
  pub async fn insert_events(&mut self, mut events: Vec<Event>, sender: &str) -> Result<Vec<EventId>> {
    self.ensure_open()?;
    for event in &mut events {
      event.prepare_for_insert()?;
    }

    let survivors: Vec<Event> = events
      .into_iter()
      .filter_map(|event| self.extensions.apply_pre_insert(event, sender))
      .collect();
    if survivors.is_empty() {
      tracing::debug!(%sender, "every event was filtered before insert");
      return Ok(Vec::new());
    }

    let persisted = self.store.insert_events(survivors).await.map_err(store_error)?;
    for event in &persisted {
      self.extensions.apply_post_insert(event, sender);
    }
    if let Some(range) = TimeRange::spanning(persisted.iter().map(|e| e.timestamp)) {
      self.monitors.notify_insert(range, &persisted);
    }

    tracing::debug!(%sender, count = persisted.len(), "events inserted");
    Ok(persisted.iter().map(|e| e.id).collect())
  }

  /// Look up events by id. Unknown ids, and events hidden by an extension,
  /// come back as `None` in place.
  pub async fn get_events(&mut self, ids: Vec<EventId>, sender: &str) -> Result<Vec<Option<Event>>> {
    self.ensure_open()?;
    let found = self.store.get_events(ids).await.map_err(store_error)?;
    Ok(
      found
        .into_iter()
        .map(|event| self.extensions.apply_get_hooks(event, sender))
        .collect(),
    )
  }

  /// Ids of the events matching `query`, newest first.
  ///
  /// A storage-state filter keeps events with at least one subject on a
  /// medium in that state. Media the storage table does not know about
  /// match either state.
  pub async fn find_event_ids(&mut self, query: &EventQuery) -> Result<Vec<EventId>> {
    self.ensure_open()?;
    if query.storage_state == StorageState::Any {
      return self.store.find_event_ids(query).await.map_err(store_error);
    }

    let unlimited = EventQuery { limit: None, ..query.clone() };
    let ids = self.store.find_event_ids(&unlimited).await.map_err(store_error)?;
    let events = self.store.get_events(ids).await.map_err(store_error)?;
    let media = self.storage_availability();
    let wanted = query.storage_state.is_available();
    Ok(
      events
        .into_iter()
        .flatten()
        .filter(|event| {
          event
            .subjects
            .iter()
            .any(|s| media.get(s.storage.as_str()).is_none_or(|&available| available == wanted))
        })
        .map(|event| event.id)
        .take(query.limit.unwrap_or(usize::MAX))
        .collect(),
    )
  }

  /// Medium id → availability, as published by the storage monitor. The
  /// synthetic media are always available.
  fn storage_availability(&mut self) -> HashMap<String, bool> {
    let mut media: HashMap<String, bool> =
      [storage::LOCAL, storage::UNKNOWN].into_iter().map(|id| (id.to_owned(), true)).collect();
    match self.extensions.call_method(storage_monitor::GET_STORAGES, Value::Null, "") {
      Ok(value) => match serde_json::from_value::<Vec<(String, StorageDescriptor)>>(value) {
        Ok(rows) => media.extend(rows.into_iter().map(|(id, d)| (id, d.available))),
        Err(error) => tracing::warn!(%error, "unreadable storage table"),
      },
      Err(Error::UnknownMethod(_)) => tracing::debug!("no storage monitor; media state unknown"),
      Err(error) => tracing::warn!(%error, "cannot read storage table"),
    }
    media
  }

  /// Like [`find_event_ids`](Self::find_event_ids), returning the events
  /// themselves after the get hooks. Hidden events are left out.
  pub async fn find_events(&mut self, query: &EventQuery, sender: &str) -> Result<Vec<Event>> {
    let ids = self.find_event_ids(query).await?;
    Ok(self.get_events(ids, sender).await?.into_iter().flatten().collect())
  }

  /// Delete the events extensions let through. Returns the ids that existed
  /// and are now gone.
  pub async fn delete_events(&mut self, ids: Vec<EventId>, sender: &str) -> Result<Vec<EventId>> {
    self.ensure_open()?;
    let ids = self.extensions.apply_pre_delete(ids, sender);
    if ids.is_empty() {
      return Ok(Vec::new());
    }

    let deleted = self.store.delete_events(ids).await.map_err(store_error)?;
    if deleted.ids.is_empty() {
      return Ok(Vec::new());
    }
    self.extensions.apply_post_delete(&deleted.ids, sender);
    if let Some(range) = deleted.time_range {
      self.monitors.notify_delete(range, &deleted.ids);
    }

    tracing::debug!(%sender, count = deleted.ids.len(), "events deleted");
    Ok(deleted.ids)
  }

  // ─── Monitors ──────────────────────────────────────────────────────────────

  pub fn install_monitor(
    &mut self,
    owner: &str,
    path: &str,
    time_range: TimeRange,
    templates: Vec<Event>,
  ) -> Result<()> {
    self.ensure_open()?;
    self.monitors.install(owner, path, time_range, templates)
  }

  pub fn remove_monitor(&mut self, owner: &str, path: &str) -> Result<()> {
    self.ensure_open()?;
    self.monitors.remove(owner, path)
  }

  // ─── Extensions ────────────────────────────────────────────────────────────

  pub fn call_extension_method(&mut self, method: &str, args: Value, sender: &str) -> Result<Value> {
    self.ensure_open()?;
    self.extensions.call_method(method, args, sender)
  }

  /// Hand a notification to the engine. A lost bus name drops that owner's
  /// monitors before any extension hears about it.
  pub fn dispatch(&mut self, notification: &Notification) {
    if self.closed {
      return;
    }
    if let Notification::NameOwnerLost(owner) = notification {
      self.monitors.owner_lost(owner);
    }
    self.extensions.notify(notification);
  }

  /// Drop everything held for bus connections that no longer exist, as if
  /// each had been reported through [`Notification::NameOwnerLost`]. Used
  /// when name-owner changes may have been missed. Returns how many
  /// connections were found gone.
  pub fn resync_owners(&mut self, bus: &dyn SessionBus) -> usize {
    let mut known = self.extensions.bus_clients();
    known.extend(self.monitors.owners().map(str::to_owned));
    let gone: Vec<String> = known.into_iter().filter(|name| !bus.name_has_owner(name)).collect();
    for name in &gone {
      tracing::debug!(%name, "bus name vanished unnoticed");
      self.dispatch(&Notification::NameOwnerLost(name.clone()));
    }
    gone.len()
  }

  /// Unload every extension and wait for queued monitor deliveries.
  /// Every later call fails with [`Error::Closed`].
  pub async fn close(&mut self) {
    if self.closed {
      return;
    }
    self.closed = true;
    self.extensions.unload_all();
    self.monitors.drained().await;
    tracing::info!("engine closed");
  }
}
