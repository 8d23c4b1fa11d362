//! The extension interface.
//!
//! An extension sits in the event pipeline between clients and the log. It
//! may override any of five hooks; the defaults pass their input through
//! unchanged. Hooks run on the engine's main loop and must not block.
//!
//! Extensions may also publish named methods, reached through
//! [`ExtensionCollection::call_method`], and react to engine
//! [`Notification`]s such as a client leaving the bus.

mod collection;
pub mod loader;

use std::{path::PathBuf, sync::Arc};

pub use collection::ExtensionCollection;
use serde_json::Value;
use zeitgeist_core::{Event, EventId};

use crate::{
  Error, Result,
  bus::SessionBus,
  network::NetworkProvider,
  volume::{Volume, VolumeMonitor},
};

// ─── Context ─────────────────────────────────────────────────────────────────

/// Everything an extension may reach at construction time.
#[derive(Clone)]
pub struct ExtensionContext {
  pub bus:               Arc<dyn SessionBus>,
  /// Per-user state directory; extension state files live here.
  pub data_path:         PathBuf,
  pub volumes:           Arc<dyn VolumeMonitor>,
  /// Candidate network providers in priority order.
  pub network_providers: Vec<Arc<dyn NetworkProvider>>,
}

// ─── Notifications ───────────────────────────────────────────────────────────

/// Engine-level happenings delivered to every extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
  /// A bus connection went away.
  NameOwnerLost(String),
  VolumeAdded(Volume),
  VolumeRemoved(Volume),
  NetworkChanged { bus_name: String, connected: bool },
  /// Periodic opportunity to persist batched state.
  FlushTimer,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

pub trait Extension: Send {
  /// Fully qualified name, e.g. `zeitgeist.extensions.Blacklist`.
  fn name(&self) -> &'static str;

  /// Method names this extension answers in [`call`](Extension::call).
  fn public_methods(&self) -> &'static [&'static str] { &[] }

  /// Rewrite or drop (`None`) an event before it is persisted.
  fn pre_insert_event(&mut self, event: Event, _sender: &str) -> Result<Option<Event>> {
    Ok(Some(event))
  }

  fn post_insert_event(&mut self, _event: &Event, _sender: &str) -> Result<()> { Ok(()) }

  /// Rewrite or hide (`None`) an event on its way back to a client.
  fn get_event(&mut self, event: Event, _sender: &str) -> Result<Option<Event>> {
    Ok(Some(event))
  }

  /// Veto deletions by leaving ids out.
  fn pre_delete_events(&mut self, ids: Vec<EventId>, _sender: &str) -> Result<Vec<EventId>> {
    Ok(ids)
  }

  fn post_delete_events(&mut self, _ids: &[EventId], _sender: &str) -> Result<()> { Ok(()) }

  fn call(&mut self, method: &str, _args: Value, _sender: &str) -> Result<Value> {
    Err(Error::UnknownMethod(method.to_owned()))
  }

  fn notify(&mut self, _notification: &Notification) -> Result<()> { Ok(()) }

  /// Bus connections this extension keeps state for. Used to catch up on
  /// disappearances the engine missed.
  fn bus_clients(&self) -> Vec<String> { Vec::new() }

  /// Release resources. Called once, at engine shutdown. Must be quick: a
  /// local file write is fine, network I/O is not.
  fn unload(&mut self) {}
}

/// Decode method arguments, mapping failures to [`Error::InvalidArguments`].
pub fn parse_args<T: serde::de::DeserializeOwned>(args: Value) -> Result<T> {
  serde_json::from_value(args).map_err(|e| Error::InvalidArguments(e.to_string()))
}
