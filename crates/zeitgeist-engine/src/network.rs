//! Network availability providers.
//!
//! Only one provider is used at a time. [`select_provider`] probes the bus
//! for the providers' well-known names in priority order: Connman first,
//! then NetworkManager.

use std::sync::Arc;

use tokio::sync::watch;

use crate::bus::SessionBus;

pub const CONNMAN_BUS_NAME: &str = "net.connman";
pub const NETWORK_MANAGER_BUS_NAME: &str = "org.freedesktop.NetworkManager";

/// NetworkManager `NM_STATE_CONNECTED` from the 0.8 API.
const NM_STATE_CONNECTED_LEGACY: u32 = 3;
/// NetworkManager `NM_STATE_CONNECTED_GLOBAL` from the 0.9+ API.
const NM_STATE_CONNECTED_GLOBAL: u32 = 70;

pub trait NetworkProvider: Send + Sync {
  /// The well-known name the provider owns on the bus.
  fn bus_name(&self) -> &str;

  fn is_connected(&self) -> bool;

  fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Translate a Connman `State` property.
pub fn connman_connected(state: &str) -> bool { state == "online" }

/// Translate a NetworkManager `State` property from either API generation.
pub fn network_manager_connected(state: u32) -> bool {
  matches!(state, NM_STATE_CONNECTED_LEGACY | NM_STATE_CONNECTED_GLOBAL)
}

/// A provider whose raw state is pushed in by whoever talks to the service.
pub struct WatchedProvider {
  bus_name: String,
  state:    watch::Sender<bool>,
}

impl WatchedProvider {
  pub fn new(bus_name: impl Into<String>) -> Self {
    let (state, _) = watch::channel(false);
    Self { bus_name: bus_name.into(), state }
  }

  pub fn connman() -> Self { Self::new(CONNMAN_BUS_NAME) }

  pub fn network_manager() -> Self { Self::new(NETWORK_MANAGER_BUS_NAME) }

  /// Record a new boolean state. Unchanged states do not wake subscribers.
  pub fn set_connected(&self, connected: bool) {
    self.state.send_if_modified(|current| {
      let changed = *current != connected;
      *current = connected;
      changed
    });
  }

  pub fn set_connman_state(&self, state: &str) { self.set_connected(connman_connected(state)) }

  pub fn set_network_manager_state(&self, state: u32) {
    self.set_connected(network_manager_connected(state))
  }
}

impl NetworkProvider for WatchedProvider {
  fn bus_name(&self) -> &str { &self.bus_name }

  fn is_connected(&self) -> bool { *self.state.borrow() }

  fn subscribe(&self) -> watch::Receiver<bool> { self.state.subscribe() }
}

/// The first provider, in order, whose bus name currently has an owner.
pub fn select_provider(
  bus: &dyn SessionBus,
  providers: &[Arc<dyn NetworkProvider>],
) -> Option<Arc<dyn NetworkProvider>> {
  let selected = providers.iter().find(|p| bus.name_has_owner(p.bus_name())).cloned();
  match &selected {
    Some(provider) => tracing::debug!(bus_name = provider.bus_name(), "network provider selected"),
    None => tracing::info!("no network monitoring service found; network monitoring disabled"),
  }
  selected
}
