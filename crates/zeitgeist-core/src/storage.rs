//! Storage media and their availability.

use serde::{Deserialize, Serialize};

/// Medium id for anything reached over the network.
pub const NET: &str = "net";
/// Medium id for persistent, non-removable local storage.
pub const LOCAL: &str = "local";
/// Medium id for locations that could not be resolved.
pub const UNKNOWN: &str = "unknown";

/// Availability of a storage medium.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageState {
  NotAvailable = 0,
  Available    = 1,
  /// Query-side wildcard matching either state; never stored.
  #[default]
  Any          = 2,
}

impl StorageState {
  pub fn is_available(self) -> bool { matches!(self, Self::Available) }
}

/// One row of the storage table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageMedium {
  pub id:           String,
  pub state:        StorageState,
  pub icon:         String,
  pub display_name: String,
}

impl StorageMedium {
  pub fn descriptor(&self) -> StorageDescriptor {
    StorageDescriptor {
      available:    self.state.is_available(),
      icon:         self.icon.clone(),
      display_name: self.display_name.clone(),
    }
  }

  /// `"local"` and `"unknown"` are synthetic and always available.
  pub fn is_synthetic(id: &str) -> bool { id == LOCAL || id == UNKNOWN }
}

/// The property map published for a medium.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageDescriptor {
  pub available:    bool,
  pub icon:         String,
  #[serde(rename = "display-name")]
  pub display_name: String,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn descriptor_uses_dashed_display_name() {
    let medium = StorageMedium {
      id:           "1234-ABCD".into(),
      state:        StorageState::Available,
      icon:         "drive-removable-media".into(),
      display_name: "USB Stick".into(),
    };
    let json = serde_json::to_value(medium.descriptor()).unwrap();
    assert_eq!(json["available"], true);
    assert_eq!(json["display-name"], "USB Stick");
  }

  #[test]
  fn only_local_and_unknown_are_synthetic() {
    assert!(StorageMedium::is_synthetic(LOCAL));
    assert!(StorageMedium::is_synthetic(UNKNOWN));
    assert!(!StorageMedium::is_synthetic(NET));
  }
}
