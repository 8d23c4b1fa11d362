//! Data sources: the logical producers of events.

use serde::{Deserialize, Serialize};

use crate::event::Event;

/// A named producer of events, as known to the data-source registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSource {
  /// Caller-chosen ASCII identifier, e.g. `"org.gnome.gedit"`.
  pub unique_id:       String,
  pub name:            String,
  pub description:     String,
  /// Informational only; describes what the source logs.
  pub event_templates: Vec<Event>,
  /// True while at least one connected client claims `unique_id`.
  pub running:         bool,
  /// Milliseconds since the Unix epoch.
  pub last_seen:       i64,
  pub enabled:         bool,
}

impl DataSource {
  pub fn new(
    unique_id: impl Into<String>,
    name: impl Into<String>,
    description: impl Into<String>,
    event_templates: Vec<Event>,
  ) -> Self {
    Self {
      unique_id: unique_id.into(),
      name: name.into(),
      description: description.into(),
      event_templates,
      running: false,
      last_seen: 0,
      enabled: true,
    }
  }
}
