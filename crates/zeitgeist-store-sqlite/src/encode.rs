//! Encoding and decoding helpers between domain types and SQLite rows.
//!
//! Timestamps are stored as integer milliseconds, payloads as BLOBs and every
//! other field as TEXT with `''` meaning unspecified. Row ids are `i64` in
//! SQLite and `u32` on the public surface.

use zeitgeist_core::{Event, EventId, Subject};

use crate::{Error, Result};

// ─── Ids ─────────────────────────────────────────────────────────────────────

pub fn encode_id(id: EventId) -> i64 { i64::from(id) }

pub fn decode_id(raw: i64) -> Result<EventId> {
  EventId::try_from(raw).map_err(|_| Error::IdOutOfRange(raw))
}

// ─── Raw rows ────────────────────────────────────────────────────────────────

/// An `event` row together with its `subject` rows, as read from SQLite.
pub struct RawEvent {
  pub id:             i64,
  pub timestamp:      i64,
  pub interpretation: String,
  pub manifestation:  String,
  pub actor:          String,
  pub origin:         String,
  pub payload:        Vec<u8>,
  pub subjects:       Vec<Subject>,
}

impl RawEvent {
  pub fn into_event(self) -> Result<Event> {
    Ok(Event {
      id:             decode_id(self.id)?,
      timestamp:      self.timestamp,
      interpretation: self.interpretation,
      manifestation:  self.manifestation,
      actor:          self.actor,
      origin:         self.origin,
      payload:        self.payload,
      subjects:       self.subjects,
    })
  }

  /// Template check without decoding the id.
  pub fn matches_any(&self, templates: &[Event]) -> bool {
    let candidate = Event {
      id:             0,
      timestamp:      self.timestamp,
      interpretation: self.interpretation.clone(),
      manifestation:  self.manifestation.clone(),
      actor:          self.actor.clone(),
      origin:         self.origin.clone(),
      payload:        Vec::new(),
      subjects:       self.subjects.clone(),
    };
    candidate.matches_any(templates)
  }
}

/// Map a `subject` row selected with [`SUBJECT_COLUMNS`].
pub fn subject_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Subject> {
  Ok(Subject {
    uri:            row.get(0)?,
    current_uri:    row.get(1)?,
    interpretation: row.get(2)?,
    manifestation:  row.get(3)?,
    origin:         row.get(4)?,
    mimetype:       row.get(5)?,
    text:           row.get(6)?,
    storage:        row.get(7)?,
  })
}

pub const SUBJECT_COLUMNS: &str =
  "uri, current_uri, interpretation, manifestation, origin, mimetype, text, storage";

pub const EVENT_COLUMNS: &str =
  "id, timestamp, interpretation, manifestation, actor, origin, payload";
