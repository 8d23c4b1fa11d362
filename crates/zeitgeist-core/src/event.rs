//! Events and subjects, the records held by the activity log.
//!
//! An event describes one activity: when it happened, what kind of activity
//! it was, which application produced it, and the subjects it touched. The
//! same shape doubles as a *template* when used for matching; see
//! [`crate::template`].

use serde::{Deserialize, Serialize};

use crate::{Error, Result, symbol, timestamp_for_now};

/// Identifier assigned by the log on insert. Zero means "not yet persisted".
pub type EventId = u32;

// ─── Subject ─────────────────────────────────────────────────────────────────

/// One object touched by an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Subject {
  pub uri:            String,
  pub interpretation: String,
  pub manifestation:  String,
  pub origin:         String,
  pub mimetype:       String,
  pub text:           String,
  /// Identifier of the storage medium hosting `uri`; empty until resolved.
  pub storage:        String,
  /// Location of the subject after a move; equals `uri` otherwise.
  pub current_uri:    String,
}

impl Subject {
  pub fn new(uri: impl Into<String>) -> Self {
    Self { uri: uri.into(), ..Self::default() }
  }

  pub fn with_interpretation(mut self, interpretation: impl Into<String>) -> Self {
    self.interpretation = interpretation.into();
    self
  }

  pub fn with_manifestation(mut self, manifestation: impl Into<String>) -> Self {
    self.manifestation = manifestation.into();
    self
  }

  pub fn with_mimetype(mut self, mimetype: impl Into<String>) -> Self {
    self.mimetype = mimetype.into();
    self
  }

  pub fn with_storage(mut self, storage: impl Into<String>) -> Self {
    self.storage = storage.into();
    self
  }

  pub fn with_current_uri(mut self, current_uri: impl Into<String>) -> Self {
    self.current_uri = current_uri.into();
    self
  }
}

// ─── Event ───────────────────────────────────────────────────────────────────

/// The record of one activity.
///
/// Empty strings mean "unspecified". When an event is used as a template the
/// empty fields act as wildcards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Event {
  pub id:             EventId,
  /// Milliseconds since the Unix epoch.
  pub timestamp:      i64,
  pub interpretation: String,
  pub manifestation:  String,
  pub actor:          String,
  pub origin:         String,
  #[serde(with = "payload")]
  pub payload:        Vec<u8>,
  pub subjects:       Vec<Subject>,
}

impl Event {
  pub fn new(timestamp: i64) -> Self {
    Self { timestamp, ..Self::default() }
  }

  /// An empty template: matches every event.
  pub fn template() -> Self { Self::default() }

  pub fn with_interpretation(mut self, interpretation: impl Into<String>) -> Self {
    self.interpretation = interpretation.into();
    self
  }

  pub fn with_manifestation(mut self, manifestation: impl Into<String>) -> Self {
    self.manifestation = manifestation.into();
    self
  }

  pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
    self.actor = actor.into();
    self
  }

  pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
    self.origin = origin.into();
    self
  }

  pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
    self.payload = payload.into();
    self
  }

  pub fn with_subject(mut self, subject: Subject) -> Self {
    self.subjects.push(subject);
    self
  }

  pub fn is_move(&self) -> bool { self.interpretation == symbol::MOVE_EVENT }

  /// Validate a client-supplied event and fill in the defaults the log
  /// relies on (timestamp, `current_uri`).
  pub fn prepare_for_insert(&mut self) -> Result<()> {
    if self.id != 0 {
      return Err(Error::InvalidEvent(format!("predefined event id {}", self.id)));
    }
    if self.subjects.is_empty() {
      return Err(Error::InvalidEvent("no subject".into()));
    }
    if self.timestamp < 0 {
      return Err(Error::InvalidEvent(format!(
        "negative timestamp {}",
        self.timestamp
      )));
    }
    if self.timestamp == 0 {
      self.timestamp = timestamp_for_now();
    }

    if self.is_move() {
      for subject in &self.subjects {
        if subject.current_uri.is_empty() || subject.current_uri == subject.uri {
          return Err(Error::InvalidEvent(format!(
            "move event for {:?} does not change its location",
            subject.uri
          )));
        }
      }
    } else {
      for subject in &mut self.subjects {
        if subject.current_uri.is_empty() {
          subject.current_uri = subject.uri.clone();
        } else if subject.current_uri != subject.uri {
          return Err(Error::InvalidEvent(format!(
            "current_uri {:?} differs from uri {:?} outside a move event",
            subject.current_uri, subject.uri
          )));
        }
      }
    }
    Ok(())
  }
}

// ─── Payload encoding ────────────────────────────────────────────────────────

/// Payloads are opaque bytes; they travel as base64 in JSON documents.
mod payload {
  use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
    ser.serialize_str(&B64.encode(bytes))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(de)?;
    B64.decode(encoded.as_bytes()).map_err(serde::de::Error::custom)
  }
}
