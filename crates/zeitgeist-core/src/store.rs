//! The `LogStore` trait and supporting query types.
//!
//! The trait is the boundary between the engine and the persisted activity
//! log. It is implemented by storage backends (e.g. `zeitgeist-store-sqlite`);
//! the engine depends on this abstraction, not on any concrete backend.
//!
//! Backends store and return events verbatim. Extension hooks, validation and
//! monitor notification are the engine's business.

use std::future::Future;

use crate::{
  event::{Event, EventId},
  storage::StorageState,
  time_range::TimeRange,
};

// ─── Query type ──────────────────────────────────────────────────────────────

/// Parameters for [`LogStore::find_event_ids`].
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
  pub time_range:    TimeRange,
  /// An event is returned when it matches any template; no templates means
  /// every event in the range.
  pub templates:     Vec<Event>,
  /// Keep only events with a subject on a medium in this state. Backends
  /// ignore it; the engine applies it against the storage table before
  /// `limit`.
  pub storage_state: StorageState,
  pub limit:         Option<usize>,
}

/// Outcome of [`LogStore::delete_events`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Deleted {
  /// Ids that existed and are now gone, in request order.
  pub ids:        Vec<EventId>,
  /// Span of the deleted events' timestamps; `None` when nothing was deleted.
  pub time_range: Option<TimeRange>,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over an activity-log backend.
///
/// Ids are assigned by the backend, increase monotonically and are never
/// reused within one log.
pub trait LogStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Persist `events` in order within one transaction and return them with
  /// their assigned ids.
  fn insert_events(
    &self,
    events: Vec<Event>,
  ) -> impl Future<Output = Result<Vec<Event>, Self::Error>> + Send + '_;

  /// Look up events by id. Unknown ids yield `None` at their position.
  fn get_events(
    &self,
    ids: Vec<EventId>,
  ) -> impl Future<Output = Result<Vec<Option<Event>>, Self::Error>> + Send + '_;

  /// Delete the given events and report which ones existed.
  fn delete_events(
    &self,
    ids: Vec<EventId>,
  ) -> impl Future<Output = Result<Deleted, Self::Error>> + Send + '_;

  /// Ids of events matching `query`, most recent first.
  fn find_event_ids<'a>(
    &'a self,
    query: &'a EventQuery,
  ) -> impl Future<Output = Result<Vec<EventId>, Self::Error>> + Send + 'a;
}
