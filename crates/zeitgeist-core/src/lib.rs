//! Core types and trait definitions for the Zeitgeist activity log.
//!
//! No database, bus or runtime dependencies. The storage backend and the
//! engine both depend on it.

pub mod datasource;
pub mod error;
pub mod event;
pub mod storage;
pub mod store;
pub mod symbol;
pub mod template;
pub mod time_range;

pub use error::{Error, Result};
pub use event::{Event, EventId, Subject};
pub use time_range::TimeRange;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn timestamp_for_now() -> i64 { chrono::Utc::now().timestamp_millis() }
