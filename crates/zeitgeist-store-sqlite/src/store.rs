//! [`SqliteLog`], the SQLite implementation of [`LogStore`].

use std::path::Path;

use rusqlite::OptionalExtension as _;
use zeitgeist_core::{
  Event, EventId, TimeRange,
  store::{Deleted, EventQuery, LogStore},
};

use crate::{
  Error, Result,
  encode::{EVENT_COLUMNS, RawEvent, SUBJECT_COLUMNS, decode_id, encode_id, subject_from_row},
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// An activity log backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteLog {
  conn: tokio_rusqlite::Connection,
}

impl SqliteLog {
  /// Open (or create) a log at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory log.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

/// Read one event and its subjects. Runs on the database thread.
fn read_event(conn: &rusqlite::Connection, id: i64) -> rusqlite::Result<Option<RawEvent>> {
  let head = conn
    .query_row(
      &format!("SELECT {EVENT_COLUMNS} FROM event WHERE id = ?1"),
      rusqlite::params![id],
      |row| {
        Ok(RawEvent {
          id:             row.get(0)?,
          timestamp:      row.get(1)?,
          interpretation: row.get(2)?,
          manifestation:  row.get(3)?,
          actor:          row.get(4)?,
          origin:         row.get(5)?,
          payload:        row.get(6)?,
          subjects:       Vec::new(),
        })
      },
    )
    .optional()?;

  let Some(mut raw) = head else {
    return Ok(None);
  };

  let mut stmt = conn.prepare_cached(&format!(
    "SELECT {SUBJECT_COLUMNS} FROM subject WHERE event_id = ?1 ORDER BY position"
  ))?;
  raw.subjects = stmt
    .query_map(rusqlite::params![id], subject_from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  Ok(Some(raw))
}

// ─── LogStore impl ───────────────────────────────────────────────────────────

impl LogStore for SqliteLog {
  type Error = crate::Error;

  async fn insert_events(&self, events: Vec<Event>) -> Result<Vec<Event>> {
    if events.is_empty() {
      return Ok(events);
    }

    let events = self
      .conn
      .call(move |conn| {
        let mut events = events;
        let tx = conn.transaction()?;
        {
          let mut insert_event = tx.prepare_cached(
            "INSERT INTO event (
               timestamp, interpretation, manifestation, actor, origin, payload
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          )?;
          let mut insert_subject = tx.prepare_cached(
            "INSERT INTO subject (
               event_id, position, uri, current_uri, interpretation,
               manifestation, origin, mimetype, text, storage
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
          )?;

          for event in &mut events {
            insert_event.execute(rusqlite::params![
              event.timestamp,
              event.interpretation,
              event.manifestation,
              event.actor,
              event.origin,
              event.payload,
            ])?;
            let row_id = tx.last_insert_rowid();
            let Ok(id) = decode_id(row_id) else {
              // `tx` is dropped uncommitted, so nothing of the batch is kept.
              return Ok(Err(row_id));
            };
            event.id = id;

            for (position, s) in event.subjects.iter().enumerate() {
              insert_subject.execute(rusqlite::params![
                row_id,
                position as i64,
                s.uri,
                s.current_uri,
                s.interpretation,
                s.manifestation,
                s.origin,
                s.mimetype,
                s.text,
                s.storage,
              ])?;
            }
          }
        }
        tx.commit()?;
        Ok(Ok(events))
      })
      .await?
      .map_err(Error::IdOutOfRange)?;

    tracing::debug!(count = events.len(), "inserted events");
    Ok(events)
  }

  async fn get_events(&self, ids: Vec<EventId>) -> Result<Vec<Option<Event>>> {
    let raws: Vec<Option<RawEvent>> = self
      .conn
      .call(move |conn| {
        let rows = ids
          .iter()
          .map(|id| read_event(conn, encode_id(*id)))
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(|raw| raw.map(RawEvent::into_event).transpose())
      .collect()
  }

  async fn delete_events(&self, ids: Vec<EventId>) -> Result<Deleted> {
    let removed: Vec<(i64, i64)> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut removed = Vec::new();
        {
          let mut lookup = tx.prepare_cached("SELECT timestamp FROM event WHERE id = ?1")?;
          let mut delete = tx.prepare_cached("DELETE FROM event WHERE id = ?1")?;
          for id in ids.iter().map(|id| encode_id(*id)) {
            let timestamp: Option<i64> = lookup
              .query_row(rusqlite::params![id], |row| row.get(0))
              .optional()?;
            if let Some(timestamp) = timestamp {
              delete.execute(rusqlite::params![id])?;
              removed.push((id, timestamp));
            }
          }
        }
        tx.commit()?;
        Ok(removed)
      })
      .await?;

    let time_range = TimeRange::spanning(removed.iter().map(|(_, ts)| *ts));
    let ids = removed
      .into_iter()
      .map(|(id, _)| decode_id(id))
      .collect::<Result<Vec<_>>>()?;

    if ids.is_empty() {
      tracing::debug!("tried to delete non-existing events");
    } else {
      tracing::debug!(?ids, "deleted events");
    }

    Ok(Deleted { ids, time_range })
  }

  async fn find_event_ids(&self, query: &EventQuery) -> Result<Vec<EventId>> {
    let range     = query.time_range;
    let templates = query.templates.clone();
    let limit     = query.limit.map_or(-1, |l| l as i64);

    let row_ids: Vec<i64> = self
      .conn
      .call(move |conn| {
        if templates.is_empty() {
          let mut stmt = conn.prepare_cached(
            "SELECT id FROM event
             WHERE timestamp BETWEEN ?1 AND ?2
             ORDER BY timestamp DESC, id DESC
             LIMIT ?3",
          )?;
          let ids = stmt
            .query_map(rusqlite::params![range.begin, range.end, limit], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
          return Ok(ids);
        }

        let candidates: Vec<i64> = {
          let mut stmt = conn.prepare_cached(
            "SELECT id FROM event
             WHERE timestamp BETWEEN ?1 AND ?2
             ORDER BY timestamp DESC, id DESC",
          )?;
          stmt
            .query_map(rusqlite::params![range.begin, range.end], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };

        // Template matching happens in Rust against fully materialised events.
        let mut matched = Vec::new();
        for id in candidates {
          if limit >= 0 && matched.len() as i64 >= limit {
            break;
          }
          if let Some(raw) = read_event(conn, id)? {
            if raw.matches_any(&templates) {
              matched.push(id);
            }
          }
        }
        Ok(matched)
      })
      .await?;

    row_ids.into_iter().map(decode_id).collect()
  }
}
