//! SQL schema for the Zeitgeist SQLite log.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- AUTOINCREMENT keeps ids of deleted events from ever being handed out again.
CREATE TABLE IF NOT EXISTS event (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp      INTEGER NOT NULL,   -- milliseconds since the Unix epoch
    interpretation TEXT    NOT NULL DEFAULT '',
    manifestation  TEXT    NOT NULL DEFAULT '',
    actor          TEXT    NOT NULL DEFAULT '',
    origin         TEXT    NOT NULL DEFAULT '',
    payload        BLOB    NOT NULL DEFAULT x''
);

CREATE TABLE IF NOT EXISTS subject (
    event_id       INTEGER NOT NULL REFERENCES event(id) ON DELETE CASCADE,
    position       INTEGER NOT NULL,   -- order within the event
    uri            TEXT    NOT NULL DEFAULT '',
    current_uri    TEXT    NOT NULL DEFAULT '',
    interpretation TEXT    NOT NULL DEFAULT '',
    manifestation  TEXT    NOT NULL DEFAULT '',
    origin         TEXT    NOT NULL DEFAULT '',
    mimetype       TEXT    NOT NULL DEFAULT '',
    text           TEXT    NOT NULL DEFAULT '',
    storage        TEXT    NOT NULL DEFAULT '',
    PRIMARY KEY (event_id, position)
);

CREATE INDEX IF NOT EXISTS event_timestamp_idx ON event(timestamp);
CREATE INDEX IF NOT EXISTS subject_uri_idx     ON subject(uri);
CREATE INDEX IF NOT EXISTS subject_storage_idx ON subject(storage);

PRAGMA user_version = 1;
";
