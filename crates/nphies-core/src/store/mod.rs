//! SQLite persistence for poll logs, messages, the reconciliation ledger,
//! and the business-record tables.
//!
//! # Table design
//!
//! ```text
//! poll_logs              one row per run; at most one row may be in_progress
//!   └─ poll_messages     one row per extracted entry (FK poll_log_id)
//! reconciliation_ledger  fingerprint → prior terminal result
//! <business tables>      prior_authorizations, claim_submissions, ...
//! ```
//!
//! The connection lives behind a mutex. Every reconciliation runs as one
//! transaction under that mutex, which serializes writes to any given
//! business record.

pub(crate) mod logs;
pub(crate) mod records;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, Transaction};

use crate::error::{PollError, Result};
use crate::types::BusinessTable;

pub use logs::NewMessage;
pub use records::{BusinessRecord, LedgerEntry, NewRecord};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS poll_logs (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    trigger_type        TEXT NOT NULL,
    started_at          TEXT NOT NULL,
    finished_at         TEXT,
    duration_ms         INTEGER,
    status              TEXT NOT NULL,
    messages_received   INTEGER NOT NULL DEFAULT 0,
    messages_matched    INTEGER NOT NULL DEFAULT 0,
    messages_unmatched  INTEGER NOT NULL DEFAULT 0,
    messages_errored    INTEGER NOT NULL DEFAULT 0,
    request_bundle      TEXT,
    response_bundle     TEXT,
    errors              TEXT NOT NULL DEFAULT '[]'
);
CREATE UNIQUE INDEX IF NOT EXISTS poll_logs_single_flight
    ON poll_logs(status) WHERE status = 'in_progress';
CREATE INDEX IF NOT EXISTS poll_logs_started_at ON poll_logs(started_at);

CREATE TABLE IF NOT EXISTS poll_messages (
    id                   INTEGER PRIMARY KEY AUTOINCREMENT,
    poll_log_id          INTEGER NOT NULL REFERENCES poll_logs(id) ON DELETE CASCADE,
    entry_index          INTEGER NOT NULL,
    resource_type        TEXT NOT NULL,
    event_code           TEXT,
    message_type         TEXT NOT NULL,
    response_identifier  TEXT,
    fingerprint          TEXT NOT NULL,
    payload              TEXT NOT NULL,
    matched              INTEGER NOT NULL DEFAULT 0,
    matched_table        TEXT,
    matched_record_id    INTEGER,
    match_strategy       TEXT,
    processing_status    TEXT NOT NULL,
    processing_error     TEXT,
    created_at           TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS poll_messages_log ON poll_messages(poll_log_id);
CREATE INDEX IF NOT EXISTS poll_messages_correlation
    ON poll_messages(resource_type, response_identifier);
CREATE INDEX IF NOT EXISTS poll_messages_fingerprint ON poll_messages(fingerprint);
CREATE INDEX IF NOT EXISTS poll_messages_created_at ON poll_messages(created_at);

CREATE TABLE IF NOT EXISTS reconciliation_ledger (
    fingerprint        TEXT PRIMARY KEY,
    processing_status  TEXT NOT NULL,
    matched_table      TEXT NOT NULL,
    matched_record_id  INTEGER NOT NULL,
    match_strategy     TEXT NOT NULL,
    message_id         INTEGER NOT NULL,
    recorded_at        TEXT NOT NULL
);
";

fn business_table_ddl(table: BusinessTable) -> String {
    let t = table.as_str();
    format!(
        "
CREATE TABLE IF NOT EXISTS {t} (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    correlation_id    TEXT,
    business_id       TEXT,
    patient_id        TEXT,
    provider_id       TEXT,
    service_date      TEXT,
    status            TEXT NOT NULL,
    response_payload  TEXT,
    last_fingerprint  TEXT,
    created_by_poll   INTEGER NOT NULL DEFAULT 0,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS {t}_correlation ON {t}(correlation_id);
CREATE INDEX IF NOT EXISTS {t}_business_id ON {t}(business_id);
CREATE INDEX IF NOT EXISTS {t}_counterparts ON {t}(patient_id, provider_id, service_date);
"
    )
}

/// Persistent store for poll runs and the records they reconcile.
pub struct PollStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for PollStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollStore").finish_non_exhaustive()
    }
}

impl PollStore {
    /// Open or create the database at `path`, creating tables as needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            crate::io::ensure_dir(parent)?;
        }
        Self::bootstrap(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        for table in BusinessTable::all() {
            conn.execute_batch(&business_table_ddl(*table))?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| PollError::Store("connection mutex poisoned".to_string()))
    }

    /// Run `f` inside one transaction. Any error rolls the whole closure back.
    pub fn transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// Column helpers
// ---------------------------------------------------------------------------

/// Parse a TEXT column through `FromStr`, surfacing bad values as SQL errors.
fn parse_col<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = PollError>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_opt_col<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: std::str::FromStr<Err = PollError>,
{
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        s.parse::<T>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    })
    .transpose()
}

fn parse_json_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<serde_json::Value> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
