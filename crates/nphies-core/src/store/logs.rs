use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use super::{parse_col, parse_json_col, parse_opt_col, PollStore};
use crate::error::{PollError, Result};
use crate::poll::log::{PollLog, PollMessage, RunError};
use crate::reconciler::Reconciliation;
use crate::types::{MessageType, PollStatus, ProcessingStatus, TriggerType};

const LOG_COLUMNS: &str = "id, trigger_type, started_at, finished_at, duration_ms, status, \
     messages_received, messages_matched, messages_unmatched, messages_errored, \
     request_bundle, response_bundle, errors";

const MESSAGE_COLUMNS: &str = "id, poll_log_id, entry_index, resource_type, event_code, \
     message_type, response_identifier, fingerprint, payload, matched, matched_table, \
     matched_record_id, match_strategy, processing_status, processing_error, created_at";

/// Error text stamped on messages a run abandoned before reconciling them.
pub(crate) const ABANDONED: &str = "run ended before the message was reconciled";

/// A classified message about to be persisted as `pending`.
#[derive(Debug, Clone)]
pub struct NewMessage<'a> {
    pub entry_index: usize,
    pub resource_type: &'a str,
    pub event_code: Option<&'a str>,
    pub message_type: MessageType,
    pub response_identifier: Option<&'a str>,
    pub fingerprint: &'a str,
    pub payload: &'a serde_json::Value,
}

/// Canonical timestamp text; lexical order equals time order.
pub(crate) fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn ts_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("bad timestamp: {raw}").into(),
        )
    })
}

fn opt_ts_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(None),
        Some(_) => ts_col(row, idx).map(Some),
    }
}

fn map_log(row: &rusqlite::Row<'_>) -> rusqlite::Result<PollLog> {
    let errors_raw: String = row.get(12)?;
    let errors: Vec<RunError> = serde_json::from_str(&errors_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(12, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(PollLog {
        id: row.get(0)?,
        trigger_type: parse_col(row, 1)?,
        started_at: ts_col(row, 2)?,
        finished_at: opt_ts_col(row, 3)?,
        duration_ms: row.get(4)?,
        status: parse_col(row, 5)?,
        messages_received: row.get(6)?,
        messages_matched: row.get(7)?,
        messages_unmatched: row.get(8)?,
        messages_errored: row.get(9)?,
        request_bundle: row.get(10)?,
        response_bundle: row.get(11)?,
        errors,
    })
}

fn map_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<PollMessage> {
    Ok(PollMessage {
        id: row.get(0)?,
        poll_log_id: row.get(1)?,
        entry_index: row.get(2)?,
        resource_type: row.get(3)?,
        event_code: row.get(4)?,
        message_type: parse_col(row, 5)?,
        response_identifier: row.get(6)?,
        fingerprint: row.get(7)?,
        payload: parse_json_col(row, 8)?,
        matched: row.get(9)?,
        matched_table: parse_opt_col(row, 10)?,
        matched_record_id: row.get(11)?,
        match_strategy: parse_opt_col(row, 12)?,
        processing_status: parse_col(row, 13)?,
        processing_error: row.get(14)?,
        created_at: ts_col(row, 15)?,
    })
}

// ---------------------------------------------------------------------------
// Connection-level operations (usable inside a transaction)
// ---------------------------------------------------------------------------

pub(crate) fn get_log(conn: &Connection, id: i64) -> Result<PollLog> {
    conn.query_row(
        &format!("SELECT {LOG_COLUMNS} FROM poll_logs WHERE id = ?1"),
        params![id],
        map_log,
    )
    .optional()?
    .ok_or(PollError::LogNotFound(id))
}

pub(crate) fn message_status(conn: &Connection, message_id: i64) -> Result<Option<ProcessingStatus>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT processing_status FROM poll_messages WHERE id = ?1",
            params![message_id],
            |row| row.get(0),
        )
        .optional()?;
    raw.map(|s| s.parse()).transpose()
}

/// Insert a `pending` message. The row is written only while its log is
/// still in progress.
pub(crate) fn insert_message(conn: &Connection, poll_log_id: i64, msg: &NewMessage<'_>) -> Result<i64> {
    let inserted = conn.execute(
        "INSERT INTO poll_messages (
            poll_log_id, entry_index, resource_type, event_code, message_type,
            response_identifier, fingerprint, payload, processing_status, created_at
         )
         SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10
         WHERE EXISTS (SELECT 1 FROM poll_logs WHERE id = ?1 AND status = 'in_progress')",
        params![
            poll_log_id,
            msg.entry_index as i64,
            msg.resource_type,
            msg.event_code,
            msg.message_type.as_str(),
            msg.response_identifier,
            msg.fingerprint,
            msg.payload.to_string(),
            ProcessingStatus::Pending.as_str(),
            ts(Utc::now()),
        ],
    )?;
    if inserted == 0 {
        // Not in progress: either finalized or missing.
        get_log(conn, poll_log_id)?;
        return Err(PollError::AlreadyFinalized(poll_log_id));
    }
    Ok(conn.last_insert_rowid())
}

/// Write a terminal result onto a still-pending message. Returns false if the
/// message was already terminal.
pub(crate) fn record_result(
    conn: &Connection,
    message_id: i64,
    result: &Reconciliation,
) -> Result<bool> {
    let matched = result.status.is_matched();
    let changed = conn.execute(
        "UPDATE poll_messages
         SET matched = ?2, matched_table = ?3, matched_record_id = ?4, match_strategy = ?5,
             processing_status = ?6, processing_error = ?7
         WHERE id = ?1 AND processing_status = 'pending'",
        params![
            message_id,
            matched,
            result.table.filter(|_| matched).map(|t| t.as_str()),
            result.record_id.filter(|_| matched),
            result.strategy.filter(|_| matched).map(|s| s.as_str()),
            result.status.as_str(),
            result
                .error
                .as_deref()
                .filter(|_| result.status == ProcessingStatus::Error),
        ],
    )?;
    Ok(changed == 1)
}

// ---------------------------------------------------------------------------
// PollStore: poll_logs / poll_messages
// ---------------------------------------------------------------------------

impl PollStore {
    /// Insert an `in_progress` log. Fails with `AlreadyRunning` while another
    /// log is in progress.
    pub fn create_log(
        &self,
        trigger: TriggerType,
        started_at: DateTime<Utc>,
        request_bundle: Option<&str>,
    ) -> Result<PollLog> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT INTO poll_logs (trigger_type, started_at, status, request_bundle)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                trigger.as_str(),
                ts(started_at),
                PollStatus::InProgress.as_str(),
                request_bundle
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                return Err(PollError::AlreadyRunning)
            }
            Err(e) => return Err(e.into()),
        }
        get_log(&conn, conn.last_insert_rowid())
    }

    pub fn insert_message(&self, poll_log_id: i64, msg: &NewMessage<'_>) -> Result<i64> {
        let conn = self.lock()?;
        insert_message(&conn, poll_log_id, msg)
    }

    /// Persist a run's messages as `pending`, all or none. Fails with
    /// `AlreadyFinalized` once the log has been finalized.
    pub fn insert_messages(&self, poll_log_id: i64, msgs: &[NewMessage<'_>]) -> Result<Vec<i64>> {
        self.transaction(|tx| {
            msgs.iter()
                .map(|msg| insert_message(tx, poll_log_id, msg))
                .collect()
        })
    }

    /// Mark a pending message as failed. No-op if it is already terminal.
    pub fn fail_message(&self, message_id: i64, error: &str) -> Result<bool> {
        let conn = self.lock()?;
        record_result(&conn, message_id, &Reconciliation::failed(error))
    }

    /// Finalize an in-progress log. Pending messages are failed first, then
    /// counters are computed from the message rows. A second call fails with
    /// `AlreadyFinalized`.
    pub fn finalize_log(
        &self,
        id: i64,
        status: PollStatus,
        finished_at: DateTime<Utc>,
        duration_ms: i64,
        response_bundle: Option<&str>,
        errors: &[RunError],
    ) -> Result<PollLog> {
        if !status.is_terminal() {
            return Err(PollError::InvalidValue {
                kind: "final poll status",
                value: status.to_string(),
            });
        }
        let errors_json = serde_json::to_string(errors)?;
        self.transaction(|tx| {
            let current = get_log(tx, id)?;
            if current.is_finalized() {
                return Err(PollError::AlreadyFinalized(id));
            }

            tx.execute(
                "UPDATE poll_messages
                 SET processing_status = 'error', processing_error = ?2, matched = 0,
                     matched_table = NULL, matched_record_id = NULL, match_strategy = NULL
                 WHERE poll_log_id = ?1 AND processing_status = 'pending'",
                params![id, ABANDONED],
            )?;

            let (received, matched, unmatched, errored): (u32, u32, u32, u32) = tx.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(processing_status IN ('processed', 'new_record')), 0),
                        COALESCE(SUM(processing_status = 'unmatched'), 0),
                        COALESCE(SUM(processing_status = 'error'), 0)
                 FROM poll_messages WHERE poll_log_id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;

            tx.execute(
                "UPDATE poll_logs
                 SET status = ?2, finished_at = ?3, duration_ms = ?4,
                     messages_received = ?5, messages_matched = ?6,
                     messages_unmatched = ?7, messages_errored = ?8,
                     response_bundle = ?9, errors = ?10
                 WHERE id = ?1 AND status = 'in_progress'",
                params![
                    id,
                    status.as_str(),
                    ts(finished_at),
                    duration_ms,
                    received,
                    matched,
                    unmatched,
                    errored,
                    response_bundle,
                    errors_json,
                ],
            )?;
            get_log(tx, id)
        })
    }

    pub fn get_log(&self, id: i64) -> Result<PollLog> {
        let conn = self.lock()?;
        get_log(&conn, id)
    }

    pub fn in_progress_log(&self) -> Result<Option<PollLog>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {LOG_COLUMNS} FROM poll_logs WHERE status = 'in_progress'"),
            [],
            map_log,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Newest first.
    pub fn list_logs(&self, limit: usize, offset: usize) -> Result<Vec<PollLog>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {LOG_COLUMNS} FROM poll_logs ORDER BY started_at DESC, id DESC
             LIMIT ?1 OFFSET ?2"
        ))?;
        let rows = stmt.query_map(params![limit as i64, offset as i64], map_log)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn count_logs(&self) -> Result<u64> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM poll_logs", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Messages of one log in bundle order.
    pub fn list_messages(&self, poll_log_id: i64) -> Result<Vec<PollMessage>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM poll_messages WHERE poll_log_id = ?1
             ORDER BY entry_index ASC, id ASC"
        ))?;
        let rows = stmt.query_map(params![poll_log_id], map_message)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Polls started at or after `since` (all polls when `None`).
    pub fn count_polls(&self, since: Option<DateTime<Utc>>) -> Result<u64> {
        let conn = self.lock()?;
        let since = since.map(ts).unwrap_or_default();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM poll_logs WHERE started_at >= ?1",
            params![since],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    /// `(messages, matched)` created at or after `since`.
    pub fn count_messages(&self, since: Option<DateTime<Utc>>) -> Result<(u64, u64)> {
        let conn = self.lock()?;
        let since = since.map(ts).unwrap_or_default();
        let (total, matched): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(matched), 0)
             FROM poll_messages WHERE created_at >= ?1",
            params![since],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((total as u64, matched as u64))
    }

    pub fn last_poll_at(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = self.lock()?;
        let raw: Option<String> =
            conn.query_row("SELECT MAX(started_at) FROM poll_logs", [], |row| row.get(0))?;
        Ok(raw.as_deref().and_then(parse_ts))
    }

    /// On startup, finalize any log a previous process left `in_progress`.
    ///
    /// Returns the number of logs recovered.
    pub fn startup_recovery(&self) -> Result<u32> {
        let Some(stale) = self.in_progress_log()? else {
            return Ok(0);
        };
        let now = Utc::now();
        let duration_ms = (now - stale.started_at).num_milliseconds().max(0);
        self.finalize_log(
            stale.id,
            PollStatus::Error,
            now,
            duration_ms,
            None,
            &[RunError::new(
                "Interrupted",
                "process exited before the run finished",
            )],
        )?;
        tracing::warn!(poll_log_id = stale.id, "recovered interrupted poll run");
        Ok(1)
    }

    /// Keep the newest `keep` finalized logs; delete the rest with their
    /// messages. The reconciliation ledger is not touched.
    pub fn prune_logs(&self, keep: usize) -> Result<usize> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM poll_logs
             WHERE status != 'in_progress'
               AND id NOT IN (
                   SELECT id FROM poll_logs WHERE status != 'in_progress'
                   ORDER BY started_at DESC, id DESC LIMIT ?1
               )",
            params![keep as i64],
        )?;
        Ok(deleted)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
