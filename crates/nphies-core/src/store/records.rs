use chrono::{DateTime, Duration as CDur, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use serde::{Deserialize, Serialize};

use super::logs::{parse_ts, ts};
use super::{parse_col, PollStore};
use crate::error::{PollError, Result};
use crate::matcher::RecordIndex;
use crate::payload::CounterpartKeys;
use crate::types::{BusinessTable, MatchStrategy, ProcessingStatus, RecordStatus};

const RECORD_COLUMNS: &str = "id, correlation_id, business_id, patient_id, provider_id, \
     service_date, status, response_payload, last_fingerprint, created_by_poll, \
     created_at, updated_at";

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

/// A local prior authorization, claim, eligibility check, or communication.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessRecord {
    pub id: i64,
    pub table: BusinessTable,
    /// Id of the outbound request this record was sent as.
    pub correlation_id: Option<String>,
    pub business_id: Option<String>,
    pub patient_id: Option<String>,
    pub provider_id: Option<String>,
    pub service_date: Option<NaiveDate>,
    pub status: RecordStatus,
    pub response_payload: Option<serde_json::Value>,
    pub last_fingerprint: Option<String>,
    pub created_by_poll: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub table: BusinessTable,
    pub correlation_id: Option<String>,
    pub business_id: Option<String>,
    pub patient_id: Option<String>,
    pub provider_id: Option<String>,
    pub service_date: Option<NaiveDate>,
    pub status: RecordStatus,
}

impl NewRecord {
    /// A record whose outbound request went out as `correlation_id` and is
    /// awaiting a response.
    pub fn awaiting(table: BusinessTable, correlation_id: impl Into<String>) -> Self {
        Self {
            table,
            correlation_id: Some(correlation_id.into()),
            business_id: None,
            patient_id: None,
            provider_id: None,
            service_date: None,
            status: RecordStatus::Pending,
        }
    }

    pub fn uncorrelated(table: BusinessTable) -> Self {
        Self {
            table,
            correlation_id: None,
            business_id: None,
            patient_id: None,
            provider_id: None,
            service_date: None,
            status: RecordStatus::Pending,
        }
    }

    pub fn with_business_id(mut self, business_id: impl Into<String>) -> Self {
        self.business_id = Some(business_id.into());
        self
    }

    pub fn with_counterparts(
        mut self,
        patient_id: impl Into<String>,
        provider_id: impl Into<String>,
        service_date: NaiveDate,
    ) -> Self {
        self.patient_id = Some(patient_id.into());
        self.provider_id = Some(provider_id.into());
        self.service_date = Some(service_date);
        self
    }

    pub fn with_status(mut self, status: RecordStatus) -> Self {
        self.status = status;
        self
    }
}

/// Prior terminal result for a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub fingerprint: String,
    pub status: ProcessingStatus,
    pub table: BusinessTable,
    pub record_id: i64,
    pub strategy: MatchStrategy,
    pub message_id: i64,
    pub recorded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Connection-level operations
// ---------------------------------------------------------------------------

fn date_text(d: Option<NaiveDate>) -> Option<String> {
    d.map(|d| d.format("%Y-%m-%d").to_string())
}

fn map_record(table: BusinessTable) -> impl Fn(&rusqlite::Row<'_>) -> rusqlite::Result<BusinessRecord> {
    move |row| {
        let service_date: Option<String> = row.get(5)?;
        let payload: Option<String> = row.get(7)?;
        let created_at: String = row.get(10)?;
        let updated_at: String = row.get(11)?;
        Ok(BusinessRecord {
            id: row.get(0)?,
            table,
            correlation_id: row.get(1)?,
            business_id: row.get(2)?,
            patient_id: row.get(3)?,
            provider_id: row.get(4)?,
            service_date: service_date
                .as_deref()
                .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()),
            status: parse_col(row, 6)?,
            response_payload: payload.and_then(|p| serde_json::from_str(&p).ok()),
            last_fingerprint: row.get(8)?,
            created_by_poll: row.get(9)?,
            created_at: parse_ts(&created_at).unwrap_or_default(),
            updated_at: parse_ts(&updated_at).unwrap_or_default(),
        })
    }
}

pub(crate) fn insert(conn: &Connection, record: &NewRecord) -> Result<i64> {
    insert_inner(conn, record, None, None)
}

/// Insert a record built from a payer-initiated message.
pub(crate) fn insert_from_message(
    conn: &Connection,
    record: &NewRecord,
    payload: &serde_json::Value,
    fingerprint: &str,
) -> Result<i64> {
    insert_inner(conn, record, Some(payload), Some(fingerprint))
}

fn insert_inner(
    conn: &Connection,
    record: &NewRecord,
    payload: Option<&serde_json::Value>,
    fingerprint: Option<&str>,
) -> Result<i64> {
    let now = ts(Utc::now());
    conn.execute(
        &format!(
            "INSERT INTO {} (correlation_id, business_id, patient_id, provider_id, service_date,
                             status, response_payload, last_fingerprint, created_by_poll,
                             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            record.table.as_str()
        ),
        params![
            record.correlation_id,
            record.business_id,
            record.patient_id,
            record.provider_id,
            date_text(record.service_date),
            record.status.as_str(),
            payload.map(|p| p.to_string()),
            fingerprint,
            fingerprint.is_some(),
            now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn get(conn: &Connection, table: BusinessTable, id: i64) -> Result<BusinessRecord> {
    conn.query_row(
        &format!("SELECT {RECORD_COLUMNS} FROM {} WHERE id = ?1", table.as_str()),
        params![id],
        map_record(table),
    )
    .optional()?
    .ok_or_else(|| PollError::RecordNotFound {
        table: table.to_string(),
        id,
    })
}

/// Write an inbound response onto an existing record.
pub(crate) fn apply_response(
    conn: &Connection,
    table: BusinessTable,
    id: i64,
    status: RecordStatus,
    payload: &serde_json::Value,
    fingerprint: &str,
) -> Result<()> {
    let changed = conn.execute(
        &format!(
            "UPDATE {} SET status = ?2, response_payload = ?3, last_fingerprint = ?4,
                           updated_at = ?5
             WHERE id = ?1",
            table.as_str()
        ),
        params![id, status.as_str(), payload.to_string(), fingerprint, ts(Utc::now())],
    )?;
    if changed == 0 {
        return Err(PollError::RecordNotFound {
            table: table.to_string(),
            id,
        });
    }
    Ok(())
}

pub(crate) fn ledger_get(conn: &Connection, fingerprint: &str) -> Result<Option<LedgerEntry>> {
    let row = conn
        .query_row(
            "SELECT fingerprint, processing_status, matched_table, matched_record_id,
                    match_strategy, message_id, recorded_at
             FROM reconciliation_ledger WHERE fingerprint = ?1",
            params![fingerprint],
            |row| {
                let recorded_at: String = row.get(6)?;
                Ok(LedgerEntry {
                    fingerprint: row.get(0)?,
                    status: parse_col(row, 1)?,
                    table: parse_col(row, 2)?,
                    record_id: row.get(3)?,
                    strategy: parse_col(row, 4)?,
                    message_id: row.get(5)?,
                    recorded_at: parse_ts(&recorded_at).unwrap_or_default(),
                })
            },
        )
        .optional()?;
    Ok(row)
}

pub(crate) fn ledger_put(conn: &Connection, entry: &LedgerEntry) -> Result<()> {
    conn.execute(
        "INSERT INTO reconciliation_ledger (fingerprint, processing_status, matched_table,
             matched_record_id, match_strategy, message_id, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entry.fingerprint,
            entry.status.as_str(),
            entry.table.as_str(),
            entry.record_id,
            entry.strategy.as_str(),
            entry.message_id,
            ts(entry.recorded_at),
        ],
    )?;
    Ok(())
}

fn find_ids(
    conn: &Connection,
    table: BusinessTable,
    predicate: &str,
    args: &[&dyn ToSql],
    limit: usize,
) -> Result<Vec<i64>> {
    let sql = format!(
        "SELECT id FROM {} WHERE {predicate} ORDER BY id LIMIT {limit}",
        table.as_str()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(args, |row| row.get::<_, i64>(0))?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

// ---------------------------------------------------------------------------
// PollStore: business records
// ---------------------------------------------------------------------------

impl PollStore {
    pub fn insert_record(&self, record: &NewRecord) -> Result<i64> {
        let conn = self.lock()?;
        insert(&conn, record)
    }

    pub fn get_record(&self, table: BusinessTable, id: i64) -> Result<BusinessRecord> {
        let conn = self.lock()?;
        get(&conn, table, id)
    }

    /// Newest first.
    pub fn list_records(&self, table: BusinessTable, limit: usize) -> Result<Vec<BusinessRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM {} ORDER BY id DESC LIMIT ?1",
            table.as_str()
        ))?;
        let rows = stmt.query_map(params![limit as i64], map_record(table))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Cancel a record so later responses are refused.
    pub fn cancel_record(&self, table: BusinessTable, id: i64) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            &format!(
                "UPDATE {} SET status = ?2, updated_at = ?3 WHERE id = ?1",
                table.as_str()
            ),
            params![id, RecordStatus::Cancelled.as_str(), ts(Utc::now())],
        )?;
        if changed == 0 {
            return Err(PollError::RecordNotFound {
                table: table.to_string(),
                id,
            });
        }
        Ok(())
    }

    pub fn ledger_entry(&self, fingerprint: &str) -> Result<Option<LedgerEntry>> {
        let conn = self.lock()?;
        ledger_get(&conn, fingerprint)
    }
}

impl RecordIndex for PollStore {
    fn by_correlation(&self, table: BusinessTable, correlation_id: &str, limit: usize) -> Result<Vec<i64>> {
        let conn = self.lock()?;
        find_ids(&conn, table, "correlation_id = ?1", params![correlation_id], limit)
    }

    fn by_business_id(&self, table: BusinessTable, business_id: &str, limit: usize) -> Result<Vec<i64>> {
        let conn = self.lock()?;
        find_ids(&conn, table, "business_id = ?1", params![business_id], limit)
    }

    fn by_counterparts(
        &self,
        table: BusinessTable,
        keys: &CounterpartKeys,
        window_days: u32,
        limit: usize,
    ) -> Result<Vec<i64>> {
        let window = CDur::days(i64::from(window_days));
        let from = date_text(keys.service_date.checked_sub_signed(window));
        let to = date_text(keys.service_date.checked_add_signed(window));
        let conn = self.lock()?;
        find_ids(
            &conn,
            table,
            "patient_id = ?1 AND provider_id = ?2 AND service_date BETWEEN ?3 AND ?4",
            params![keys.patient_id, keys.provider_id, from, to],
            limit,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn insert_and_get_roundtrip() {
        let store = PollStore::in_memory().unwrap();
        let id = store
            .insert_record(
                &NewRecord::awaiting(BusinessTable::PriorAuthorizations, "req-55")
                    .with_business_id("PA-55")
                    .with_counterparts("pat-1", "prov-1", day(2026, 4, 1)),
            )
            .unwrap();
        let rec = store
            .get_record(BusinessTable::PriorAuthorizations, id)
            .unwrap();
        assert_eq!(rec.correlation_id.as_deref(), Some("req-55"));
        assert_eq!(rec.business_id.as_deref(), Some("PA-55"));
        assert_eq!(rec.service_date, Some(day(2026, 4, 1)));
        assert_eq!(rec.status, RecordStatus::Pending);
        assert!(!rec.created_by_poll);
    }

    #[test]
    fn missing_record_is_not_found() {
        let store = PollStore::in_memory().unwrap();
        assert!(matches!(
            store.get_record(BusinessTable::ClaimSubmissions, 99),
            Err(PollError::RecordNotFound { .. })
        ));
        assert!(store.cancel_record(BusinessTable::ClaimSubmissions, 99).is_err());
    }

    #[test]
    fn lookups_are_scoped_to_table() {
        let store = PollStore::in_memory().unwrap();
        store
            .insert_record(&NewRecord::awaiting(BusinessTable::ClaimSubmissions, "req-1"))
            .unwrap();
        assert_eq!(
            store
                .by_correlation(BusinessTable::ClaimSubmissions, "req-1", 2)
                .unwrap()
                .len(),
            1
        );
        assert!(store
            .by_correlation(BusinessTable::PriorAuthorizations, "req-1", 2)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn counterpart_lookup_honours_window_and_limit() {
        let store = PollStore::in_memory().unwrap();
        for date in [day(2026, 3, 1), day(2026, 3, 20), day(2026, 6, 1)] {
            store
                .insert_record(
                    &NewRecord::uncorrelated(BusinessTable::ClaimSubmissions)
                        .with_counterparts("pat-1", "prov-1", date),
                )
                .unwrap();
        }
        let keys = CounterpartKeys {
            patient_id: "pat-1".to_string(),
            provider_id: "prov-1".to_string(),
            service_date: day(2026, 3, 10),
        };
        let hits = store
            .by_counterparts(BusinessTable::ClaimSubmissions, &keys, 15, 10)
            .unwrap();
        assert_eq!(hits.len(), 2);
        let bounded = store
            .by_counterparts(BusinessTable::ClaimSubmissions, &keys, 15, 1)
            .unwrap();
        assert_eq!(bounded.len(), 1);
    }

    #[test]
    fn ledger_roundtrip_and_uniqueness() {
        let store = PollStore::in_memory().unwrap();
        let entry = LedgerEntry {
            fingerprint: "abc".to_string(),
            status: ProcessingStatus::Processed,
            table: BusinessTable::Communications,
            record_id: 4,
            strategy: MatchStrategy::BusinessIdentifier,
            message_id: 9,
            recorded_at: Utc::now(),
        };
        store
            .transaction(|tx| ledger_put(tx, &entry))
            .unwrap();
        let got = store.ledger_entry("abc").unwrap().unwrap();
        assert_eq!(got.record_id, 4);
        assert_eq!(got.strategy, MatchStrategy::BusinessIdentifier);
        assert!(store.transaction(|tx| ledger_put(tx, &entry)).is_err());
        assert!(store.ledger_entry("missing").unwrap().is_none());
    }
}
