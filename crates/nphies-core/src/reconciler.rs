//! Apply match outcomes to local state, once per message fingerprint.
//!
//! Each call runs in a single store transaction: check the message is still
//! pending, consult the ledger, write the business record, write the ledger,
//! then stamp the message. Any failure rolls the transaction back and marks
//! only that message as `error`.

use chrono::Utc;
use serde::Serialize;

use crate::classifier::ClassifiedMessage;
use crate::error::{PollError, Result};
use crate::matcher::MatchOutcome;
use crate::payload;
use crate::store::logs::{self, ABANDONED};
use crate::store::records;
use crate::store::{LedgerEntry, NewRecord, PollStore};
use crate::types::{BusinessTable, MatchStrategy, ProcessingStatus};

/// Terminal result recorded on a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
    pub status: ProcessingStatus,
    pub table: Option<BusinessTable>,
    pub record_id: Option<i64>,
    pub strategy: Option<MatchStrategy>,
    pub error: Option<String>,
    /// Returned from the ledger without re-applying effects.
    pub replayed: bool,
}

impl Reconciliation {
    pub fn matched(
        status: ProcessingStatus,
        table: BusinessTable,
        record_id: i64,
        strategy: MatchStrategy,
    ) -> Self {
        Self {
            status,
            table: Some(table),
            record_id: Some(record_id),
            strategy: Some(strategy),
            error: None,
            replayed: false,
        }
    }

    pub fn unmatched() -> Self {
        Self {
            status: ProcessingStatus::Unmatched,
            table: None,
            record_id: None,
            strategy: None,
            error: None,
            replayed: false,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: ProcessingStatus::Error,
            table: None,
            record_id: None,
            strategy: None,
            error: Some(error.into()),
            replayed: false,
        }
    }

    fn replay(entry: LedgerEntry) -> Self {
        Self {
            replayed: true,
            ..Self::matched(entry.status, entry.table, entry.record_id, entry.strategy)
        }
    }
}

pub struct Reconciler<'a> {
    store: &'a PollStore,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a PollStore) -> Self {
        Self { store }
    }

    /// Reconcile one persisted message. Only store failures while recording
    /// the failure itself are returned as `Err`; everything else lands on the
    /// message.
    pub fn reconcile(
        &self,
        message_id: i64,
        msg: &ClassifiedMessage,
        fingerprint: &str,
        outcome: &MatchOutcome,
    ) -> Result<Reconciliation> {
        let applied = self
            .store
            .transaction(|tx| apply(tx, message_id, msg, fingerprint, outcome));
        match applied {
            Ok(result) => {
                tracing::debug!(
                    message_id,
                    status = %result.status,
                    table = ?result.table,
                    record_id = ?result.record_id,
                    strategy = ?result.strategy,
                    replayed = result.replayed,
                    "message reconciled"
                );
                Ok(result)
            }
            Err(PollError::MessageNotPending(_)) => Ok(Reconciliation::failed(ABANDONED)),
            Err(e) => {
                let detail = e.to_string();
                tracing::warn!(message_id, error = %detail, "reconciliation failed");
                self.store.fail_message(message_id, &detail)?;
                Ok(Reconciliation::failed(detail))
            }
        }
    }
}

fn apply(
    tx: &rusqlite::Connection,
    message_id: i64,
    msg: &ClassifiedMessage,
    fingerprint: &str,
    outcome: &MatchOutcome,
) -> Result<Reconciliation> {
    match logs::message_status(tx, message_id)? {
        Some(ProcessingStatus::Pending) => {}
        Some(_) => return Err(PollError::MessageNotPending(message_id)),
        None => {
            return Err(PollError::Store(format!(
                "message {message_id} does not exist"
            )))
        }
    }

    if let Some(prior) = records::ledger_get(tx, fingerprint)? {
        let result = Reconciliation::replay(prior);
        logs::record_result(tx, message_id, &result)?;
        return Ok(result);
    }

    let result = match *outcome {
        MatchOutcome::Matched {
            table,
            record_id,
            strategy,
        } => {
            let record = records::get(tx, table, record_id)?;
            if !record.status.accepts_responses() {
                return Err(PollError::InvalidRecordState {
                    table: table.to_string(),
                    id: record_id,
                    status: record.status.to_string(),
                    reason: "record no longer accepts responses".to_string(),
                });
            }
            records::apply_response(
                tx,
                table,
                record_id,
                payload::derived_status(&msg.payload),
                &msg.payload,
                fingerprint,
            )?;
            Reconciliation::matched(ProcessingStatus::Processed, table, record_id, strategy)
        }
        MatchOutcome::Create { table } => {
            let record = payer_initiated(table, msg);
            let id = records::insert_from_message(tx, &record, &msg.payload, fingerprint)?;
            Reconciliation::matched(
                ProcessingStatus::NewRecord,
                table,
                id,
                MatchStrategy::PayerInitiated,
            )
        }
        MatchOutcome::Unmatched { .. } => Reconciliation::unmatched(),
    };

    if let (true, Some(table), Some(record_id), Some(strategy)) = (
        result.status.is_matched(),
        result.table,
        result.record_id,
        result.strategy,
    ) {
        records::ledger_put(
            tx,
            &LedgerEntry {
                fingerprint: fingerprint.to_string(),
                status: result.status,
                table,
                record_id,
                strategy,
                message_id,
                recorded_at: Utc::now(),
            },
        )?;
    }
    logs::record_result(tx, message_id, &result)?;
    Ok(result)
}

fn payer_initiated(table: BusinessTable, msg: &ClassifiedMessage) -> NewRecord {
    let mut record = NewRecord::uncorrelated(table).with_status(payload::derived_status(&msg.payload));
    if let Some(id) = payload::business_identifiers(&msg.payload).into_iter().next() {
        record = record.with_business_id(id);
    }
    if let Some(keys) = payload::counterpart_keys(&msg.payload) {
        record = record.with_counterparts(keys.patient_id, keys.provider_id, keys.service_date);
    }
    record
}
