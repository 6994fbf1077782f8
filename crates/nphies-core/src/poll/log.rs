//! Run and message records persisted for audit.
//!
//! A `PollLog` is created `InProgress` when a run starts and finalized
//! exactly once. Each `PollMessage` belongs to one log and moves from
//! `Pending` to a terminal `ProcessingStatus`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    BusinessTable, MatchStrategy, MessageType, PollStatus, ProcessingStatus, TriggerType,
};

/// Run-level failure recorded on the log, in occurrence order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    pub code: String,
    pub detail: String,
}

impl RunError {
    pub fn new(code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollLog {
    pub id: i64,
    pub trigger_type: TriggerType,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub status: PollStatus,
    pub messages_received: u32,
    pub messages_matched: u32,
    pub messages_unmatched: u32,
    pub messages_errored: u32,
    pub request_bundle: Option<String>,
    pub response_bundle: Option<String>,
    pub errors: Vec<RunError>,
}

impl PollLog {
    pub fn is_finalized(&self) -> bool {
        self.status.is_terminal()
    }

    /// `received == matched + unmatched + errored` for every finalized log.
    pub fn counters_balance(&self) -> bool {
        self.messages_received
            == self.messages_matched + self.messages_unmatched + self.messages_errored
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollMessage {
    pub id: i64,
    pub poll_log_id: i64,
    pub entry_index: u32,
    pub resource_type: String,
    pub event_code: Option<String>,
    pub message_type: MessageType,
    pub response_identifier: Option<String>,
    pub fingerprint: String,
    pub payload: serde_json::Value,
    pub matched: bool,
    pub matched_table: Option<BusinessTable>,
    pub matched_record_id: Option<i64>,
    pub match_strategy: Option<MatchStrategy>,
    pub processing_status: ProcessingStatus,
    pub processing_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A finalized run and every message it produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollRun {
    pub log: PollLog,
    pub messages: Vec<PollMessage>,
}

impl PollRun {
    pub fn succeeded(&self) -> bool {
        matches!(self.log.status, PollStatus::Success | PollStatus::NoMessages)
    }
}
