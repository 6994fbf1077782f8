//! Read-only views over committed poll history, shaped for the dashboard.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::{PollError, Result};
use crate::poll::log::{PollLog, PollMessage, PollRun, RunError};
use crate::store::PollStore;
use crate::types::{
    BusinessTable, MatchStrategy, MessageType, PollStatus, ProcessingStatus, TriggerType,
};

pub const MAX_PAGE_LIMIT: usize = 100;

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub polls_today: u64,
    pub total_polls: u64,
    pub messages_today: u64,
    pub total_messages: u64,
    pub matched_today: u64,
    pub total_matched: u64,
    /// `total_matched / total_messages`, one decimal; 0 with no messages.
    pub match_rate_percent: f64,
    pub last_poll_at: Option<DateTime<Utc>>,
}

/// "Today" is the UTC calendar day containing `now`.
pub fn get_stats(store: &PollStore, now: DateTime<Utc>) -> Result<StatsSnapshot> {
    let midnight = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .unwrap_or(now);

    let (total_messages, total_matched) = store.count_messages(None)?;
    let (messages_today, matched_today) = store.count_messages(Some(midnight))?;
    Ok(StatsSnapshot {
        polls_today: store.count_polls(Some(midnight))?,
        total_polls: store.count_polls(None)?,
        messages_today,
        total_messages,
        matched_today,
        total_matched,
        match_rate_percent: match_rate(total_matched, total_messages),
        last_poll_at: store.last_poll_at()?,
    })
}

fn match_rate(matched: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (matched as f64 * 1000.0 / total as f64).round() / 10.0
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

/// A log without its raw bundles.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSummary {
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
    pub errors: Vec<RunError>,
}

impl From<PollLog> for LogSummary {
    fn from(log: PollLog) -> Self {
        Self {
            id: log.id,
            trigger_type: log.trigger_type,
            started_at: log.started_at,
            finished_at: log.finished_at,
            duration_ms: log.duration_ms,
            status: log.status,
            messages_received: log.messages_received,
            messages_matched: log.messages_matched,
            messages_unmatched: log.messages_unmatched,
            messages_errored: log.messages_errored,
            errors: log.errors,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogPage {
    pub logs: Vec<LogSummary>,
    pub page: usize,
    pub limit: usize,
    pub total: u64,
    pub total_pages: u64,
}

/// Newest first. `page` is 1-based; `limit` is 1..=100.
pub fn get_logs(store: &PollStore, page: usize, limit: usize) -> Result<LogPage> {
    if page == 0 {
        return Err(PollError::InvalidPagination("page must be at least 1".into()));
    }
    if limit == 0 || limit > MAX_PAGE_LIMIT {
        return Err(PollError::InvalidPagination(format!(
            "limit must be between 1 and {MAX_PAGE_LIMIT}"
        )));
    }
    let offset = (page - 1).saturating_mul(limit);
    let total = store.count_logs()?;
    let logs = store
        .list_logs(limit, offset)?
        .into_iter()
        .map(LogSummary::from)
        .collect();
    Ok(LogPage {
        logs,
        page,
        limit,
        total,
        total_pages: total.div_ceil(limit as u64),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSummary {
    pub matched: u32,
    pub new_records: u32,
    pub unmatched: u32,
    pub errors: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogDetail {
    #[serde(flatten)]
    pub log: PollLog,
    pub messages: Vec<PollMessage>,
    /// Keyed by resource type.
    pub processing_summary: BTreeMap<String, ResourceSummary>,
}

pub fn get_log(store: &PollStore, id: i64) -> Result<LogDetail> {
    let log = store.get_log(id)?;
    let messages = store.list_messages(id)?;
    Ok(LogDetail {
        processing_summary: summarize(&messages),
        log,
        messages,
    })
}

pub fn summarize(messages: &[PollMessage]) -> BTreeMap<String, ResourceSummary> {
    let mut summary: BTreeMap<String, ResourceSummary> = BTreeMap::new();
    for msg in messages {
        let entry = summary.entry(msg.resource_type.clone()).or_default();
        match msg.processing_status {
            ProcessingStatus::Processed => entry.matched += 1,
            ProcessingStatus::NewRecord => entry.new_records += 1,
            ProcessingStatus::Unmatched => entry.unmatched += 1,
            ProcessingStatus::Error => entry.errors += 1,
            ProcessingStatus::Pending => {}
        }
    }
    summary
}

// ---------------------------------------------------------------------------
// Trigger response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerStats {
    pub received: u32,
    pub matched: u32,
    pub unmatched: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerMessage {
    pub message_type: MessageType,
    pub resource_type: String,
    pub event_code: Option<String>,
    pub matched: bool,
    pub matched_table: Option<BusinessTable>,
    pub matched_record_id: Option<i64>,
    pub match_strategy: Option<MatchStrategy>,
}

impl From<&PollMessage> for TriggerMessage {
    fn from(m: &PollMessage) -> Self {
        Self {
            message_type: m.message_type,
            resource_type: m.resource_type.clone(),
            event_code: m.event_code.clone(),
            matched: m.matched,
            matched_table: m.matched_table,
            matched_record_id: m.matched_record_id,
            match_strategy: m.match_strategy,
        }
    }
}

/// What a manual trigger returns to the dashboard.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResponse {
    pub success: bool,
    pub message: String,
    pub poll_log_id: i64,
    pub status: PollStatus,
    pub stats: TriggerStats,
    pub messages: Vec<TriggerMessage>,
    pub poll_bundle: Option<Value>,
    pub response_bundle: Option<Value>,
    pub errors: Vec<RunError>,
    pub duration_ms: Option<i64>,
}

impl TriggerResponse {
    pub fn from_run(run: &PollRun) -> Self {
        let log = &run.log;
        let message = match log.status {
            PollStatus::NoMessages => "No messages waiting on the exchange".to_string(),
            PollStatus::Error => match log.errors.first() {
                Some(e) => format!("Poll failed ({}): {}", e.code, e.detail),
                None => "Poll failed".to_string(),
            },
            PollStatus::Success | PollStatus::InProgress => format!(
                "Processed {} messages: {} matched, {} unmatched, {} errors",
                log.messages_received,
                log.messages_matched,
                log.messages_unmatched,
                log.messages_errored
            ),
        };
        Self {
            success: run.succeeded(),
            message,
            poll_log_id: log.id,
            status: log.status,
            stats: TriggerStats {
                received: log.messages_received,
                matched: log.messages_matched,
                unmatched: log.messages_unmatched,
            },
            messages: run.messages.iter().map(TriggerMessage::from).collect(),
            poll_bundle: log.request_bundle.as_deref().map(bundle_value),
            response_bundle: log.response_bundle.as_deref().map(bundle_value),
            errors: log.errors.clone(),
            duration_ms: log.duration_ms,
        }
    }
}

/// Parsed JSON when possible; the raw text otherwise (malformed responses).
fn bundle_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
