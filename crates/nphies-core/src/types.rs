use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PollError;

// ---------------------------------------------------------------------------
// TriggerType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Manual,
    Scheduled,
}

impl TriggerType {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerType::Manual => "manual",
            TriggerType::Scheduled => "scheduled",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TriggerType {
    type Err = PollError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(TriggerType::Manual),
            "scheduled" => Ok(TriggerType::Scheduled),
            _ => Err(invalid("trigger type", s)),
        }
    }
}

// ---------------------------------------------------------------------------
// PollStatus
// ---------------------------------------------------------------------------

/// Run state. `InProgress` is transient: every log leaves it exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollStatus {
    InProgress,
    Success,
    Error,
    NoMessages,
}

impl PollStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PollStatus::InProgress => "in_progress",
            PollStatus::Success => "success",
            PollStatus::Error => "error",
            PollStatus::NoMessages => "no_messages",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, PollStatus::InProgress)
    }
}

impl fmt::Display for PollStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PollStatus {
    type Err = PollError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(PollStatus::InProgress),
            "success" => Ok(PollStatus::Success),
            "error" => Ok(PollStatus::Error),
            "no_messages" => Ok(PollStatus::NoMessages),
            _ => Err(invalid("poll status", s)),
        }
    }
}

// ---------------------------------------------------------------------------
// MessageType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Answers a request this system sent.
    Solicited,
    /// Payer-initiated.
    Unsolicited,
    /// Carries a correlation reference that is not structurally valid.
    Unknown,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Solicited => "solicited",
            MessageType::Unsolicited => "unsolicited",
            MessageType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageType {
    type Err = PollError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "solicited" => Ok(MessageType::Solicited),
            "unsolicited" => Ok(MessageType::Unsolicited),
            "unknown" => Ok(MessageType::Unknown),
            _ => Err(invalid("message type", s)),
        }
    }
}

// ---------------------------------------------------------------------------
// ProcessingStatus
// ---------------------------------------------------------------------------

/// Per-message lifecycle: `Pending → Processed | NewRecord | Unmatched | Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Processed,
    NewRecord,
    Unmatched,
    Error,
}

impl ProcessingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processed => "processed",
            ProcessingStatus::NewRecord => "new_record",
            ProcessingStatus::Unmatched => "unmatched",
            ProcessingStatus::Error => "error",
        }
    }

    /// `matched` on a message row is derived from this and nothing else.
    pub fn is_matched(self) -> bool {
        matches!(self, ProcessingStatus::Processed | ProcessingStatus::NewRecord)
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ProcessingStatus::Pending)
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProcessingStatus {
    type Err = PollError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProcessingStatus::Pending),
            "processed" => Ok(ProcessingStatus::Processed),
            "new_record" => Ok(ProcessingStatus::NewRecord),
            "unmatched" => Ok(ProcessingStatus::Unmatched),
            "error" => Ok(ProcessingStatus::Error),
            _ => Err(invalid("processing status", s)),
        }
    }
}

// ---------------------------------------------------------------------------
// MatchStrategy
// ---------------------------------------------------------------------------

/// How a message was tied to a business record. Listed in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    DirectCorrelation,
    BusinessIdentifier,
    Heuristic,
    /// No local request existed; the record was created from the message.
    PayerInitiated,
}

impl MatchStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchStrategy::DirectCorrelation => "direct_correlation",
            MatchStrategy::BusinessIdentifier => "business_identifier",
            MatchStrategy::Heuristic => "heuristic",
            MatchStrategy::PayerInitiated => "payer_initiated",
        }
    }
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MatchStrategy {
    type Err = PollError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct_correlation" => Ok(MatchStrategy::DirectCorrelation),
            "business_identifier" => Ok(MatchStrategy::BusinessIdentifier),
            "heuristic" => Ok(MatchStrategy::Heuristic),
            "payer_initiated" => Ok(MatchStrategy::PayerInitiated),
            _ => Err(invalid("match strategy", s)),
        }
    }
}

// ---------------------------------------------------------------------------
// BusinessTable
// ---------------------------------------------------------------------------

/// Local business-record tables the engine reconciles against.
/// `as_str` is the SQL table name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusinessTable {
    PriorAuthorizations,
    ClaimSubmissions,
    AdvancedAuthorizations,
    Communications,
    EligibilityChecks,
}

impl BusinessTable {
    pub fn all() -> &'static [BusinessTable] {
        &[
            BusinessTable::PriorAuthorizations,
            BusinessTable::ClaimSubmissions,
            BusinessTable::AdvancedAuthorizations,
            BusinessTable::Communications,
            BusinessTable::EligibilityChecks,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BusinessTable::PriorAuthorizations => "prior_authorizations",
            BusinessTable::ClaimSubmissions => "claim_submissions",
            BusinessTable::AdvancedAuthorizations => "advanced_authorizations",
            BusinessTable::Communications => "communications",
            BusinessTable::EligibilityChecks => "eligibility_checks",
        }
    }
}

impl fmt::Display for BusinessTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BusinessTable {
    type Err = PollError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BusinessTable::all()
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| invalid("business table", s))
    }
}

// ---------------------------------------------------------------------------
// RecordStatus
// ---------------------------------------------------------------------------

/// Status written back onto a business record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Request sent, awaiting the exchange.
    Pending,
    Queued,
    Approved,
    Partial,
    Rejected,
    Received,
    Responded,
    Cancelled,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Queued => "queued",
            RecordStatus::Approved => "approved",
            RecordStatus::Partial => "partial",
            RecordStatus::Rejected => "rejected",
            RecordStatus::Received => "received",
            RecordStatus::Responded => "responded",
            RecordStatus::Cancelled => "cancelled",
        }
    }

    /// Whether an inbound response may still be applied to a record in this state.
    pub fn accepts_responses(self) -> bool {
        !matches!(self, RecordStatus::Cancelled)
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordStatus {
    type Err = PollError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RecordStatus::Pending),
            "queued" => Ok(RecordStatus::Queued),
            "approved" => Ok(RecordStatus::Approved),
            "partial" => Ok(RecordStatus::Partial),
            "rejected" => Ok(RecordStatus::Rejected),
            "received" => Ok(RecordStatus::Received),
            "responded" => Ok(RecordStatus::Responded),
            "cancelled" => Ok(RecordStatus::Cancelled),
            _ => Err(invalid("record status", s)),
        }
    }
}

fn invalid(kind: &'static str, value: &str) -> PollError {
    PollError::InvalidValue {
        kind,
        value: value.to_string(),
    }
}
