use std::time::Duration;

use thiserror::Error;

/// Failure of the outbound poll call. Never fatal past the transport
/// boundary: the orchestrator records it against the run and finalizes.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("exchange did not answer within {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("exchange rejected credentials (HTTP {0})")]
    Auth(u16),

    #[error("exchange returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport misconfigured: {0}")]
    Build(String),
}

impl TransportError {
    /// Stable code recorded in `PollLog.errors`.
    pub fn code(&self) -> &'static str {
        match self {
            TransportError::Timeout(_) => "TransportTimeout",
            TransportError::Network(_) => "TransportNetwork",
            TransportError::Auth(_) => "TransportAuth",
            TransportError::Status { .. } => "TransportStatus",
            TransportError::Build(_) => "TransportConfig",
        }
    }
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("not initialized: run 'nphies init'")]
    NotInitialized,

    #[error("poll already running")]
    AlreadyRunning,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("malformed bundle: {0}")]
    MalformedBundle(String),

    #[error("poll log not found: {0}")]
    LogNotFound(i64),

    #[error("poll log {0} is already finalized")]
    AlreadyFinalized(i64),

    #[error("message {0} is no longer pending")]
    MessageNotPending(i64),

    #[error("{table} record not found: {id}")]
    RecordNotFound { table: String, id: i64 },

    #[error("{table} record {id} is {status}: {reason}")]
    InvalidRecordState {
        table: String,
        id: i64,
        status: String,
        reason: String,
    },

    #[error("invalid {kind}: {value}")]
    InvalidValue { kind: &'static str, value: String },

    #[error("invalid pagination: {0}")]
    InvalidPagination(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("store error: {0}")]
    Store(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PollError>;
