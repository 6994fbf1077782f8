use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use nphies_core::error::PollError;

// ---------------------------------------------------------------------------
// AppError
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    pub fn join(err: tokio::task::JoinError) -> Self {
        Self(anyhow::anyhow!("task join error: {err}"))
    }
}

fn status_for(err: &PollError) -> StatusCode {
    match err {
        PollError::AlreadyRunning => StatusCode::CONFLICT,
        PollError::LogNotFound(_) | PollError::RecordNotFound { .. } => StatusCode::NOT_FOUND,
        PollError::InvalidRecordState { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        PollError::InvalidPagination(_)
        | PollError::InvalidValue { .. }
        | PollError::NotInitialized => StatusCode::BAD_REQUEST,
        PollError::Transport(_) | PollError::MalformedBundle(_) => StatusCode::BAD_GATEWAY,
        PollError::AlreadyFinalized(_)
        | PollError::MessageNotPending(_)
        | PollError::InvalidConfig(_)
        | PollError::Store(_)
        | PollError::Sqlite(_)
        | PollError::Io(_)
        | PollError::Yaml(_)
        | PollError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self
            .0
            .downcast_ref::<PollError>()
            .map(status_for)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
