use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use super::log::RunError;
use super::Poller;
use crate::classifier::{classify, ClassifiedMessage};
use crate::error::{PollError, Result, TransportError};
use crate::extract::extract;
use crate::fingerprint::fingerprint;
use crate::matcher::{MatchOutcome, Matcher};
use crate::reconciler::{Reconciler, Reconciliation};
use crate::store::{NewMessage, PollStore};
use crate::types::PollStatus;

/// What a run produced, before finalization.
#[derive(Debug)]
pub(super) struct RunOutcome {
    pub status: PollStatus,
    pub response_bundle: Option<String>,
    pub errors: Vec<RunError>,
}

impl RunOutcome {
    pub fn fatal(response_bundle: Option<String>, error: RunError) -> Self {
        Self {
            status: PollStatus::Error,
            response_bundle,
            errors: vec![error],
        }
    }

    fn completed(status: PollStatus, response_bundle: String) -> Self {
        Self {
            status,
            response_bundle: Some(response_bundle),
            errors: Vec::new(),
        }
    }
}

/// Run blocking store work off the async executor.
pub(super) async fn blocking<T, F>(store: &Arc<PollStore>, f: F) -> Result<T>
where
    F: FnOnce(&PollStore) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || f(&store))
        .await
        .map_err(|e| PollError::Store(format!("task join error: {e}")))?
}

/// Transport → extract → classify → persist → match/reconcile.
pub(super) async fn execute(poller: &Poller, log_id: i64, request: &str) -> Result<RunOutcome> {
    let response = match tokio::time::timeout(poller.timeout, poller.transport.poll(request)).await {
        Ok(Ok(body)) => body,
        Ok(Err(e)) => return Ok(transport_failure(log_id, e)),
        Err(_) => return Ok(transport_failure(log_id, TransportError::Timeout(poller.timeout))),
    };

    let raw = match extract(&response) {
        Ok(raw) => raw,
        Err(PollError::MalformedBundle(detail)) => {
            tracing::error!(
                poll_log_id = log_id,
                bytes = response.len(),
                error = %detail,
                "malformed response bundle"
            );
            return Ok(RunOutcome::fatal(
                Some(response),
                RunError::new("MalformedBundle", detail),
            ));
        }
        Err(e) => return Err(e),
    };
    if raw.is_empty() {
        return Ok(RunOutcome::completed(PollStatus::NoMessages, response));
    }

    // Persist every message as pending, in one transaction, before
    // reconciling any. A run finalized in the meantime persists nothing.
    let classified: Vec<(ClassifiedMessage, String)> = raw
        .into_iter()
        .map(|m| {
            let msg = classify(m);
            let fp = fingerprint(
                &msg.resource_type,
                msg.response_identifier.as_deref(),
                &msg.payload,
            );
            (msg, fp)
        })
        .collect();
    let persisted = blocking(&poller.store, move |store| {
        let ids = {
            let rows: Vec<NewMessage<'_>> = classified
                .iter()
                .map(|(msg, fp)| NewMessage {
                    entry_index: msg.entry_index,
                    resource_type: &msg.resource_type,
                    event_code: msg.event_code.as_deref(),
                    message_type: msg.message_type,
                    response_identifier: msg.response_identifier.as_deref(),
                    fingerprint: fp,
                    payload: &msg.payload,
                })
                .collect();
            store.insert_messages(log_id, &rows)?
        };
        Ok(ids
            .into_iter()
            .zip(classified)
            .map(|(id, (msg, fp))| (id, msg, fp))
            .collect::<Vec<_>>())
    })
    .await?;

    for (message_id, msg, fp) in persisted {
        let matching = poller.matching.clone();
        let result = blocking(&poller.store, move |store| {
            match Matcher::new(store, &matching).match_message(&msg) {
                Ok(outcome) => {
                    if let MatchOutcome::Unmatched { reason } = &outcome {
                        tracing::debug!(message_id, %reason, "message unmatched");
                    }
                    Reconciler::new(store).reconcile(message_id, &msg, &fp, &outcome)
                }
                Err(e) => {
                    let detail = format!("matching failed: {e}");
                    tracing::warn!(message_id, error = %detail, "matching failed");
                    store.fail_message(message_id, &detail)?;
                    Ok(Reconciliation::failed(detail))
                }
            }
        })
        .await?;
        tracing::debug!(
            poll_log_id = log_id,
            message_id,
            status = %result.status,
            "message processed"
        );
    }

    Ok(RunOutcome::completed(PollStatus::Success, response))
}

fn transport_failure(log_id: i64, err: TransportError) -> RunOutcome {
    tracing::error!(poll_log_id = log_id, code = err.code(), error = %err, "transport failed");
    RunOutcome::fatal(None, RunError::new(err.code(), err.to_string()))
}

/// Finalizes the log as cancelled if the run is dropped before it
/// finalizes normally.
pub(super) struct Finalizer {
    store: Arc<PollStore>,
    log_id: i64,
    started: Instant,
    armed: bool,
}

impl Finalizer {
    pub fn new(store: Arc<PollStore>, log_id: i64, started: Instant) -> Self {
        Self {
            store,
            log_id,
            started,
            armed: true,
        }
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for Finalizer {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let duration_ms = i64::try_from(self.started.elapsed().as_millis()).unwrap_or(i64::MAX);
        let errors = [RunError::new("Cancelled", "run dropped before completion")];
        match self.store.finalize_log(
            self.log_id,
            PollStatus::Error,
            Utc::now(),
            duration_ms,
            None,
            &errors,
        ) {
            Ok(_) => tracing::warn!(poll_log_id = self.log_id, "poll run dropped; log finalized"),
            Err(PollError::AlreadyFinalized(_)) => {}
            Err(e) => tracing::error!(poll_log_id = self.log_id, error = %e, "could not finalize dropped run"),
        }
    }
}
