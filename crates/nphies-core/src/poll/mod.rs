//! The poll orchestrator.
//!
//! ```text
//! idle ──trigger──▶ in_progress ──▶ success | no_messages | error
//! ```
//!
//! One run at a time. A trigger while a run is in progress fails with
//! [`PollError::AlreadyRunning`]; it is never queued. Every run that creates
//! a log finalizes it exactly once, including on timeout, cancellation, and
//! when the run future is dropped.

pub mod log;
mod runner;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex, Notify};

use crate::config::{Config, MatchingConfig};
use crate::error::{PollError, Result};
use crate::paths;
use crate::store::PollStore;
use crate::transport::{HttpTransport, Transport};
use crate::types::{PollStatus, TriggerType};

use self::log::{PollRun, RunError};
use self::runner::{Finalizer, RunOutcome};

/// Broadcast after a run is finalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollFinished {
    pub id: i64,
    pub trigger_type: TriggerType,
    pub status: PollStatus,
}

pub struct Poller {
    transport: Arc<dyn Transport>,
    store: Arc<PollStore>,
    matching: MatchingConfig,
    timeout: Duration,
    max_logs: Option<usize>,
    run_lock: Mutex<()>,
    cancel: Notify,
    events: broadcast::Sender<PollFinished>,
}

impl Poller {
    pub fn new(transport: Arc<dyn Transport>, store: Arc<PollStore>, config: &Config) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            transport,
            store,
            matching: config.matching.clone(),
            timeout: config.exchange.timeout(),
            max_logs: config.retention.max_logs,
            run_lock: Mutex::new(()),
            cancel: Notify::new(),
            events,
        }
    }

    /// Open the store under `root`, finalize any run a previous process left
    /// in progress, and poll the configured exchange over HTTP.
    pub fn from_config(root: &Path, config: &Config) -> Result<Self> {
        config.ensure_valid()?;
        let store = Arc::new(PollStore::open(&paths::db_path(root))?);
        let recovered = store.startup_recovery()?;
        if recovered > 0 {
            tracing::warn!(recovered, "finalized interrupted poll runs");
        }
        let transport = Arc::new(HttpTransport::new(&config.exchange)?);
        Ok(Self::new(transport, store, config))
    }

    /// Override the bound on the transport call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<PollStore> {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PollFinished> {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.run_lock.try_lock().is_err()
    }

    /// Signal the in-flight run to stop. Returns false when idle.
    pub fn cancel(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        self.cancel.notify_waiters();
        true
    }

    /// Run one poll end to end and return the finalized log with its
    /// messages. Fatal run errors are recorded on the log, not returned;
    /// `Err` means the run could not start or could not be finalized.
    pub async fn trigger(&self, trigger: TriggerType) -> Result<PollRun> {
        // Registered before the run lock is taken, so a cancel that sees this
        // run as running always reaches it.
        let cancelled = self.cancel.notified();
        tokio::pin!(cancelled);
        cancelled.as_mut().enable();

        let _running = self.run_lock.try_lock().map_err(|_| PollError::AlreadyRunning)?;

        let request = self.transport.request_bundle();
        let started_at = Utc::now();
        let clock = Instant::now();
        let log = {
            let request = request.clone();
            runner::blocking(&self.store, move |store| {
                store.create_log(trigger, started_at, Some(&request))
            })
            .await?
        };
        tracing::info!(poll_log_id = log.id, trigger = %trigger, "poll started");

        let mut finalizer = Finalizer::new(Arc::clone(&self.store), log.id, clock);
        let outcome = tokio::select! {
            biased;
            _ = &mut cancelled => {
                tracing::warn!(poll_log_id = log.id, "poll cancelled");
                RunOutcome::fatal(None, RunError::new("Cancelled", "run cancelled by operator"))
            }
            result = runner::execute(self, log.id, &request) => match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(poll_log_id = log.id, error = %e, "poll aborted");
                    RunOutcome::fatal(None, RunError::new("StoreError", e.to_string()))
                }
            },
        };

        let duration_ms = i64::try_from(clock.elapsed().as_millis()).unwrap_or(i64::MAX);
        let finalized = {
            let log_id = log.id;
            runner::blocking(&self.store, move |store| {
                store.finalize_log(
                    log_id,
                    outcome.status,
                    Utc::now(),
                    duration_ms,
                    outcome.response_bundle.as_deref(),
                    &outcome.errors,
                )
            })
            .await?
        };
        finalizer.disarm();

        tracing::info!(
            poll_log_id = finalized.id,
            status = %finalized.status,
            received = finalized.messages_received,
            matched = finalized.messages_matched,
            unmatched = finalized.messages_unmatched,
            errored = finalized.messages_errored,
            duration_ms,
            "poll finished"
        );

        if let Some(keep) = self.max_logs {
            let pruned = runner::blocking(&self.store, move |store| store.prune_logs(keep)).await?;
            if pruned > 0 {
                tracing::debug!(pruned, "pruned old poll logs");
            }
        }

        let messages = {
            let log_id = finalized.id;
            runner::blocking(&self.store, move |store| store.list_messages(log_id)).await?
        };
        // No subscribers is fine.
        let _ = self.events.send(PollFinished {
            id: finalized.id,
            trigger_type: finalized.trigger_type,
            status: finalized.status,
        });
        Ok(PollRun {
            log: finalized,
            messages,
        })
    }
}
