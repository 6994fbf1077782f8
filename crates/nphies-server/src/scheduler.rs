use std::sync::Arc;
use std::time::Duration;

use nphies_core::types::TriggerType;
use nphies_core::{PollError, Poller};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Used in place of a zero interval, which `tokio::time::interval` rejects.
const FALLBACK_INTERVAL: Duration = Duration::from_secs(1);

/// Trigger a scheduled poll every `interval`. A tick that lands while a run
/// is in progress is skipped, not queued.
pub fn spawn(poller: Arc<Poller>, interval: Duration) -> JoinHandle<()> {
    let interval = if interval.is_zero() {
        tracing::warn!(
            fallback_secs = FALLBACK_INTERVAL.as_secs(),
            "zero poll interval; using fallback"
        );
        FALLBACK_INTERVAL
    } else {
        interval
    };
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticker.tick().await;
        tracing::info!(interval_secs = interval.as_secs(), "poll scheduler started");
        loop {
            ticker.tick().await;
            match poller.trigger(TriggerType::Scheduled).await {
                Ok(run) => tracing::debug!(poll_log_id = run.log.id, status = %run.log.status, "scheduled poll done"),
                Err(PollError::AlreadyRunning) => {
                    tracing::info!("poll already running; skipping scheduled tick")
                }
                Err(e) => tracing::warn!(error = %e, "scheduled poll failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use nphies_core::config::Config;
    use nphies_core::error::TransportError;
    use nphies_core::store::PollStore;
    use nphies_core::transport::Transport;
    use nphies_core::types::PollStatus;

    struct EmptyExchange;

    impl Transport for EmptyExchange {
        fn request_bundle(&self) -> String {
            "{}".to_string()
        }

        fn poll<'a>(&'a self, _request: &'a str) -> BoxFuture<'a, Result<String, TransportError>> {
            Box::pin(async { Ok(r#"{"resourceType":"Bundle","entry":[]}"#.to_string()) })
        }
    }

    #[tokio::test]
    async fn scheduled_runs_are_triggered() {
        let store = Arc::new(PollStore::in_memory().unwrap());
        let poller = Arc::new(Poller::new(
            Arc::new(EmptyExchange),
            store,
            &Config::new("https://exchange.test/poll"),
        ));
        let mut rx = poller.subscribe();
        let handle = spawn(Arc::clone(&poller), Duration::from_millis(20));

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("scheduler should fire")
            .unwrap();
        assert_eq!(event.trigger_type, TriggerType::Scheduled);
        assert_eq!(event.status, PollStatus::NoMessages);
        handle.abort();
    }

    #[tokio::test]
    async fn zero_interval_falls_back_instead_of_panicking() {
        let store = Arc::new(PollStore::in_memory().unwrap());
        let poller = Arc::new(Poller::new(
            Arc::new(EmptyExchange),
            store,
            &Config::new("https://exchange.test/poll"),
        ));
        let mut rx = poller.subscribe();
        let handle = spawn(Arc::clone(&poller), Duration::ZERO);

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("scheduler should fire")
            .unwrap();
        assert_eq!(event.trigger_type, TriggerType::Scheduled);
        assert!(!handle.is_finished());
        handle.abort();
    }
}
