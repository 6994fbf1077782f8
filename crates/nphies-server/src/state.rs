use std::sync::Arc;

use nphies_core::store::PollStore;
use nphies_core::Poller;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub poller: Arc<Poller>,
}

impl AppState {
    pub fn new(poller: Arc<Poller>) -> Self {
        Self { poller }
    }

    pub fn store(&self) -> Arc<PollStore> {
        Arc::clone(self.poller.store())
    }
}
