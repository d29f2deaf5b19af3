use crate::error::{LoadError, LoadErrorKind};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Runtime flags read by the state resolver and written by the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeState {
    /// Incremented on every change.
    pub rev: u64,
    /// A cycle is in progress.
    pub loading: bool,
    /// Last cycle failure; cleared when a cycle succeeds.
    pub cycle_err: Option<LoadError>,
    /// Set while the change subscription cannot be established.
    pub subscription_err: Option<LoadError>,
}

impl RuntimeState {
    /// The error to report, cycle failures first.
    pub fn load_err(&self) -> Option<&LoadError> {
        self.cycle_err.as_ref().or(self.subscription_err.as_ref())
    }
}

/// Owns the loading flag and the load errors. Every read and write takes the
/// lock, so they are always observed together.
#[derive(Debug, Clone, Default)]
pub struct StateManager {
    state: Arc<Mutex<RuntimeState>>,
}

impl StateManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_state(&self) -> RuntimeState {
        self.state.lock().await.clone()
    }

    /// A cycle for a new document starts: loading, previous cycle error
    /// forgotten.
    pub async fn begin_cycle(&self) {
        let mut state = self.state.lock().await;
        state.loading = true;
        state.cycle_err = None;
        state.rev += 1;
    }

    /// Marks loading without touching the errors, used when retrying a
    /// failed cycle.
    pub async fn set_loading(&self, loading: bool) {
        let mut state = self.state.lock().await;
        state.loading = loading;
        state.rev += 1;
    }

    /// Records `err` in the slot for its kind; the other kind is kept.
    pub async fn set_load_err(&self, err: LoadError) {
        let mut state = self.state.lock().await;
        match err.kind {
            LoadErrorKind::Cycle => state.cycle_err = Some(err),
            LoadErrorKind::Subscription => state.subscription_err = Some(err),
        }
        state.rev += 1;
    }

    /// Drops the subscription error once listening works again; cycle errors
    /// stay until a cycle succeeds.
    pub async fn clear_subscription_err(&self) {
        let mut state = self.state.lock().await;
        if state.subscription_err.take().is_some() {
            state.rev += 1;
        }
    }

    /// A cycle finished. `Ok` clears the error, `Err` records it.
    pub async fn finish_cycle(&self, result: Result<(), LoadError>) {
        let mut state = self.state.lock().await;
        state.loading = false;
        state.cycle_err = result.err();
        state.rev += 1;
    }
}
