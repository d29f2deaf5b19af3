//! Change-listen supervisor.
//!
//! ```text
//!   listen task                              cycle task
//!   ───────────                              ──────────
//!   establishing ── err ─► load_err, sleep   wait for newest plaque
//!        │ ok                                    │
//!        ▼                                       ▼
//!   listening ── event in grace ─► drop     begin_cycle (or keep error on retry) → load_and_play
//!        │ later event                           │   newer plaque arrives ─► Superseded, restart
//!        └──────────► watch::Sender ───────►     ▼
//!        │ stream ends ─► sleep, re-establish  finish_cycle(result), retry on error
//! ```
//!
//! The watch channel holds a single slot, so a burst of changes collapses
//! into one cycle for the newest document.

use crate::orchestrator::Orchestrator;
use crate::remote::{PlaqueSubscription, RemoteStore};
use plaque_proto::config::TimingConfig;
use plaque_proto::error::{LoadError, ViewerError};
use plaque_proto::model::Plaque;
use plaque_proto::state::StateManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Sleeps for `delay` unless `cancel` fires first.
pub async fn sleep_or_cancel(cancel: &CancellationToken, delay: Duration) -> Result<(), ViewerError> {
    tokio::select! {
        _ = tokio::time::sleep(delay) => Ok(()),
        _ = cancel.cancelled() => Err(ViewerError::Cancelled),
    }
}

#[derive(Clone)]
pub struct Supervisor {
    remote: Arc<dyn RemoteStore>,
    orchestrator: Orchestrator,
    state: StateManager,
    timing: TimingConfig,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        orchestrator: Orchestrator,
        state: StateManager,
        timing: TimingConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            remote,
            orchestrator,
            state,
            timing,
            cancel,
        }
    }

    /// Listens for changes to `plaque_id` and replays the pipeline on each.
    ///
    /// Only returns on cancellation, or if a retry policy with an attempt
    /// limit runs out.
    pub async fn run(&self, plaque_id: &str) -> Result<(), ViewerError> {
        let (tx, rx) = watch::channel::<Option<Plaque>>(None);
        info!("supervisor: listening to changes for plaque {}", plaque_id);
        tokio::select! {
            r = self.listen(plaque_id, tx) => r,
            r = self.run_cycles(rx) => r,
        }
    }

    async fn listen(&self, plaque_id: &str, tx: watch::Sender<Option<Plaque>>) -> Result<(), ViewerError> {
        let mut failures = 0u32;
        loop {
            let subscription = tokio::select! {
                r = self.remote.listen_plaque(plaque_id) => r,
                _ = self.cancel.cancelled() => return Err(ViewerError::Cancelled),
            };
            match subscription {
                Ok(sub) => {
                    failures = 0;
                    self.state.clear_subscription_err().await;
                    self.forward(sub, &tx).await?;
                    info!("supervisor: subscription ended, re-establishing");
                    let delay = self.timing.listen_retry.delay_for(0).unwrap_or_default();
                    sleep_or_cancel(&self.cancel, delay).await?;
                }
                Err(e) => {
                    let err = ViewerError::Subscription(e);
                    self.state.set_load_err(LoadError::from(&err)).await;
                    let delay = match self.timing.listen_retry.delay_for(failures) {
                        Some(d) => d,
                        None => {
                            warn!("supervisor: {}; giving up", err);
                            return Err(err);
                        }
                    };
                    warn!("supervisor: {}; retrying in {:?}", err, delay);
                    failures += 1;
                    sleep_or_cancel(&self.cancel, delay).await?;
                }
            }
        }
    }

    /// Pushes subscription events to the cycle task until the stream ends.
    async fn forward(
        &self,
        mut sub: PlaqueSubscription,
        tx: &watch::Sender<Option<Plaque>>,
    ) -> Result<(), ViewerError> {
        let started = Instant::now();
        let grace = self.timing.listen_grace();
        loop {
            let next = tokio::select! {
                p = sub.recv() => p,
                _ = self.cancel.cancelled() => return Err(ViewerError::Cancelled),
            };
            let Some(plaque) = next else {
                return Ok(());
            };
            if started.elapsed() < grace {
                // initial snapshot; the device already shows this state
                debug!("supervisor: ignoring change within listen grace window");
                continue;
            }
            info!("supervisor: plaque {} changed", plaque.document_id);
            tx.send_replace(Some(plaque));
        }
    }

    async fn run_cycles(&self, mut rx: watch::Receiver<Option<Plaque>>) -> Result<(), ViewerError> {
        loop {
            tokio::select! {
                r = rx.changed() => {
                    if r.is_err() {
                        return Ok(());
                    }
                }
                _ = self.cancel.cancelled() => return Err(ViewerError::Cancelled),
            }

            let mut failures = 0u32;
            loop {
                let plaque = rx.borrow_and_update().clone();
                let Some(plaque) = plaque else {
                    break;
                };
                // a retry keeps the last error visible until a cycle succeeds
                let fresh = failures == 0;
                match self.run_cycle(&plaque, fresh, &mut rx).await {
                    Ok(()) => break,
                    Err(ViewerError::Superseded) => {
                        info!("supervisor: newer plaque arrived, restarting cycle");
                        failures = 0;
                    }
                    Err(ViewerError::Cancelled) => return Err(ViewerError::Cancelled),
                    Err(e) => {
                        let Some(delay) = self.timing.cycle_retry.delay_for(failures) else {
                            warn!("supervisor: cycle failed, no retries left: {}", e);
                            break;
                        };
                        warn!("supervisor: cycle failed: {}; retrying in {:?}", e, delay);
                        failures += 1;
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            Ok(()) = rx.changed() => failures = 0,
                            _ = self.cancel.cancelled() => return Err(ViewerError::Cancelled),
                        }
                    }
                }
            }
        }
    }

    /// One cycle for `plaque`, abandoned if a newer plaque lands in `rx`.
    /// `fresh` is false when retrying the same document after a failure.
    async fn run_cycle(
        &self,
        plaque: &Plaque,
        fresh: bool,
        rx: &mut watch::Receiver<Option<Plaque>>,
    ) -> Result<(), ViewerError> {
        if fresh {
            self.state.begin_cycle().await;
        } else {
            self.state.set_loading(true).await;
        }
        let work = async {
            self.orchestrator
                .reconciler()
                .cache()
                .write_plaque(plaque)
                .await?;
            self.orchestrator.load_and_play(plaque).await
        };
        let result = tokio::select! {
            r = work => r,
            Ok(()) = rx.changed() => Err(ViewerError::Superseded),
            _ = self.cancel.cancelled() => Err(ViewerError::Cancelled),
        };
        match &result {
            Ok(()) => self.state.finish_cycle(Ok(())).await,
            // the next cycle starts right away and keeps loading set
            Err(ViewerError::Superseded) => {}
            Err(ViewerError::Cancelled) => self.state.set_loading(false).await,
            Err(e) => self.state.finish_cycle(Err(LoadError::from(e))).await,
        }
        result
    }
}
