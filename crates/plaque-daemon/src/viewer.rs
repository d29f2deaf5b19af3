//! The viewer: wires cache, stager, reconciler, orchestrator, supervisor and
//! resolver together and owns the startup sequence.

use crate::media::MediaClient;
use crate::orchestrator::Orchestrator;
use crate::player::{Display, Player};
use crate::reconcile::Reconciler;
use crate::remote::RemoteStore;
use crate::resolver::StateResolver;
use crate::stager::MediaStager;
use crate::supervisor::{sleep_or_cancel, Supervisor};
use plaque_proto::cache::CacheStore;
use plaque_proto::config::Config;
use plaque_proto::error::{LoadError, ViewerError};
use plaque_proto::model::ViewerStateData;
use plaque_proto::state::StateManager;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// External collaborators the viewer drives.
#[derive(Clone)]
pub struct Collaborators {
    pub remote: Arc<dyn RemoteStore>,
    pub media: Arc<dyn MediaClient>,
    pub player: Arc<dyn Player>,
    pub display: Arc<dyn Display>,
}

pub struct Viewer {
    config: Config,
    cache: CacheStore,
    state: StateManager,
    player: Arc<dyn Player>,
    display: Arc<dyn Display>,
    orchestrator: Orchestrator,
    supervisor: Supervisor,
    resolver: StateResolver,
    cancel: CancellationToken,
}

impl Viewer {
    /// Builds the pipeline and starts the media worker, so it must run inside
    /// a tokio runtime.
    pub fn new(config: Config, collaborators: Collaborators) -> Self {
        let Collaborators {
            remote,
            media,
            player,
            display,
        } = collaborators;

        let cache = CacheStore::from_paths(&config.paths);
        let state = StateManager::new();
        let cancel = CancellationToken::new();

        let stager = MediaStager::spawn(
            media,
            config.paths.media_dir.clone(),
            config.stager.queue_capacity,
        );
        let reconciler = Reconciler::new(cache.clone(), remote.clone());
        let orchestrator = Orchestrator::new(
            reconciler,
            stager,
            player.clone(),
            display.clone(),
            config.paths.logo_file.clone(),
            config.timing.stage_wait(),
        );
        let supervisor = Supervisor::new(
            remote,
            orchestrator.clone(),
            state.clone(),
            config.timing.clone(),
            cancel.clone(),
        );
        let resolver = StateResolver::new(cache.clone(), state.clone(), player.clone());

        Self {
            config,
            cache,
            state,
            player,
            display,
            orchestrator,
            supervisor,
            resolver,
            cancel,
        }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    /// Cancelling it makes [`Viewer::startup`] return `Ok(())` at its next
    /// wait point.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn get_viewer_state(&self) -> ViewerStateData {
        self.resolver.resolve().await
    }

    /// Boots the viewer and runs the first cycle, retrying it until it
    /// succeeds. Then listens for changes for the rest of the process
    /// lifetime, unless `viewer.test_mode` is set.
    ///
    /// Fails only when no plaque exists locally and none can be created.
    pub async fn startup(&self) -> Result<(), ViewerError> {
        match self.run().await {
            Err(ViewerError::Cancelled) => {
                info!("viewer: shutting down");
                Ok(())
            }
            other => other,
        }
    }

    async fn run(&self) -> Result<(), ViewerError> {
        info!("viewer: starting up");
        self.state.set_loading(true).await;

        let player = self.player.clone();
        tokio::spawn(async move {
            if let Err(e) = player.init().await {
                warn!("viewer: player init failed: {:#}", e);
            }
        });
        let display = self.display.clone();
        tokio::spawn(async move {
            if let Err(e) = display.init().await {
                warn!("viewer: display init failed: {:#}", e);
            }
        });
        sleep_or_cancel(&self.cancel, self.config.timing.settle_delay()).await?;

        let plaque = match self.or_cancel(self.orchestrator.reconciler().load_plaque()).await {
            Ok(p) => p,
            Err(e) => {
                if !matches!(e, ViewerError::Cancelled) {
                    error!("viewer: {}", e);
                    self.state.finish_cycle(Err(LoadError::from(&e))).await;
                }
                return Err(e);
            }
        };
        info!("viewer: loaded plaque {}", plaque.document_id);

        let mut failures = 0u32;
        loop {
            match self.or_cancel(self.orchestrator.load_and_play(&plaque)).await {
                Ok(()) => break,
                Err(ViewerError::Cancelled) => return Err(ViewerError::Cancelled),
                Err(e) => {
                    self.state.set_load_err(LoadError::from(&e)).await;
                    let Some(delay) = self.config.timing.cycle_retry.delay_for(failures) else {
                        error!("viewer: first cycle failed, no retries left: {}", e);
                        self.state.finish_cycle(Err(LoadError::from(&e))).await;
                        return Err(e);
                    };
                    warn!("viewer: first cycle failed: {}; retrying in {:?}", e, delay);
                    failures += 1;
                    sleep_or_cancel(&self.cancel, delay).await?;
                }
            }
        }
        self.state.finish_cycle(Ok(())).await;
        info!("viewer: playback started");

        if self.config.viewer.test_mode {
            return Ok(());
        }
        self.supervisor.run(&plaque.document_id).await
    }

    async fn or_cancel<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, ViewerError>>,
    ) -> Result<T, ViewerError> {
        tokio::select! {
            r = fut => r,
            _ = self.cancel.cancelled() => Err(ViewerError::Cancelled),
        }
    }
}
