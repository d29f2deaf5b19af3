//! One load-and-play cycle: logo, token metas, media, playlist.

use crate::player::{Display, Player};
use crate::reconcile::Reconciler;
use crate::stager::{MediaStager, Staged};
use crate::validity::retain_present;
use futures_util::future::join_all;
use plaque_proto::error::ViewerError;
use plaque_proto::model::Plaque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Clone)]
pub struct Orchestrator {
    reconciler: Reconciler,
    stager: MediaStager,
    player: Arc<dyn Player>,
    display: Arc<dyn Display>,
    logo_file: PathBuf,
    stage_wait: Duration,
}

impl Orchestrator {
    pub fn new(
        reconciler: Reconciler,
        stager: MediaStager,
        player: Arc<dyn Player>,
        display: Arc<dyn Display>,
        logo_file: PathBuf,
        stage_wait: Duration,
    ) -> Self {
        Self {
            reconciler,
            stager,
            player,
            display,
            logo_file,
            stage_wait,
        }
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Runs a cycle for `plaque`. Errors are meant to be retried as a whole
    /// by the caller; the logo stays up meanwhile.
    pub async fn load_and_play(&self, plaque: &Plaque) -> Result<(), ViewerError> {
        self.player
            .play_files(&[playlist_entry(&self.logo_file)])
            .await
            .map_err(ViewerError::Player)?;

        if !plaque.is_claimed() {
            info!("orchestrator: no wallet attached, showing logo");
            return Ok(());
        }
        if plaque.token_meta_id_list.is_empty() {
            info!("orchestrator: no tokens assigned, showing logo");
            return Ok(());
        }

        let metas = self.reconciler.load_token_metas(plaque).await?;
        info!("orchestrator: staging media for {} token(s)", metas.len());

        let mut tickets = Vec::new();
        for meta in &metas {
            match self.stager.ensure_media(meta).await {
                Ok(Staged::Present) => {}
                Ok(Staged::Queued(ticket)) => tickets.push(ticket),
                Err(e) => warn!("orchestrator: skipping {}: {}", meta.document_id, e),
            }
        }
        if !tickets.is_empty() {
            let pending = join_all(tickets.into_iter().map(|t| t.settled()));
            if tokio::time::timeout(self.stage_wait, pending).await.is_err() {
                warn!(
                    "orchestrator: media still downloading after {:?}, playing what is present",
                    self.stage_wait
                );
            }
        }

        let declared = plaque.token_meta_id_list.len();
        let valid = retain_present(self.reconciler.cache(), metas).await;
        if valid.is_empty() {
            return Err(ViewerError::NoValidTokens { declared });
        }
        if valid.len() != declared {
            warn!(
                "orchestrator: {} of {} token(s) playable, playing those",
                valid.len(),
                declared
            );
        }

        let cache = self.reconciler.cache();
        let playlist: Vec<String> = valid
            .iter()
            .filter_map(|m| m.media_file_name())
            .map(|name| playlist_entry(&cache.media_path(&name)))
            .collect();
        info!("orchestrator: playing playlist of {} token(s)", playlist.len());
        self.player
            .play_files(&playlist)
            .await
            .map_err(ViewerError::Player)?;

        let display = self.display.clone();
        let first = valid[0].document_id.clone();
        tokio::spawn(async move {
            if let Err(e) = display.navigate(&first).await {
                warn!("orchestrator: display navigation failed: {:#}", e);
            }
        });
        Ok(())
    }
}

/// Playlist form of a local file: an escaped `file://` URL, or the plain path
/// when it cannot be expressed as one.
pub fn playlist_entry(path: &Path) -> String {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(dir) => dir.join(path),
            Err(_) => path.to_path_buf(),
        }
    };
    match url::Url::from_file_path(&absolute) {
        Ok(u) => u.to_string(),
        Err(()) => absolute.to_string_lossy().into_owned(),
    }
}
