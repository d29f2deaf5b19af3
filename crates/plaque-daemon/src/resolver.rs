//! Derives the viewer state on demand. Nothing is stored between calls;
//! every query reads the runtime flags, the cache and the player afresh.

use crate::player::Player;
use crate::validity::filter_valid;
use plaque_proto::cache::CacheStore;
use plaque_proto::error::LoadError;
use plaque_proto::model::{TokenMeta, ViewerState, ViewerStateData};
use plaque_proto::state::StateManager;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct StateResolver {
    cache: CacheStore,
    state: StateManager,
    player: Arc<dyn Player>,
}

impl StateResolver {
    pub fn new(cache: CacheStore, state: StateManager, player: Arc<dyn Player>) -> Self {
        Self {
            cache,
            state,
            player,
        }
    }

    /// Checks, in order: load error, loading, plaque readable, wallet
    /// attached, any valid token, player on a known token.
    pub async fn resolve(&self) -> ViewerStateData {
        let flags = self.state.get_state().await;
        if flags.load_err().is_some() {
            return ViewerStateData::bare(ViewerState::Error);
        }
        if flags.loading {
            return ViewerStateData::bare(ViewerState::Loading);
        }

        let plaque = match self.cache.read_plaque().await {
            Ok(p) => p,
            Err(e) => {
                warn!("resolver: cannot read plaque: {}", e);
                self.state
                    .set_load_err(LoadError::new(format!("cannot read plaque: {}", e)))
                    .await;
                return ViewerStateData::bare(ViewerState::Error);
            }
        };

        if !plaque.is_claimed() {
            return ViewerStateData::with_plaque(ViewerState::QrScan, plaque);
        }

        let valid = filter_valid(&self.cache, &plaque.token_meta_id_list).await;
        if valid.is_empty() {
            return ViewerStateData::with_plaque(ViewerState::NoValidTokens, plaque);
        }

        let active = match self.player.currently_playing_file().await {
            Ok(Some(file)) => token_for_file_name(&valid, &file).cloned(),
            Ok(None) => None,
            Err(e) => {
                debug!("resolver: player status unavailable: {:#}", e);
                None
            }
        };
        match active {
            Some(meta) => ViewerStateData {
                state: ViewerState::Display,
                plaque: Some(plaque),
                active_token_meta: Some(meta),
            },
            // the logo, or a file we did not queue
            None => ViewerStateData::with_plaque(ViewerState::Loading, plaque),
        }
    }
}

/// The token whose media file is `file_name`.
pub fn token_for_file_name<'a>(metas: &'a [TokenMeta], file_name: &str) -> Option<&'a TokenMeta> {
    metas.iter().find(|m| m.matches_file_name(file_name))
}
