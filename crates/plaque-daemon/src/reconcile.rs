//! Local cache vs. remote store reconciliation. Remote wins on mismatch;
//! an unreachable remote degrades to whatever the cache holds.

use crate::remote::RemoteStore;
use plaque_proto::cache::CacheStore;
use plaque_proto::error::ViewerError;
use plaque_proto::model::{Plaque, TokenMeta};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct Reconciler {
    cache: CacheStore,
    remote: Arc<dyn RemoteStore>,
}

impl Reconciler {
    pub fn new(cache: CacheStore, remote: Arc<dyn RemoteStore>) -> Self {
        Self { cache, remote }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Loads the plaque, creating it remotely on first boot.
    pub async fn load_plaque(&self) -> Result<Plaque, ViewerError> {
        let local = match self.cache.read_plaque().await {
            Ok(p) => p,
            Err(e) => {
                if !e.is_not_found() {
                    warn!("reconcile: unreadable local plaque, bootstrapping: {}", e);
                }
                return self.bootstrap_plaque().await;
            }
        };

        let remote = match self.remote.get_plaque(&local.document_id).await {
            Ok(p) => p,
            Err(e) => {
                warn!(
                    "reconcile: remote plaque {} unavailable, using cache: {:#}",
                    local.document_id, e
                );
                return Ok(local);
            }
        };

        if remote == local {
            debug!("reconcile: plaque {} unchanged", local.document_id);
            return Ok(local);
        }
        info!("reconcile: plaque {} changed remotely", remote.document_id);
        self.cache.write_plaque(&remote).await?;
        Ok(remote)
    }

    async fn bootstrap_plaque(&self) -> Result<Plaque, ViewerError> {
        let plaque = self
            .remote
            .create_plaque()
            .await
            .map_err(ViewerError::Bootstrap)?;
        info!("reconcile: created plaque {}", plaque.document_id);
        self.cache.write_plaque(&plaque).await?;
        Ok(plaque)
    }

    /// Loads the metas the plaque references.
    ///
    /// Online, the result is the remote list in remote order. Offline, it is
    /// the subset already cached; ids never cached are skipped.
    pub async fn load_token_metas(&self, plaque: &Plaque) -> Result<Vec<TokenMeta>, ViewerError> {
        let mut local: HashMap<String, TokenMeta> = HashMap::new();
        let mut local_order = Vec::new();
        for id in &plaque.token_meta_id_list {
            match self.cache.read_token_meta(id).await {
                Ok(meta) => {
                    local_order.push(id.clone());
                    local.insert(id.clone(), meta);
                }
                Err(e) if e.is_not_found() => debug!("reconcile: token meta {} not cached", id),
                Err(e) => warn!("reconcile: skipping token meta {}: {}", id, e),
            }
        }

        let remote = match self
            .remote
            .get_token_meta_batch(&plaque.token_meta_id_list)
            .await
        {
            Ok(metas) => metas,
            Err(e) => {
                warn!(
                    "reconcile: remote token metas unavailable, using {} cached: {:#}",
                    local_order.len(),
                    e
                );
                return Ok(local_order
                    .iter()
                    .filter_map(|id| local.remove(id))
                    .collect());
            }
        };

        for meta in &remote {
            if local.get(&meta.document_id) != Some(meta) {
                info!("reconcile: token meta {} changed remotely", meta.document_id);
                self.cache.write_token_meta(meta).await?;
            }
        }
        Ok(remote)
    }
}
