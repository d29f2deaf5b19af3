//! Which declared tokens are actually displayable.

use plaque_proto::cache::CacheStore;
use plaque_proto::model::TokenMeta;
use tracing::debug;

/// Returns the metas of `ids` that are cached locally and whose media file is
/// on disk, in input order.
pub async fn filter_valid(cache: &CacheStore, ids: &[String]) -> Vec<TokenMeta> {
    let mut valid = Vec::with_capacity(ids.len());
    for id in ids {
        let meta = match cache.read_token_meta(id).await {
            Ok(meta) => meta,
            Err(e) => {
                debug!("validity: {} has no usable metadata: {}", id, e);
                continue;
            }
        };
        if cache.media_present(&meta).await {
            valid.push(meta);
        } else {
            debug!("validity: {} media not present", id);
        }
    }
    valid
}

/// Validity check on metas already in hand, used by the orchestrator after
/// staging.
pub async fn retain_present(cache: &CacheStore, metas: Vec<TokenMeta>) -> Vec<TokenMeta> {
    let mut present = Vec::with_capacity(metas.len());
    for meta in metas {
        if cache.media_present(&meta).await {
            present.push(meta);
        }
    }
    present
}
