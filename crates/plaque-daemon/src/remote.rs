//! Remote document store seam.
//!
//! The store holds last-writer-wins documents of two kinds, plaques and token
//! metas. Everything the viewer needs from it goes through [`RemoteStore`];
//! the production implementation lives in [`crate::remote_http`].

use async_trait::async_trait;
use plaque_proto::model::{FieldUpdate, Plaque, TokenMeta, TokenMetaQuery};
use tokio::sync::mpsc;

/// Stream of plaque snapshots from an established subscription.
///
/// Most stores deliver the current document as soon as the subscription is
/// set up, before any real change. The channel closes when the subscription
/// ends; the supervisor then re-establishes it.
pub struct PlaqueSubscription {
    rx: mpsc::Receiver<Plaque>,
}

impl PlaqueSubscription {
    pub fn new(rx: mpsc::Receiver<Plaque>) -> Self {
        Self { rx }
    }

    /// Creates a subscription fed by the returned sender.
    pub fn channel(capacity: usize) -> (mpsc::Sender<Plaque>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }

    pub async fn recv(&mut self) -> Option<Plaque> {
        self.rx.recv().await
    }
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Creates an empty plaque and returns it with its assigned id.
    async fn create_plaque(&self) -> anyhow::Result<Plaque>;
    async fn get_plaque(&self, document_id: &str) -> anyhow::Result<Plaque>;
    async fn update_plaque(&self, document_id: &str, updates: &[FieldUpdate])
        -> anyhow::Result<()>;
    /// Fails only if the subscription cannot be established.
    async fn listen_plaque(&self, document_id: &str) -> anyhow::Result<PlaqueSubscription>;

    async fn create_token_meta(&self, meta: &TokenMeta) -> anyhow::Result<TokenMeta>;
    async fn get_token_meta(&self, document_id: &str) -> anyhow::Result<TokenMeta>;
    /// Returns the metas in the order of `document_ids`; fails if any is missing.
    async fn get_token_meta_batch(&self, document_ids: &[String])
        -> anyhow::Result<Vec<TokenMeta>>;
    async fn update_token_meta(
        &self,
        document_id: &str,
        updates: &[FieldUpdate],
    ) -> anyhow::Result<()>;
    async fn query_token_meta(&self, query: &TokenMetaQuery) -> anyhow::Result<Vec<TokenMeta>>;
}
