//! [`RemoteStore`] over a JSON REST document service.
//!
//! Routes, relative to `remote.base_url`:
//!
//! ```text
//!   POST  /plaque                      → Plaque (new, empty)
//!   GET   /plaque/{id}                 → Plaque
//!   PATCH /plaque/{id}                 {updates: [FieldUpdate]}
//!   POST  /token-meta                  TokenMeta → TokenMeta
//!   GET   /token-meta/{id}             → TokenMeta
//!   POST  /token-meta/batch-get        {ids} → {documents: [TokenMeta]}
//!   PATCH /token-meta/{id}             {updates: [FieldUpdate]}
//!   GET   /token-meta?field=&op=&value= → {documents: [TokenMeta]}
//! ```
//!
//! The service has no push channel, so `listen_plaque` polls.

use crate::remote::{PlaqueSubscription, RemoteStore};
use anyhow::Context;
use async_trait::async_trait;
use plaque_proto::config::RemoteConfig;
use plaque_proto::model::{FieldUpdate, Plaque, TokenMeta, TokenMetaQuery};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct HttpRemoteStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    poll_interval: Duration,
}

#[derive(Serialize)]
struct UpdateBody<'a> {
    updates: &'a [FieldUpdate],
}

#[derive(Serialize)]
struct BatchGetBody<'a> {
    ids: &'a [String],
}

#[derive(Deserialize)]
struct DocumentList {
    documents: Vec<TokenMeta>,
}

impl HttpRemoteStore {
    pub fn new(config: &RemoteConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("building remote store http client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    async fn send_json<T: serde::de::DeserializeOwned>(&self, req: RequestBuilder) -> anyhow::Result<T> {
        let resp = self.authed(req).send().await?.error_for_status()?;
        Ok(resp.json::<T>().await?)
    }

    async fn send_empty(&self, req: RequestBuilder) -> anyhow::Result<()> {
        self.authed(req).send().await?.error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn create_plaque(&self) -> anyhow::Result<Plaque> {
        let plaque: Plaque = self
            .send_json(self.client.post(self.url("/plaque")).json(&serde_json::json!({})))
            .await
            .context("create plaque")?;
        if plaque.document_id.is_empty() {
            anyhow::bail!("remote store returned a plaque without a document id");
        }
        info!("remote: created plaque {}", plaque.document_id);
        Ok(plaque)
    }

    async fn get_plaque(&self, document_id: &str) -> anyhow::Result<Plaque> {
        self.send_json(self.client.get(self.url(&format!("/plaque/{}", document_id))))
            .await
            .with_context(|| format!("get plaque {}", document_id))
    }

    async fn update_plaque(
        &self,
        document_id: &str,
        updates: &[FieldUpdate],
    ) -> anyhow::Result<()> {
        self.send_empty(
            self.client
                .patch(self.url(&format!("/plaque/{}", document_id)))
                .json(&UpdateBody { updates }),
        )
        .await
        .with_context(|| format!("update plaque {}", document_id))
    }

    async fn listen_plaque(&self, document_id: &str) -> anyhow::Result<PlaqueSubscription> {
        let initial = self
            .get_plaque(document_id)
            .await
            .context("establishing plaque subscription")?;
        let (tx, subscription) = PlaqueSubscription::channel(8);
        let store = self.clone();
        let document_id = document_id.to_string();

        tokio::spawn(async move {
            let mut last = initial.clone();
            if tx.send(initial).await.is_err() {
                return;
            }
            let mut ticker = tokio::time::interval(store.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = tx.closed() => {
                        debug!("remote: plaque listener dropped, stopping poll");
                        return;
                    }
                }
                match store.get_plaque(&document_id).await {
                    Ok(plaque) if plaque != last => {
                        debug!("remote: plaque {} changed", document_id);
                        last = plaque.clone();
                        if tx.send(plaque).await.is_err() {
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("remote: plaque poll failed, ending subscription: {:#}", e);
                        return;
                    }
                }
            }
        });

        Ok(subscription)
    }

    async fn create_token_meta(&self, meta: &TokenMeta) -> anyhow::Result<TokenMeta> {
        self.send_json(self.client.post(self.url("/token-meta")).json(meta))
            .await
            .context("create token meta")
    }

    async fn get_token_meta(&self, document_id: &str) -> anyhow::Result<TokenMeta> {
        self.send_json(self.client.get(self.url(&format!("/token-meta/{}", document_id))))
            .await
            .with_context(|| format!("get token meta {}", document_id))
    }

    async fn get_token_meta_batch(
        &self,
        document_ids: &[String],
    ) -> anyhow::Result<Vec<TokenMeta>> {
        if document_ids.is_empty() {
            return Ok(Vec::new());
        }
        let list: DocumentList = self
            .send_json(
                self.client
                    .post(self.url("/token-meta/batch-get"))
                    .json(&BatchGetBody { ids: document_ids }),
            )
            .await
            .context("batch get token metas")?;
        order_by_ids(list.documents, document_ids)
    }

    async fn update_token_meta(
        &self,
        document_id: &str,
        updates: &[FieldUpdate],
    ) -> anyhow::Result<()> {
        self.send_empty(
            self.client
                .patch(self.url(&format!("/token-meta/{}", document_id)))
                .json(&UpdateBody { updates }),
        )
        .await
        .with_context(|| format!("update token meta {}", document_id))
    }

    async fn query_token_meta(&self, query: &TokenMetaQuery) -> anyhow::Result<Vec<TokenMeta>> {
        let value = serde_json::to_string(&query.value)?;
        let list: DocumentList = self
            .send_json(self.client.get(self.url("/token-meta")).query(&[
                ("field", query.field.as_str()),
                ("op", query.op.as_str()),
                ("value", value.as_str()),
            ]))
            .await
            .context("query token metas")?;
        Ok(list.documents)
    }
}

/// Puts batch results back into request order. The service may answer in any
/// order; a missing id fails the whole batch.
fn order_by_ids(documents: Vec<TokenMeta>, ids: &[String]) -> anyhow::Result<Vec<TokenMeta>> {
    let by_id: HashMap<String, TokenMeta> = documents
        .into_iter()
        .map(|m| (m.document_id.clone(), m))
        .collect();
    ids.iter()
        .map(|id| {
            by_id
                .get(id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("token meta {} missing from batch", id))
        })
        .collect()
}
