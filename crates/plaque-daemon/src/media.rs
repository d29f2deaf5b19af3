//! Media transfer seam: fetch artifact bytes from the archive or a URL.

use anyhow::Context;
use async_trait::async_trait;
use futures_util::StreamExt;
use plaque_proto::config::ArchiveConfig;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait MediaClient: Send + Sync {
    /// Fetches a content-addressed archive object by file name.
    async fn fetch_from_archive(&self, name: &str) -> anyhow::Result<Vec<u8>>;
    async fn fetch_from_url(&self, url: &str) -> anyhow::Result<Vec<u8>>;
}

/// Downloads over HTTP(S). Archive objects are addressed through a URL
/// template with a `{name}` placeholder.
pub struct HttpMediaClient {
    client: Client,
    url_template: String,
}

impl HttpMediaClient {
    pub fn new(config: &ArchiveConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("building media http client")?;
        Ok(Self {
            client,
            url_template: config.url_template.clone(),
        })
    }

    fn archive_url(&self, name: &str) -> String {
        self.url_template.replace("{name}", &encode_object_name(name))
    }

    async fn download(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("requesting {}", url))?
            .error_for_status()?;

        let mut body = Vec::with_capacity(initial_capacity(resp.content_length()));
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk.with_context(|| format!("reading body of {}", url))?);
        }
        debug!("media: downloaded {} bytes from {}", body.len(), url);
        Ok(body)
    }
}

#[async_trait]
impl MediaClient for HttpMediaClient {
    async fn fetch_from_archive(&self, name: &str) -> anyhow::Result<Vec<u8>> {
        let url = self.archive_url(name);
        self.download(&url)
            .await
            .with_context(|| format!("archive object {}", name))
    }

    async fn fetch_from_url(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        self.download(url).await
    }
}

/// Upper bound on the buffer reserved up front from `Content-Length`; the
/// header is server-controlled, so larger bodies grow as they stream in.
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

fn initial_capacity(content_length: Option<u64>) -> usize {
    content_length.unwrap_or(0).min(MAX_PREALLOC) as usize
}

/// Percent-encodes an object name for use as a single URL path segment.
fn encode_object_name(name: &str) -> String {
    url::form_urlencoded::byte_serialize(name.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}
