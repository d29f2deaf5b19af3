#![allow(dead_code)]

use async_trait::async_trait;
use plaque_daemon::media::MediaClient;
use plaque_daemon::player::{Display, Player};
use plaque_daemon::remote::{PlaqueSubscription, RemoteStore};
use plaque_daemon::viewer::{Collaborators, Viewer};
use plaque_proto::config::{Config, PathsConfig, RetryPolicy, TimingConfig, ViewerConfig};
use plaque_proto::model::{FieldUpdate, Plaque, TokenMeta, TokenMetaQuery};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

/// In-memory document store. Can be switched offline, and counts calls.
#[derive(Default)]
pub struct MemoryRemote {
    plaques: Mutex<HashMap<String, Plaque>>,
    metas: Mutex<HashMap<String, TokenMeta>>,
    subscribers: Mutex<Vec<mpsc::Sender<Plaque>>>,
    pub offline: AtomicBool,
    pub listen_fails: AtomicBool,
    pub listen_calls: AtomicUsize,
    pub created: AtomicUsize,
}

impl MemoryRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn put_plaque(&self, plaque: Plaque) {
        self.plaques
            .lock()
            .unwrap()
            .insert(plaque.document_id.clone(), plaque);
    }

    pub fn put_meta(&self, meta: TokenMeta) {
        self.metas
            .lock()
            .unwrap()
            .insert(meta.document_id.clone(), meta);
    }

    /// Stores `plaque` and notifies every live subscription.
    pub async fn push_plaque(&self, plaque: Plaque) {
        self.put_plaque(plaque.clone());
        let subscribers: Vec<_> = self.subscribers.lock().unwrap().clone();
        for tx in subscribers {
            let _ = tx.send(plaque.clone()).await;
        }
    }

    /// Ends every live subscription.
    pub fn drop_subscriptions(&self) {
        self.subscribers.lock().unwrap().clear();
    }

    fn check_online(&self) -> anyhow::Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            anyhow::bail!("remote store unreachable");
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn create_plaque(&self) -> anyhow::Result<Plaque> {
        self.check_online()?;
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        let plaque = Plaque {
            document_id: format!("plaque-{}", n),
            ..Plaque::default()
        };
        self.put_plaque(plaque.clone());
        Ok(plaque)
    }

    async fn get_plaque(&self, document_id: &str) -> anyhow::Result<Plaque> {
        self.check_online()?;
        self.plaques
            .lock()
            .unwrap()
            .get(document_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no plaque {}", document_id))
    }

    async fn update_plaque(&self, document_id: &str, updates: &[FieldUpdate]) -> anyhow::Result<()> {
        self.check_online()?;
        let mut plaques = self.plaques.lock().unwrap();
        let plaque = plaques
            .get_mut(document_id)
            .ok_or_else(|| anyhow::anyhow!("no plaque {}", document_id))?;
        let mut doc = serde_json::to_value(&*plaque)?;
        for u in updates {
            doc[u.path.as_str()] = u.value.clone();
        }
        *plaque = serde_json::from_value(doc)?;
        Ok(())
    }

    async fn listen_plaque(&self, document_id: &str) -> anyhow::Result<PlaqueSubscription> {
        self.listen_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        if self.listen_fails.load(Ordering::SeqCst) {
            anyhow::bail!("listen refused");
        }
        let current = self.get_plaque(document_id).await?;
        let (tx, sub) = PlaqueSubscription::channel(16);
        // like most document stores, deliver the current snapshot first
        let _ = tx.send(current).await;
        self.subscribers.lock().unwrap().push(tx);
        Ok(sub)
    }

    async fn create_token_meta(&self, meta: &TokenMeta) -> anyhow::Result<TokenMeta> {
        self.check_online()?;
        self.put_meta(meta.clone());
        Ok(meta.clone())
    }

    async fn get_token_meta(&self, document_id: &str) -> anyhow::Result<TokenMeta> {
        self.check_online()?;
        self.metas
            .lock()
            .unwrap()
            .get(document_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no token meta {}", document_id))
    }

    async fn get_token_meta_batch(&self, document_ids: &[String]) -> anyhow::Result<Vec<TokenMeta>> {
        self.check_online()?;
        let metas = self.metas.lock().unwrap();
        document_ids
            .iter()
            .map(|id| {
                metas
                    .get(id)
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("no token meta {}", id))
            })
            .collect()
    }

    async fn update_token_meta(&self, document_id: &str, updates: &[FieldUpdate]) -> anyhow::Result<()> {
        self.check_online()?;
        let mut metas = self.metas.lock().unwrap();
        let meta = metas
            .get_mut(document_id)
            .ok_or_else(|| anyhow::anyhow!("no token meta {}", document_id))?;
        let mut doc = serde_json::to_value(&*meta)?;
        for u in updates {
            doc[u.path.as_str()] = u.value.clone();
        }
        *meta = serde_json::from_value(doc)?;
        Ok(())
    }

    async fn query_token_meta(&self, query: &TokenMetaQuery) -> anyhow::Result<Vec<TokenMeta>> {
        self.check_online()?;
        let metas = self.metas.lock().unwrap();
        let mut found: Vec<TokenMeta> = metas
            .values()
            .filter(|m| {
                serde_json::to_value(m)
                    .map(|v| v[query.field.as_str()] == query.value)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| a.document_id.cmp(&b.document_id));
        Ok(found)
    }
}

/// Media source backed by maps; records which path served each request.
#[derive(Default)]
pub struct MemoryMedia {
    archive: Mutex<HashMap<String, Vec<u8>>>,
    urls: Mutex<HashMap<String, Vec<u8>>>,
    archive_hits: Mutex<Vec<String>>,
    url_hits: Mutex<Vec<String>>,
}

impl MemoryMedia {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put_archive(&self, name: &str, bytes: &[u8]) {
        self.archive
            .lock()
            .unwrap()
            .insert(name.to_string(), bytes.to_vec());
    }

    pub fn put_url(&self, url: &str, bytes: &[u8]) {
        self.urls
            .lock()
            .unwrap()
            .insert(url.to_string(), bytes.to_vec());
    }

    pub fn archive_hits(&self) -> Vec<String> {
        self.archive_hits.lock().unwrap().clone()
    }

    pub fn url_hits(&self) -> Vec<String> {
        self.url_hits.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaClient for MemoryMedia {
    async fn fetch_from_archive(&self, name: &str) -> anyhow::Result<Vec<u8>> {
        self.archive_hits.lock().unwrap().push(name.to_string());
        self.archive
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("archive has no {}", name))
    }

    async fn fetch_from_url(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        self.url_hits.lock().unwrap().push(url.to_string());
        self.urls
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("404 for {}", url))
    }
}

/// Records playlists. Reports the first entry of the last playlist as the
/// playing file unless a file has been scripted.
#[derive(Default)]
pub struct RecordingPlayer {
    playlists: Mutex<Vec<Vec<String>>>,
    scripted: Mutex<Option<Option<String>>>,
    pub fail_play: AtomicBool,
    pub status_fails: AtomicBool,
}

impl RecordingPlayer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn playlists(&self) -> Vec<Vec<String>> {
        self.playlists.lock().unwrap().clone()
    }

    pub fn last_playlist(&self) -> Vec<String> {
        self.playlists().last().cloned().unwrap_or_default()
    }

    pub fn script_playing(&self, file: Option<&str>) {
        *self.scripted.lock().unwrap() = Some(file.map(|f| f.to_string()));
    }
}

/// File name of a playlist entry (a `file://` URL).
pub fn entry_file_name(entry: &str) -> Option<String> {
    let path = url::Url::parse(entry).ok()?.to_file_path().ok()?;
    path.file_name()?.to_str().map(|s| s.to_string())
}

#[async_trait]
impl Player for RecordingPlayer {
    async fn init(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn play_files(&self, paths: &[String]) -> anyhow::Result<()> {
        if self.fail_play.load(Ordering::SeqCst) {
            anyhow::bail!("player not running");
        }
        self.playlists.lock().unwrap().push(paths.to_vec());
        Ok(())
    }

    async fn currently_playing_file(&self) -> anyhow::Result<Option<String>> {
        if self.status_fails.load(Ordering::SeqCst) {
            anyhow::bail!("status timeout");
        }
        if let Some(scripted) = self.scripted.lock().unwrap().clone() {
            return Ok(scripted);
        }
        Ok(self
            .playlists
            .lock()
            .unwrap()
            .last()
            .and_then(|p| p.first())
            .and_then(|e| entry_file_name(e)))
    }
}

#[derive(Default)]
pub struct RecordingDisplay {
    navigations: Mutex<Vec<String>>,
}

impl RecordingDisplay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().unwrap().clone()
    }
}

#[async_trait]
impl Display for RecordingDisplay {
    async fn init(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn navigate(&self, token_meta_id: &str) -> anyhow::Result<()> {
        self.navigations
            .lock()
            .unwrap()
            .push(token_meta_id.to_string());
        Ok(())
    }
}

/// Config rooted in `dir` with millisecond timings.
pub fn test_config(dir: &Path, test_mode: bool) -> Config {
    Config {
        paths: PathsConfig::rooted_at(dir),
        timing: TimingConfig {
            settle_delay_ms: 0,
            listen_grace_ms: 100,
            stage_wait_ms: 2_000,
            cycle_retry: RetryPolicy::fixed(Duration::from_millis(20)),
            listen_retry: RetryPolicy::fixed(Duration::from_millis(20)),
        },
        viewer: ViewerConfig { test_mode },
        ..Config::default()
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub remote: Arc<MemoryRemote>,
    pub media: Arc<MemoryMedia>,
    pub player: Arc<RecordingPlayer>,
    pub display: Arc<RecordingDisplay>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            remote: MemoryRemote::new(),
            media: MemoryMedia::new(),
            player: RecordingPlayer::new(),
            display: RecordingDisplay::new(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn viewer(&self, test_mode: bool) -> Arc<Viewer> {
        self.viewer_with(test_config(self.root(), test_mode))
    }

    pub fn viewer_with(&self, config: Config) -> Arc<Viewer> {
        Arc::new(Viewer::new(
            config,
            Collaborators {
                remote: self.remote.clone(),
                media: self.media.clone(),
                player: self.player.clone(),
                display: self.display.clone(),
            },
        ))
    }

    /// Writes `plaque` as the local cache file.
    pub fn cache_plaque(&self, plaque: &Plaque) {
        std::fs::write(
            self.root().join("plaque.json"),
            serde_json::to_vec(plaque).unwrap(),
        )
        .unwrap();
    }

    pub fn cache_meta(&self, meta: &TokenMeta) {
        let dir = self.root().join("metadata");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(format!("{}.json", meta.document_id)),
            serde_json::to_vec(meta).unwrap(),
        )
        .unwrap();
    }

    pub fn put_media_file(&self, name: &str) {
        let dir = self.root().join("media");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(name), name.as_bytes()).unwrap();
    }

    pub fn media_entry(&self, name: &str) -> String {
        plaque_daemon::orchestrator::playlist_entry(&self.root().join("media").join(name))
    }

    pub fn logo_entry(&self) -> String {
        plaque_daemon::orchestrator::playlist_entry(&self.root().join("logo.png"))
    }
}

pub fn plaque(id: &str, wallet: &str, tokens: &[&str]) -> Plaque {
    Plaque {
        document_id: id.to_string(),
        name: "gallery".to_string(),
        wallet_address: wallet.to_string(),
        token_meta_id_list: tokens.iter().map(|t| t.to_string()).collect(),
    }
}

/// Token whose media comes from the archive as `<media_id>.mp4`.
pub fn archive_token(id: &str, media_id: &str) -> TokenMeta {
    TokenMeta {
        document_id: id.to_string(),
        name: format!("work {}", id),
        artist: "anon".to_string(),
        media_id: media_id.to_string(),
        media_type: ".mp4".to_string(),
        ..TokenMeta::default()
    }
}

pub fn external_token(id: &str, url: &str) -> TokenMeta {
    TokenMeta {
        document_id: id.to_string(),
        name: format!("work {}", id),
        external_media_url: url.to_string(),
        ..TokenMeta::default()
    }
}

/// Polls `check` every few milliseconds until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check().await
}

/// Waits up to two seconds for the viewer to report `state`.
pub async fn wait_for_state(viewer: &Viewer, state: plaque_proto::model::ViewerState) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if viewer.get_viewer_state().await.state == state {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
