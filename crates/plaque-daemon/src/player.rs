//! Player and display seams.

use async_trait::async_trait;

/// The external media player.
#[async_trait]
pub trait Player: Send + Sync {
    async fn init(&self) -> anyhow::Result<()>;
    /// Replaces the playlist with `paths` and starts playing it.
    async fn play_files(&self, paths: &[String]) -> anyhow::Result<()>;
    /// File name (no directory) of what is on screen, `None` if unknown.
    async fn currently_playing_file(&self) -> anyhow::Result<Option<String>>;
}

/// The presentation layer. Best-effort: callers log failures and move on.
#[async_trait]
pub trait Display: Send + Sync {
    async fn init(&self) -> anyhow::Result<()>;
    async fn navigate(&self, token_meta_id: &str) -> anyhow::Result<()>;
}
