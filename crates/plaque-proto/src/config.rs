use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub stager: StagerConfig,
    #[serde(default)]
    pub viewer: ViewerConfig,
}

/// Locations of the local cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_plaque_file")]
    pub plaque_file: PathBuf,
    /// One `{document_id}.json` per token meta.
    #[serde(default = "default_metadata_dir")]
    pub metadata_dir: PathBuf,
    #[serde(default = "default_media_dir")]
    pub media_dir: PathBuf,
    /// Placeholder shown while loading and whenever nothing else can play.
    #[serde(default = "default_logo_file")]
    pub logo_file: PathBuf,
}

impl PathsConfig {
    /// All cache paths rooted under `dir`. Handy for tests and portable installs.
    pub fn rooted_at(dir: &std::path::Path) -> Self {
        Self {
            plaque_file: dir.join("plaque.json"),
            metadata_dir: dir.join("metadata"),
            media_dir: dir.join("media"),
            logo_file: dir.join("logo.png"),
        }
    }
}

/// Remote document store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_remote_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_remote_timeout_ms")]
    pub timeout_ms: u64,
}

/// Content-addressed media archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Download URL with a `{name}` placeholder for the object name.
    #[serde(default = "default_archive_url_template")]
    pub url_template: String,
    #[serde(default = "default_download_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    #[serde(default = "default_status_timeout_ms")]
    pub status_timeout_ms: u64,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

/// Kiosk browser showing the plaque page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_display_command")]
    pub command: String,
    #[serde(default = "default_display_args")]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl HttpConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.bind_address, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Time given to the player and display to come up before the first cycle.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Change callbacks arriving this soon after subscribing are ignored.
    #[serde(default = "default_listen_grace_ms")]
    pub listen_grace_ms: u64,
    /// Upper bound on waiting for queued media before re-checking the disk.
    #[serde(default = "default_stage_wait_ms")]
    pub stage_wait_ms: u64,
    #[serde(default = "RetryPolicy::cycle_default")]
    pub cycle_retry: RetryPolicy,
    #[serde(default = "RetryPolicy::listen_default")]
    pub listen_retry: RetryPolicy,
}

impl TimingConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn listen_grace(&self) -> Duration {
        Duration::from_millis(self.listen_grace_ms)
    }

    pub fn stage_wait(&self) -> Duration {
        Duration::from_millis(self.stage_wait_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagerConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ViewerConfig {
    /// Return from startup after the first successful cycle instead of
    /// entering the listen loop.
    #[serde(default)]
    pub test_mode: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

/// Delay schedule for a retry loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    pub kind: BackoffKind,
    pub delay_ms: u64,
    /// Ceiling for exponential growth.
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
    #[serde(default = "default_factor")]
    pub factor: f64,
    /// `None` retries forever.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            kind: BackoffKind::Fixed,
            delay_ms: delay.as_millis() as u64,
            max_delay_ms: None,
            factor: default_factor(),
            max_attempts: None,
        }
    }

    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            delay_ms: initial.as_millis() as u64,
            max_delay_ms: Some(max.as_millis() as u64),
            factor: default_factor(),
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    fn cycle_default() -> Self {
        Self::fixed(Duration::from_secs(5))
    }

    fn listen_default() -> Self {
        Self::fixed(Duration::from_secs(60))
    }

    /// Delay before retry number `attempt` (0-based), or `None` once the
    /// attempt budget is spent.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt >= max {
                return None;
            }
        }
        let ms = match self.kind {
            BackoffKind::Fixed => self.delay_ms,
            BackoffKind::Exponential => {
                let grown = self.delay_ms as f64 * self.factor.max(1.0).powi(attempt as i32);
                let capped = match self.max_delay_ms {
                    Some(cap) => grown.min(cap as f64),
                    None => grown,
                };
                capped.min(u64::MAX as f64) as u64
            }
        };
        Some(Duration::from_millis(ms))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self::rooted_at(&platform::data_dir())
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_remote_base_url(),
            api_key: None,
            poll_interval_ms: default_poll_interval_ms(),
            timeout_ms: default_remote_timeout_ms(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            url_template: default_archive_url_template(),
            timeout_ms: default_download_timeout_ms(),
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            status_timeout_ms: default_status_timeout_ms(),
            extra_args: Vec::new(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: default_display_command(),
            args: default_display_args(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            listen_grace_ms: default_listen_grace_ms(),
            stage_wait_ms: default_stage_wait_ms(),
            cycle_retry: RetryPolicy::cycle_default(),
            listen_retry: RetryPolicy::listen_default(),
        }
    }
}

impl Default for StagerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_plaque_file() -> PathBuf {
    platform::data_dir().join("plaque.json")
}

fn default_metadata_dir() -> PathBuf {
    platform::data_dir().join("metadata")
}

fn default_media_dir() -> PathBuf {
    platform::data_dir().join("media")
}

fn default_logo_file() -> PathBuf {
    platform::data_dir().join("logo.png")
}

fn default_remote_base_url() -> String {
    "http://127.0.0.1:9400/v1".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_remote_timeout_ms() -> u64 {
    10_000
}

fn default_archive_url_template() -> String {
    "https://firebasestorage.googleapis.com/v0/b/moda-archive.appspot.com/o/{name}?alt=media"
        .to_string()
}

fn default_download_timeout_ms() -> u64 {
    60_000
}

fn default_status_timeout_ms() -> u64 {
    5_000
}

fn default_true() -> bool {
    true
}

fn default_display_command() -> String {
    "chromium".to_string()
}

fn default_display_args() -> Vec<String> {
    vec!["--kiosk".to_string(), "--noerrdialogs".to_string()]
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_settle_delay_ms() -> u64 {
    1_000
}

fn default_listen_grace_ms() -> u64 {
    5_000
}

fn default_stage_wait_ms() -> u64 {
    120_000
}

fn default_queue_capacity() -> usize {
    10
}

fn default_factor() -> f64 {
    2.0
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
