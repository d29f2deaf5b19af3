//! Kiosk browser showing the plaque page served by [`crate::http`].

use crate::player::Display;
use anyhow::Context;
use async_trait::async_trait;
use plaque_proto::config::{DisplayConfig, HttpConfig};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Runs the configured browser command against the local page. Navigation
/// restarts the browser at the new URL; kiosk browsers have no control
/// channel worth depending on.
pub struct KioskDisplay {
    command: String,
    args: Vec<String>,
    base_url: String,
    child: Mutex<Option<Child>>,
}

impl KioskDisplay {
    pub fn new(config: &DisplayConfig, http: &HttpConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            base_url: format!("{}/", http.base_url()),
            child: Mutex::new(None),
        }
    }

    fn page_url(&self, token_meta_id: Option<&str>) -> String {
        match token_meta_id {
            Some(id) => {
                let query: String = url::form_urlencoded::Serializer::new(String::new())
                    .append_pair("token_meta_id", id)
                    .finish();
                format!("{}?{}", self.base_url, query)
            }
            None => self.base_url.clone(),
        }
    }

    async fn open(&self, url: &str) -> anyhow::Result<()> {
        let program = plaque_proto::platform::find_on_path(&self.command)
            .map(|p| p.into_os_string())
            .unwrap_or_else(|| self.command.clone().into());

        let mut child = self.child.lock().await;
        if let Some(mut old) = child.take() {
            let _ = old.kill().await;
        }
        debug!("display: opening {}", url);
        let spawned = Command::new(program)
            .args(&self.args)
            .arg(url)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning display command {}", self.command))?;
        *child = Some(spawned);
        Ok(())
    }
}

#[async_trait]
impl Display for KioskDisplay {
    async fn init(&self) -> anyhow::Result<()> {
        let url = self.page_url(None);
        self.open(&url).await?;
        info!("display: kiosk started at {}", url);
        Ok(())
    }

    async fn navigate(&self, token_meta_id: &str) -> anyhow::Result<()> {
        self.open(&self.page_url(Some(token_meta_id))).await
    }
}

/// Display used when `[display] enabled = false`.
pub struct HeadlessDisplay;

#[async_trait]
impl Display for HeadlessDisplay {
    async fn init(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn navigate(&self, token_meta_id: &str) -> anyhow::Result<()> {
        debug!("display: headless, not navigating to {}", token_meta_id);
        Ok(())
    }
}
