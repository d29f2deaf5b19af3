/// mpv IPC driver with separated reader/writer tasks, and the [`Player`]
/// built on it.
///
/// Architecture:
///
/// ```text
///   MpvDriver::spawn_and_connect()
///         │
///         ├── writer_task   ← receives PendingRequest via mpsc, serialises → socket
///         └── reader_task   ← reads JSON lines from socket
///                                ├── response (has request_id) → matched oneshot::Sender
///                                └── event                     → event_tx channel
///
///   MpvPlayer (Player)
///         play_files  → write m3u → ["loadlist", m3u, "replace"]
///         currently_playing_file → ["get_property", "path"] → file name
/// ```
///
/// Platform notes:
/// - Unix:   Unix domain sockets
/// - Windows: Named pipes  \\.\pipe\<name>
use crate::player::Player;
use anyhow::Context;
use async_trait::async_trait;
use plaque_proto::cache::write_atomic;
use plaque_proto::config::PlayerConfig;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// An mpv event that arrived unsolicited (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    /// e.g. "end-file", "start-file", "file-loaded".
    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }
}

/// Cloneable handle to the mpv writer task.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
    timeout: Duration,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(self.timeout, reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub async fn load_list(&self, playlist: &Path) -> anyhow::Result<()> {
        let playlist = playlist.to_string_lossy();
        self.send(json!(["loadlist", playlist, "replace"])).await?;
        Ok(())
    }

    /// The `path` property; `None` when mpv is idle.
    pub async fn current_path(&self) -> anyhow::Result<Option<String>> {
        let resp = self.send(json!(["get_property", "path"])).await?;
        Ok(resp["data"].as_str().map(|s| s.to_string()))
    }
}

/// Owns the mpv child process.
pub struct MpvDriver {
    socket_name: String,
    process: Option<tokio::process::Child>,
    extra_args: Vec<String>,
    timeout: Duration,
}

impl MpvDriver {
    pub fn new(config: &PlayerConfig) -> Self {
        Self {
            socket_name: plaque_proto::platform::mpv_socket_name(),
            process: None,
            extra_args: config.extra_args.clone(),
            timeout: Duration::from_millis(config.status_timeout_ms),
        }
    }

    pub fn process_alive(&mut self) -> bool {
        if let Some(ref mut child) = self.process {
            child.try_wait().ok().flatten().is_none()
        } else {
            false
        }
    }

    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    fn spawn_process(&mut self) -> anyhow::Result<()> {
        info!("mpv: spawning new process");
        let mpv_binary = plaque_proto::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        let child = tokio::process::Command::new(mpv_binary)
            .arg("--idle=yes")
            .arg("--fullscreen")
            .arg("--loop-playlist=inf")
            .arg("--image-display-duration=inf")
            .arg("--no-osc")
            .arg("--no-input-default-bindings")
            .arg(plaque_proto::platform::mpv_socket_arg())
            .arg("--quiet")
            .args(&self.extra_args)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .context("spawning mpv")?;
        self.process = Some(child);
        Ok(())
    }

    #[cfg(unix)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;

        let socket_path = PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;
        self.spawn_process()?;

        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");
        Ok(self.start_io_tasks(stream, event_tx))
    }

    /// Connects to an mpv left running by a previous daemon.
    #[cfg(unix)]
    pub async fn try_reconnect(&mut self, event_tx: mpsc::Sender<MpvEvent>) -> Option<MpvHandle> {
        let socket_path = PathBuf::from(&self.socket_name);
        if !socket_path.exists() {
            return None;
        }
        match UnixStream::connect(&socket_path).await {
            Ok(stream) => {
                info!("mpv: reconnected to existing IPC socket");
                Some(self.start_io_tasks(stream, event_tx))
            }
            Err(e) => {
                warn!("mpv: failed to reconnect: {}", e);
                None
            }
        }
    }

    #[cfg(unix)]
    fn start_io_tasks(&self, stream: UnixStream, event_tx: mpsc::Sender<MpvEvent>) -> MpvHandle {
        let (read_half, write_half) = stream.into_split();
        self.start_tasks(BufReader::new(read_half), write_half, event_tx)
    }

    #[cfg(windows)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;
        self.spawn_process()?;

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("mpv: connected to named pipe");
                return Ok(self.start_io_tasks_windows(client, event_tx));
            }
        }
        anyhow::bail!("mpv named pipe did not appear")
    }

    #[cfg(windows)]
    pub async fn try_reconnect(&mut self, event_tx: mpsc::Sender<MpvEvent>) -> Option<MpvHandle> {
        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        match ClientOptions::new().open(&pipe_path) {
            Ok(client) => {
                info!("mpv: reconnected to named pipe");
                Some(self.start_io_tasks_windows(client, event_tx))
            }
            Err(e) => {
                warn!("mpv: failed to reconnect to named pipe: {}", e);
                None
            }
        }
    }

    #[cfg(windows)]
    fn start_io_tasks_windows(
        &self,
        pipe: tokio::net::windows::named_pipe::NamedPipeClient,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> MpvHandle {
        let (read_half, write_half) = tokio::io::split(pipe);
        self.start_tasks(BufReader::new(read_half), write_half, event_tx)
    }

    fn start_tasks<R, W>(
        &self,
        reader: BufReader<R>,
        writer: W,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> MpvHandle
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
        W: tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        // req_id → reply channel, shared between writer (inserts) and reader (resolves)
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

        tokio::spawn(writer_task(writer, cmd_rx, pending.clone()));
        tokio::spawn(reader_task(reader, pending, event_tx));

        MpvHandle {
            tx: cmd_tx,
            timeout: self.timeout,
        }
    }
}

async fn fail_pending(pending: &PendingMap, reason: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("{}", reason)));
    }
}

async fn reader_task<R>(mut reader: BufReader<R>, pending: PendingMap, event_tx: mpsc::Sender<MpvEvent>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_pending(&pending, "mpv IPC connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let _ = tx.send(response_result(val));
                    } else {
                        debug!("mpv reader: response for unknown req={}", req_id);
                    }
                } else {
                    // events are advisory; drop them if nobody is listening
                    let _ = event_tx.try_send(MpvEvent { raw: val });
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_pending(&pending, &format!("mpv IPC read error: {}", e)).await;
                break;
            }
        }
    }
}

/// Maps an mpv reply to a result. `property unavailable` is how mpv answers
/// `get_property path` while idle, so it reads as a null value.
fn response_result(val: Value) -> anyhow::Result<Value> {
    match val["error"].as_str() {
        Some("success") => Ok(val),
        Some("property unavailable") => Ok(json!({ "data": null, "error": "success" })),
        other => Err(anyhow::anyhow!(
            "mpv error: {}",
            other.unwrap_or("unknown error")
        )),
    }
}

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // register before writing so the reader can match the reply
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: send req={} payload={}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

struct Connection {
    driver: MpvDriver,
    handle: Option<MpvHandle>,
}

/// [`Player`] backed by an mpv process driven over JSON IPC. `init` and
/// `play_files` connect lazily and respawn mpv if the connection is gone;
/// status queries only use a connection that is already up.
pub struct MpvPlayer {
    conn: Mutex<Connection>,
    playlist_file: PathBuf,
}

impl MpvPlayer {
    pub fn new(config: &PlayerConfig, playlist_file: PathBuf) -> Self {
        Self {
            conn: Mutex::new(Connection {
                driver: MpvDriver::new(config),
                handle: None,
            }),
            playlist_file,
        }
    }

    async fn handle(&self) -> anyhow::Result<MpvHandle> {
        let mut conn = self.conn.lock().await;
        if let Some(handle) = &conn.handle {
            if !handle.is_closed() {
                return Ok(handle.clone());
            }
            warn!("mpv: connection lost");
        }

        let (event_tx, event_rx) = mpsc::channel(64);
        tokio::spawn(log_events(event_rx));
        let handle = if conn.driver.process_alive() {
            None
        } else {
            conn.driver.try_reconnect(event_tx.clone()).await
        };
        let handle = match handle {
            Some(h) => h,
            None => conn.driver.spawn_and_connect(event_tx).await?,
        };
        conn.handle = Some(handle.clone());
        Ok(handle)
    }

    /// The current connection, if one is up. Never spawns mpv and never
    /// waits behind a connect in progress.
    fn live_handle(&self) -> Option<MpvHandle> {
        let conn = self.conn.try_lock().ok()?;
        conn.handle.as_ref().filter(|h| !h.is_closed()).cloned()
    }
}

async fn log_events(mut rx: mpsc::Receiver<MpvEvent>) {
    while let Some(event) = rx.recv().await {
        match event.event_name() {
            Some("file-loaded") | Some("end-file") => {
                debug!("mpv: event {}", event.raw)
            }
            _ => {}
        }
    }
}

#[async_trait]
impl Player for MpvPlayer {
    async fn init(&self) -> anyhow::Result<()> {
        self.handle().await.map(|_| ())
    }

    async fn play_files(&self, paths: &[String]) -> anyhow::Result<()> {
        let handle = self.handle().await?;
        write_atomic(&self.playlist_file, render_m3u(paths).as_bytes())
            .await
            .with_context(|| format!("writing playlist {}", self.playlist_file.display()))?;
        handle.load_list(&self.playlist_file).await?;
        info!("mpv: playing {} file(s)", paths.len());
        Ok(())
    }

    async fn currently_playing_file(&self) -> anyhow::Result<Option<String>> {
        let Some(handle) = self.live_handle() else {
            return Ok(None);
        };
        Ok(handle.current_path().await?.and_then(|p| played_file_name(&p)))
    }
}

fn render_m3u(paths: &[String]) -> String {
    let mut out = String::from("#EXTM3U\n");
    for p in paths {
        out.push_str(p);
        out.push('\n');
    }
    out
}

/// File name of an mpv `path`, which is either a plain path or a `file://`
/// URL depending on how the entry was queued.
fn played_file_name(path: &str) -> Option<String> {
    let local = match url::Url::parse(path) {
        Ok(u) if u.scheme() == "file" => u.to_file_path().ok()?,
        _ => PathBuf::from(path),
    };
    local
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_string())
}
