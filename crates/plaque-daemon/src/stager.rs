//! Media stager: makes sure a token's media file exists locally.
//!
//! ```text
//!   ensure_media(meta)
//!         ├── file on disk              → Staged::Present
//!         ├── same artifact in flight   → Staged::Queued(shared ticket)
//!         └── otherwise                 → enqueue FetchJob, Staged::Queued(ticket)
//!
//!   worker (one task)  ← bounded mpsc of FetchJob
//!         fetch archive / url → write media_dir/<file> → settle ticket
//! ```
//!
//! Fetches are fire-and-forget for the caller: enqueueing never waits, a
//! full queue is reported as `QueueFull`, and a failed fetch only settles
//! the ticket as `Failed` and is logged. Callers re-check the disk before
//! using a file.

use crate::media::MediaClient;
use plaque_proto::cache::{file_exists, write_atomic};
use plaque_proto::model::{MediaSource, TokenMeta};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Pending,
    Done,
    Failed,
}

/// Handle on a queued fetch. Every caller that asks for the same in-flight
/// artifact gets a clone watching the same fetch.
#[derive(Debug, Clone)]
pub struct StageTicket {
    rx: watch::Receiver<FetchState>,
}

impl StageTicket {
    /// Resolves once the worker has finished with the artifact.
    pub async fn settled(mut self) -> FetchState {
        loop {
            let state = *self.rx.borrow_and_update();
            if state != FetchState::Pending {
                return state;
            }
            if self.rx.changed().await.is_err() {
                // worker dropped the job without settling it
                return FetchState::Failed;
            }
        }
    }
}

#[derive(Debug)]
pub enum Staged {
    Present,
    Queued(StageTicket),
}

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("token {0} has no media source")]
    NoSource(String),
    /// The fetch queue is full; the artifact is skipped this cycle.
    #[error("media queue full, not staging {0}")]
    QueueFull(String),
    #[error("media worker is not running")]
    WorkerGone,
}

struct FetchJob {
    source: MediaSource,
    done: watch::Sender<FetchState>,
}

type InFlight = Arc<Mutex<HashMap<String, watch::Receiver<FetchState>>>>;

#[derive(Clone)]
pub struct MediaStager {
    media_dir: PathBuf,
    queue: mpsc::Sender<FetchJob>,
    in_flight: InFlight,
}

impl MediaStager {
    /// Starts the fetch worker. Must be called inside a tokio runtime; the
    /// worker exits once every stager clone is dropped.
    pub fn spawn(client: Arc<dyn MediaClient>, media_dir: PathBuf, queue_capacity: usize) -> Self {
        let (queue, rx) = mpsc::channel(queue_capacity.max(1));
        let in_flight: InFlight = Arc::new(Mutex::new(HashMap::new()));
        tokio::spawn(worker(rx, client, media_dir.clone(), in_flight.clone()));
        Self {
            media_dir,
            queue,
            in_flight,
        }
    }

    pub async fn ensure_media(&self, meta: &TokenMeta) -> Result<Staged, StageError> {
        let source = meta
            .media_source()
            .ok_or_else(|| StageError::NoSource(meta.document_id.clone()))?;

        if file_exists(&self.media_dir.join(source.file_name())).await {
            return Ok(Staged::Present);
        }

        let (done, rx) = {
            let mut in_flight = self.in_flight.lock().await;
            if let Some(rx) = in_flight.get(source.key()) {
                debug!("stager: {} already in flight", source.key());
                return Ok(Staged::Queued(StageTicket { rx: rx.clone() }));
            }
            let (done, rx) = watch::channel(FetchState::Pending);
            in_flight.insert(source.key().to_string(), rx.clone());
            (done, rx)
        };

        let key = source.key().to_string();
        match self.queue.try_send(FetchJob { source, done }) {
            Ok(()) => {
                info!("stager: queued fetch of {}", key);
                Ok(Staged::Queued(StageTicket { rx }))
            }
            Err(e) => {
                self.in_flight.lock().await.remove(&key);
                match e {
                    TrySendError::Full(_) => Err(StageError::QueueFull(key)),
                    TrySendError::Closed(_) => Err(StageError::WorkerGone),
                }
            }
        }
    }
}

async fn worker(
    mut rx: mpsc::Receiver<FetchJob>,
    client: Arc<dyn MediaClient>,
    media_dir: PathBuf,
    in_flight: InFlight,
) {
    while let Some(job) = rx.recv().await {
        let key = job.source.key().to_string();
        let state = match fetch_to_disk(client.as_ref(), &media_dir, &job.source).await {
            Ok(()) => FetchState::Done,
            Err(e) => {
                warn!("stager: failed to fetch {}: {:#}", key, e);
                FetchState::Failed
            }
        };
        in_flight.lock().await.remove(&key);
        let _ = job.done.send(state);
    }
    debug!("stager: worker exiting");
}

async fn fetch_to_disk(
    client: &dyn MediaClient,
    media_dir: &Path,
    source: &MediaSource,
) -> anyhow::Result<()> {
    let path = media_dir.join(source.file_name());
    // an earlier job may have landed it
    if file_exists(&path).await {
        return Ok(());
    }
    let bytes = match source {
        MediaSource::Archive { name } => client.fetch_from_archive(name).await?,
        MediaSource::External { url, .. } => client.fetch_from_url(url).await?,
    };
    write_atomic(&path, &bytes).await?;
    info!("stager: wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}
