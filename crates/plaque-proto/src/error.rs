use std::path::PathBuf;

/// Failures of the on-disk cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache file not found: {0}")]
    NotFound(PathBuf),
    #[error("cache io error on {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("malformed cache file {0}: {1}")]
    Json(PathBuf, #[source] serde_json::Error),
}

impl CacheError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound(_))
    }
}

/// Errors surfaced by the viewer pipeline.
///
/// Stale-data conditions (remote unreachable with a cache present, a single
/// media fetch failing) are absorbed and logged, so they have no variant.
#[derive(Debug, thiserror::Error)]
pub enum ViewerError {
    /// No local plaque and the remote store refused to create one.
    #[error("cannot establish plaque identity: {0:#}")]
    Bootstrap(#[source] anyhow::Error),
    /// Staging finished with nothing playable.
    #[error("no valid tokens in list ({declared} declared)")]
    NoValidTokens { declared: usize },
    #[error("player error: {0:#}")]
    Player(#[source] anyhow::Error),
    #[error(transparent)]
    Cache(#[from] CacheError),
    /// The change subscription could not be established.
    #[error("plaque subscription failed: {0:#}")]
    Subscription(#[source] anyhow::Error),
    /// A cycle was abandoned because a newer plaque arrived.
    #[error("cycle superseded by a newer plaque")]
    Superseded,
    #[error("shutting down")]
    Cancelled,
}

/// Which part of the pipeline recorded a [`LoadError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadErrorKind {
    /// A load-and-play cycle failed.
    Cycle,
    /// The change subscription could not be established.
    Subscription,
}

/// Snapshot of the last load failure, kept in the runtime flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadError {
    pub kind: LoadErrorKind,
    pub message: String,
}

impl LoadError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: LoadErrorKind::Cycle,
            message: message.into(),
        }
    }

    pub fn subscription(message: impl Into<String>) -> Self {
        Self {
            kind: LoadErrorKind::Subscription,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<&ViewerError> for LoadError {
    fn from(err: &ViewerError) -> Self {
        match err {
            ViewerError::Subscription(_) => LoadError::subscription(err.to_string()),
            _ => LoadError::new(err.to_string()),
        }
    }
}
