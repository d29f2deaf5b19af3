//! File-backed cache for the plaque document and its token metas.
//!
//! Every read and write is whole-file. Writes go to a sibling temp file and
//! are renamed into place, so a concurrent reader sees either the old or the
//! new document, never a torn one. There is no cross-file transaction: a crash
//! between writing the plaque and its metas leaves a stale but valid cache
//! that the next reconciliation repairs.

use crate::error::CacheError;
use crate::model::{Plaque, TokenMeta};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CacheStore {
    plaque_file: PathBuf,
    metadata_dir: PathBuf,
    media_dir: PathBuf,
}

impl CacheStore {
    pub fn new(plaque_file: PathBuf, metadata_dir: PathBuf, media_dir: PathBuf) -> Self {
        Self {
            plaque_file,
            metadata_dir,
            media_dir,
        }
    }

    pub fn from_paths(paths: &crate::config::PathsConfig) -> Self {
        Self::new(
            paths.plaque_file.clone(),
            paths.metadata_dir.clone(),
            paths.media_dir.clone(),
        )
    }

    pub fn plaque_file(&self) -> &Path {
        &self.plaque_file
    }

    pub fn media_dir(&self) -> &Path {
        &self.media_dir
    }

    pub fn token_meta_path(&self, document_id: &str) -> PathBuf {
        self.metadata_dir.join(format!("{}.json", document_id))
    }

    pub fn media_path(&self, file_name: &str) -> PathBuf {
        self.media_dir.join(file_name)
    }

    pub async fn read_plaque(&self) -> Result<Plaque, CacheError> {
        read_json(&self.plaque_file).await
    }

    pub async fn write_plaque(&self, plaque: &Plaque) -> Result<(), CacheError> {
        debug!("cache: writing plaque {}", plaque.document_id);
        write_json(&self.plaque_file, plaque).await
    }

    pub async fn read_token_meta(&self, document_id: &str) -> Result<TokenMeta, CacheError> {
        read_json(&self.token_meta_path(document_id)).await
    }

    pub async fn write_token_meta(&self, meta: &TokenMeta) -> Result<(), CacheError> {
        debug!("cache: writing token meta {}", meta.document_id);
        write_json(&self.token_meta_path(&meta.document_id), meta).await
    }

    /// Whether the media file for `meta` is present on disk.
    pub async fn media_present(&self, meta: &TokenMeta) -> bool {
        match meta.media_file_name() {
            Some(name) => file_exists(&self.media_path(&name)).await,
            None => false,
        }
    }
}

pub async fn file_exists(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(md) => md.is_file(),
        Err(_) => false,
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, CacheError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(CacheError::NotFound(path.to_path_buf()))
        }
        Err(e) => return Err(CacheError::Io(path.to_path_buf(), e)),
    };
    serde_json::from_slice(&bytes).map_err(|e| CacheError::Json(path.to_path_buf(), e))
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), CacheError> {
    let bytes =
        serde_json::to_vec_pretty(value).map_err(|e| CacheError::Json(path.to_path_buf(), e))?;
    write_atomic(path, &bytes)
        .await
        .map_err(|e| CacheError::Io(path.to_path_buf(), e))
}

/// Writes `bytes` to `path` via a temp file + rename, creating the parent
/// directory if needed.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".part");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}
