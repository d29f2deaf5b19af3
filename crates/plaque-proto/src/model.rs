//! Document model shared by the cache, the remote store and the viewer.
//!
//! Both document kinds are stored on disk exactly as they are serialised
//! here, so field names are part of the on-disk format.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// The singleton configuration document for one physical plaque.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Plaque {
    /// Assigned by the remote store on creation; never changes afterwards.
    pub document_id: String,
    #[serde(default)]
    pub name: String,
    /// Empty until an owner claims the plaque.
    #[serde(default)]
    pub wallet_address: String,
    /// Ordered token meta document ids the plaque should display.
    #[serde(default)]
    pub token_meta_id_list: Vec<String>,
}

impl Plaque {
    pub fn is_claimed(&self) -> bool {
        !self.wallet_address.is_empty()
    }
}

/// Metadata for one artwork and the location of its media.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TokenMeta {
    pub document_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub public_link: String,
    /// Archive object id. Takes precedence over `external_media_url`.
    #[serde(default)]
    pub media_id: String,
    /// File extension including the dot, e.g. `.mp4`.
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub external_media_url: String,
}

/// Where the bytes for a token's media come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// Content-addressed archive object, fetched by file name.
    Archive { name: String },
    /// Direct download URL.
    External { url: String, name: String },
}

impl MediaSource {
    /// Local file name under the media directory.
    pub fn file_name(&self) -> &str {
        match self {
            MediaSource::Archive { name } => name,
            MediaSource::External { name, .. } => name,
        }
    }

    /// Key used to deduplicate fetches of the same artifact.
    pub fn key(&self) -> &str {
        match self {
            MediaSource::Archive { name } => name,
            MediaSource::External { url, .. } => url,
        }
    }
}

impl TokenMeta {
    /// Resolves the media source. The archive wins whenever `media_id` is
    /// set; the external URL is only consulted when it is empty.
    ///
    /// Returns `None` when the derived file name would leave the media
    /// directory.
    pub fn media_source(&self) -> Option<MediaSource> {
        if !self.media_id.is_empty() {
            let name = format!("{}{}", self.media_id, self.media_type);
            return is_plain_file_name(&name).then_some(MediaSource::Archive { name });
        }
        if !self.external_media_url.is_empty() {
            let name = url_base_name(&self.external_media_url)?;
            if !is_plain_file_name(&name) {
                return None;
            }
            return Some(MediaSource::External {
                url: self.external_media_url.clone(),
                name,
            });
        }
        None
    }

    /// Local media file name, if the token declares any media source.
    pub fn media_file_name(&self) -> Option<String> {
        self.media_source().map(|s| s.file_name().to_string())
    }

    /// True if `file_name` is the file this token's media lands in.
    ///
    /// mpv reports the played file without its directory, so matching is on
    /// the media id (file stem) or the external URL's last path segment.
    pub fn matches_file_name(&self, file_name: &str) -> bool {
        if file_name.is_empty() {
            return false;
        }
        if !self.media_id.is_empty() {
            let stem = Path::new(file_name)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(file_name);
            if stem == self.media_id {
                return true;
            }
        }
        if !self.external_media_url.is_empty() {
            return url_base_name(&self.external_media_url).as_deref() == Some(file_name);
        }
        false
    }
}

/// A single path component: no separators, no drive prefix, not `.`/`..`.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(|c| matches!(c, '/' | '\\' | ':' | '\0'))
}

/// Last non-empty path segment of a URL, ignoring query and fragment.
fn url_base_name(url: &str) -> Option<String> {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let without_query = without_fragment.split('?').next().unwrap_or(without_fragment);
    let path = match without_query.find("://") {
        // Skip the host: a bare `https://host/` has no file name.
        Some(idx) => without_query[idx + 3..].split_once('/').map(|(_, p)| p)?,
        None => without_query,
    };
    path.rsplit('/')
        .find(|seg| !seg.is_empty())
        .map(|seg| seg.to_string())
}

/// What the kiosk should currently be showing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViewerState {
    /// Actively loading media or metadata.
    Loading,
    /// No wallet attached; show a claim QR code.
    QrScan,
    /// Claimed, but nothing displayable.
    NoValidTokens,
    /// Showing art.
    Display,
    /// Last cycle failed; a retry is pending.
    Error,
}

/// Projection returned to status queries. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ViewerStateData {
    pub state: ViewerState,
    pub plaque: Option<Plaque>,
    pub active_token_meta: Option<TokenMeta>,
}

impl ViewerStateData {
    pub fn bare(state: ViewerState) -> Self {
        Self {
            state,
            plaque: None,
            active_token_meta: None,
        }
    }

    pub fn with_plaque(state: ViewerState, plaque: Plaque) -> Self {
        Self {
            state,
            plaque: Some(plaque),
            active_token_meta: None,
        }
    }
}

/// A single field assignment applied by `update_*` on the remote store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldUpdate {
    pub path: String,
    pub value: serde_json::Value,
}

impl FieldUpdate {
    pub fn new(path: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            path: path.into(),
            value: value.into(),
        }
    }
}

/// Equality filter used to query token metas, e.g. `artist == "seurat"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenMetaQuery {
    pub field: String,
    pub op: String,
    pub value: serde_json::Value,
}
