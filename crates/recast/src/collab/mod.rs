//! External collaborator interfaces.
//!
//! Scraping, media download, transcoding, and publishing are delegated to
//! collaborators behind these traits; the engine only depends on the
//! contracts. Implementations are injected at engine construction —
//! there are no ambient globals.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::campaign::{EditStep, SourceSpec};
use crate::queue::progress::ProgressSink;

/// Errors surfaced by collaborators. `Captcha` and `RateLimited` carry
/// special handling in the queue (campaign flagging and a global dispatch
/// throttle respectively) and must not be collapsed into `Failed`.
#[derive(Error, Debug)]
pub enum CollabError {
    /// The platform presented an anti-automation challenge.
    #[error("captcha challenge encountered: {0}")]
    Captcha(String),

    /// The platform is rate limiting us.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Generic failure; `artifact` points at a partial local output when
    /// one survived (kept so user tooling can inspect it).
    #[error("{message}")]
    Failed {
        message: String,
        artifact: Option<PathBuf>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CollabError {
    pub fn failed(message: impl Into<String>) -> Self {
        CollabError::Failed {
            message: message.into(),
            artifact: None,
        }
    }
}

/// One item discovered by a source scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredItem {
    pub native_id: String,
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub like_count: i64,
    #[serde(default)]
    pub view_count: i64,
    #[serde(default)]
    pub posted_at: Option<DateTime<Utc>>,
}

/// Scans one source and returns every item currently visible on it.
/// Captcha and rate-limit signals must be propagated unmodified.
pub trait SourceScanner: Send + Sync {
    fn scan(&self, source: &SourceSpec) -> Result<Vec<DiscoveredItem>, CollabError>;
}

/// Result of a media fetch.
#[derive(Debug, Clone)]
pub struct FetchedMedia {
    pub local_path: PathBuf,
    /// True when the fetch short-circuited via the collaborator's cache.
    pub cached: bool,
    pub meta: serde_json::Value,
}

/// Fetches a remote artifact. Idempotent: repeated calls with the same
/// native id should hit the collaborator's cache.
pub trait MediaFetcher: Send + Sync {
    fn fetch(&self, url: &str, native_id: &str) -> Result<FetchedMedia, CollabError>;
}

/// Applies an edit pipeline to a local artifact and returns the new path.
/// Pure with respect to campaign state.
pub trait MediaTransformer: Send + Sync {
    fn transform(&self, local_path: &Path, pipeline: &[EditStep]) -> Result<PathBuf, CollabError>;
}

/// Everything a publish collaborator needs for one upload.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub local_path: PathBuf,
    pub caption: Option<String>,
    pub username: String,
    /// Serialized session credentials from the account row.
    pub session_data: String,
}

/// Outcome of a publish attempt that did not error outright.
#[derive(Debug, Clone, Default)]
pub struct PublishReceipt {
    pub external_id: Option<String>,
    pub external_url: Option<String>,
    /// The platform accepted the upload but holds it for review; final
    /// visibility must be confirmed by polling.
    pub pending_review: bool,
}

/// Publishes a local artifact to a target account, streaming progress
/// into the given sink.
pub trait Publisher: Send + Sync {
    fn publish(
        &self,
        request: &PublishRequest,
        progress: &dyn ProgressSink,
    ) -> Result<PublishReceipt, CollabError>;

    /// Checks whether a previously published item is externally visible.
    /// Used by the review poller after a `pending_review` receipt.
    fn is_visible(&self, external_id: &str) -> Result<bool, CollabError>;
}
