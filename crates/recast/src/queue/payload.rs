//! Typed job payloads.
//!
//! Jobs are persisted with a `job_type` column and a JSON `data` blob;
//! at dispatch time the blob is deserialized exactly once into the typed
//! payload for that kind. The blob is the only carrier of cross-stage
//! context — handlers never read sibling jobs' data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::campaign::{EditStep, PostOrder, SourceSpec};
use crate::db::job_repo::JobRow;
use crate::db::time::format_timestamp;
use crate::error::QueueError;

/// The three kinds of work the queue knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Scan,
    Download,
    Publish,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Scan => "scan",
            JobKind::Download => "download",
            JobKind::Publish => "publish",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scan" => Some(JobKind::Scan),
            "download" => Some(JobKind::Download),
            "publish" => Some(JobKind::Publish),
            _ => None,
        }
    }
}

/// Payload for a SCAN job: the sources to scan plus everything needed to
/// schedule the DOWNLOAD jobs it will create.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanPayload {
    pub platform: String,
    pub sources: Vec<SourceSpec>,
    pub interval_minutes: u32,
    /// First slot for discovered work; absent means "from now".
    #[serde(default)]
    pub next_slot: Option<DateTime<Utc>>,
    #[serde(default)]
    pub target_accounts: Vec<String>,
    #[serde(default)]
    pub post_order: PostOrder,
    #[serde(default)]
    pub edit_pipeline: Vec<EditStep>,
    /// Free-text progress, written mid-run for observability.
    #[serde(default)]
    pub status: Option<String>,
}

/// Payload for a DOWNLOAD job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadPayload {
    pub platform: String,
    pub source_url: String,
    #[serde(default)]
    pub native_id: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub target_accounts: Vec<String>,
    #[serde(default)]
    pub edit_pipeline: Vec<EditStep>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Payload for a PUBLISH job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishPayload {
    pub local_path: String,
    pub account_id: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub item_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// A decoded job payload, tagged by kind.
#[derive(Debug, Clone)]
pub enum JobPayload {
    Scan(ScanPayload),
    Download(DownloadPayload),
    Publish(PublishPayload),
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::Scan(_) => JobKind::Scan,
            JobPayload::Download(_) => JobKind::Download,
            JobPayload::Publish(_) => JobKind::Publish,
        }
    }

    /// Decodes a job row's data blob into the typed payload for its kind.
    pub fn decode(job: &JobRow) -> Result<Self, QueueError> {
        let kind = JobKind::parse(&job.job_type)
            .ok_or_else(|| QueueError::UnknownJobType(job.job_type.clone()))?;
        let payload_err = |source| QueueError::Payload {
            job_type: job.job_type.clone(),
            job_id: job.id.clone(),
            source,
        };
        match kind {
            JobKind::Scan => serde_json::from_str(&job.data)
                .map(JobPayload::Scan)
                .map_err(payload_err),
            JobKind::Download => serde_json::from_str(&job.data)
                .map(JobPayload::Download)
                .map_err(payload_err),
            JobKind::Publish => serde_json::from_str(&job.data)
                .map(JobPayload::Publish)
                .map_err(payload_err),
        }
    }

    /// Serializes for persistence.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        match self {
            JobPayload::Scan(p) => serde_json::to_string(p),
            JobPayload::Download(p) => serde_json::to_string(p),
            JobPayload::Publish(p) => serde_json::to_string(p),
        }
    }

    /// Builds a fresh pending job row carrying this payload.
    pub fn to_row(
        &self,
        campaign_id: Option<&str>,
        scheduled_for: Option<DateTime<Utc>>,
        created_at: DateTime<Utc>,
    ) -> Result<JobRow, serde_json::Error> {
        Ok(JobRow {
            id: uuid::Uuid::new_v4().to_string(),
            campaign_id: campaign_id.map(|s| s.to_string()),
            job_type: self.kind().as_str().to_string(),
            status: "pending".to_string(),
            scheduled_for: scheduled_for.map(format_timestamp),
            data: self.encode()?,
            result: None,
            error_message: None,
            started_at: None,
            completed_at: None,
            created_at: format_timestamp(created_at),
        })
    }
}

/// Result summary written by a completed SCAN job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub found: u32,
    pub scheduled: u32,
    pub skipped: u32,
}

/// Result written by a completed DOWNLOAD job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadOutcome {
    pub local_path: String,
    pub cached: bool,
    pub publish_jobs: u32,
}

/// Result written by a completed PUBLISH job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishOutcome {
    pub account: String,
    pub local_path: String,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub external_url: Option<String>,
    #[serde(default)]
    pub pending_review: bool,
}

/// Structured failure detail persisted into `result` when a job fails.
/// `error_message` on the row holds the truncated summary; the full text
/// lives here, along with any recoverable artifact path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureDetail {
    pub error_full: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
}
