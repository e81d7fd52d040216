//! Progress reporting for running jobs.
//!
//! Handlers write free-text progress through a `ProgressSink`; the
//! persisting implementation lands it in the job's `data.status` field and
//! broadcasts it, decoupling handler logic from any delivery transport.

use crate::broadcast::{EngineEvent, EngineEventBroadcaster};
use crate::db::{job_repo, Database, DatabaseError};

pub trait ProgressSink: Send + Sync {
    fn update(&self, message: &str);
}

/// No-op sink for unit tests.
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn update(&self, _message: &str) {}
}

/// Persists progress into the job row and broadcasts it.
pub struct JobStatusSink {
    db: Database,
    job_id: String,
    events: EngineEventBroadcaster,
}

impl JobStatusSink {
    pub fn new(db: Database, job_id: &str, events: EngineEventBroadcaster) -> Self {
        Self {
            db,
            job_id: job_id.to_string(),
            events,
        }
    }
}

impl ProgressSink for JobStatusSink {
    fn update(&self, message: &str) {
        // Progress writes are best-effort instrumentation: a failure here
        // must never fail the job.
        if let Err(e) = write_status(&self.db, &self.job_id, message) {
            log::warn!("Failed to persist progress for job {}: {}", self.job_id, e);
        }
        self.events.send(EngineEvent::progress(&self.job_id, message));
    }
}

/// Merges a status message into the job's `data` blob.
pub(crate) fn write_status(
    db: &Database,
    job_id: &str,
    message: &str,
) -> Result<(), DatabaseError> {
    let Some(job) = job_repo::find_by_id(db, job_id)? else {
        return Ok(());
    };
    let mut data: serde_json::Value =
        serde_json::from_str(&job.data).unwrap_or_else(|_| serde_json::json!({}));
    if let Some(obj) = data.as_object_mut() {
        obj.insert(
            "status".to_string(),
            serde_json::Value::String(message.to_string()),
        );
    }
    job_repo::set_data(db, job_id, &data.to_string())
}
