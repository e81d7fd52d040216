//! Job handlers: one per job kind, dispatched by the queue.
//!
//! A handler receives the full job row plus its decoded payload, performs
//! its collaborator calls sequentially, and returns a typed result. All
//! errors that should fail the job are propagated; only instrumentation is
//! best-effort.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info_span;

use crate::broadcast::EngineEventBroadcaster;
use crate::collab::{MediaFetcher, MediaTransformer, Publisher, SourceScanner};
use crate::db::job_repo::JobRow;
use crate::db::Database;
use crate::error::QueueError;
use crate::queue::payload::JobPayload;
use crate::queue::review_poller::ReviewConfig;

mod download;
mod publish;
mod scan;

pub use scan::order_items;

/// Executes jobs against the injected collaborators.
pub struct JobRunner {
    pub(crate) db: Database,
    pub(crate) scanner: Arc<dyn SourceScanner>,
    pub(crate) fetcher: Arc<dyn MediaFetcher>,
    pub(crate) transformer: Arc<dyn MediaTransformer>,
    pub(crate) publisher: Arc<dyn Publisher>,
    pub(crate) events: EngineEventBroadcaster,
    pub(crate) review: ReviewConfig,
}

impl JobRunner {
    pub fn new(
        db: Database,
        scanner: Arc<dyn SourceScanner>,
        fetcher: Arc<dyn MediaFetcher>,
        transformer: Arc<dyn MediaTransformer>,
        publisher: Arc<dyn Publisher>,
        events: EngineEventBroadcaster,
        review: ReviewConfig,
    ) -> Self {
        Self {
            db,
            scanner,
            fetcher,
            transformer,
            publisher,
            events,
            review,
        }
    }

    /// Decodes the payload and dispatches by job kind. Returns the
    /// serialized result JSON to persist on completion.
    pub fn run(&self, job: &JobRow, now: DateTime<Utc>) -> Result<String, QueueError> {
        let payload = JobPayload::decode(job)?;
        let _span = info_span!("job",
            job_id = %job.id,
            job_type = %job.job_type,
            campaign_id = job.campaign_id.as_deref().unwrap_or("-"),
        )
        .entered();

        let serialize_err = |source| QueueError::Payload {
            job_type: job.job_type.clone(),
            job_id: job.id.clone(),
            source,
        };

        match payload {
            JobPayload::Scan(p) => {
                let summary = self.run_scan(job, p, now)?;
                serde_json::to_string(&summary).map_err(serialize_err)
            }
            JobPayload::Download(p) => {
                let outcome = self.run_download(job, p, now)?;
                serde_json::to_string(&outcome).map_err(serialize_err)
            }
            JobPayload::Publish(p) => {
                let outcome = self.run_publish(job, p, now)?;
                serde_json::to_string(&outcome).map_err(serialize_err)
            }
        }
    }
}
