//! DOWNLOAD handler: fetch the artifact, run the edit pipeline, and
//! chain one PUBLISH job per target account.

use chrono::{DateTime, Utc};

use crate::db::item_repo::{self, ItemRow};
use crate::db::job_repo::{self, JobRow};
use crate::db::time::format_timestamp;
use crate::error::QueueError;
use crate::queue::payload::{DownloadOutcome, DownloadPayload, JobPayload, PublishPayload};
use crate::queue::progress::{JobStatusSink, ProgressSink};

use super::JobRunner;

impl JobRunner {
    pub(crate) fn run_download(
        &self,
        job: &JobRow,
        payload: DownloadPayload,
        now: DateTime<Utc>,
    ) -> Result<DownloadOutcome, QueueError> {
        let sink = JobStatusSink::new(self.db.clone(), &job.id, self.events.clone());

        // The fetch collaborator is idempotent: re-running a job after a
        // partial failure hits its cache instead of re-downloading.
        let native_id = payload
            .native_id
            .clone()
            .unwrap_or_else(|| payload.source_url.clone());
        sink.update("Fetching media");
        let fetched = self.fetcher.fetch(&payload.source_url, &native_id)?;

        let mut local_path = fetched.local_path.clone();
        if !payload.edit_pipeline.is_empty() {
            sink.update(&format!(
                "Applying edit pipeline ({} effects)",
                payload.edit_pipeline.len()
            ));
            local_path = self.transformer.transform(&local_path, &payload.edit_pipeline)?;
        }

        // Track the item. Manual items may not have a row yet.
        let item = item_repo::upsert(
            &self.db,
            &ItemRow {
                id: uuid::Uuid::new_v4().to_string(),
                platform: payload.platform.clone(),
                native_id: native_id.clone(),
                source_url: payload.source_url.clone(),
                description: payload.caption.clone(),
                status: "discovered".to_string(),
                local_path: None,
                metadata: Some(fetched.meta.to_string()),
                posted_at: None,
                created_at: format_timestamp(now),
            },
        )?;
        item_repo::set_downloaded(&self.db, &item.id, &local_path.to_string_lossy())?;

        let local_path_str = local_path.to_string_lossy().to_string();
        let mut publish_jobs = 0u32;
        for account_id in &payload.target_accounts {
            let publish = JobPayload::Publish(PublishPayload {
                local_path: local_path_str.clone(),
                account_id: account_id.clone(),
                caption: payload.caption.clone(),
                item_id: Some(item.id.clone()),
                status: None,
            });
            let row = publish
                .to_row(job.campaign_id.as_deref(), None, now)
                .map_err(|source| QueueError::Payload {
                    job_type: "publish".to_string(),
                    job_id: job.id.clone(),
                    source,
                })?;
            job_repo::insert(&self.db, &row)?;
            publish_jobs += 1;
        }

        sink.update(&format!(
            "Download complete ({} publish job{} queued)",
            publish_jobs,
            if publish_jobs == 1 { "" } else { "s" }
        ));

        Ok(DownloadOutcome {
            local_path: local_path_str,
            cached: fetched.cached,
            publish_jobs,
        })
    }
}
