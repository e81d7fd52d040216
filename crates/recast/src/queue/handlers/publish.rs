//! PUBLISH handler: precondition checks, upload with streamed progress,
//! and review-pending finalization.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::campaign::{state, CampaignEvent};
use crate::collab::PublishRequest;
use crate::db::job_repo::JobRow;
use crate::db::time::format_timestamp;
use crate::db::{account_repo, item_repo};
use crate::error::QueueError;
use crate::queue::payload::{PublishOutcome, PublishPayload};
use crate::queue::progress::{JobStatusSink, ProgressSink};
use crate::queue::review_poller::{self, ReviewTarget};

use super::JobRunner;

impl JobRunner {
    pub(crate) fn run_publish(
        &self,
        job: &JobRow,
        payload: PublishPayload,
        now: DateTime<Utc>,
    ) -> Result<PublishOutcome, QueueError> {
        // Precondition: a target account with usable credentials.
        let account = account_repo::find_by_id(&self.db, &payload.account_id)?
            .ok_or_else(|| QueueError::UnknownAccount(payload.account_id.clone()))?;
        if !account.has_valid_session() {
            return Err(QueueError::MissingSession {
                account: account.username,
            });
        }

        // Precondition: the artifact must exist locally.
        let local_path = PathBuf::from(&payload.local_path);
        if !local_path.exists() {
            return Err(QueueError::MissingArtifact { path: local_path });
        }

        let sink = JobStatusSink::new(self.db.clone(), &job.id, self.events.clone());
        sink.update(&format!("Publishing to {}", account.username));

        let request = PublishRequest {
            local_path: local_path.clone(),
            caption: payload.caption.clone(),
            username: account.username.clone(),
            session_data: account.session_data.clone().unwrap_or_default(),
        };
        let receipt = self.publisher.publish(&request, &sink)?;

        if receipt.pending_review {
            sink.update("Upload accepted, pending external review");
            if let Some(ref item_id) = payload.item_id {
                item_repo::set_status(&self.db, item_id, "reviewing")?;
            }
            match receipt.external_id {
                Some(ref external_id) => {
                    review_poller::spawn(
                        self.db.clone(),
                        Arc::clone(&self.publisher),
                        self.events.clone(),
                        ReviewTarget {
                            job_id: job.id.clone(),
                            item_id: payload.item_id.clone(),
                            external_id: external_id.clone(),
                        },
                        self.review.clone(),
                    );
                }
                None => {
                    log::warn!(
                        "Job {}: pending review without an external id, cannot poll",
                        job.id
                    );
                    sink.update("Pending external review (no id to poll) — verify manually");
                    if let Some(ref campaign_id) = job.campaign_id {
                        state::apply_event(
                            &self.db,
                            campaign_id,
                            CampaignEvent::NeedsReview,
                            now,
                        )?;
                    }
                }
            }
        } else {
            if let Some(ref item_id) = payload.item_id {
                item_repo::set_published(&self.db, item_id, &format_timestamp(now))?;
            }
            sink.update(&format!("Published to {}", account.username));
        }

        Ok(PublishOutcome {
            account: account.username,
            local_path: payload.local_path,
            external_id: receipt.external_id,
            external_url: receipt.external_url,
            pending_review: receipt.pending_review,
        })
    }
}
