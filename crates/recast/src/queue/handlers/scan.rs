//! SCAN handler: discover items from sources and schedule downloads.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use tracing::info_span;

use crate::campaign::{state, CampaignConfig, CampaignEvent, PostOrder, ScanMode};
use crate::collab::DiscoveredItem;
use crate::db::item_repo::{self, ItemRow};
use crate::db::job_repo::JobRow;
use crate::db::time::format_timestamp;
use crate::db::{campaign_repo, job_repo};
use crate::error::QueueError;
use crate::queue::payload::{DownloadPayload, JobPayload, ScanPayload, ScanSummary};
use crate::queue::progress::{JobStatusSink, ProgressSink};

use super::JobRunner;

/// Item statuses that mean "already processed — do not schedule again".
const PROCESSED_STATUSES: &[&str] = &["downloaded", "reviewing", "published"];

impl JobRunner {
    pub(crate) fn run_scan(
        &self,
        job: &JobRow,
        payload: ScanPayload,
        now: DateTime<Utc>,
    ) -> Result<ScanSummary, QueueError> {
        let sink = JobStatusSink::new(self.db.clone(), &job.id, self.events.clone());

        if let Some(ref campaign_id) = job.campaign_id {
            state::apply_event(&self.db, campaign_id, CampaignEvent::ScanStarted, now)?;
        }

        // Scan every source, merging and deduplicating by native id across
        // the whole batch.
        let mut merged: Vec<DiscoveredItem> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut found = 0u32;
        let mut skipped = 0u32;

        for source in &payload.sources {
            let _span = info_span!("scan_source", source = %source.value).entered();
            sink.update(&format!("Scanning {}", source.value));

            // Captcha and rate-limit signals propagate unmodified so the
            // queue can route them.
            let items = self.scanner.scan(source)?;
            found += items.len() as u32;

            for item in items {
                if seen.insert(item.native_id.clone()) {
                    merged.push(item);
                } else {
                    skipped += 1;
                }
            }
        }

        order_items(payload.post_order, &mut merged);

        // Space the download jobs sequentially from the continuation slot,
        // not in a burst.
        let interval = Duration::minutes(i64::from(payload.interval_minutes.max(1)));
        let mut slot = payload.next_slot.unwrap_or(now);
        let mut scheduled = 0u32;

        for item in &merged {
            if let Some(existing) =
                item_repo::find_by_native(&self.db, &payload.platform, &item.native_id)?
            {
                if PROCESSED_STATUSES.contains(&existing.status.as_str()) {
                    skipped += 1;
                    continue;
                }
                item_repo::set_status(&self.db, &existing.id, "scheduled")?;
            } else {
                item_repo::insert(
                    &self.db,
                    &ItemRow {
                        id: uuid::Uuid::new_v4().to_string(),
                        platform: payload.platform.clone(),
                        native_id: item.native_id.clone(),
                        source_url: item.url.clone(),
                        description: item.description.clone(),
                        status: "scheduled".to_string(),
                        local_path: None,
                        metadata: serde_json::to_string(item).ok(),
                        posted_at: item.posted_at.map(format_timestamp),
                        created_at: format_timestamp(now),
                    },
                )?;
            }

            let download = JobPayload::Download(DownloadPayload {
                platform: payload.platform.clone(),
                source_url: item.url.clone(),
                native_id: Some(item.native_id.clone()),
                caption: item.description.clone(),
                target_accounts: payload.target_accounts.clone(),
                edit_pipeline: payload.edit_pipeline.clone(),
                status: None,
            });
            let row = download
                .to_row(job.campaign_id.as_deref(), Some(slot), now)
                .map_err(|source| QueueError::Payload {
                    job_type: "download".to_string(),
                    job_id: job.id.clone(),
                    source,
                })?;
            job_repo::insert(&self.db, &row)?;

            slot = slot + interval;
            scheduled += 1;
        }

        let summary = ScanSummary {
            found,
            scheduled,
            skipped,
        };
        sink.update(&format!(
            "Scan complete: {} found, {} scheduled, {} skipped",
            summary.found, summary.scheduled, summary.skipped
        ));

        if let Some(ref campaign_id) = job.campaign_id {
            let event = match scan_mode_of(&self.db, campaign_id) {
                ScanMode::Continuous => CampaignEvent::ScanCompletedContinuous,
                ScanMode::History => CampaignEvent::ScanCompletedHistory,
            };
            state::apply_event(&self.db, campaign_id, event, now)?;
        }

        Ok(summary)
    }
}

/// Looks up the owning campaign's scan mode, defaulting to history when
/// the campaign or its config is unreadable.
fn scan_mode_of(db: &crate::db::Database, campaign_id: &str) -> ScanMode {
    match campaign_repo::find_by_id(db, campaign_id) {
        Ok(Some(campaign)) => CampaignConfig::from_json(&campaign.config)
            .map(|c| c.scan_mode)
            .unwrap_or_default(),
        _ => ScanMode::default(),
    }
}

/// Sorts discovered items by the configured post-order rule. The
/// comparator is total and the sort is stable; native ids double as a
/// time-ordered surrogate for newest/oldest.
pub fn order_items(order: PostOrder, items: &mut [DiscoveredItem]) {
    match order {
        PostOrder::Newest => items.sort_by(|a, b| b.native_id.cmp(&a.native_id)),
        PostOrder::Oldest => items.sort_by(|a, b| a.native_id.cmp(&b.native_id)),
        PostOrder::MostLiked => items.sort_by(|a, b| b.like_count.cmp(&a.like_count)),
        PostOrder::LeastLiked => items.sort_by(|a, b| a.like_count.cmp(&b.like_count)),
    }
}
