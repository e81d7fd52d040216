//! Background visibility polling after a review-pending publish.
//!
//! A poller outlives the job that started it. Every attempt re-reads
//! persisted state first, so a poller that races a manual finalization
//! simply exits; after the attempt budget is spent it leaves a terminal
//! note on the job and stops. Pollers are never cancelled externally.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Utc;

use crate::broadcast::{EngineEvent, EngineEventBroadcaster};
use crate::collab::Publisher;
use crate::db::time::format_timestamp;
use crate::db::{item_repo, Database};
use crate::queue::progress;

/// Bounded polling parameters.
#[derive(Debug, Clone)]
pub struct ReviewConfig {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            max_attempts: 10,
        }
    }
}

/// What a poller is watching.
#[derive(Debug, Clone)]
pub struct ReviewTarget {
    pub job_id: String,
    pub item_id: Option<String>,
    pub external_id: String,
}

/// Spawns a detached poller thread for one review-pending publish.
pub fn spawn(
    db: Database,
    publisher: Arc<dyn Publisher>,
    events: EngineEventBroadcaster,
    target: ReviewTarget,
    config: ReviewConfig,
) -> JoinHandle<()> {
    std::thread::spawn(move || run(db, publisher, events, target, config))
}

fn run(
    db: Database,
    publisher: Arc<dyn Publisher>,
    events: EngineEventBroadcaster,
    target: ReviewTarget,
    config: ReviewConfig,
) {
    log::info!(
        "Review poller started for job {} (external id {})",
        target.job_id,
        target.external_id
    );

    for attempt in 1..=config.max_attempts {
        std::thread::sleep(config.poll_interval);

        // Idempotence: re-read state each attempt. Someone else may have
        // finalized the item in the meantime.
        if let Some(ref item_id) = target.item_id {
            match item_repo::find_by_id(&db, item_id) {
                Ok(Some(item)) if item.status != "reviewing" => {
                    log::debug!(
                        "Review poller for job {}: item already '{}', stopping",
                        target.job_id,
                        item.status
                    );
                    return;
                }
                Ok(Some(_)) => {}
                Ok(None) => return,
                Err(e) => {
                    log::warn!("Review poller for job {}: read failed: {}", target.job_id, e);
                    continue;
                }
            }
        }

        match publisher.is_visible(&target.external_id) {
            Ok(true) => {
                if let Some(ref item_id) = target.item_id {
                    if let Err(e) =
                        item_repo::set_published(&db, item_id, &format_timestamp(Utc::now()))
                    {
                        log::error!(
                            "Review poller for job {}: finalize failed: {}",
                            target.job_id,
                            e
                        );
                    }
                }
                let note = format!("Published after external review (check {})", attempt);
                if let Err(e) = progress::write_status(&db, &target.job_id, &note) {
                    log::warn!("Review poller for job {}: note failed: {}", target.job_id, e);
                }
                events.send(EngineEvent::JobsChanged);
                return;
            }
            Ok(false) => {
                log::debug!(
                    "Review poller for job {}: not visible yet (attempt {}/{})",
                    target.job_id,
                    attempt,
                    config.max_attempts
                );
            }
            Err(e) => {
                log::warn!(
                    "Review poller for job {}: visibility check failed: {}",
                    target.job_id,
                    e
                );
            }
        }
    }

    // Attempt budget spent: leave a terminal note and stop. The upload
    // itself succeeded, so the job stays completed.
    let note = format!(
        "Published, still pending external review after {} checks — verify manually",
        config.max_attempts
    );
    if let Err(e) = progress::write_status(&db, &target.job_id, &note) {
        log::warn!("Review poller for job {}: note failed: {}", target.job_id, e);
    }
    events.send(EngineEvent::JobsChanged);
    log::info!("Review poller for job {} gave up after budget", target.job_id);
}
