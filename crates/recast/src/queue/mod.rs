//! The persisted job queue.
//!
//! A fixed tick drains at most ONE due job from the store, dispatches it
//! to its handler, and records the outcome durably. One job per tick is a
//! deliberate throttle on job-start rate, not an oversight — see the
//! `TickOutcome` returned from `tick` for observability.

pub mod handlers;
pub mod payload;
pub mod progress;
pub mod recovery;
pub mod review_poller;

pub use handlers::{order_items, JobRunner};
pub use payload::{
    DownloadOutcome, DownloadPayload, FailureDetail, JobKind, JobPayload, PublishOutcome,
    PublishPayload, ScanPayload, ScanSummary,
};
pub use progress::{JobStatusSink, NoopSink, ProgressSink};
pub use review_poller::{ReviewConfig, ReviewTarget};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::broadcast::{EngineEvent, EngineEventBroadcaster};
use crate::campaign::{state, CampaignConfig, CampaignEvent};
use crate::collab::CollabError;
use crate::db::job_repo::{self, JobRow};
use crate::db::time::format_timestamp;
use crate::db::{campaign_repo, Database};
use crate::error::QueueError;

/// Queue tuning knobs.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How often the queue looks for due work.
    pub tick_interval: Duration,
    /// Global ceiling on concurrently running jobs.
    pub max_running: u64,
    /// How long dispatch stays suspended after a rate-limit signal.
    pub rate_limit_backoff: Duration,
    /// Max length of the truncated error summary on the job row.
    pub error_summary_len: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            max_running: 100,
            rate_limit_backoff: Duration::from_secs(15 * 60),
            error_summary_len: 240,
        }
    }
}

/// What a single tick did. Mostly for tests and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// A previous tick is still in flight; this one was dropped.
    Busy,
    /// Dispatch suspended by the rate-limit throttle.
    Throttled,
    /// Running count is at the configured ceiling.
    AtCapacity,
    /// No due work.
    Idle,
    /// The selected job was claimed by someone else in between.
    Contended,
    /// One job was dispatched and settled.
    Dispatched { job_id: String, success: bool },
}

/// Database-backed job queue with bounded concurrency.
pub struct JobQueue {
    db: Database,
    runner: JobRunner,
    events: EngineEventBroadcaster,
    config: QueueConfig,
    in_flight: AtomicBool,
    throttle_until: Mutex<Option<DateTime<Utc>>>,
    shutdown: Arc<AtomicBool>,
}

impl JobQueue {
    pub fn new(
        db: Database,
        runner: JobRunner,
        events: EngineEventBroadcaster,
        config: QueueConfig,
    ) -> Self {
        Self {
            db,
            runner,
            events,
            config,
            in_flight: AtomicBool::new(false),
            throttle_until: Mutex::new(None),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Runs one queue tick. Reentrancy-guarded: overlapping calls are
    /// dropped, not queued.
    pub fn tick(&self, now: DateTime<Utc>) -> TickOutcome {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return TickOutcome::Busy;
        }
        let outcome = self.tick_inner(now);
        self.in_flight.store(false, Ordering::Release);
        outcome
    }

    fn tick_inner(&self, now: DateTime<Utc>) -> TickOutcome {
        if let Some(until) = self.throttled_until() {
            if until > now {
                return TickOutcome::Throttled;
            }
            self.clear_throttle();
        }

        match job_repo::count_by_status(&self.db, "running") {
            Ok(running) if running >= self.config.max_running => {
                log::debug!(
                    "Queue at capacity ({}/{} running), skipping tick",
                    running,
                    self.config.max_running
                );
                return TickOutcome::AtCapacity;
            }
            Ok(_) => {}
            Err(e) => {
                log::error!("Queue tick: counting running jobs failed: {}", e);
                return TickOutcome::Idle;
            }
        }

        // Exactly one eligible job per tick: earliest due first, FIFO on
        // ties, ASAP (NULL slot) jobs ahead of everything.
        let job = match job_repo::next_due(&self.db, &format_timestamp(now)) {
            Ok(Some(job)) => job,
            Ok(None) => return TickOutcome::Idle,
            Err(e) => {
                log::error!("Queue tick: job selection failed: {}", e);
                return TickOutcome::Idle;
            }
        };

        // Claim before dispatch so a crash mid-execution leaves a visible
        // `running` row for recovery tooling.
        match job_repo::mark_running(&self.db, &job.id, &format_timestamp(now)) {
            Ok(true) => {}
            Ok(false) => return TickOutcome::Contended,
            Err(e) => {
                log::error!("Queue tick: claiming job {} failed: {}", job.id, e);
                return TickOutcome::Idle;
            }
        }
        self.events.send(EngineEvent::JobsChanged);

        let success = self.execute(&job, now);

        // Success or failure: completion check, then tell observers.
        if let Some(ref campaign_id) = job.campaign_id {
            self.completion_check(campaign_id, now);
        }
        self.events.send(EngineEvent::JobsChanged);

        TickOutcome::Dispatched {
            job_id: job.id,
            success,
        }
    }

    /// Dispatches the job to its handler and records the outcome. Handler
    /// errors are caught here; nothing a handler does can take the loop
    /// down.
    fn execute(&self, job: &JobRow, now: DateTime<Utc>) -> bool {
        match self.runner.run(job, now) {
            Ok(result_json) => {
                if let Err(e) = job_repo::mark_completed(
                    &self.db,
                    &job.id,
                    Some(&result_json),
                    &format_timestamp(Utc::now()),
                ) {
                    log::error!("Recording completion of job {} failed: {}", job.id, e);
                }
                log::info!("Job {} ({}) completed", job.id, job.job_type);
                true
            }
            Err(err) => {
                self.settle_failure(job, err, now);
                false
            }
        }
    }

    fn settle_failure(&self, job: &JobRow, err: QueueError, now: DateTime<Utc>) {
        let full = error_chain(&err);
        let summary = truncate(&full, self.config.error_summary_len);

        let mut detail = FailureDetail {
            error_full: full.clone(),
            local_path: None,
        };

        match &err {
            QueueError::Collab(CollabError::RateLimited(_)) => {
                self.arm_throttle(now);
            }
            QueueError::Collab(CollabError::Captcha(_)) => {
                if let Some(ref campaign_id) = job.campaign_id {
                    if let Err(e) = state::apply_event(
                        &self.db,
                        campaign_id,
                        CampaignEvent::CaptchaDetected,
                        now,
                    ) {
                        log::error!("Applying captcha event to {} failed: {}", campaign_id, e);
                    }
                    self.events.send(EngineEvent::CampaignsChanged);
                }
            }
            QueueError::Collab(CollabError::Failed {
                artifact: Some(path),
                ..
            }) => {
                // Keep the partial output reachable for user tooling.
                detail.local_path = Some(path.display().to_string());
            }
            _ => {}
        }

        let detail_json = serde_json::to_string(&detail).unwrap_or_default();
        if let Err(e) = job_repo::mark_failed(
            &self.db,
            &job.id,
            &summary,
            Some(&detail_json),
            &format_timestamp(Utc::now()),
        ) {
            log::error!("Recording failure of job {} failed: {}", job.id, e);
        }
        log::warn!("Job {} ({}) failed: {}", job.id, job.job_type, summary);
    }

    /// Retires a campaign when nothing is outstanding and nothing more
    /// will be generated (no sources, or a non-recurring scan mode).
    fn completion_check(&self, campaign_id: &str, now: DateTime<Utc>) {
        let result = (|| -> Result<(), QueueError> {
            let Some(campaign) = campaign_repo::find_by_id(&self.db, campaign_id)? else {
                return Ok(());
            };
            if job_repo::outstanding_count_for_campaign(&self.db, campaign_id)? > 0 {
                return Ok(());
            }
            let config = match CampaignConfig::from_json(&campaign.config) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!("Completion check: campaign {} config unreadable: {}", campaign_id, e);
                    return Ok(());
                }
            };
            if config.sources.is_empty() || !config.is_recurring() {
                state::apply_event(&self.db, campaign_id, CampaignEvent::AllJobsDone, now)?;
                self.events.send(EngineEvent::CampaignsChanged);
            }
            Ok(())
        })();
        if let Err(e) = result {
            log::error!("Completion check for campaign {} failed: {}", campaign_id, e);
        }
    }

    fn throttled_until(&self) -> Option<DateTime<Utc>> {
        match self.throttle_until.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn clear_throttle(&self) {
        if let Ok(mut guard) = self.throttle_until.lock() {
            *guard = None;
        }
    }

    fn arm_throttle(&self, now: DateTime<Utc>) {
        let backoff = chrono::Duration::from_std(self.config.rate_limit_backoff)
            .unwrap_or_else(|_| chrono::Duration::minutes(15));
        let until = now + backoff;
        if let Ok(mut guard) = self.throttle_until.lock() {
            *guard = Some(until);
        }
        log::warn!("Rate limited: suspending dispatch until {}", until);
    }

    /// Start the queue loop in a background thread. Accepts a trigger
    /// receiver so a manual command can force an immediate tick.
    pub fn start(self: &Arc<Self>, mut trigger_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.config.tick_interval;

        std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            rt.block_on(async {
                let mut interval_timer = tokio::time::interval(interval);
                interval_timer.tick().await; // skip immediate first tick

                loop {
                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    tokio::select! {
                        _ = interval_timer.tick() => {},
                        Ok(()) = trigger_rx.recv() => {
                            log::debug!("Manual queue tick triggered");
                        },
                    }

                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    queue.tick(Utc::now());
                }
            });
        })
    }

    /// Signals the queue loop to stop.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

/// Joins an error with its source chain into one line.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(s) = source {
        out.push_str(": ");
        out.push_str(&s.to_string());
        source = s.source();
    }
    out
}

/// Truncates on a char boundary, appending an ellipsis when cut.
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", cut)
}
