//! The long-lived engine facade.
//!
//! Constructed once at process start, the `Engine` owns the database
//! handle, the collaborator handles, the event broadcaster, and the two
//! background services. Everything an operator/UI layer can do is a
//! method here — there are no ambient globals to reach for.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::broadcast::{EngineEvent, EngineEventBroadcaster};
use crate::campaign::{state, CampaignConfig, CampaignEvent, CampaignStatus};
use crate::collab::{MediaFetcher, MediaTransformer, Publisher, SourceScanner};
use crate::db::campaign_repo::{self, CampaignRow};
use crate::db::job_repo::{self, JobFilter, JobRow};
use crate::db::time::format_timestamp;
use crate::db::Database;
use crate::error::{RecastError, Result, SchedulerError};
use crate::queue::{recovery, JobQueue, JobRunner, QueueConfig, ReviewConfig};
use crate::scheduler::{Scheduler, SchedulerConfig};

/// The collaborator implementations injected at construction.
#[derive(Clone)]
pub struct Collaborators {
    pub scanner: Arc<dyn SourceScanner>,
    pub fetcher: Arc<dyn MediaFetcher>,
    pub transformer: Arc<dyn MediaTransformer>,
    pub publisher: Arc<dyn Publisher>,
}

/// Engine-wide configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub queue: QueueConfig,
    pub scheduler: SchedulerConfig,
    pub review: ReviewConfig,
}

/// Outcome of the conservative startup pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartupReport {
    pub campaigns_paused: u32,
    pub jobs_marked_missed: u64,
}

/// The engine: database, services, and the operator command surface.
pub struct Engine {
    db: Database,
    events: EngineEventBroadcaster,
    queue: Arc<JobQueue>,
    scheduler: Arc<Scheduler>,
    queue_trigger: broadcast::Sender<()>,
    scheduler_trigger: broadcast::Sender<()>,
    queue_handle: Mutex<Option<JoinHandle<()>>>,
    scheduler_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    pub fn new(db: Database, collaborators: Collaborators, config: EngineConfig) -> Self {
        let events = EngineEventBroadcaster::default();
        let runner = JobRunner::new(
            db.clone(),
            collaborators.scanner,
            collaborators.fetcher,
            collaborators.transformer,
            collaborators.publisher,
            events.clone(),
            config.review,
        );
        let queue = Arc::new(JobQueue::new(
            db.clone(),
            runner,
            events.clone(),
            config.queue,
        ));
        let scheduler = Arc::new(Scheduler::new(db.clone(), events.clone(), config.scheduler));
        let (queue_trigger, _) = broadcast::channel(16);
        let (scheduler_trigger, _) = broadcast::channel(16);

        Self {
            db,
            events,
            queue,
            scheduler,
            queue_trigger,
            scheduler_trigger,
            queue_handle: Mutex::new(None),
            scheduler_handle: Mutex::new(None),
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Subscribes to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────

    /// Starts the background queue and scheduler loops.
    pub fn start(&self) {
        let mut queue_handle = match self.queue_handle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if queue_handle.is_none() {
            *queue_handle = Some(self.queue.start(self.queue_trigger.subscribe()));
        }

        let mut scheduler_handle = match self.scheduler_handle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if scheduler_handle.is_none() {
            *scheduler_handle = Some(self.scheduler.start(self.scheduler_trigger.subscribe()));
        }

        log::info!("Engine services started");
    }

    /// Stops the background loops and waits for them to exit.
    pub fn stop(&self) {
        self.queue.stop();
        self.scheduler.stop();
        // Wake both loops so they observe the shutdown flag.
        let _ = self.queue_trigger.send(());
        let _ = self.scheduler_trigger.send(());

        if let Ok(mut guard) = self.queue_handle.lock() {
            if let Some(handle) = guard.take() {
                if handle.join().is_err() {
                    log::error!("Queue loop panicked");
                }
            }
        }
        if let Ok(mut guard) = self.scheduler_handle.lock() {
            if let Some(handle) = guard.take() {
                if handle.join().is_err() {
                    log::error!("Scheduler loop panicked");
                }
            }
        }
        log::info!("Engine services stopped");
    }

    /// Conservative restart pass: every campaign that was running is
    /// paused (explicit resume required), and jobs stranded `running` are
    /// surfaced as missed.
    pub fn startup(&self, now: DateTime<Utc>) -> Result<StartupReport> {
        let mut campaigns_paused = 0u32;
        for campaign in campaign_repo::all(&self.db)? {
            let before = campaign.status.clone();
            state::apply_event(&self.db, &campaign.id, CampaignEvent::AppStartup, now)?;
            if let Some(after) = campaign_repo::find_by_id(&self.db, &campaign.id)? {
                if after.status != before {
                    campaigns_paused += 1;
                }
            }
        }

        let jobs_marked_missed = recovery::mark_stranded(&self.db)?;

        if campaigns_paused > 0 || jobs_marked_missed > 0 {
            log::info!(
                "Startup: paused {} campaign(s), marked {} stranded job(s) missed",
                campaigns_paused,
                jobs_marked_missed
            );
        }
        self.events.send(EngineEvent::CampaignsChanged);
        self.events.send(EngineEvent::JobsChanged);

        Ok(StartupReport {
            campaigns_paused,
            jobs_marked_missed,
        })
    }

    // ─── Campaign commands ──────────────────────────────────────────────

    /// Creates a campaign after validating its configuration.
    pub fn create_campaign(
        &self,
        name: &str,
        platform: &str,
        config: &CampaignConfig,
        now: DateTime<Utc>,
    ) -> Result<CampaignRow> {
        config.validate()?;
        let row = CampaignRow {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            platform: platform.to_string(),
            status: CampaignStatus::Active.as_str().to_string(),
            schedule_cron: None,
            config: config.to_json()?,
            created_at: format_timestamp(now),
            updated_at: format_timestamp(now),
        };
        campaign_repo::insert(&self.db, &row)?;
        log::info!("Campaign '{}' created ({})", name, row.id);
        self.events.send(EngineEvent::CampaignsChanged);
        Ok(row)
    }

    /// Replaces a campaign's configuration after validation.
    pub fn update_campaign_config(
        &self,
        campaign_id: &str,
        config: &CampaignConfig,
        now: DateTime<Utc>,
    ) -> Result<()> {
        config.validate()?;
        let changed = campaign_repo::update_config(
            &self.db,
            campaign_id,
            &config.to_json()?,
            &format_timestamp(now),
        )?;
        if !changed {
            return Err(RecastError::Scheduler(SchedulerError::CampaignNotFound(
                campaign_id.to_string(),
            )));
        }
        self.events.send(EngineEvent::CampaignsChanged);
        Ok(())
    }

    /// Deletes a campaign; its jobs go with it (cascade).
    pub fn delete_campaign(&self, campaign_id: &str) -> Result<bool> {
        let deleted = campaign_repo::delete(&self.db, campaign_id)?;
        if deleted {
            self.events.send(EngineEvent::CampaignsChanged);
            self.events.send(EngineEvent::JobsChanged);
        }
        Ok(deleted)
    }

    pub fn list_campaigns(&self) -> Result<Vec<CampaignRow>> {
        Ok(campaign_repo::all(&self.db)?)
    }

    /// Manually triggers a campaign, optionally bypassing the schedule
    /// check, and wakes the queue so work starts without waiting a tick.
    pub fn trigger_campaign(
        &self,
        campaign_id: &str,
        ignore_schedule: bool,
        now: DateTime<Utc>,
    ) -> Result<u32> {
        let created = self
            .scheduler
            .trigger_manual(campaign_id, ignore_schedule, now)?;
        let _ = self.queue_trigger.send(());
        Ok(created)
    }

    pub fn pause_campaign(&self, campaign_id: &str, now: DateTime<Utc>) -> Result<()> {
        state::apply_event(&self.db, campaign_id, CampaignEvent::ManualPause, now)?;
        self.events.send(EngineEvent::CampaignsChanged);
        Ok(())
    }

    pub fn resume_campaign(&self, campaign_id: &str, now: DateTime<Utc>) -> Result<()> {
        state::apply_event(&self.db, campaign_id, CampaignEvent::ManualResume, now)?;
        self.events.send(EngineEvent::CampaignsChanged);
        Ok(())
    }

    pub fn resolve_captcha(&self, campaign_id: &str, now: DateTime<Utc>) -> Result<()> {
        state::apply_event(&self.db, campaign_id, CampaignEvent::CaptchaResolved, now)?;
        self.events.send(EngineEvent::CampaignsChanged);
        Ok(())
    }

    pub fn resolve_review(&self, campaign_id: &str, now: DateTime<Utc>) -> Result<()> {
        state::apply_event(&self.db, campaign_id, CampaignEvent::ReviewResolved, now)?;
        self.events.send(EngineEvent::CampaignsChanged);
        Ok(())
    }

    /// Archives a campaign. Explicit command, not an event — any
    /// non-archived campaign can be archived.
    pub fn archive_campaign(&self, campaign_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let Some(campaign) = campaign_repo::find_by_id(&self.db, campaign_id)? else {
            return Ok(false);
        };
        if campaign.status == CampaignStatus::Archived.as_str() {
            return Ok(false);
        }
        let changed = campaign_repo::set_status_if(
            &self.db,
            campaign_id,
            &campaign.status,
            CampaignStatus::Archived.as_str(),
            &format_timestamp(now),
        )?;
        if changed {
            self.events.send(EngineEvent::CampaignsChanged);
        }
        Ok(changed)
    }

    // ─── Job commands ───────────────────────────────────────────────────

    pub fn list_jobs(&self, filter: &JobFilter) -> Result<(Vec<JobRow>, u64)> {
        Ok(job_repo::query(&self.db, filter)?)
    }

    pub fn get_job(&self, job_id: &str) -> Result<Option<JobRow>> {
        Ok(job_repo::find_by_id(&self.db, job_id)?)
    }

    /// Pauses a job, only while it is still pending.
    pub fn pause_job(&self, job_id: &str) -> Result<bool> {
        let changed = job_repo::pause(&self.db, job_id)?;
        if changed {
            self.events.send(EngineEvent::JobsChanged);
        }
        Ok(changed)
    }

    pub fn resume_job(&self, job_id: &str) -> Result<bool> {
        let changed = job_repo::resume(&self.db, job_id)?;
        if changed {
            self.events.send(EngineEvent::JobsChanged);
        }
        Ok(changed)
    }

    /// Resets a failed job to pending, clearing its error state.
    pub fn retry_job(&self, job_id: &str) -> Result<bool> {
        let changed = job_repo::reset_for_retry(&self.db, job_id)?;
        if changed {
            self.events.send(EngineEvent::JobsChanged);
            let _ = self.queue_trigger.send(());
        }
        Ok(changed)
    }

    pub fn delete_job(&self, job_id: &str) -> Result<bool> {
        let changed = job_repo::delete(&self.db, job_id)?;
        if changed {
            self.events.send(EngineEvent::JobsChanged);
        }
        Ok(changed)
    }

    /// Retries every failed job of a campaign. Returns how many were reset.
    pub fn retry_failed_jobs(&self, campaign_id: &str) -> Result<u32> {
        let failed = job_repo::failed_for_campaign(&self.db, campaign_id)?;
        let mut reset = 0u32;
        for job in &failed {
            if job_repo::reset_for_retry(&self.db, &job.id)? {
                reset += 1;
            }
        }
        if reset > 0 {
            self.events.send(EngineEvent::JobsChanged);
            let _ = self.queue_trigger.send(());
        }
        Ok(reset)
    }

    // ─── Recovery commands ──────────────────────────────────────────────

    /// Pending jobs whose due time already passed, plus jobs stranded by
    /// a crash.
    pub fn missed_jobs(&self, now: DateTime<Utc>) -> Result<Vec<JobRow>> {
        Ok(recovery::missed_jobs(&self.db, now)?)
    }

    /// Shifts the given jobs forward (overdue delta + buffer, spacing
    /// preserved) and marks them pending.
    pub fn recover_jobs(&self, job_ids: &[String], now: DateTime<Utc>) -> Result<u32> {
        let recovered = recovery::recover_jobs(&self.db, job_ids, now)?;
        if recovered > 0 {
            self.events.send(EngineEvent::JobsChanged);
        }
        Ok(recovered)
    }
}
