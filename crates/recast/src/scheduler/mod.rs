//! The campaign scheduler.
//!
//! A fixed tick evaluates which active campaigns are due, expands each due
//! campaign's configuration into concrete jobs exactly once per cycle, and
//! advances its `runAt`. Duplicate triggering is prevented by the
//! at-most-one-outstanding-trigger invariant: a campaign with any pending
//! or running job is skipped.

pub mod plan;

pub use plan::{clamp_to_active_hours, plan_campaign, PlannedJob};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::broadcast::{EngineEvent, EngineEventBroadcaster};
use crate::campaign::CampaignConfig;
use crate::db::campaign_repo::{self, CampaignRow};
use crate::db::time::format_timestamp;
use crate::db::{job_repo, Database};
use crate::error::{ConfigError, SchedulerError};

/// Scheduler tuning knobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
        }
    }
}

/// Periodic campaign-due evaluator and job-graph generator.
pub struct Scheduler {
    db: Database,
    events: EngineEventBroadcaster,
    config: SchedulerConfig,
    in_flight: AtomicBool,
    shutdown: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(db: Database, events: EngineEventBroadcaster, config: SchedulerConfig) -> Self {
        Self {
            db,
            events,
            config,
            in_flight: AtomicBool::new(false),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Runs one scheduler tick, returning how many campaigns were
    /// triggered. Reentrancy-guarded: overlapping calls are dropped.
    pub fn tick(&self, now: DateTime<Utc>) -> usize {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return 0;
        }
        let triggered = self.tick_inner(now);
        self.in_flight.store(false, Ordering::Release);
        triggered
    }

    fn tick_inner(&self, now: DateTime<Utc>) -> usize {
        let campaigns = match campaign_repo::by_status(&self.db, "active") {
            Ok(campaigns) => campaigns,
            Err(e) => {
                log::error!("Scheduler tick: listing campaigns failed: {}", e);
                return 0;
            }
        };

        let mut triggered = 0;
        for campaign in campaigns {
            match self.evaluate_campaign(&campaign, now) {
                Ok(true) => triggered += 1,
                Ok(false) => {}
                Err(e) => {
                    log::error!("Scheduler: campaign {} evaluation failed: {}", campaign.id, e);
                }
            }
        }
        triggered
    }

    /// Checks one campaign's due state and triggers it when appropriate.
    fn evaluate_campaign(
        &self,
        campaign: &CampaignRow,
        now: DateTime<Utc>,
    ) -> Result<bool, SchedulerError> {
        let config = CampaignConfig::from_json(&campaign.config).map_err(SchedulerError::from)?;

        // No runAt: the campaign only runs on manual trigger.
        let Some(run_at) = config.run_at else {
            return Ok(false);
        };
        if run_at > now {
            return Ok(false);
        }

        // At most one outstanding trigger per campaign.
        if job_repo::outstanding_count_for_campaign(&self.db, &campaign.id)? > 0 {
            log::debug!(
                "Campaign {} is due but still has outstanding jobs, skipping",
                campaign.id
            );
            return Ok(false);
        }

        let created = self.generate_jobs(campaign, &config, now)?;
        log::info!(
            "Campaign {} triggered: {} job(s) scheduled",
            campaign.id,
            created
        );

        // Advance from now, not from the stale slot — a long pause must
        // not produce a burst of catch-up triggers.
        let mut advanced = config;
        advanced.run_at = Some(now + chrono::Duration::minutes(i64::from(advanced.interval_minutes.max(1))));
        campaign_repo::update_config(
            &self.db,
            &campaign.id,
            &advanced.to_json()?,
            &format_timestamp(now),
        )?;
        self.events.send(EngineEvent::CampaignsChanged);

        Ok(true)
    }

    /// Expands the campaign config into persisted jobs.
    pub fn generate_jobs(
        &self,
        campaign: &CampaignRow,
        config: &CampaignConfig,
        now: DateTime<Utc>,
    ) -> Result<u32, SchedulerError> {
        let mut rng = rand::rng();
        let planned = plan_campaign(config, &campaign.platform, now, &mut rng);
        if planned.is_empty() {
            return Err(SchedulerError::Config(ConfigError::Validation {
                message: format!("campaign {} has nothing to schedule", campaign.id),
            }));
        }

        for job in &planned {
            let row = job
                .payload
                .to_row(Some(&campaign.id), job.scheduled_for, now)
                .map_err(ConfigError::from)?;
            job_repo::insert(&self.db, &row)?;
        }
        self.events.send(EngineEvent::JobsChanged);

        Ok(planned.len() as u32)
    }

    /// Manual trigger. With `ignore_schedule`, an existing pending job is
    /// pulled to `now` instead of planning a duplicate tree; otherwise
    /// the outstanding-job invariant applies as usual.
    pub fn trigger_manual(
        &self,
        campaign_id: &str,
        ignore_schedule: bool,
        now: DateTime<Utc>,
    ) -> Result<u32, SchedulerError> {
        let campaign = campaign_repo::find_by_id(&self.db, campaign_id)?
            .ok_or_else(|| SchedulerError::CampaignNotFound(campaign_id.to_string()))?;
        let config = CampaignConfig::from_json(&campaign.config).map_err(SchedulerError::from)?;

        if ignore_schedule {
            if let Some(job) = job_repo::first_pending_for_campaign(&self.db, campaign_id)? {
                job_repo::set_scheduled_for(&self.db, &job.id, Some(&format_timestamp(now)))?;
                log::info!(
                    "Campaign {}: pulled pending job {} to now",
                    campaign_id,
                    job.id
                );
                self.events.send(EngineEvent::JobsChanged);
                return Ok(0);
            }
        } else if job_repo::outstanding_count_for_campaign(&self.db, campaign_id)? > 0 {
            return Ok(0);
        }

        self.generate_jobs(&campaign, &config, now)
    }

    /// Start the scheduler loop in a background thread. Accepts a trigger
    /// receiver for manual wakeups.
    pub fn start(self: &Arc<Self>, mut trigger_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
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
                            log::debug!("Manual scheduler tick triggered");
                        },
                    }

                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    scheduler.tick(Utc::now());
                }
            });
        })
    }

    /// Signals the scheduler loop to stop.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}
