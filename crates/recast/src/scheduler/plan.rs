//! Pure job-graph planning.
//!
//! Turns a campaign's declarative configuration into a list of planned
//! jobs with computed run times. No database access and no ambient clock:
//! callers pass `now` and an `Rng`, which keeps every path deterministic
//! under test.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use rand::Rng;

use crate::campaign::{CampaignConfig, ExecutionAction, ManualItem, SourceSpec};
use crate::queue::payload::{DownloadPayload, JobPayload, ScanPayload};

/// One job the planner wants created.
#[derive(Debug, Clone)]
pub struct PlannedJob {
    pub payload: JobPayload,
    pub scheduled_for: Option<DateTime<Utc>>,
}

/// Expands a campaign config into concrete jobs starting from `now`.
///
/// With an explicit execution order, entries are walked sequentially with
/// a running clock; otherwise manual items are scheduled first and one
/// trailing SCAN job carries the continuation parameters.
pub fn plan_campaign(
    config: &CampaignConfig,
    platform: &str,
    now: DateTime<Utc>,
    rng: &mut impl Rng,
) -> Vec<PlannedJob> {
    let window = config
        .active_hours
        .as_ref()
        .and_then(|hours| hours.window().ok());

    if let Some(entries) = config
        .execution_order
        .as_ref()
        .filter(|entries| !entries.is_empty())
    {
        let mut planned = Vec::with_capacity(entries.len());
        let mut clock = now;

        for entry in entries {
            let slot = match entry.at {
                // The UI already computed this one; use it verbatim.
                Some(at) => at,
                None => clock + jittered_interval(config.interval_minutes, config.jitter, rng),
            };
            let slot = clamp_to_active_hours(slot, window);
            clock = slot;

            let payload = match &entry.action {
                ExecutionAction::PostItem { item } => download_payload(config, platform, item),
                ExecutionAction::ScanSource { source } => {
                    scan_payload(config, platform, vec![source.clone()], slot)
                }
            };
            planned.push(PlannedJob {
                payload,
                scheduled_for: Some(slot),
            });
        }
        return planned;
    }

    // Legacy layout: manual items first, evenly spaced, then one scan that
    // spaces out whatever it discovers from the first free slot.
    let interval = Duration::minutes(i64::from(config.interval_minutes.max(1)));
    let mut planned = Vec::new();

    for (i, item) in config.manual_items.iter().enumerate() {
        let slot = clamp_to_active_hours(now + interval * (i as i32), window);
        planned.push(PlannedJob {
            payload: download_payload(config, platform, item),
            scheduled_for: Some(slot),
        });
    }

    if !config.sources.is_empty() {
        let scan_at =
            clamp_to_active_hours(now + interval * (config.manual_items.len() as i32), window);
        planned.push(PlannedJob {
            payload: scan_payload(config, platform, config.sources.clone(), scan_at),
            scheduled_for: Some(scan_at),
        });
    }

    planned
}

fn download_payload(config: &CampaignConfig, platform: &str, item: &ManualItem) -> JobPayload {
    JobPayload::Download(DownloadPayload {
        platform: platform.to_string(),
        source_url: item.url.clone(),
        native_id: item.native_id.clone(),
        caption: item.caption.clone(),
        target_accounts: config.target_accounts.clone(),
        edit_pipeline: config.edit_pipeline.clone(),
        status: None,
    })
}

fn scan_payload(
    config: &CampaignConfig,
    platform: &str,
    sources: Vec<SourceSpec>,
    scan_at: DateTime<Utc>,
) -> JobPayload {
    let interval = Duration::minutes(i64::from(config.interval_minutes.max(1)));
    JobPayload::Scan(ScanPayload {
        platform: platform.to_string(),
        sources,
        interval_minutes: config.interval_minutes,
        // Discovered items start one interval after the scan itself.
        next_slot: Some(scan_at + interval),
        target_accounts: config.target_accounts.clone(),
        post_order: config.post_order,
        edit_pipeline: config.edit_pipeline.clone(),
        status: None,
    })
}

/// Interval scaled by a uniform random factor in [0.5, 1.5] when jitter
/// is enabled.
fn jittered_interval(minutes: u32, jitter: bool, rng: &mut impl Rng) -> Duration {
    let base_seconds = f64::from(minutes.max(1)) * 60.0;
    let factor = if jitter {
        rng.random_range(0.5..1.5)
    } else {
        1.0
    };
    Duration::seconds((base_seconds * factor).round() as i64)
}

/// Snaps a time that falls outside the daily active-hours window forward
/// to the next valid window start: same day when before the window, next
/// day when at or past its end.
pub fn clamp_to_active_hours(
    t: DateTime<Utc>,
    window: Option<(NaiveTime, NaiveTime)>,
) -> DateTime<Utc> {
    let Some((start, end)) = window else {
        return t;
    };
    let time = t.time();
    if time < start {
        t.date_naive().and_time(start).and_utc()
    } else if time >= end {
        match t.date_naive().succ_opt() {
            Some(next_day) => next_day.and_time(start).and_utc(),
            None => t,
        }
    } else {
        t
    }
}
