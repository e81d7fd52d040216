//! Crash recovery: surfacing missed work and shifting schedules forward.
//!
//! Nothing here runs automatically. Missed jobs are surfaced for an
//! operator, and recovery is an explicit command that moves a campaign's
//! remaining schedule forward as a block — re-running stale jobs
//! immediately would fire a burst of catch-up work all at once.

use chrono::{DateTime, Duration, Utc};

use crate::db::job_repo::{self, JobRow};
use crate::db::time::{format_timestamp, parse_timestamp};
use crate::db::{Database, DatabaseError};

/// Fixed slack added on top of the observed overdue delta.
pub const RECOVERY_BUFFER_MINUTES: i64 = 5;

/// Returns jobs considered missed: pending jobs whose due time has
/// lapsed, plus jobs marked missed at startup.
pub fn missed_jobs(db: &Database, now: DateTime<Utc>) -> Result<Vec<JobRow>, DatabaseError> {
    job_repo::missed(db, &format_timestamp(now))
}

/// Marks jobs stranded in `running` (process died mid-execution) as
/// missed so they show up in the recovery listing.
pub fn mark_stranded(db: &Database) -> Result<u64, DatabaseError> {
    job_repo::mark_stranded_running_as_missed(db, "Interrupted by restart while running")
}

/// Shifts the given jobs' schedules forward by the most overdue delta
/// plus a fixed buffer, preserving the relative spacing between them,
/// and marks them pending again. Returns how many jobs were recovered.
pub fn recover_jobs(
    db: &Database,
    job_ids: &[String],
    now: DateTime<Utc>,
) -> Result<u32, DatabaseError> {
    let mut jobs = Vec::new();
    for id in job_ids {
        if let Some(job) = job_repo::find_by_id(db, id)? {
            jobs.push(job);
        } else {
            log::warn!("recover_jobs: job {} not found, skipping", id);
        }
    }

    // The whole block shifts by one delta so sibling spacing survives.
    let earliest = jobs
        .iter()
        .filter_map(|j| j.scheduled_for.as_deref())
        .map(parse_timestamp)
        .min();
    let overdue = match earliest {
        Some(t) if t < now => now - t,
        _ => Duration::zero(),
    };
    let shift = overdue + Duration::minutes(RECOVERY_BUFFER_MINUTES);

    let mut recovered = 0u32;
    for job in &jobs {
        let new_slot = job
            .scheduled_for
            .as_deref()
            .map(|s| format_timestamp(parse_timestamp(s) + shift));
        if job_repo::reactivate(db, &job.id, new_slot.as_deref())? {
            recovered += 1;
        } else {
            log::warn!(
                "recover_jobs: job {} was not recoverable (status changed)",
                job.id
            );
        }
    }

    if recovered > 0 {
        log::info!(
            "Recovered {} job(s), schedule shifted forward by {} minutes",
            recovered,
            shift.num_minutes()
        );
    }
    Ok(recovered)
}
