//! Job repository — CRUD and status transitions for the `jobs` table.
//!
//! Status changes are expressed as compare-and-swap updates: every UPDATE
//! carries a `WHERE status = ...` guard and reports whether it actually
//! changed a row. With a single writer this doubles as an optimistic
//! concurrency check.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub campaign_id: Option<String>,
    pub job_type: String,
    pub status: String,
    pub scheduled_for: Option<String>,
    pub data: String,
    pub result: Option<String>,
    pub error_message: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub created_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            campaign_id: row.get("campaign_id")?,
            job_type: row.get("job_type")?,
            status: row.get("status")?,
            scheduled_for: row.get("scheduled_for")?,
            data: row.get("data")?,
            result: row.get("result")?,
            error_message: row.get("error_message")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub campaign_id: Option<String>,
    pub status: Option<String>,
    pub job_type: Option<String>,
    pub exclude_status: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, campaign_id, job_type, status, scheduled_for, data,
             result, error_message, started_at, completed_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                job.id,
                job.campaign_id,
                job.job_type,
                job.status,
                job.scheduled_for,
                job.data,
                job.result,
                job.error_message,
                job.started_at,
                job.completed_at,
                job.created_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Queries jobs with filters, returning (rows, total_count).
pub fn query(db: &Database, filter: &JobFilter) -> Result<(Vec<JobRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref campaign_id) = filter.campaign_id {
            conditions.push(format!("campaign_id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(campaign_id.clone()));
        }
        if let Some(ref status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.clone()));
        }
        if let Some(ref job_type) = filter.job_type {
            conditions.push(format!("job_type = ?{}", param_values.len() + 1));
            param_values.push(Box::new(job_type.clone()));
        }
        if let Some(ref exclude_status) = filter.exclude_status {
            conditions.push(format!("status != ?{}", param_values.len() + 1));
            param_values.push(Box::new(exclude_status.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        // Count total matching rows.
        let count_sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        // Fetch paginated results.
        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM jobs {} ORDER BY created_at DESC LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<JobRow> = stmt
            .query_map(params_ref.as_slice(), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Counts jobs with the given status.
pub fn count_by_status(db: &Database, status: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = ?1",
            params![status],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Selects the single next eligible job: pending and due (a NULL
/// `scheduled_for` means "run ASAP" and sorts first under ASC).
/// Ties on `scheduled_for` are broken by earliest `created_at`.
pub fn next_due(db: &Database, now: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs
             WHERE status = 'pending' AND (scheduled_for IS NULL OR scheduled_for <= ?1)
             ORDER BY scheduled_for ASC, created_at ASC
             LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![now], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Claims a pending job for execution. Returns false when the job was
/// no longer pending (lost the race or mutated in between).
pub fn mark_running(db: &Database, id: &str, started_at: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'running', started_at = ?2, error_message = NULL
             WHERE id = ?1 AND status = 'pending'",
            params![id, started_at],
        )?;
        Ok(changed > 0)
    })
}

/// Marks a running job completed with its result payload.
pub fn mark_completed(
    db: &Database,
    id: &str,
    result: Option<&str>,
    completed_at: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'completed', result = ?2, completed_at = ?3
             WHERE id = ?1 AND status = 'running'",
            params![id, result, completed_at],
        )?;
        Ok(changed > 0)
    })
}

/// Marks a running job failed, recording the truncated error summary and
/// any structured failure detail.
pub fn mark_failed(
    db: &Database,
    id: &str,
    error_message: &str,
    result: Option<&str>,
    completed_at: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'failed', error_message = ?2, result = ?3, completed_at = ?4
             WHERE id = ?1 AND status = 'running'",
            params![id, error_message, result, completed_at],
        )?;
        Ok(changed > 0)
    })
}

/// Overwrites the job's `data` payload (mid-run progress writes).
pub fn set_data(db: &Database, id: &str, data: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute("UPDATE jobs SET data = ?2 WHERE id = ?1", params![id, data])?;
        Ok(())
    })
}

/// Pauses a job, but only while it is still pending.
pub fn pause(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'paused' WHERE id = ?1 AND status = 'pending'",
            params![id],
        )?;
        Ok(changed > 0)
    })
}

/// Resumes a paused job back to pending.
pub fn resume(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'pending' WHERE id = ?1 AND status = 'paused'",
            params![id],
        )?;
        Ok(changed > 0)
    })
}

/// Resets a failed job to pending, clearing error state and timestamps.
pub fn reset_for_retry(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'pending', error_message = NULL, result = NULL,
             started_at = NULL, completed_at = NULL
             WHERE id = ?1 AND status = 'failed'",
            params![id],
        )?;
        Ok(changed > 0)
    })
}

/// Reactivates a missed (or still pending) job at a new time slot,
/// clearing any stale error state. Used by recovery.
pub fn reactivate(
    db: &Database,
    id: &str,
    scheduled_for: Option<&str>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'pending', scheduled_for = ?2, error_message = NULL,
             started_at = NULL, completed_at = NULL
             WHERE id = ?1 AND status IN ('pending', 'missed', 'paused')",
            params![id, scheduled_for],
        )?;
        Ok(changed > 0)
    })
}

/// Marks every job currently `running` as `missed` (startup recovery
/// surfacing for jobs stranded by a crash). Returns how many were marked.
pub fn mark_stranded_running_as_missed(
    db: &Database,
    note: &str,
) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'missed', error_message = ?1 WHERE status = 'running'",
            params![note],
        )?;
        Ok(changed as u64)
    })
}

/// Pulls an existing pending job's slot to the given time ("ignore
/// schedule" manual trigger).
pub fn set_scheduled_for(
    db: &Database,
    id: &str,
    scheduled_for: Option<&str>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET scheduled_for = ?2 WHERE id = ?1 AND status = 'pending'",
            params![id, scheduled_for],
        )?;
        Ok(changed > 0)
    })
}

/// Deletes a job row.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    })
}

/// Counts a campaign's outstanding (pending or running) jobs.
pub fn outstanding_count_for_campaign(
    db: &Database,
    campaign_id: &str,
) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs
             WHERE campaign_id = ?1 AND status IN ('pending', 'running')",
            params![campaign_id],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Returns a campaign's earliest pending job, if any.
pub fn first_pending_for_campaign(
    db: &Database,
    campaign_id: &str,
) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs WHERE campaign_id = ?1 AND status = 'pending'
             ORDER BY scheduled_for ASC, created_at ASC LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![campaign_id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Returns jobs considered "missed": pending jobs whose due time has
/// already passed, plus jobs explicitly marked missed at startup.
pub fn missed(db: &Database, now: &str) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs
             WHERE status = 'missed'
                OR (status = 'pending' AND scheduled_for IS NOT NULL AND scheduled_for < ?1)
             ORDER BY scheduled_for ASC, created_at ASC",
        )?;
        let rows: Vec<JobRow> = stmt
            .query_map(params![now], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Returns all failed jobs for a campaign.
pub fn failed_for_campaign(
    db: &Database,
    campaign_id: &str,
) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs WHERE campaign_id = ?1 AND status = 'failed'
             ORDER BY created_at ASC",
        )?;
        let rows: Vec<JobRow> = stmt
            .query_map(params![campaign_id], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
