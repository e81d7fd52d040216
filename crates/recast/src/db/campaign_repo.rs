//! Campaign repository — CRUD operations for the `campaigns` table.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw campaign row from the database.
#[derive(Debug, Clone)]
pub struct CampaignRow {
    pub id: String,
    pub name: String,
    pub platform: String,
    pub status: String,
    pub schedule_cron: Option<String>,
    pub config: String,
    pub created_at: String,
    pub updated_at: String,
}

impl CampaignRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            platform: row.get("platform")?,
            status: row.get("status")?,
            schedule_cron: row.get("schedule_cron")?,
            config: row.get("config")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts a new campaign row.
pub fn insert(db: &Database, campaign: &CampaignRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO campaigns (id, name, platform, status, schedule_cron, config,
             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                campaign.id,
                campaign.name,
                campaign.platform,
                campaign.status,
                campaign.schedule_cron,
                campaign.config,
                campaign.created_at,
                campaign.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds a campaign by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<CampaignRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM campaigns WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], CampaignRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Returns all campaigns, newest first.
pub fn all(db: &Database) -> Result<Vec<CampaignRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM campaigns ORDER BY created_at DESC")?;
        let rows: Vec<CampaignRow> = stmt
            .query_map([], CampaignRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Returns all campaigns with the given status.
pub fn by_status(db: &Database, status: &str) -> Result<Vec<CampaignRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM campaigns WHERE status = ?1 ORDER BY created_at ASC")?;
        let rows: Vec<CampaignRow> = stmt
            .query_map(params![status], CampaignRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Overwrites the serialized config blob.
pub fn update_config(
    db: &Database,
    id: &str,
    config: &str,
    updated_at: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE campaigns SET config = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, config, updated_at],
        )?;
        Ok(changed > 0)
    })
}

/// Transitions a campaign's status, guarded by its current status
/// (compare-and-swap). Returns false when the guard misses.
pub fn set_status_if(
    db: &Database,
    id: &str,
    from: &str,
    to: &str,
    updated_at: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE campaigns SET status = ?3, updated_at = ?4 WHERE id = ?1 AND status = ?2",
            params![id, from, to, updated_at],
        )?;
        Ok(changed > 0)
    })
}

/// Deletes a campaign. Its jobs are removed by the foreign-key cascade.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute("DELETE FROM campaigns WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    })
}
