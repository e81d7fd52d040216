//! Item repository — discovered content units tracked through the
//! discovery → download → publish lifecycle.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw item row from the database.
#[derive(Debug, Clone)]
pub struct ItemRow {
    pub id: String,
    pub platform: String,
    pub native_id: String,
    pub source_url: String,
    pub description: Option<String>,
    pub status: String,
    pub local_path: Option<String>,
    pub metadata: Option<String>,
    pub posted_at: Option<String>,
    pub created_at: String,
}

impl ItemRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            platform: row.get("platform")?,
            native_id: row.get("native_id")?,
            source_url: row.get("source_url")?,
            description: row.get("description")?,
            status: row.get("status")?,
            local_path: row.get("local_path")?,
            metadata: row.get("metadata")?,
            posted_at: row.get("posted_at")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Inserts a new item row. Fails on a (platform, native_id) collision.
pub fn insert(db: &Database, item: &ItemRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO items (id, platform, native_id, source_url, description, status,
             local_path, metadata, posted_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                item.id,
                item.platform,
                item.native_id,
                item.source_url,
                item.description,
                item.status,
                item.local_path,
                item.metadata,
                item.posted_at,
                item.created_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds an item by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<ItemRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row("SELECT * FROM items WHERE id = ?1", params![id], ItemRow::from_row)
            .optional()?;
        Ok(row)
    })
}

/// Finds an item by its platform-native identity.
pub fn find_by_native(
    db: &Database,
    platform: &str,
    native_id: &str,
) -> Result<Option<ItemRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM items WHERE platform = ?1 AND native_id = ?2",
                params![platform, native_id],
                ItemRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Inserts the item if its (platform, native_id) identity is new,
/// otherwise returns the existing row untouched. This is what makes
/// repeated scans of the same source idempotent.
pub fn upsert(db: &Database, item: &ItemRow) -> Result<ItemRow, DatabaseError> {
    if let Some(existing) = find_by_native(db, &item.platform, &item.native_id)? {
        return Ok(existing);
    }
    insert(db, item)?;
    Ok(item.clone())
}

/// Updates only the status of an item.
pub fn set_status(db: &Database, id: &str, status: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE items SET status = ?2 WHERE id = ?1",
            params![id, status],
        )?;
        Ok(changed > 0)
    })
}

/// Marks an item downloaded, recording its local artifact path.
pub fn set_downloaded(
    db: &Database,
    id: &str,
    local_path: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE items SET status = 'downloaded', local_path = ?2 WHERE id = ?1",
            params![id, local_path],
        )?;
        Ok(changed > 0)
    })
}

/// Marks an item published, stamping the posted-at time. Guarded so a
/// late review-poller tick cannot clobber an already finalized row.
pub fn set_published(db: &Database, id: &str, posted_at: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE items SET status = 'published', posted_at = ?2
             WHERE id = ?1 AND status != 'published'",
            params![id, posted_at],
        )?;
        Ok(changed > 0)
    })
}

/// Returns all items with the given status.
pub fn by_status(db: &Database, status: &str) -> Result<Vec<ItemRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM items WHERE status = ?1 ORDER BY created_at ASC")?;
        let rows: Vec<ItemRow> = stmt
            .query_map(params![status], ItemRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn sample_item(id: &str, native_id: &str) -> ItemRow {
        ItemRow {
            id: id.to_string(),
            platform: "clipshare".to_string(),
            native_id: native_id.to_string(),
            source_url: format!("https://clipshare.example/v/{}", native_id),
            description: Some("a clip".to_string()),
            status: "discovered".to_string(),
            local_path: None,
            metadata: None,
            posted_at: None,
            created_at: "2026-01-01T00:00:00+00:00".to_string(),
        }
    }

    #[test]
    fn test_insert_and_find_by_native() {
        let db = test_db();
        insert(&db, &sample_item("i1", "n1")).unwrap();

        let found = find_by_native(&db, "clipshare", "n1").unwrap().unwrap();
        assert_eq!(found.id, "i1");
        assert!(find_by_native(&db, "clipshare", "n2").unwrap().is_none());
    }

    #[test]
    fn test_upsert_returns_existing_on_collision() {
        let db = test_db();
        insert(&db, &sample_item("i1", "n1")).unwrap();
        set_downloaded(&db, "i1", "/media/n1.mp4").unwrap();

        let result = upsert(&db, &sample_item("i2", "n1")).unwrap();
        // The earlier row (and its progress) wins.
        assert_eq!(result.id, "i1");
        assert_eq!(result.status, "downloaded");
    }

    #[test]
    fn test_status_progression() {
        let db = test_db();
        insert(&db, &sample_item("i1", "n1")).unwrap();

        set_status(&db, "i1", "scheduled").unwrap();
        assert_eq!(find_by_id(&db, "i1").unwrap().unwrap().status, "scheduled");

        set_downloaded(&db, "i1", "/media/n1.mp4").unwrap();
        let item = find_by_id(&db, "i1").unwrap().unwrap();
        assert_eq!(item.status, "downloaded");
        assert_eq!(item.local_path.as_deref(), Some("/media/n1.mp4"));

        set_published(&db, "i1", "2026-01-01T02:00:00+00:00").unwrap();
        let item = find_by_id(&db, "i1").unwrap().unwrap();
        assert_eq!(item.status, "published");
        assert!(item.posted_at.is_some());
    }

    #[test]
    fn test_set_published_is_idempotent() {
        let db = test_db();
        insert(&db, &sample_item("i1", "n1")).unwrap();

        assert!(set_published(&db, "i1", "2026-01-01T02:00:00+00:00").unwrap());
        // Second finalization misses the guard and keeps the original stamp.
        assert!(!set_published(&db, "i1", "2026-01-01T03:00:00+00:00").unwrap());
        let item = find_by_id(&db, "i1").unwrap().unwrap();
        assert_eq!(item.posted_at.as_deref(), Some("2026-01-01T02:00:00+00:00"));
    }

    #[test]
    fn test_by_status() {
        let db = test_db();
        insert(&db, &sample_item("i1", "n1")).unwrap();
        insert(&db, &sample_item("i2", "n2")).unwrap();
        set_status(&db, "i2", "reviewing").unwrap();

        let reviewing = by_status(&db, "reviewing").unwrap();
        assert_eq!(reviewing.len(), 1);
        assert_eq!(reviewing[0].id, "i2");
    }
}
