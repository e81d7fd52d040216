//! Account repository — source and target platform accounts.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw account row from the database.
#[derive(Debug, Clone)]
pub struct AccountRow {
    pub id: String,
    pub platform: String,
    pub username: String,
    /// Either "source" (scanned) or "target" (published to).
    pub role: String,
    pub session_valid: bool,
    pub session_data: Option<String>,
    pub created_at: String,
}

impl AccountRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            platform: row.get("platform")?,
            username: row.get("username")?,
            role: row.get("role")?,
            session_valid: row.get("session_valid")?,
            session_data: row.get("session_data")?,
            created_at: row.get("created_at")?,
        })
    }

    /// True when the account carries usable credentials.
    pub fn has_valid_session(&self) -> bool {
        self.session_valid && self.session_data.is_some()
    }
}

/// Inserts a new account row.
pub fn insert(db: &Database, account: &AccountRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO accounts (id, platform, username, role, session_valid, session_data,
             created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                account.id,
                account.platform,
                account.username,
                account.role,
                account.session_valid,
                account.session_data,
                account.created_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds an account by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<AccountRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM accounts WHERE id = ?1",
                params![id],
                AccountRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Returns all accounts.
pub fn all(db: &Database) -> Result<Vec<AccountRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM accounts ORDER BY created_at ASC")?;
        let rows: Vec<AccountRow> = stmt
            .query_map([], AccountRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Replaces an account's session credentials (re-authentication flow).
pub fn set_session(
    db: &Database,
    id: &str,
    valid: bool,
    session_data: Option<&str>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE accounts SET session_valid = ?2, session_data = ?3 WHERE id = ?1",
            params![id, valid, session_data],
        )?;
        Ok(changed > 0)
    })
}
