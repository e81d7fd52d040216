//! Timestamp helpers for persisted RFC3339 strings.
//!
//! Timestamps are stored as RFC3339 text in UTC, which keeps lexicographic
//! ordering equal to chronological ordering in SQL `ORDER BY` clauses.

use chrono::{DateTime, Utc};

/// Formats a timestamp for persistence.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Parses a persisted timestamp, falling back to `Utc::now()` on garbage.
pub fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            log::warn!("parse_timestamp: failed to parse '{}': {}", s, e);
            Utc::now()
        })
}

/// Parses an optional persisted timestamp.
pub fn parse_timestamp_opt(s: Option<&str>) -> Option<DateTime<Utc>> {
    s.map(parse_timestamp)
}
