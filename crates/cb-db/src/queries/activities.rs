//! Per-day course activity persistence.

use chrono::Utc;
use rusqlite::Connection;
use cb_core::{ActivityId, CourseId, Error, Result, UserId};

use crate::models::Activity;

/// Record the access count for a user on a given day, replacing any
/// previous count for the same course, user and day.
pub fn upsert_activity(
    conn: &Connection,
    course_id: CourseId,
    user_id: UserId,
    day: &str,
    total_accesses: i64,
) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO activities (id, course_id, user_id, day, total_accesses, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
         ON CONFLICT (course_id, user_id, day) DO UPDATE SET
            total_accesses = excluded.total_accesses,
            updated_at = excluded.updated_at",
        rusqlite::params![
            ActivityId::new().to_string(),
            course_id.to_string(),
            user_id.to_string(),
            day,
            total_accesses,
            now,
        ],
    )
    .map_err(|e| Error::database(e.to_string()))?;
    Ok(())
}

/// List activity for a course ordered by day.
pub fn list_by_course(conn: &Connection, course_id: CourseId) -> Result<Vec<Activity>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, course_id, user_id, day, total_accesses, created_at, updated_at
             FROM activities WHERE course_id = ?1 ORDER BY day",
        )
        .map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([course_id.to_string()], Activity::from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}
