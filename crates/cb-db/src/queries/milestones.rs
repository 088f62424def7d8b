//! Progress milestone persistence.

use chrono::Utc;
use rusqlite::Connection;
use cb_core::{CourseId, Error, MilestoneId, Result};

use crate::models::{Milestone, NewMilestone};

/// Record a milestone unless one already exists for the same course, user
/// and external id. Returns `true` if a row was inserted.
pub fn insert_milestone(conn: &Connection, m: &NewMilestone) -> Result<bool> {
    let n = conn
        .execute(
            "INSERT INTO milestones (id, course_id, user_id, external_id, milestone_type,
                is_completed, occurred_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (course_id, user_id, external_id) DO NOTHING",
            rusqlite::params![
                MilestoneId::new().to_string(),
                m.course_id.to_string(),
                m.user_id.to_string(),
                m.external_id,
                m.milestone_type,
                m.is_completed,
                m.occurred_at,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n == 1)
}

/// List milestones for a course, oldest first.
pub fn list_by_course(conn: &Connection, course_id: CourseId) -> Result<Vec<Milestone>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, course_id, user_id, external_id, milestone_type, is_completed,
                occurred_at, created_at
             FROM milestones WHERE course_id = ?1 ORDER BY occurred_at",
        )
        .map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([course_id.to_string()], Milestone::from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}
