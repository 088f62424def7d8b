//! Canonical course persistence.

use chrono::Utc;
use rusqlite::Connection;
use cb_core::{CourseId, Error, ProviderId, Result};

use super::upserted;
use crate::models::{Course, NewCourse, UpsertOutcome};

const COLS: &str = "id, provider_platform_id, external_id, name, alt_name, description,
    thumbnail_url, course_type, outcome_types, external_url, created_at, updated_at";

/// Insert a course or update the existing row with the same
/// `(provider_platform_id, external_id)`.
pub fn upsert_course(conn: &Connection, course: &NewCourse) -> Result<(CourseId, UpsertOutcome)> {
    let id = CourseId::new();
    let now = Utc::now().to_rfc3339();

    let stored: String = conn
        .query_row(
            "INSERT INTO courses (id, provider_platform_id, external_id, name, alt_name, description,
                thumbnail_url, course_type, outcome_types, external_url, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
             ON CONFLICT (provider_platform_id, external_id) DO UPDATE SET
                name = excluded.name,
                alt_name = excluded.alt_name,
                description = excluded.description,
                thumbnail_url = excluded.thumbnail_url,
                course_type = excluded.course_type,
                outcome_types = excluded.outcome_types,
                external_url = excluded.external_url,
                updated_at = excluded.updated_at
             RETURNING id",
            rusqlite::params![
                id.to_string(),
                course.provider_platform_id.get(),
                course.external_id,
                course.name,
                course.alt_name,
                course.description,
                course.thumbnail_url,
                course.course_type,
                course.outcome_types,
                course.external_url,
                now,
            ],
            |row| row.get(0),
        )
        .map_err(|e| Error::database(e.to_string()))?;

    upserted(id, &stored)
}

/// Get a course by provider and external id.
pub fn get_by_external_id(
    conn: &Connection,
    provider: ProviderId,
    external_id: &str,
) -> Result<Option<Course>> {
    let q = format!("SELECT {COLS} FROM courses WHERE provider_platform_id = ?1 AND external_id = ?2");
    let result = conn.query_row(&q, rusqlite::params![provider.get(), external_id], Course::from_row);
    match result {
        Ok(c) => Ok(Some(c)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// List a provider's courses ordered by external id.
pub fn list_by_provider(conn: &Connection, provider: ProviderId) -> Result<Vec<Course>> {
    let q = format!(
        "SELECT {COLS} FROM courses WHERE provider_platform_id = ?1 ORDER BY external_id"
    );
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([provider.get()], Course::from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}

/// Count a provider's courses.
pub fn count_by_provider(conn: &Connection, provider: ProviderId) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM courses WHERE provider_platform_id = ?1",
        [provider.get()],
        |row| row.get(0),
    )
    .map_err(|e| Error::database(e.to_string()))
}
