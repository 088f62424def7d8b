//! Imported video persistence and availability tracking.

use chrono::Utc;
use rusqlite::Connection;
use cb_core::{ContentProviderId, Error, Result, VideoId};

use crate::models::{NewVideo, Video, VideoAvailability};

const COLS: &str = "id, open_content_provider_id, external_id, url, title, description,
    channel_title, duration_secs, thumbnail_url, asset_url, availability, error,
    created_at, updated_at";

/// Register a requested video, or return the existing row for the same
/// provider and external id untouched.
pub fn insert_or_get(conn: &Connection, video: &NewVideo) -> Result<Video> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO videos (id, open_content_provider_id, external_id, url, availability,
            created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 'processing', ?5, ?5)
         ON CONFLICT (open_content_provider_id, external_id) DO NOTHING",
        rusqlite::params![
            VideoId::new().to_string(),
            video.open_content_provider_id.get(),
            video.external_id,
            video.url,
            now,
        ],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    get_by_external_id(conn, video.open_content_provider_id, &video.external_id)?
        .ok_or_else(|| Error::not_found("video", &video.external_id))
}

/// Get a video by provider and external id.
pub fn get_by_external_id(
    conn: &Connection,
    provider: ContentProviderId,
    external_id: &str,
) -> Result<Option<Video>> {
    let q = format!(
        "SELECT {COLS} FROM videos WHERE open_content_provider_id = ?1 AND external_id = ?2"
    );
    match conn.query_row(&q, rusqlite::params![provider.get(), external_id], Video::from_row) {
        Ok(v) => Ok(Some(v)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Get a video by id.
pub fn get_video(conn: &Connection, id: VideoId) -> Result<Option<Video>> {
    let q = format!("SELECT {COLS} FROM videos WHERE id = ?1");
    match conn.query_row(&q, [id.to_string()], Video::from_row) {
        Ok(v) => Ok(Some(v)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// List a provider's videos in a given availability state, oldest first.
pub fn list_by_availability(
    conn: &Connection,
    provider: ContentProviderId,
    availability: VideoAvailability,
) -> Result<Vec<Video>> {
    let q = format!(
        "SELECT {COLS} FROM videos
         WHERE open_content_provider_id = ?1 AND availability = ?2
         ORDER BY created_at"
    );
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map(
            rusqlite::params![provider.get(), availability.as_str()],
            Video::from_row,
        )
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}

/// Metadata reported by the downloader for a finished video.
#[derive(Debug, Clone, Default)]
pub struct VideoDetails {
    pub title: String,
    pub description: String,
    pub channel_title: String,
    pub duration_secs: i64,
    pub thumbnail_url: String,
    pub asset_url: String,
}

/// Record a successful download.
pub fn mark_available(conn: &Connection, id: VideoId, details: &VideoDetails) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE videos SET title = ?1, description = ?2, channel_title = ?3,
                duration_secs = ?4, thumbnail_url = ?5, asset_url = ?6,
                availability = 'available', error = NULL, updated_at = ?7
             WHERE id = ?8",
            rusqlite::params![
                details.title,
                details.description,
                details.channel_title,
                details.duration_secs,
                details.thumbnail_url,
                details.asset_url,
                Utc::now().to_rfc3339(),
                id.to_string(),
            ],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Record a failed download.
pub fn mark_error(conn: &Connection, id: VideoId, error: &str) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE videos SET availability = 'has_error', error = ?1, updated_at = ?2
             WHERE id = ?3",
            rusqlite::params![error, Utc::now().to_rfc3339(), id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Move a video back to `processing` before a retry.
pub fn mark_processing(conn: &Connection, id: VideoId) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE videos SET availability = 'processing', updated_at = ?1 WHERE id = ?2",
            rusqlite::params![Utc::now().to_rfc3339(), id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}
