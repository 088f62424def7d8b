//! Open-content library persistence.

use chrono::Utc;
use rusqlite::Connection;
use cb_core::{ContentProviderId, Error, LibraryId, Result};

use super::upserted;
use crate::models::{Library, NewLibrary, UpsertOutcome};

const COLS: &str = "id, open_content_provider_id, external_id, name, language, description,
    url, image_url, visibility_status, created_at, updated_at";

/// Insert a library or refresh the one with the same provider and external id.
/// Visibility is left as an administrator set it.
pub fn upsert_library(conn: &Connection, lib: &NewLibrary) -> Result<(LibraryId, UpsertOutcome)> {
    let id = LibraryId::new();
    let now = Utc::now().to_rfc3339();

    let stored: String = conn
        .query_row(
            "INSERT INTO libraries (id, open_content_provider_id, external_id, name, language,
                description, url, image_url, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
             ON CONFLICT (open_content_provider_id, external_id) DO UPDATE SET
                name = excluded.name,
                language = excluded.language,
                description = excluded.description,
                url = excluded.url,
                image_url = excluded.image_url,
                updated_at = excluded.updated_at
             RETURNING id",
            rusqlite::params![
                id.to_string(),
                lib.open_content_provider_id.get(),
                lib.external_id,
                lib.name,
                lib.language,
                lib.description,
                lib.url,
                lib.image_url,
                now,
            ],
            |row| row.get(0),
        )
        .map_err(|e| Error::database(e.to_string()))?;

    upserted(id, &stored)
}

/// Get a library by provider and external id.
pub fn get_by_external_id(
    conn: &Connection,
    provider: ContentProviderId,
    external_id: &str,
) -> Result<Option<Library>> {
    let q = format!(
        "SELECT {COLS} FROM libraries WHERE open_content_provider_id = ?1 AND external_id = ?2"
    );
    match conn.query_row(&q, rusqlite::params![provider.get(), external_id], Library::from_row) {
        Ok(l) => Ok(Some(l)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// List a provider's libraries ordered by name.
pub fn list_by_provider(conn: &Connection, provider: ContentProviderId) -> Result<Vec<Library>> {
    let q = format!(
        "SELECT {COLS} FROM libraries WHERE open_content_provider_id = ?1 ORDER BY name"
    );
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([provider.get()], Library::from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}
