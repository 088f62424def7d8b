//! Open-content provider lookups.

use chrono::Utc;
use rusqlite::Connection;
use cb_core::{ContentProviderId, Error, Result};

use crate::models::OpenContentProvider;

const COLS: &str = "id, name, base_url, thumbnail, currently_enabled, description, created_at";

/// Name of the Kiwix content provider.
pub const KIWIX: &str = "Kiwix";
/// Name of the YouTube content provider.
pub const YOUTUBE: &str = "Youtube";

/// Register an open-content provider.
pub fn create_content_provider(
    conn: &Connection,
    name: &str,
    base_url: &str,
    description: &str,
) -> Result<OpenContentProvider> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO open_content_providers (name, base_url, description, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![name, base_url, description, &now],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    Ok(OpenContentProvider {
        id: ContentProviderId::from(conn.last_insert_rowid()),
        name: name.to_string(),
        base_url: base_url.to_string(),
        thumbnail: String::new(),
        currently_enabled: true,
        description: description.to_string(),
        created_at: now,
    })
}

/// Get a content provider by id.
pub fn get_content_provider(
    conn: &Connection,
    id: ContentProviderId,
) -> Result<Option<OpenContentProvider>> {
    let q = format!("SELECT {COLS} FROM open_content_providers WHERE id = ?1");
    match conn.query_row(&q, [id.get()], OpenContentProvider::from_row) {
        Ok(p) => Ok(Some(p)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}
