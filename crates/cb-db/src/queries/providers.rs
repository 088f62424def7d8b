//! Provider credential storage.
//!
//! The compound secret is only ever replaced through [`rotate_access_key`],
//! a compare-and-swap on the previous value, so two refreshes racing on the
//! same provider can never interleave halves of different pairs.

use chrono::Utc;
use rusqlite::Connection;
use cb_core::{Error, ProviderId, Result};

use crate::models::ProviderPlatform;

const COLS: &str =
    "id, name, kind, base_url, account_id, access_key, state, created_at, updated_at";

/// Register a provider platform.
pub fn create_provider(
    conn: &Connection,
    name: &str,
    kind: &str,
    base_url: &str,
    account_id: &str,
    access_key: &str,
) -> Result<ProviderPlatform> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO provider_platforms (name, kind, base_url, account_id, access_key, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        rusqlite::params![name, kind, base_url, account_id, access_key, &now],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    Ok(ProviderPlatform {
        id: ProviderId::from(conn.last_insert_rowid()),
        name: name.to_string(),
        kind: kind.to_string(),
        base_url: base_url.to_string(),
        account_id: account_id.to_string(),
        access_key: access_key.to_string(),
        state: "enabled".to_string(),
        created_at: now.clone(),
        updated_at: now,
    })
}

/// Get a provider by id.
pub fn get_provider(conn: &Connection, id: ProviderId) -> Result<Option<ProviderPlatform>> {
    let q = format!("SELECT {COLS} FROM provider_platforms WHERE id = ?1");
    let result = conn.query_row(&q, [id.get()], ProviderPlatform::from_row);
    match result {
        Ok(p) => Ok(Some(p)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Replace the stored secret only if it still equals `expected`.
///
/// Returns `false` when another writer changed it first.
pub fn rotate_access_key(
    conn: &Connection,
    id: ProviderId,
    expected: &str,
    new_key: &str,
) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE provider_platforms SET access_key = ?1, updated_at = ?2
             WHERE id = ?3 AND access_key = ?4",
            rusqlite::params![new_key, Utc::now().to_rfc3339(), id.get(), expected],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n == 1)
}
