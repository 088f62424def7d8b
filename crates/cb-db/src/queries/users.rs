//! Canonical user persistence.

use chrono::Utc;
use rusqlite::Connection;
use cb_core::{Error, ProviderId, Result, UserId};

use super::upserted;
use crate::models::{NewUser, UpsertOutcome, User};

const COLS: &str = "id, provider_platform_id, external_user_id, username, name_first, name_last,
    email, created_at, updated_at";

/// Insert a user or update the row with the same provider and external id.
pub fn upsert_user(conn: &Connection, user: &NewUser) -> Result<(UserId, UpsertOutcome)> {
    let id = UserId::new();
    let now = Utc::now().to_rfc3339();

    let stored: String = conn
        .query_row(
            "INSERT INTO users (id, provider_platform_id, external_user_id, username, name_first,
                name_last, email, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
             ON CONFLICT (provider_platform_id, external_user_id) DO UPDATE SET
                username = excluded.username,
                name_first = excluded.name_first,
                name_last = excluded.name_last,
                email = excluded.email,
                updated_at = excluded.updated_at
             RETURNING id",
            rusqlite::params![
                id.to_string(),
                user.provider_platform_id.get(),
                user.external_user_id,
                user.username,
                user.name_first,
                user.name_last,
                user.email,
                now,
            ],
            |row| row.get(0),
        )
        .map_err(|e| Error::database(e.to_string()))?;

    upserted(id, &stored)
}

/// Find a user by provider and external id.
pub fn find_by_external_id(
    conn: &Connection,
    provider: ProviderId,
    external_user_id: &str,
) -> Result<Option<User>> {
    let q = format!(
        "SELECT {COLS} FROM users WHERE provider_platform_id = ?1 AND external_user_id = ?2"
    );
    let result = conn.query_row(
        &q,
        rusqlite::params![provider.get(), external_user_id],
        User::from_row,
    );
    match result {
        Ok(u) => Ok(Some(u)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// List a provider's users ordered by username.
pub fn list_by_provider(conn: &Connection, provider: ProviderId) -> Result<Vec<User>> {
    let q = format!("SELECT {COLS} FROM users WHERE provider_platform_id = ?1 ORDER BY username");
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([provider.get()], User::from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}
