//! Embedded SQL migrations and runner.
//!
//! Migrations are stored as `&str` constants and executed in order. A
//! `schema_migrations` table tracks which versions have been applied.

use cb_core::{Error, Result};
use rusqlite::Connection;

/// V1: provider credentials, canonical courses/users and progress records.
const V1_INITIAL: &str = r#"
CREATE TABLE provider_platforms (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL,
    kind        TEXT NOT NULL,
    base_url    TEXT NOT NULL,
    account_id  TEXT NOT NULL,
    access_key  TEXT NOT NULL,
    state       TEXT NOT NULL DEFAULT 'enabled',
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE courses (
    id                   TEXT PRIMARY KEY,
    provider_platform_id INTEGER NOT NULL REFERENCES provider_platforms(id),
    external_id          TEXT NOT NULL,
    name                 TEXT NOT NULL,
    alt_name             TEXT NOT NULL DEFAULT '',
    description          TEXT NOT NULL DEFAULT '',
    thumbnail_url        TEXT NOT NULL DEFAULT '',
    course_type          TEXT NOT NULL,
    outcome_types        TEXT NOT NULL,
    external_url         TEXT NOT NULL DEFAULT '',
    created_at           TEXT NOT NULL,
    updated_at           TEXT NOT NULL,
    UNIQUE (provider_platform_id, external_id)
);

CREATE TABLE users (
    id                   TEXT PRIMARY KEY,
    provider_platform_id INTEGER NOT NULL REFERENCES provider_platforms(id),
    external_user_id     TEXT NOT NULL,
    username             TEXT NOT NULL,
    name_first           TEXT NOT NULL DEFAULT '',
    name_last            TEXT NOT NULL DEFAULT '',
    email                TEXT NOT NULL DEFAULT '',
    created_at           TEXT NOT NULL,
    updated_at           TEXT NOT NULL,
    UNIQUE (provider_platform_id, external_user_id)
);

CREATE TABLE milestones (
    id             TEXT PRIMARY KEY,
    course_id      TEXT NOT NULL REFERENCES courses(id) ON DELETE CASCADE,
    user_id        TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    external_id    TEXT NOT NULL,
    milestone_type TEXT NOT NULL,
    is_completed   INTEGER NOT NULL DEFAULT 0,
    occurred_at    TEXT NOT NULL,
    created_at     TEXT NOT NULL,
    UNIQUE (course_id, user_id, external_id)
);

CREATE TABLE activities (
    id             TEXT PRIMARY KEY,
    course_id      TEXT NOT NULL REFERENCES courses(id) ON DELETE CASCADE,
    user_id        TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    day            TEXT NOT NULL,
    total_accesses INTEGER NOT NULL DEFAULT 0,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL,
    UNIQUE (course_id, user_id, day)
);

CREATE INDEX idx_milestones_course ON milestones(course_id);
CREATE INDEX idx_activities_course ON activities(course_id);
"#;

/// V2: producer-side task bookkeeping.
const V2_RUNNABLE_TASKS: &str = r#"
CREATE TABLE runnable_tasks (
    job_id               TEXT PRIMARY KEY,
    provider_platform_id INTEGER NOT NULL,
    kind                 TEXT NOT NULL,
    status               TEXT NOT NULL DEFAULT 'pending',
    last_run             TEXT,
    error                TEXT,
    created_at           TEXT NOT NULL,
    updated_at           TEXT NOT NULL
);

CREATE INDEX idx_runnable_tasks_provider ON runnable_tasks(provider_platform_id, kind);
"#;

/// V3: open-content providers, their libraries and imported videos.
const V3_OPEN_CONTENT: &str = r#"
CREATE TABLE open_content_providers (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    name              TEXT NOT NULL,
    base_url          TEXT NOT NULL,
    thumbnail         TEXT NOT NULL DEFAULT '',
    currently_enabled INTEGER NOT NULL DEFAULT 1,
    description       TEXT NOT NULL DEFAULT '',
    created_at        TEXT NOT NULL
);

CREATE TABLE libraries (
    id                       TEXT PRIMARY KEY,
    open_content_provider_id INTEGER NOT NULL REFERENCES open_content_providers(id),
    external_id              TEXT NOT NULL,
    name                     TEXT NOT NULL,
    language                 TEXT NOT NULL DEFAULT '',
    description              TEXT NOT NULL DEFAULT '',
    url                      TEXT NOT NULL,
    image_url                TEXT NOT NULL DEFAULT '',
    visibility_status        INTEGER NOT NULL DEFAULT 0,
    created_at               TEXT NOT NULL,
    updated_at               TEXT NOT NULL,
    UNIQUE (open_content_provider_id, external_id)
);

CREATE TABLE videos (
    id                       TEXT PRIMARY KEY,
    open_content_provider_id INTEGER NOT NULL REFERENCES open_content_providers(id),
    external_id              TEXT NOT NULL,
    url                      TEXT NOT NULL,
    title                    TEXT NOT NULL DEFAULT '',
    description              TEXT NOT NULL DEFAULT '',
    channel_title            TEXT NOT NULL DEFAULT '',
    duration_secs            INTEGER NOT NULL DEFAULT 0,
    thumbnail_url            TEXT NOT NULL DEFAULT '',
    asset_url                TEXT NOT NULL DEFAULT '',
    availability             TEXT NOT NULL DEFAULT 'processing',
    error                    TEXT,
    created_at               TEXT NOT NULL,
    updated_at               TEXT NOT NULL,
    UNIQUE (open_content_provider_id, external_id)
);

CREATE INDEX idx_videos_availability ON videos(open_content_provider_id, availability);
"#;

/// Ordered list of all migrations: `(version, sql)`.
const MIGRATIONS: &[(i64, &str)] = &[
    (1, V1_INITIAL),
    (2, V2_RUNNABLE_TASKS),
    (3, V3_OPEN_CONTENT),
];

/// Run all pending migrations on `conn`.
///
/// Creates the `schema_migrations` tracking table if it does not exist,
/// then applies each outstanding migration inside a transaction.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .map_err(|e| Error::database(format!("Failed to create schema_migrations: {e}")))?;

    for &(version, sql) in MIGRATIONS {
        let already: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM schema_migrations WHERE version = ?1",
                [version],
                |row| row.get(0),
            )
            .map_err(|e| Error::database(e.to_string()))?;

        if already {
            continue;
        }

        let tx = conn
            .unchecked_transaction()
            .map_err(|e| Error::database(e.to_string()))?;

        tx.execute_batch(sql)
            .map_err(|e| Error::database(format!("Migration V{version} failed: {e}")))?;

        tx.execute(
            "INSERT INTO schema_migrations (version) VALUES (?1)",
            [version],
        )
        .map_err(|e| Error::database(e.to_string()))?;

        tx.commit().map_err(|e| Error::database(e.to_string()))?;
        tracing::debug!(version, "Applied migration");
    }

    Ok(())
}
