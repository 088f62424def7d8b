//! Runnable task bookkeeping.
//!
//! Producers create a row per job id; the worker moves it to `running` when
//! the job starts and writes the final status on cleanup.

use chrono::Utc;
use rusqlite::Connection;
use cb_core::{Error, ProviderId, Result};

use crate::models::{RunnableTask, TaskStatus};

const COLS: &str =
    "job_id, provider_platform_id, kind, status, last_run, error, created_at, updated_at";

/// Create a pending task row.
pub fn create_task(
    conn: &Connection,
    job_id: &str,
    provider: ProviderId,
    kind: &str,
) -> Result<RunnableTask> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO runnable_tasks (job_id, provider_platform_id, kind, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, 'pending', ?4, ?4)",
        rusqlite::params![job_id, provider.get(), kind, &now],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    Ok(RunnableTask {
        job_id: job_id.to_string(),
        provider_platform_id: provider,
        kind: kind.to_string(),
        status: TaskStatus::Pending,
        last_run: None,
        error: None,
        created_at: now.clone(),
        updated_at: now,
    })
}

/// Get a task by job id.
pub fn get_task(conn: &Connection, job_id: &str) -> Result<Option<RunnableTask>> {
    let q = format!("SELECT {COLS} FROM runnable_tasks WHERE job_id = ?1");
    match conn.query_row(&q, [job_id], RunnableTask::from_row) {
        Ok(t) => Ok(Some(t)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Mark a task running. Returns `false` if no row exists for the job id.
pub fn mark_running(conn: &Connection, job_id: &str) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE runnable_tasks SET status = 'running', error = NULL, updated_at = ?1
             WHERE job_id = ?2",
            rusqlite::params![Utc::now().to_rfc3339(), job_id],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Mark a task complete and stamp `last_run`.
pub fn mark_complete(conn: &Connection, job_id: &str) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    let n = conn
        .execute(
            "UPDATE runnable_tasks SET status = 'complete', last_run = ?1, error = NULL,
                updated_at = ?1
             WHERE job_id = ?2",
            rusqlite::params![now, job_id],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Mark a task failed with a reason. `last_run` is left untouched so the
/// next incremental run starts from the last successful one.
pub fn mark_failed(conn: &Connection, job_id: &str, reason: &str) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE runnable_tasks SET status = 'failed', error = ?1, updated_at = ?2
             WHERE job_id = ?3",
            rusqlite::params![reason, Utc::now().to_rfc3339(), job_id],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}
