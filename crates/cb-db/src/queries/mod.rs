//! Database query modules.

pub mod activities;
pub mod content_providers;
pub mod courses;
pub mod libraries;
pub mod milestones;
pub mod providers;
pub mod tasks;
pub mod users;
pub mod videos;

use std::fmt::Display;
use std::str::FromStr;

use cb_core::{Error, Result};

use crate::models::UpsertOutcome;

/// Classify a natural-key upsert by the id the row came back with from
/// `RETURNING id`: the freshly generated `candidate` means the insert won.
pub(crate) fn upserted<T>(candidate: T, stored: &str) -> Result<(T, UpsertOutcome)>
where
    T: FromStr + PartialEq,
    T::Err: Display,
{
    let id: T = stored
        .parse()
        .map_err(|e| Error::database(format!("corrupt id {stored}: {e}")))?;
    let outcome = if id == candidate {
        UpsertOutcome::Created
    } else {
        UpsertOutcome::Updated
    };
    Ok((id, outcome))
}
