//! Rust structs mapping to database tables.
//!
//! Each model implements `from_row` for constructing itself from a
//! `rusqlite::Row`. `New*` structs carry the fields an import supplies for
//! an upsert; ids and timestamps are assigned by the query layer.

use cb_core::{ContentProviderId, CourseId, LibraryId, MilestoneId, ProviderId, UserId, VideoId};
use cb_core::{ActivityId, Error};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------------

/// Parse a UUID-based ID from a text column.
fn parse_id<T: From<Uuid>>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    let uuid = Uuid::parse_str(&s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(T::from(uuid))
}

/// Parse a text column through `FromStr`.
fn parse_text<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = Error>,
{
    let s: String = row.get(idx)?;
    s.parse().map_err(|e: Error| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Result of a natural-key upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

// ---------------------------------------------------------------------------
// ProviderPlatform
// ---------------------------------------------------------------------------

/// A stored provider credential.
///
/// `access_key` holds the compound secret `client_secret;refresh_token`.
#[derive(Debug, Clone)]
pub struct ProviderPlatform {
    pub id: ProviderId,
    pub name: String,
    pub kind: String,
    pub base_url: String,
    pub account_id: String,
    pub access_key: String,
    pub state: String,
    pub created_at: String,
    pub updated_at: String,
}

impl ProviderPlatform {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: ProviderId::from(row.get::<_, i64>(0)?),
            name: row.get(1)?,
            kind: row.get(2)?,
            base_url: row.get(3)?,
            account_id: row.get(4)?,
            access_key: row.get(5)?,
            state: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Course
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Course {
    pub id: CourseId,
    pub provider_platform_id: ProviderId,
    pub external_id: String,
    pub name: String,
    pub alt_name: String,
    pub description: String,
    pub thumbnail_url: String,
    pub course_type: String,
    pub outcome_types: String,
    pub external_url: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Course {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: parse_id(row, 0)?,
            provider_platform_id: ProviderId::from(row.get::<_, i64>(1)?),
            external_id: row.get(2)?,
            name: row.get(3)?,
            alt_name: row.get(4)?,
            description: row.get(5)?,
            thumbnail_url: row.get(6)?,
            course_type: row.get(7)?,
            outcome_types: row.get(8)?,
            external_url: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }
}

/// Fields for creating or updating a course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCourse {
    pub provider_platform_id: ProviderId,
    pub external_id: String,
    pub name: String,
    pub alt_name: String,
    pub description: String,
    pub thumbnail_url: String,
    pub course_type: String,
    pub outcome_types: String,
    pub external_url: String,
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: UserId,
    pub provider_platform_id: ProviderId,
    pub external_user_id: String,
    pub username: String,
    pub name_first: String,
    pub name_last: String,
    pub email: String,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: parse_id(row, 0)?,
            provider_platform_id: ProviderId::from(row.get::<_, i64>(1)?),
            external_user_id: row.get(2)?,
            username: row.get(3)?,
            name_first: row.get(4)?,
            name_last: row.get(5)?,
            email: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }
}

/// Fields for creating or updating a user. Also the shape `get_users`
/// returns over HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub provider_platform_id: ProviderId,
    pub external_user_id: String,
    pub username: String,
    pub name_first: String,
    pub name_last: String,
    pub email: String,
}

// ---------------------------------------------------------------------------
// Milestone / Activity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Milestone {
    pub id: MilestoneId,
    pub course_id: CourseId,
    pub user_id: UserId,
    pub external_id: String,
    pub milestone_type: String,
    pub is_completed: bool,
    pub occurred_at: String,
    pub created_at: String,
}

impl Milestone {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: parse_id(row, 0)?,
            course_id: parse_id(row, 1)?,
            user_id: parse_id(row, 2)?,
            external_id: row.get(3)?,
            milestone_type: row.get(4)?,
            is_completed: row.get(5)?,
            occurred_at: row.get(6)?,
            created_at: row.get(7)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMilestone {
    pub course_id: CourseId,
    pub user_id: UserId,
    pub external_id: String,
    pub milestone_type: String,
    pub is_completed: bool,
    pub occurred_at: String,
}

#[derive(Debug, Clone)]
pub struct Activity {
    pub id: ActivityId,
    pub course_id: CourseId,
    pub user_id: UserId,
    pub day: String,
    pub total_accesses: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl Activity {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: parse_id(row, 0)?,
            course_id: parse_id(row, 1)?,
            user_id: parse_id(row, 2)?,
            day: row.get(3)?,
            total_accesses: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }
}

// ---------------------------------------------------------------------------
// RunnableTask
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Complete,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Complete => "complete",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "complete" => Ok(TaskStatus::Complete),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(Error::Internal(format!("unknown task status: {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunnableTask {
    pub job_id: String,
    pub provider_platform_id: ProviderId,
    pub kind: String,
    pub status: TaskStatus,
    pub last_run: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl RunnableTask {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            job_id: row.get(0)?,
            provider_platform_id: ProviderId::from(row.get::<_, i64>(1)?),
            kind: row.get(2)?,
            status: parse_text(row, 3)?,
            last_run: row.get(4)?,
            error: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Open content
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OpenContentProvider {
    pub id: ContentProviderId,
    pub name: String,
    pub base_url: String,
    pub thumbnail: String,
    pub currently_enabled: bool,
    pub description: String,
    pub created_at: String,
}

impl OpenContentProvider {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: ContentProviderId::from(row.get::<_, i64>(0)?),
            name: row.get(1)?,
            base_url: row.get(2)?,
            thumbnail: row.get(3)?,
            currently_enabled: row.get(4)?,
            description: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Library {
    pub id: LibraryId,
    pub open_content_provider_id: ContentProviderId,
    pub external_id: String,
    pub name: String,
    pub language: String,
    pub description: String,
    pub url: String,
    pub image_url: String,
    pub visibility_status: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl Library {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: parse_id(row, 0)?,
            open_content_provider_id: ContentProviderId::from(row.get::<_, i64>(1)?),
            external_id: row.get(2)?,
            name: row.get(3)?,
            language: row.get(4)?,
            description: row.get(5)?,
            url: row.get(6)?,
            image_url: row.get(7)?,
            visibility_status: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLibrary {
    pub open_content_provider_id: ContentProviderId,
    pub external_id: String,
    pub name: String,
    pub language: String,
    pub description: String,
    pub url: String,
    pub image_url: String,
}

/// Download state of an imported video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoAvailability {
    Processing,
    Available,
    HasError,
}

impl VideoAvailability {
    pub fn as_str(self) -> &'static str {
        match self {
            VideoAvailability::Processing => "processing",
            VideoAvailability::Available => "available",
            VideoAvailability::HasError => "has_error",
        }
    }
}

impl fmt::Display for VideoAvailability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VideoAvailability {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "processing" => Ok(VideoAvailability::Processing),
            "available" => Ok(VideoAvailability::Available),
            "has_error" => Ok(VideoAvailability::HasError),
            other => Err(Error::Internal(format!("unknown video availability: {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Video {
    pub id: VideoId,
    pub open_content_provider_id: ContentProviderId,
    pub external_id: String,
    pub url: String,
    pub title: String,
    pub description: String,
    pub channel_title: String,
    pub duration_secs: i64,
    pub thumbnail_url: String,
    pub asset_url: String,
    pub availability: VideoAvailability,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Video {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: parse_id(row, 0)?,
            open_content_provider_id: ContentProviderId::from(row.get::<_, i64>(1)?),
            external_id: row.get(2)?,
            url: row.get(3)?,
            title: row.get(4)?,
            description: row.get(5)?,
            channel_title: row.get(6)?,
            duration_secs: row.get(7)?,
            thumbnail_url: row.get(8)?,
            asset_url: row.get(9)?,
            availability: parse_text(row, 10)?,
            error: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }
}

/// Metadata for a newly requested video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVideo {
    pub open_content_provider_id: ContentProviderId,
    pub external_id: String,
    pub url: String,
}
