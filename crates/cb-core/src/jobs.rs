//! Job message types.
//!
//! Every job arrives on the bus as a JSON object carrying `job_id`,
//! `provider_platform_id` and a kind-specific parameter set. [`JobRequest::parse`]
//! validates the whole message at the boundary so handlers only ever see a
//! well-typed [`JobParams`] variant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::ids::{CourseId, ProviderId, UserId};

/// Prefix shared by every job subject.
pub const SUBJECT_PREFIX: &str = "tasks";

// ---------------------------------------------------------------------------
// JobKind
// ---------------------------------------------------------------------------

/// The fixed set of job types the dispatcher binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    GetCourses,
    GetMilestones,
    GetActivity,
    ScrapeLibraries,
    AddVideos,
    RetryFailedVideos,
}

impl JobKind {
    pub const ALL: [JobKind; 6] = [
        JobKind::GetCourses,
        JobKind::GetMilestones,
        JobKind::GetActivity,
        JobKind::ScrapeLibraries,
        JobKind::AddVideos,
        JobKind::RetryFailedVideos,
    ];

    pub fn name(self) -> &'static str {
        match self {
            JobKind::GetCourses => "get_courses",
            JobKind::GetMilestones => "get_milestones",
            JobKind::GetActivity => "get_activity",
            JobKind::ScrapeLibraries => "scrape_libraries",
            JobKind::AddVideos => "add_videos",
            JobKind::RetryFailedVideos => "retry_failed_videos",
        }
    }

    /// Intake subject, e.g. `tasks.get_courses`.
    pub fn subject(self) -> String {
        format!("{SUBJECT_PREFIX}.{}", self.name())
    }

    pub fn completed_subject(self) -> String {
        format!("{}.completed", self.subject())
    }

    pub fn failed_subject(self) -> String {
        format!("{}.failed", self.subject())
    }

    /// Resolve an intake subject back to its kind.
    pub fn from_subject(subject: &str) -> Option<Self> {
        let name = subject.strip_prefix(SUBJECT_PREFIX)?.strip_prefix('.')?;
        name.parse().ok()
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for JobKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        JobKind::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| Error::not_found("job kind", s))
    }
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// A platform course paired with the provider's id for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseRef {
    pub id: CourseId,
    pub external_id: String,
}

/// A platform user paired with the provider's id for them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMapping {
    pub user_id: UserId,
    pub external_user_id: String,
}

/// Kind-specific job parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum JobParams {
    GetCourses,
    GetMilestones {
        courses: Vec<CourseRef>,
        user_mappings: Vec<UserMapping>,
        last_run: DateTime<Utc>,
    },
    GetActivity {
        courses: Vec<CourseRef>,
    },
    ScrapeLibraries,
    AddVideos {
        video_urls: Vec<String>,
    },
    RetryFailedVideos,
}

#[derive(Deserialize)]
struct MilestoneFields {
    #[serde(default)]
    courses: Vec<CourseRef>,
    #[serde(default)]
    user_mappings: Vec<UserMapping>,
    last_run: DateTime<Utc>,
}

#[derive(Deserialize)]
struct ActivityFields {
    #[serde(default)]
    courses: Vec<CourseRef>,
}

#[derive(Deserialize)]
struct VideoFields {
    #[serde(default)]
    video_urls: Vec<String>,
}

// ---------------------------------------------------------------------------
// JobRequest
// ---------------------------------------------------------------------------

/// A validated job message.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub job_id: String,
    pub provider_platform_id: ProviderId,
    pub params: JobParams,
}

impl JobRequest {
    /// Parse and validate a raw bus payload for `kind`.
    pub fn parse(kind: JobKind, payload: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| Error::Validation(format!("{kind}: payload is not JSON: {e}")))?;
        let object = value
            .as_object()
            .ok_or_else(|| Error::Validation(format!("{kind}: payload must be an object")))?;

        let job_id = match object.get("job_id") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::String(_)) => {
                return Err(Error::Validation(format!("{kind}: job_id is empty")))
            }
            Some(_) => return Err(Error::Validation(format!("{kind}: job_id must be a string"))),
            None => return Err(Error::Validation(format!("{kind}: missing job_id"))),
        };

        let provider_platform_id = match object.get("provider_platform_id") {
            Some(v) => parse_provider_id(v).ok_or_else(|| {
                Error::Validation(format!(
                    "{kind}: provider_platform_id must be an integer, got {v}"
                ))
            })?,
            None => {
                return Err(Error::Validation(format!(
                    "{kind}: missing provider_platform_id"
                )))
            }
        };

        let invalid = |e: serde_json::Error| Error::Validation(format!("{kind}: {e}"));
        let params = match kind {
            JobKind::GetCourses => JobParams::GetCourses,
            JobKind::GetMilestones => {
                let f: MilestoneFields = serde_json::from_value(value.clone()).map_err(invalid)?;
                JobParams::GetMilestones {
                    courses: f.courses,
                    user_mappings: f.user_mappings,
                    last_run: f.last_run,
                }
            }
            JobKind::GetActivity => {
                let f: ActivityFields = serde_json::from_value(value.clone()).map_err(invalid)?;
                JobParams::GetActivity { courses: f.courses }
            }
            JobKind::ScrapeLibraries => JobParams::ScrapeLibraries,
            JobKind::AddVideos => {
                let f: VideoFields = serde_json::from_value(value.clone()).map_err(invalid)?;
                JobParams::AddVideos {
                    video_urls: f.video_urls,
                }
            }
            JobKind::RetryFailedVideos => JobParams::RetryFailedVideos,
        };

        Ok(Self {
            job_id,
            provider_platform_id,
            params,
        })
    }

    pub fn kind(&self) -> JobKind {
        match self.params {
            JobParams::GetCourses => JobKind::GetCourses,
            JobParams::GetMilestones { .. } => JobKind::GetMilestones,
            JobParams::GetActivity { .. } => JobKind::GetActivity,
            JobParams::ScrapeLibraries => JobKind::ScrapeLibraries,
            JobParams::AddVideos { .. } => JobKind::AddVideos,
            JobParams::RetryFailedVideos => JobKind::RetryFailedVideos,
        }
    }
}

/// Producers encode numbers as JSON floats; accept any integral value.
fn parse_provider_id(value: &Value) -> Option<ProviderId> {
    if let Some(i) = value.as_i64() {
        return (i > 0).then(|| ProviderId::from(i));
    }
    let f = value.as_f64()?;
    if f.fract() != 0.0 || f < 1.0 || f > i64::MAX as f64 {
        return None;
    }
    Some(ProviderId::from(f as i64))
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Payload published on `tasks.<kind>.completed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCompleted {
    pub job_id: String,
}

/// Payload published on `tasks.<kind>.failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailed {
    pub job_id: String,
    pub reason: String,
}
