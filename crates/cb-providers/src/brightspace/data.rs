//! Brightspace Data Set row shapes, keyed by CSV header name.

use serde::Deserialize;

use crate::records::{flag, ActivationPredicate};

/// Export names as listed by the data set endpoint.
pub const ORG_UNITS_EXPORT: &str = "Organizational Units";
pub const USERS_EXPORT: &str = "Users";
pub const ENROLLMENTS_EXPORT: &str = "User Enrollments";
pub const COURSE_ACCESS_EXPORT: &str = "Course Access";

const COURSE_OFFERING: &str = "Course Offering";

/// A row of the "Organizational Units" export.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BrightspaceCourse {
    pub org_unit_id: String,
    #[serde(default)]
    pub organization: String,
    #[serde(rename = "Type", default)]
    pub org_unit_type: String,
    pub name: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub is_active: String,
    #[serde(default)]
    pub is_deleted: String,
    #[serde(default)]
    pub org_unit_type_id: String,
}

impl ActivationPredicate for BrightspaceCourse {
    fn is_active(&self) -> bool {
        flag(&self.is_active) && !flag(&self.is_deleted) && self.org_unit_type == COURSE_OFFERING
    }
}

/// A row of the "Users" export.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BrightspaceUser {
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub org_defined_id: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub is_active: String,
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub external_email: String,
}

impl ActivationPredicate for BrightspaceUser {
    fn is_active(&self) -> bool {
        flag(&self.is_active)
    }
}

/// A row of the "User Enrollments" export.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BrightspaceEnrollment {
    pub org_unit_id: String,
    pub user_id: String,
    #[serde(default)]
    pub role_name: String,
    #[serde(default)]
    pub enrollment_type: String,
    #[serde(default)]
    pub enrollment_date: Option<String>,
}

impl ActivationPredicate for BrightspaceEnrollment {
    fn is_active(&self) -> bool {
        !self.org_unit_id.is_empty() && !self.user_id.is_empty()
    }
}

/// A row of the "Course Access" export: one user's visits to one org unit
/// on one day.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BrightspaceCourseAccess {
    pub org_unit_id: String,
    pub user_id: String,
    pub day_accessed: String,
    #[serde(default)]
    pub num_times_accessed: i64,
}

impl ActivationPredicate for BrightspaceCourseAccess {
    fn is_active(&self) -> bool {
        self.num_times_accessed > 0
    }
}
