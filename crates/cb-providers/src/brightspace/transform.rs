//! Mapping from Brightspace rows to canonical entities.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use cb_core::{CourseId, ProviderId, UserId};
use cb_db::models::{NewCourse, NewMilestone, NewUser};

use super::data::{BrightspaceCourse, BrightspaceCourseAccess, BrightspaceEnrollment, BrightspaceUser};

pub const COURSE_TYPE: &str = "open_content";
pub const OUTCOME_TYPES: &str = "completion";
pub const ENROLLMENT_MILESTONE: &str = "enrollment";

pub fn into_course(
    row: &BrightspaceCourse,
    provider: ProviderId,
    base_url: &str,
    thumbnail_url: String,
) -> NewCourse {
    NewCourse {
        provider_platform_id: provider,
        external_id: row.org_unit_id.clone(),
        name: row.name.clone(),
        alt_name: row.code.clone(),
        description: format!("Brightspace Course: {}", row.name),
        thumbnail_url,
        course_type: COURSE_TYPE.into(),
        outcome_types: OUTCOME_TYPES.into(),
        external_url: base_url.to_string(),
    }
}

pub fn into_user(row: &BrightspaceUser, provider: ProviderId) -> NewUser {
    let username = if row.user_name.is_empty() {
        row.org_defined_id.clone()
    } else {
        row.user_name.clone()
    };
    NewUser {
        provider_platform_id: provider,
        external_user_id: row.user_id.clone(),
        username,
        name_first: row.first_name.clone(),
        name_last: row.last_name.clone(),
        email: row.external_email.clone(),
    }
}

/// The external id of an enrollment milestone, stable across re-imports.
pub fn enrollment_external_id(row: &BrightspaceEnrollment) -> String {
    format!("enrollment-{}-{}", row.org_unit_id, row.user_id)
}

pub fn enrollment_milestone(
    row: &BrightspaceEnrollment,
    course_id: CourseId,
    user_id: UserId,
    occurred_at: DateTime<Utc>,
) -> NewMilestone {
    NewMilestone {
        course_id,
        user_id,
        external_id: enrollment_external_id(row),
        milestone_type: ENROLLMENT_MILESTONE.into(),
        is_completed: false,
        occurred_at: occurred_at.to_rfc3339(),
    }
}

/// Parse a timestamp as written in Brightspace exports.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS[.fff]` (taken as UTC) and bare
/// dates.
pub fn parse_provider_date(value: &str) -> Option<DateTime<Utc>> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(v) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(v, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(v, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|n| n.and_utc())
}

/// The calendar day (`YYYY-MM-DD`) of an access row.
pub fn access_day(row: &BrightspaceCourseAccess) -> Option<String> {
    parse_provider_date(&row.day_accessed).map(|d| d.format("%Y-%m-%d").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn course_row() -> BrightspaceCourse {
        BrightspaceCourse {
            org_unit_id: "6606".into(),
            organization: "Org".into(),
            org_unit_type: "Course Offering".into(),
            name: "Algebra I".into(),
            code: "ALG-1".into(),
            is_active: "TRUE".into(),
            is_deleted: "FALSE".into(),
            org_unit_type_id: "3".into(),
        }
    }

    #[test]
    fn course_fields() {
        let c = into_course(
            &course_row(),
            ProviderId::from(4),
            "https://lms.example",
            "/photos/6606.jpg".into(),
        );
        assert_eq!(c.external_id, "6606");
        assert_eq!(c.description, "Brightspace Course: Algebra I");
        assert_eq!(c.course_type, "open_content");
        assert_eq!(c.outcome_types, "completion");
        assert_eq!(c.external_url, "https://lms.example");
        assert_eq!(c.thumbnail_url, "/photos/6606.jpg");
    }

    #[test]
    fn user_falls_back_to_org_defined_id() {
        let row = BrightspaceUser {
            user_id: "12".into(),
            user_name: String::new(),
            org_defined_id: "S-12".into(),
            first_name: "Amy".into(),
            last_name: "Lee".into(),
            is_active: "TRUE".into(),
            organization: String::new(),
            external_email: "amy@example.com".into(),
        };
        let u = into_user(&row, ProviderId::from(1));
        assert_eq!(u.username, "S-12");
        assert_eq!(u.external_user_id, "12");
        assert_eq!(u.email, "amy@example.com");
    }

    #[test]
    fn provider_dates() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 5, 14, 30, 0).unwrap();
        assert_eq!(parse_provider_date("2024-03-05T14:30:00Z"), Some(expected));
        assert_eq!(parse_provider_date("2024-03-05 14:30:00.000"), Some(expected));
        assert_eq!(
            parse_provider_date("2024-03-05"),
            Some(Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_provider_date(""), None);
        assert_eq!(parse_provider_date("yesterday"), None);
    }

    #[test]
    fn access_day_is_calendar_date() {
        let row = BrightspaceCourseAccess {
            org_unit_id: "1".into(),
            user_id: "2".into(),
            day_accessed: "2024-03-05T23:10:00.000Z".into(),
            num_times_accessed: 3,
        };
        assert_eq!(access_day(&row).as_deref(), Some("2024-03-05"));
    }
}
