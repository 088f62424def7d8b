//! Per-job deadline: work stops once it fires and exactly one failure is
//! reported.

mod common;

use std::time::Duration;

use cb_core::jobs::JobKind;
use common::{job, org_units_csv, zip_csv, TestHarness};
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn slow_import_is_cut_off_at_the_deadline() {
    let h = TestHarness::with_config(|c| c.jobs.ceiling_secs = 1).await;
    let provider = h.brightspace_provider("secret;r1");
    h.mount_token("r1", "r2").await;

    let rows: Vec<(String, String)> = (0..10)
        .map(|i| (format!("70{i:02}"), format!("Course {i}")))
        .collect();
    let borrowed: Vec<(&str, &str, bool)> = rows
        .iter()
        .map(|(id, name)| (id.as_str(), name.as_str(), true))
        .collect();
    h.mount_exports(vec![(
        "p-org",
        "Organizational Units",
        zip_csv("OrganizationalUnits.csv", &org_units_csv(&borrowed)),
    )])
    .await;
    Mock::given(method("GET"))
        .and(path_regex(r"/courses/[^/]+/image$"))
        .respond_with(ResponseTemplate::new(404).set_delay(Duration::from_millis(400)))
        .mount(&h.server)
        .await;

    h.run_job(JobKind::GetCourses, job("job-slow", provider)).await;

    let failed = h.failed(JobKind::GetCourses);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].job_id, "job-slow");
    assert!(failed[0].reason.contains("deadline"), "reason: {}", failed[0].reason);
    assert!(h.completed(JobKind::GetCourses).is_empty());

    let created = h.courses(provider).len();
    assert!(created > 0, "rows committed before the deadline are kept");
    assert!(created < rows.len(), "created {created} of {}", rows.len());

    // No record-level work continues in the background.
    let images_at_end = image_requests(&h).await;
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(image_requests(&h).await, images_at_end);
    assert_eq!(h.courses(provider).len(), created);
    assert_eq!(h.failed(JobKind::GetCourses).len(), 1);
}

async fn image_requests(h: &TestHarness) -> usize {
    h.server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path().ends_with("/image"))
        .count()
}
