//! Message validation, the dispatcher loop and the HTTP intake bridge.

mod common;

use std::time::Duration;

use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use cb_core::bus::MessageBus;
use cb_core::jobs::{JobCompleted, JobKind};
use cb_db::queries::{content_providers, tasks};
use cb_db::models::TaskStatus;
use cb_server::dispatcher::Dispatcher;
use common::{job, TestHarness};

#[tokio::test]
async fn missing_provider_id_fails_before_any_network_call() {
    let h = TestHarness::new().await;
    h.brightspace_provider("secret;r1");
    h.mount_token("r1", "r2").await;

    h.run_job(JobKind::GetCourses, json!({ "job_id": "job-1" })).await;

    let failed = h.failed(JobKind::GetCourses);
    assert_eq!(failed.len(), 1);
    assert!(failed[0].reason.contains("provider_platform_id"));
    assert!(h.server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_job_id_is_dropped_silently() {
    let h = TestHarness::new().await;
    let provider = h.brightspace_provider("secret;r1");
    h.mount_token("r1", "r2").await;

    h.run_job(JobKind::GetCourses, json!({ "provider_platform_id": provider.get() })).await;

    assert!(h.failed(JobKind::GetCourses).is_empty());
    assert!(h.completed(JobKind::GetCourses).is_empty());
    assert!(h.server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn float_provider_id_is_accepted() {
    let h = TestHarness::new().await;
    let conn = h.db.get().unwrap();
    let youtube = content_providers::create_content_provider(
        &conn,
        content_providers::YOUTUBE,
        "https://www.youtube.com",
        "",
    )
    .unwrap();
    drop(conn);

    let payload = json!({
        "job_id": "job-1",
        "provider_platform_id": youtube.id.get() as f64,
    });
    h.run_job(JobKind::RetryFailedVideos, payload).await;

    assert_eq!(h.completed(JobKind::RetryFailedVideos).len(), 1);
}

#[tokio::test]
async fn unknown_provider_fails_the_job() {
    let h = TestHarness::new().await;
    h.run_job(JobKind::GetCourses, job("job-1", cb_core::ProviderId::from(999))).await;

    let failed = h.failed(JobKind::GetCourses);
    assert_eq!(failed.len(), 1);
    assert!(failed[0].reason.contains("not found"));
}

#[tokio::test]
async fn task_row_records_the_outcome() {
    let h = TestHarness::new().await;
    let provider = h.brightspace_provider("no-separator");
    {
        let conn = h.db.get().unwrap();
        tasks::create_task(&conn, "job-1", provider, JobKind::GetCourses.name()).unwrap();
    }

    h.run_job(JobKind::GetCourses, job("job-1", provider)).await;

    let conn = h.db.get().unwrap();
    let task = tasks::get_task(&conn, "job-1").unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.unwrap_or_default().contains("Configuration"));
}

#[tokio::test]
async fn dispatcher_runs_published_jobs() {
    let h = TestHarness::new().await;
    let conn = h.db.get().unwrap();
    let youtube = content_providers::create_content_provider(
        &conn,
        content_providers::YOUTUBE,
        "https://www.youtube.com",
        "",
    )
    .unwrap();
    drop(conn);

    let mut completed = h
        .bus
        .subscribe(&JobKind::RetryFailedVideos.completed_subject())
        .await
        .unwrap();
    let dispatcher = Dispatcher::bind(h.ctx.clone()).await.unwrap();
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(dispatcher.run(shutdown.clone()));

    let payload = json!({ "job_id": "job-7", "provider_platform_id": youtube.id.get() });
    h.bus
        .publish(
            &JobKind::RetryFailedVideos.subject(),
            serde_json::to_vec(&payload).unwrap(),
        )
        .await
        .unwrap();

    let msg = tokio::time::timeout(Duration::from_secs(10), completed.recv())
        .await
        .unwrap()
        .unwrap();
    let event: JobCompleted = msg.json().unwrap();
    assert_eq!(event.job_id, "job-7");

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn http_intake_reaches_the_dispatcher() {
    let h = TestHarness::new().await;
    let conn = h.db.get().unwrap();
    let youtube = content_providers::create_content_provider(
        &conn,
        content_providers::YOUTUBE,
        "https://www.youtube.com",
        "",
    )
    .unwrap();
    drop(conn);

    let mut completed = h
        .bus
        .subscribe(&JobKind::RetryFailedVideos.completed_subject())
        .await
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(cb_server::serve(h.ctx.clone(), listener, shutdown.clone()));

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/tasks/retry_failed_videos"))
        .json(&json!({ "job_id": "job-http", "provider_platform_id": youtube.id.get() }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);

    let msg = tokio::time::timeout(Duration::from_secs(10), completed.recv())
        .await
        .unwrap()
        .unwrap();
    let event: JobCompleted = msg.json().unwrap();
    assert_eq!(event.job_id, "job-http");

    shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(10), server)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}
