//! Per-kind job handlers.
//!
//! Each handler builds what it needs from the [`AppContext`], observes the
//! run's cancellation token, and returns `Ok(())` only when the job
//! completed.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use cb_core::jobs::{CourseRef, JobParams, JobRequest, UserMapping};
use cb_core::work::{throttle, WorkUnitsExt};
use cb_core::{ContentProviderId, ProviderId, Result};
use cb_providers::assets::AssetUploader;
use cb_providers::http::ProviderClient;
use cb_providers::kiwix::KiwixScraper;
use cb_providers::videos::VideoService;
use cb_providers::{create_service, ImportSummary, ProviderService};

use crate::context::AppContext;

/// Run the job described by `request` to completion or cancellation.
pub async fn run_job(ctx: &AppContext, request: &JobRequest, cancel: &CancellationToken) -> Result<()> {
    let provider = request.provider_platform_id;
    let summary = match &request.params {
        JobParams::GetCourses => get_courses(ctx, provider, cancel).await?,
        JobParams::GetMilestones {
            courses,
            user_mappings,
            last_run,
        } => get_milestones(ctx, provider, courses, user_mappings, *last_run, cancel).await?,
        JobParams::GetActivity { courses } => get_activity(ctx, provider, courses, cancel).await?,
        JobParams::ScrapeLibraries => scrape_libraries(ctx, provider, cancel).await?,
        JobParams::AddVideos { video_urls } => add_videos(ctx, provider, video_urls, cancel).await?,
        JobParams::RetryFailedVideos => retry_failed_videos(ctx, provider, cancel).await?,
    };

    tracing::info!(
        job_id = %request.job_id,
        accepted = summary.accepted,
        rejected = summary.rejected,
        created = summary.created,
        updated = summary.updated,
        failed = summary.failed,
        "Job work finished"
    );
    Ok(())
}

async fn authenticated(ctx: &AppContext, provider: ProviderId) -> Result<Box<dyn ProviderService>> {
    let service = create_service(&ctx.services(), provider)?;
    service.refresh_credential().await?;
    Ok(service)
}

async fn get_courses(
    ctx: &AppContext,
    provider: ProviderId,
    cancel: &CancellationToken,
) -> Result<ImportSummary> {
    let service = authenticated(ctx, provider).await?;
    service.import_courses(cancel).await
}

async fn get_milestones(
    ctx: &AppContext,
    provider: ProviderId,
    courses: &[CourseRef],
    user_mappings: &[UserMapping],
    since: DateTime<Utc>,
    cancel: &CancellationToken,
) -> Result<ImportSummary> {
    let service = authenticated(ctx, provider).await?;
    let pause = ctx.config.jobs.milestone_throttle();
    let mut total = ImportSummary::default();

    for (i, course) in courses.units(cancel).enumerate() {
        let course = course?;
        if i > 0 {
            throttle(cancel, pause).await?;
        }
        let result = service
            .import_milestones(course, user_mappings, since, cancel)
            .await;
        total += per_course(course, result)?;
    }
    total.into_result()
}

async fn get_activity(
    ctx: &AppContext,
    provider: ProviderId,
    courses: &[CourseRef],
    cancel: &CancellationToken,
) -> Result<ImportSummary> {
    let service = authenticated(ctx, provider).await?;
    let mut total = ImportSummary::default();

    for course in courses.units(cancel) {
        let course = course?;
        let result = service.import_activity(course, cancel).await;
        total += per_course(course, result)?;
    }
    total.into_result()
}

/// Fold one course's outcome into the job. A course that failed as a whole
/// without a job-fatal error counts as one accepted, failed row so the job
/// total still decides completion; anything job-fatal aborts the job.
fn per_course(course: &CourseRef, result: Result<ImportSummary>) -> Result<ImportSummary> {
    match result {
        Ok(summary) => {
            if summary.accepted > 0 && summary.failed == summary.accepted {
                tracing::warn!(course = %course.external_id, failed = summary.failed, "No rows imported for course");
            }
            Ok(summary)
        }
        Err(e) if !e.is_job_fatal() => {
            tracing::warn!(course = %course.external_id, error = %e, "Skipping course");
            Ok(ImportSummary {
                accepted: 1,
                failed: 1,
                ..Default::default()
            })
        }
        Err(e) => Err(e),
    }
}

/// Open-content jobs address the content provider through the same id field.
fn content_provider(provider: ProviderId) -> ContentProviderId {
    ContentProviderId::from(provider.get())
}

fn request_timeout(ctx: &AppContext) -> Duration {
    Duration::from_secs(ctx.config.brightspace.request_timeout_secs)
}

async fn scrape_libraries(
    ctx: &AppContext,
    provider: ProviderId,
    cancel: &CancellationToken,
) -> Result<ImportSummary> {
    let client = ProviderClient::new(request_timeout(ctx), ctx.config.brightspace.requests_per_second)?;
    KiwixScraper::new(client, ctx.db.clone())
        .scrape_libraries(content_provider(provider), cancel)
        .await
}

fn video_service(ctx: &AppContext, staging: &Path) -> Result<VideoService> {
    let assets = AssetUploader::new(&ctx.config.assets, request_timeout(ctx))?;
    Ok(VideoService::new(
        ctx.db.clone(),
        ctx.fetcher.clone(),
        assets,
        staging.to_path_buf(),
    ))
}

async fn add_videos(
    ctx: &AppContext,
    provider: ProviderId,
    urls: &[String],
    cancel: &CancellationToken,
) -> Result<ImportSummary> {
    let staging = ctx.services().staging_dir()?;
    video_service(ctx, staging.path())?
        .add_videos(content_provider(provider), urls, cancel)
        .await
}

async fn retry_failed_videos(
    ctx: &AppContext,
    provider: ProviderId,
    cancel: &CancellationToken,
) -> Result<ImportSummary> {
    let staging = ctx.services().staging_dir()?;
    video_service(ctx, staging.path())?
        .retry_failed_videos(content_provider(provider), cancel)
        .await
}
