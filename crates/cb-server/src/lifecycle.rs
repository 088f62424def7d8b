//! Job lifecycle controller.
//!
//! A [`JobRun`] wraps one job's execution: it derives the deadline token,
//! marks the task row running, and on [`JobRun::finish`] publishes exactly
//! one outcome event and records the final task status. If the run is
//! dropped without finishing (the job task panicked or was aborted), `Drop`
//! records and publishes a failure instead.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use cb_core::bus::MessageBus;
use cb_core::jobs::{JobCompleted, JobFailed, JobKind, JobRequest};
use cb_core::work::JobDeadline;
use cb_core::{Error, ProviderId, Result};
use cb_db::pool::{get_conn, DbPool};
use cb_db::queries::tasks;

use crate::context::AppContext;

const ABORTED_REASON: &str = "job aborted before completion";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Started,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Started => "started",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

pub struct JobRun {
    bus: Arc<dyn MessageBus>,
    db: DbPool,
    kind: JobKind,
    job_id: String,
    provider: ProviderId,
    deadline: JobDeadline,
    state: JobState,
    finished: bool,
}

impl JobRun {
    /// Open a run for `request`. The deadline is derived from `parent` and
    /// fires after `ceiling`.
    pub fn begin(
        ctx: &AppContext,
        request: &JobRequest,
        parent: &CancellationToken,
        ceiling: Duration,
    ) -> Self {
        let mut run = Self {
            bus: ctx.bus.clone(),
            db: ctx.db.clone(),
            kind: request.kind(),
            job_id: request.job_id.clone(),
            provider: request.provider_platform_id,
            deadline: JobDeadline::start(parent, ceiling),
            state: JobState::Started,
            finished: false,
        };

        match get_conn(&run.db).and_then(|conn| tasks::mark_running(&conn, &run.job_id)) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(job_id = %run.job_id, "No task row for job");
            }
            Err(e) => {
                tracing::warn!(job_id = %run.job_id, error = %e, "Failed to mark task running");
            }
        }

        run.state = JobState::Running;
        tracing::info!(
            job_id = %run.job_id,
            kind = %run.kind,
            provider = %run.provider,
            ceiling_secs = ceiling.as_secs(),
            "Job started"
        );
        run
    }

    /// Token every unit of work must observe.
    pub fn token(&self) -> &CancellationToken {
        self.deadline.token()
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Settle the run from the job's result, publish its outcome and run
    /// cleanup. Returns the terminal state.
    pub async fn finish(mut self, result: Result<()>) -> JobState {
        self.finished = true;

        let (state, reason) = match result {
            Ok(()) => (JobState::Completed, None),
            Err(Error::Cancelled(detail)) => (
                JobState::Cancelled,
                Some(format!("{}: {detail}", self.deadline.cancel_reason())),
            ),
            Err(e) => (JobState::Failed, Some(e.to_string())),
        };
        self.state = state;
        self.deadline.release();

        match &reason {
            None => {
                tracing::info!(job_id = %self.job_id, kind = %self.kind, "Job completed");
                let event = JobCompleted {
                    job_id: self.job_id.clone(),
                };
                publish(self.bus.as_ref(), &self.kind.completed_subject(), &event).await;
            }
            Some(reason) => {
                tracing::error!(
                    job_id = %self.job_id,
                    kind = %self.kind,
                    state = %state,
                    reason = %reason,
                    "Job did not complete"
                );
                let event = JobFailed {
                    job_id: self.job_id.clone(),
                    reason: reason.clone(),
                };
                publish(self.bus.as_ref(), &self.kind.failed_subject(), &event).await;
            }
        }

        cleanup(&self.db, &self.job_id, reason.as_deref());
        state
    }
}

impl Drop for JobRun {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.state = JobState::Failed;
        tracing::error!(job_id = %self.job_id, kind = %self.kind, "Job run dropped without an outcome");

        cleanup(&self.db, &self.job_id, Some(ABORTED_REASON));

        let event = JobFailed {
            job_id: self.job_id.clone(),
            reason: ABORTED_REASON.to_string(),
        };
        let subject = self.kind.failed_subject();
        let bus = self.bus.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                publish(bus.as_ref(), &subject, &event).await;
            });
        }
    }
}

/// Publish an outcome event. Delivery failures are logged; the task row
/// still records the outcome.
pub(crate) async fn publish<T: Serialize>(bus: &dyn MessageBus, subject: &str, event: &T) {
    let payload = match serde_json::to_vec(event) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(subject, error = %e, "Failed to encode outcome event");
            return;
        }
    };
    if let Err(e) = bus.publish(subject, payload).await {
        tracing::error!(subject, error = %e, "Failed to publish outcome event");
    }
}

fn cleanup(db: &DbPool, job_id: &str, failure: Option<&str>) {
    let updated = get_conn(db).and_then(|conn| match failure {
        None => tasks::mark_complete(&conn, job_id),
        Some(reason) => tasks::mark_failed(&conn, job_id, reason),
    });
    match updated {
        Ok(true) => {}
        Ok(false) => tracing::debug!(job_id, "No task row to update"),
        Err(e) => tracing::warn!(job_id, error = %e, "Failed to update task row"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cb_core::bus::InProcessBus;
    use cb_core::config::Config;
    use cb_core::jobs::JobParams;
    use cb_db::models::TaskStatus;
    use cb_db::pool::init_memory_pool;
    use cb_db::queries::providers;

    fn setup() -> (AppContext, Arc<InProcessBus>, JobRequest) {
        let db = init_memory_pool().unwrap();
        let provider = {
            let conn = db.get().unwrap();
            let p = providers::create_provider(&conn, "p", "brightspace", "http://x", "c", "s;r")
                .unwrap();
            tasks::create_task(&conn, "job-1", p.id, "get_courses").unwrap();
            p.id
        };
        let bus = Arc::new(InProcessBus::new());
        let ctx = AppContext::new(db, Config::default(), bus.clone());
        let request = JobRequest {
            job_id: "job-1".into(),
            provider_platform_id: provider,
            params: JobParams::GetCourses,
        };
        (ctx, bus, request)
    }

    #[tokio::test]
    async fn success_publishes_one_completion() {
        let (ctx, bus, request) = setup();
        let run = JobRun::begin(&ctx, &request, &CancellationToken::new(), Duration::from_secs(60));
        assert_eq!(run.state(), JobState::Running);
        assert_eq!(run.finish(Ok(())).await, JobState::Completed);

        assert_eq!(bus.messages_on("tasks.get_courses.completed").len(), 1);
        assert!(bus.messages_on("tasks.get_courses.failed").is_empty());

        let task = tasks::get_task(&ctx.db.get().unwrap(), "job-1").unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Complete);
        assert!(task.last_run.is_some());
    }

    #[tokio::test]
    async fn failure_publishes_reason_and_no_completion() {
        let (ctx, bus, request) = setup();
        let run = JobRun::begin(&ctx, &request, &CancellationToken::new(), Duration::from_secs(60));
        let state = run.finish(Err(Error::Auth("invalid_grant".into()))).await;
        assert_eq!(state, JobState::Failed);

        let failed = bus.messages_on("tasks.get_courses.failed");
        assert_eq!(failed.len(), 1);
        let event: JobFailed = failed[0].json().unwrap();
        assert_eq!(event.job_id, "job-1");
        assert!(event.reason.contains("invalid_grant"));
        assert!(bus.messages_on("tasks.get_courses.completed").is_empty());

        let task = tasks::get_task(&ctx.db.get().unwrap(), "job-1").unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn expired_deadline_reports_cancellation() {
        let (ctx, bus, request) = setup();
        let run = JobRun::begin(&ctx, &request, &CancellationToken::new(), Duration::from_millis(20));
        run.token().cancelled().await;

        let state = run
            .finish(Err(Error::Cancelled("stopped after 3 unit(s)".into())))
            .await;
        assert_eq!(state, JobState::Cancelled);

        let failed = bus.messages_on("tasks.get_courses.failed");
        assert_eq!(failed.len(), 1);
        let event: JobFailed = failed[0].json().unwrap();
        assert!(event.reason.starts_with("job deadline exceeded"));
    }

    #[tokio::test]
    async fn dropped_run_still_fails_once() {
        let (ctx, bus, request) = setup();
        let run = JobRun::begin(&ctx, &request, &CancellationToken::new(), Duration::from_secs(60));
        drop(run);
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(bus.messages_on("tasks.get_courses.failed").len(), 1);
        assert!(bus.messages_on("tasks.get_courses.completed").is_empty());
        let task = tasks::get_task(&ctx.db.get().unwrap(), "job-1").unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn missing_task_row_is_not_fatal() {
        let (ctx, bus, mut request) = setup();
        request.job_id = "unknown-job".into();
        let run = JobRun::begin(&ctx, &request, &CancellationToken::new(), Duration::from_secs(60));
        assert_eq!(run.finish(Ok(())).await, JobState::Completed);
        assert_eq!(bus.messages_on("tasks.get_courses.completed").len(), 1);
    }
}
