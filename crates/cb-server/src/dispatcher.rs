//! Job dispatcher.
//!
//! Binds every job subject on the bus at start-up, then launches one task
//! per inbound message into a [`JoinSet`]. A semaphore caps how many jobs
//! execute at once; tasks wait for their permit inside the task so the
//! receive loop never blocks. On shutdown intake stops, in-flight jobs get
//! `drain_timeout` to finish, and whatever is left is cancelled and awaited.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use cb_core::bus::BusMessage;
use cb_core::jobs::{JobFailed, JobKind, JobRequest};
use cb_core::Result;

use crate::context::AppContext;
use crate::handlers;
use crate::lifecycle::{self, JobRun};

type Intake = BoxStream<'static, (JobKind, BusMessage)>;

pub struct Dispatcher {
    ctx: AppContext,
    intake: Intake,
}

impl Dispatcher {
    /// Subscribe to every job subject. Any failure here is fatal to start-up.
    pub async fn bind(ctx: AppContext) -> Result<Self> {
        let mut streams = Vec::with_capacity(JobKind::ALL.len());
        for kind in JobKind::ALL {
            let subject = kind.subject();
            let rx = ctx.bus.subscribe(&subject).await?;
            tracing::info!(subject = %subject, "Bound job subject");
            streams.push(ReceiverStream::new(rx).map(move |msg| (kind, msg)).boxed());
        }
        Ok(Self {
            ctx,
            intake: stream::select_all(streams).boxed(),
        })
    }

    /// Receive and launch jobs until `shutdown` fires or every subscription
    /// closes, then drain.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let limit = self.ctx.config.jobs.max_concurrent.max(1);
        let permits = Arc::new(Semaphore::new(limit));
        // Separate from `shutdown` so draining jobs are not cancelled at once.
        let jobs_cancel = CancellationToken::new();
        let mut tasks: JoinSet<()> = JoinSet::new();

        tracing::info!(max_concurrent = limit, "Job dispatcher started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                next = self.intake.next() => match next {
                    Some((kind, msg)) => {
                        let ctx = self.ctx.clone();
                        let permits = permits.clone();
                        let cancel = jobs_cancel.clone();
                        tasks.spawn(async move {
                            let Ok(_permit) = permits.acquire_owned().await else {
                                return;
                            };
                            handle_message(&ctx, kind, msg, &cancel).await;
                        });
                    }
                    None => {
                        tracing::warn!("All job subscriptions closed");
                        break;
                    }
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => log_join(joined),
            }
        }

        drain(tasks, jobs_cancel, self.ctx.config.jobs.drain_timeout()).await;
        tracing::info!("Job dispatcher stopped");
    }
}

/// Validate, run and settle one inbound message.
pub async fn handle_message(ctx: &AppContext, kind: JobKind, msg: BusMessage, cancel: &CancellationToken) {
    let request = match JobRequest::parse(kind, &msg.payload) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(subject = %msg.topic, error = %e, "Rejected job message");
            if let Some(job_id) = raw_job_id(&msg.payload) {
                let event = JobFailed {
                    job_id,
                    reason: e.to_string(),
                };
                lifecycle::publish(ctx.bus.as_ref(), &kind.failed_subject(), &event).await;
            }
            return;
        }
    };

    let run = JobRun::begin(ctx, &request, cancel, ctx.config.jobs.ceiling());
    let result = handlers::run_job(ctx, &request, run.token()).await;
    run.finish(result).await;
}

/// Best-effort job id from a payload that failed validation.
fn raw_job_id(payload: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(payload).ok()?;
    value
        .get("job_id")?
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn log_join(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            tracing::error!(error = %e, "Job task panicked");
        } else {
            tracing::debug!(error = %e, "Job task ended abnormally");
        }
    }
}

async fn drain(mut tasks: JoinSet<()>, jobs_cancel: CancellationToken, timeout: Duration) {
    if tasks.is_empty() {
        return;
    }
    tracing::info!(in_flight = tasks.len(), "Draining in-flight jobs");

    let drained = tokio::time::timeout(timeout, async {
        while let Some(joined) = tasks.join_next().await {
            log_join(joined);
        }
    })
    .await;

    if drained.is_err() {
        tracing::warn!(
            remaining = tasks.len(),
            "Drain timeout elapsed; cancelling remaining jobs"
        );
        jobs_cancel.cancel();
        while let Some(joined) = tasks.join_next().await {
            log_join(joined);
        }
    }
}
