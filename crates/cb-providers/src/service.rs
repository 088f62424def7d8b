//! The provider adapter capability set and its factory.

use std::ops::AddAssign;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use cb_core::config::Config;
use cb_core::jobs::{CourseRef, UserMapping};
use cb_core::{Error, ProviderId, Result};
use cb_db::models::{NewUser, UpsertOutcome};
use cb_db::pool::{get_conn, DbPool};
use cb_db::queries::providers;

use crate::brightspace::BrightspaceService;
use crate::token::{ProviderCredential, RefreshLocks};

// ---------------------------------------------------------------------------
// ImportSummary
// ---------------------------------------------------------------------------

/// Row counts for one import run.
///
/// `accepted` rows passed the activation predicate (or failed to parse, so
/// the predicate could not run); `rejected` rows were filtered out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub accepted: usize,
    pub rejected: usize,
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
}

impl ImportSummary {
    pub fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Created => self.created += 1,
            UpsertOutcome::Updated => self.updated += 1,
        }
    }

    /// Log a row-scoped failure and count it.
    pub fn row_failed(&mut self, error: &Error) {
        tracing::warn!(error = %error, "Skipping row");
        self.failed += 1;
    }

    /// Fail when rows were accepted but none of them persisted.
    pub fn into_result(self) -> Result<Self> {
        if self.accepted > 0 && self.failed == self.accepted {
            return Err(Error::database(format!(
                "all {} accepted rows failed to import",
                self.accepted
            )));
        }
        Ok(self)
    }
}

impl AddAssign for ImportSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.accepted += rhs.accepted;
        self.rejected += rhs.rejected;
        self.created += rhs.created;
        self.updated += rhs.updated;
        self.failed += rhs.failed;
    }
}

// ---------------------------------------------------------------------------
// ProviderService
// ---------------------------------------------------------------------------

/// Capabilities every LMS adapter exposes.
///
/// `refresh_credential` must succeed before any other call; the import
/// methods consume their rows through a cancellation-aware sequence tied to
/// `cancel`.
///
/// The per-course imports return their raw counts even when every row
/// failed; the caller judges the job as a whole with
/// [`ImportSummary::into_result`].
#[async_trait]
pub trait ProviderService: Send + Sync {
    fn provider_id(&self) -> ProviderId;

    async fn refresh_credential(&self) -> Result<()>;

    async fn import_courses(&self, cancel: &CancellationToken) -> Result<ImportSummary>;

    async fn import_milestones(
        &self,
        course: &CourseRef,
        user_mappings: &[UserMapping],
        since: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<ImportSummary>;

    async fn import_activity(
        &self,
        course: &CourseRef,
        cancel: &CancellationToken,
    ) -> Result<ImportSummary>;

    async fn get_users(&self, cancel: &CancellationToken) -> Result<Vec<NewUser>>;
}

/// Provider families with an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Brightspace,
    Kolibri,
    Canvas,
}

impl std::str::FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "brightspace" => Ok(ProviderKind::Brightspace),
            "kolibri" => Ok(ProviderKind::Kolibri),
            "canvas_cloud" | "canvas_oss" | "canvas" => Ok(ProviderKind::Canvas),
            other => Err(Error::Configuration(format!("unknown provider kind '{other}'"))),
        }
    }
}

/// Shared dependencies for building adapters.
#[derive(Clone)]
pub struct ServiceContext {
    pub db: DbPool,
    pub config: Arc<Config>,
    pub refresh_locks: RefreshLocks,
}

impl ServiceContext {
    pub fn new(db: DbPool, config: Arc<Config>, refresh_locks: RefreshLocks) -> Self {
        Self {
            db,
            config,
            refresh_locks,
        }
    }

    /// Create a private staging directory for one job.
    pub fn staging_dir(&self) -> Result<tempfile::TempDir> {
        let parent: PathBuf = self
            .config
            .staging
            .dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        std::fs::create_dir_all(&parent)?;
        Ok(tempfile::Builder::new().prefix("cb-job-").tempdir_in(parent)?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config.brightspace.request_timeout_secs)
    }
}

/// Build the adapter for a stored provider.
///
/// Fails with `NotFound` for an unknown id and `Configuration` when the
/// credential is malformed or the provider kind has no adapter. No network
/// call is made here.
pub fn create_service(ctx: &ServiceContext, provider: ProviderId) -> Result<Box<dyn ProviderService>> {
    let platform = {
        let conn = get_conn(&ctx.db)?;
        providers::get_provider(&conn, provider)?
            .ok_or_else(|| Error::not_found("provider", provider))?
    };
    let credential = ProviderCredential::from_platform(&platform)?;

    match credential.kind.parse::<ProviderKind>()? {
        ProviderKind::Brightspace => Ok(Box::new(BrightspaceService::new(ctx, credential)?)),
        other => Err(Error::Configuration(format!(
            "provider {provider}: no adapter for {other:?}"
        ))),
    }
}
