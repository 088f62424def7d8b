//! Brightspace (D2L) adapter.
//!
//! All imports read Brightspace Data Sets: the named export is resolved,
//! downloaded into the job's staging directory and parsed row by row. An
//! export is fetched at most once per adapter instance and reused across
//! the courses of a job.

pub mod data;
pub mod transform;

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use reqwest::StatusCode;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use cb_core::jobs::{CourseRef, UserMapping};
use cb_core::work::WorkUnitsExt;
use cb_core::{Error, ProviderId, Result, UserId};
use cb_db::models::{NewUser, UpsertOutcome};
use cb_db::pool::{get_conn, DbPool};
use cb_db::queries::{activities, courses, milestones, users};

use crate::assets::AssetUploader;
use crate::export::BulkExport;
use crate::http::ProviderClient;
use crate::records::{read_records, ActivationPredicate};
use crate::service::{ImportSummary, ProviderService, ServiceContext};
use crate::token::{ProviderCredential, TokenManager};

use data::{
    BrightspaceCourse, BrightspaceCourseAccess, BrightspaceEnrollment, BrightspaceUser,
    COURSE_ACCESS_EXPORT, ENROLLMENTS_EXPORT, ORG_UNITS_EXPORT, USERS_EXPORT,
};

pub struct BrightspaceService {
    provider: ProviderId,
    base_url: String,
    api_version: String,
    db: DbPool,
    client: ProviderClient,
    tokens: TokenManager,
    exports: BulkExport,
    assets: AssetUploader,
    bearer: RwLock<Option<String>>,
    extracted: tokio::sync::Mutex<HashMap<String, PathBuf>>,
    // Removed with the adapter.
    _staging: TempDir,
}

impl BrightspaceService {
    pub fn new(ctx: &ServiceContext, credential: ProviderCredential) -> Result<Self> {
        let settings = &ctx.config.brightspace;
        let client = ProviderClient::new(ctx.request_timeout(), settings.requests_per_second)?;
        let staging = ctx.staging_dir()?;

        let tokens = TokenManager::new(
            client.clone(),
            ctx.db.clone(),
            ctx.refresh_locks.clone(),
            settings.token_endpoint.clone(),
            settings.scope.clone(),
        );
        let exports = BulkExport::new(
            client.clone(),
            &credential.base_url,
            &settings.api_version,
            staging.path().to_path_buf(),
        );
        let assets = AssetUploader::new(&ctx.config.assets, ctx.request_timeout())?;

        tracing::debug!(
            provider = %credential.provider_id,
            staging = %staging.path().display(),
            "Created Brightspace adapter"
        );

        Ok(Self {
            provider: credential.provider_id,
            base_url: credential.base_url,
            api_version: settings.api_version.clone(),
            db: ctx.db.clone(),
            client,
            tokens,
            exports,
            assets,
            bearer: RwLock::new(None),
            extracted: tokio::sync::Mutex::new(HashMap::new()),
            _staging: staging,
        })
    }

    fn bearer(&self) -> Result<String> {
        self.bearer.read().clone().ok_or_else(|| {
            Error::Auth(format!(
                "provider {}: credential has not been refreshed",
                self.provider
            ))
        })
    }

    /// CSV path of a named export, downloading it on first use.
    async fn export_csv(&self, bearer: &str, name: &str) -> Result<PathBuf> {
        let mut extracted = self.extracted.lock().await;
        if let Some(path) = extracted.get(name) {
            return Ok(path.clone());
        }
        let export = self.exports.fetch(bearer, name).await?;
        let csv = export.csv_file()?.to_path_buf();
        extracted.insert(name.to_string(), csv.clone());
        Ok(csv)
    }

    /// Fetch the course image and re-upload it. Any failure degrades to an
    /// empty thumbnail.
    async fn course_thumbnail(&self, bearer: &str, org_unit_id: &str) -> String {
        match self.upload_course_image(bearer, org_unit_id).await {
            Ok(Some(url)) => url,
            Ok(None) => String::new(),
            Err(e) => {
                tracing::warn!(
                    provider = %self.provider,
                    org_unit = %org_unit_id,
                    error = %e,
                    "Course image enrichment failed"
                );
                String::new()
            }
        }
    }

    async fn upload_course_image(&self, bearer: &str, org_unit_id: &str) -> Result<Option<String>> {
        let url = format!(
            "{}/d2l/api/lp/{}/courses/{org_unit_id}/image",
            self.base_url, self.api_version
        );
        let resp = self
            .client
            .send(|http| http.get(&url).bearer_auth(bearer))
            .await
            .map_err(|e| Error::Transfer(format!("course image request failed: {e}")))?;

        if resp.status() != StatusCode::OK {
            tracing::debug!(org_unit = %org_unit_id, status = %resp.status(), "No course image");
            return Ok(None);
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::Transfer(format!("course image download failed: {e}")))?;
        if bytes.is_empty() {
            return Ok(None);
        }

        let filename = format!("image_brightspace/{org_unit_id}.jpg");
        self.assets.upload_bytes(&filename, bytes.to_vec()).await.map(Some)
    }
}

#[async_trait]
impl ProviderService for BrightspaceService {
    fn provider_id(&self) -> ProviderId {
        self.provider
    }

    async fn refresh_credential(&self) -> Result<()> {
        let token = self.tokens.refresh(self.provider).await?;
        *self.bearer.write() = Some(token.token);
        Ok(())
    }

    async fn import_courses(&self, cancel: &CancellationToken) -> Result<ImportSummary> {
        let bearer = self.bearer()?;
        let path = self.export_csv(&bearer, ORG_UNITS_EXPORT).await?;
        let mut summary = ImportSummary::default();

        for unit in read_records::<BrightspaceCourse>(&path)?.units(cancel) {
            let row = match unit? {
                Ok(row) => row,
                Err(e) => {
                    summary.accepted += 1;
                    summary.row_failed(&e);
                    continue;
                }
            };
            if !row.is_active() {
                summary.rejected += 1;
                continue;
            }
            summary.accepted += 1;

            let thumbnail = self.course_thumbnail(&bearer, &row.org_unit_id).await;
            let course = transform::into_course(&row, self.provider, &self.base_url, thumbnail);

            let persisted = get_conn(&self.db).and_then(|conn| courses::upsert_course(&conn, &course));
            match persisted {
                Ok((_, outcome)) => summary.record(outcome),
                Err(e) => summary.row_failed(&e),
            }
        }

        tracing::info!(
            provider = %self.provider,
            created = summary.created,
            updated = summary.updated,
            rejected = summary.rejected,
            failed = summary.failed,
            "Imported courses"
        );
        summary.into_result()
    }

    async fn import_milestones(
        &self,
        course: &CourseRef,
        user_mappings: &[UserMapping],
        since: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<ImportSummary> {
        let bearer = self.bearer()?;
        let path = self.export_csv(&bearer, ENROLLMENTS_EXPORT).await?;
        let mapped: HashMap<&str, UserId> = user_mappings
            .iter()
            .map(|m| (m.external_user_id.as_str(), m.user_id))
            .collect();
        let mut summary = ImportSummary::default();

        for unit in read_records::<BrightspaceEnrollment>(&path)?.units(cancel) {
            let row = match unit? {
                Ok(row) => row,
                Err(e) => {
                    summary.accepted += 1;
                    summary.row_failed(&e);
                    continue;
                }
            };
            if !row.is_active() || row.org_unit_id != course.external_id {
                summary.rejected += 1;
                continue;
            }
            let Some(&user_id) = mapped.get(row.user_id.as_str()) else {
                summary.rejected += 1;
                continue;
            };
            let enrolled_at = row
                .enrollment_date
                .as_deref()
                .and_then(transform::parse_provider_date);
            if enrolled_at.is_some_and(|at| at <= since) {
                summary.rejected += 1;
                continue;
            }
            summary.accepted += 1;

            let milestone = transform::enrollment_milestone(
                &row,
                course.id,
                user_id,
                enrolled_at.unwrap_or_else(Utc::now),
            );
            let inserted =
                get_conn(&self.db).and_then(|conn| milestones::insert_milestone(&conn, &milestone));
            match inserted {
                Ok(true) => summary.record(UpsertOutcome::Created),
                Ok(false) => {}
                Err(e) => summary.row_failed(&e),
            }
        }

        tracing::info!(
            provider = %self.provider,
            course = %course.external_id,
            created = summary.created,
            failed = summary.failed,
            "Imported milestones"
        );
        Ok(summary)
    }

    async fn import_activity(
        &self,
        course: &CourseRef,
        cancel: &CancellationToken,
    ) -> Result<ImportSummary> {
        let bearer = self.bearer()?;
        let path = self.export_csv(&bearer, COURSE_ACCESS_EXPORT).await?;
        let mut summary = ImportSummary::default();

        for unit in read_records::<BrightspaceCourseAccess>(&path)?.units(cancel) {
            let row = match unit? {
                Ok(row) => row,
                Err(e) => {
                    summary.accepted += 1;
                    summary.row_failed(&e);
                    continue;
                }
            };
            if !row.is_active() || row.org_unit_id != course.external_id {
                summary.rejected += 1;
                continue;
            }

            let user = get_conn(&self.db)
                .and_then(|conn| users::find_by_external_id(&conn, self.provider, &row.user_id));
            let user = match user {
                Ok(Some(user)) => user,
                Ok(None) => {
                    summary.rejected += 1;
                    continue;
                }
                Err(e) => {
                    summary.accepted += 1;
                    summary.row_failed(&e);
                    continue;
                }
            };
            summary.accepted += 1;

            let Some(day) = transform::access_day(&row) else {
                summary.row_failed(&Error::Parse(format!(
                    "unreadable access day '{}' for user {}",
                    row.day_accessed, row.user_id
                )));
                continue;
            };

            let written = get_conn(&self.db).and_then(|conn| {
                activities::upsert_activity(&conn, course.id, user.id, &day, row.num_times_accessed)
            });
            match written {
                Ok(()) => summary.created += 1,
                Err(e) => summary.row_failed(&e),
            }
        }

        tracing::info!(
            provider = %self.provider,
            course = %course.external_id,
            written = summary.created,
            failed = summary.failed,
            "Imported activity"
        );
        Ok(summary)
    }

    async fn get_users(&self, cancel: &CancellationToken) -> Result<Vec<NewUser>> {
        let bearer = self.bearer()?;
        let path = self.export_csv(&bearer, USERS_EXPORT).await?;
        let mut summary = ImportSummary::default();
        let mut imported = Vec::new();

        for unit in read_records::<BrightspaceUser>(&path)?.units(cancel) {
            let row = match unit? {
                Ok(row) => row,
                Err(e) => {
                    summary.accepted += 1;
                    summary.row_failed(&e);
                    continue;
                }
            };
            if !row.is_active() {
                summary.rejected += 1;
                continue;
            }
            summary.accepted += 1;

            let user = transform::into_user(&row, self.provider);
            match get_conn(&self.db).and_then(|conn| users::upsert_user(&conn, &user)) {
                Ok((_, outcome)) => {
                    summary.record(outcome);
                    imported.push(user);
                }
                Err(e) => summary.row_failed(&e),
            }
        }

        tracing::info!(
            provider = %self.provider,
            users = imported.len(),
            rejected = summary.rejected,
            "Imported users"
        );
        summary.into_result()?;
        Ok(imported)
    }
}
