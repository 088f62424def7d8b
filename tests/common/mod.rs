//! Shared test harness for integration tests.
//!
//! [`TestHarness`] wires an in-memory database, an in-process bus and a full
//! [`AppContext`] to a single wiremock server that stands in for the
//! provider API, its OAuth2 token endpoint and the platform's asset storage.

#![allow(dead_code)]

use std::io::Write;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zip::write::SimpleFileOptions;

use cb_core::bus::{BusMessage, InProcessBus, MessageBus};
use cb_core::config::Config;
use cb_core::jobs::{JobCompleted, JobFailed, JobKind};
use cb_core::ProviderId;
use cb_db::models::Course;
use cb_db::pool::{init_memory_pool, DbPool};
use cb_db::queries::{courses, providers};
use cb_server::context::AppContext;
use cb_server::dispatcher::handle_message;

pub const TOKEN_PATH: &str = "/core/connect/token";
pub const API_ROOT: &str = "/d2l/api/lp/1.28";
pub const ACCESS_TOKEN: &str = "access-tok";

pub const ORG_UNITS_HEADER: &str = "OrgUnitId,Organization,Type,Name,Code,IsActive,IsDeleted";

/// Test harness wrapping a fully-constructed [`AppContext`].
pub struct TestHarness {
    pub ctx: AppContext,
    pub db: DbPool,
    pub bus: Arc<InProcessBus>,
    pub server: MockServer,
}

impl TestHarness {
    /// Create a harness with test-friendly defaults.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a harness, letting the caller adjust the configuration last.
    pub async fn with_config(tweak: impl FnOnce(&mut Config)) -> Self {
        let server = MockServer::start().await;

        let mut config = Config::default();
        config.brightspace.token_endpoint = format!("{}{TOKEN_PATH}", server.uri());
        config.brightspace.requests_per_second = 100;
        config.brightspace.request_timeout_secs = 5;
        config.assets.app_url = server.uri();
        config.jobs.milestone_throttle_ms = 0;
        tweak(&mut config);

        let db = init_memory_pool().expect("failed to create in-memory pool");
        let bus = Arc::new(InProcessBus::new());
        let ctx = AppContext::new(db.clone(), config, bus.clone() as Arc<dyn MessageBus>);

        Self { ctx, db, bus, server }
    }

    /// Register a Brightspace provider pointing at the mock server.
    pub fn brightspace_provider(&self, access_key: &str) -> ProviderId {
        let conn = self.db.get().unwrap();
        providers::create_provider(
            &conn,
            "District LMS",
            "brightspace",
            &self.server.uri(),
            "client-1",
            access_key,
        )
        .unwrap()
        .id
    }

    /// The compound secret currently stored for `provider`.
    pub fn stored_key(&self, provider: ProviderId) -> String {
        let conn = self.db.get().unwrap();
        providers::get_provider(&conn, provider)
            .unwrap()
            .expect("provider exists")
            .access_key
    }

    pub fn courses(&self, provider: ProviderId) -> Vec<Course> {
        let conn = self.db.get().unwrap();
        courses::list_by_provider(&conn, provider).unwrap()
    }

    /// Token endpoint that accepts only `refresh` and rotates it to `rotated`.
    pub async fn mount_token(&self, refresh: &str, rotated: &str) {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains(format!("refresh_token={refresh}&")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": ACCESS_TOKEN,
                "token_type": "Bearer",
                "expires_in": 3600,
                "refresh_token": rotated,
            })))
            .mount(&self.server)
            .await;
    }

    /// Export listing plus one download route per `(plugin_id, name, archive)`.
    pub async fn mount_exports(&self, exports: Vec<(&str, &str, Vec<u8>)>) {
        let listing: Vec<Value> = exports
            .iter()
            .map(|(plugin, name, archive)| {
                json!({
                    "PluginId": plugin,
                    "Name": name,
                    "Description": "",
                    "CreatedDate": "2024-05-01T00:00:00Z",
                    "DownloadLink": format!("{}/download/{plugin}", self.server.uri()),
                    "DownloadSize": archive.len() as f64,
                })
            })
            .collect();

        Mock::given(method("GET"))
            .and(path(format!("{API_ROOT}/dataExport/bds/list")))
            .respond_with(ResponseTemplate::new(200).set_body_json(Value::Array(listing)))
            .mount(&self.server)
            .await;

        for (plugin, _, archive) in exports {
            Mock::given(method("GET"))
                .and(path(format!("{API_ROOT}/dataExport/bds/download/{plugin}")))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
                .mount(&self.server)
                .await;
        }
    }

    /// Every course image answers with `status`; image bytes on 200.
    pub async fn mount_course_images(&self, status: u16) {
        let response = if status == 200 {
            ResponseTemplate::new(200).set_body_bytes(vec![0xff, 0xd8, 0xff, 0xe0])
        } else {
            ResponseTemplate::new(status)
        };
        Mock::given(method("GET"))
            .and(path_regex(r"^/d2l/api/lp/1\.28/courses/[^/]+/image$"))
            .respond_with(response)
            .mount(&self.server)
            .await;
    }

    /// Asset storage that accepts every upload.
    pub async fn mount_uploads(&self) {
        Mock::given(method("POST"))
            .and(path("/api/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"url": "/photos/uploaded.jpg"}
            })))
            .mount(&self.server)
            .await;
    }

    /// Deliver one job message the way the dispatcher would.
    pub async fn run_job(&self, kind: JobKind, payload: Value) {
        let msg = BusMessage {
            topic: kind.subject(),
            payload: serde_json::to_vec(&payload).unwrap(),
            published_at: Utc::now(),
        };
        handle_message(&self.ctx, kind, msg, &CancellationToken::new()).await;
    }

    pub fn completed(&self, kind: JobKind) -> Vec<JobCompleted> {
        self.bus
            .messages_on(&kind.completed_subject())
            .iter()
            .map(|m| m.json().unwrap())
            .collect()
    }

    pub fn failed(&self, kind: JobKind) -> Vec<JobFailed> {
        self.bus
            .messages_on(&kind.failed_subject())
            .iter()
            .map(|m| m.json().unwrap())
            .collect()
    }

    /// Number of requests the mock server has seen on `route`.
    pub async fn requests_to(&self, route: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == route)
            .count()
    }
}

/// A zip archive holding one CSV file.
pub fn zip_csv(file_name: &str, csv: &str) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    writer.start_file(file_name, SimpleFileOptions::default()).unwrap();
    writer.write_all(csv.as_bytes()).unwrap();
    writer.finish().unwrap().into_inner()
}

/// One row of the "Organizational Units" export. Defaults to an active,
/// undeleted "Course Offering".
#[derive(Debug, Clone, Copy)]
pub struct OrgUnit<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub active: bool,
    pub deleted: bool,
    pub unit_type: &'a str,
}

impl<'a> OrgUnit<'a> {
    pub fn course(id: &'a str, name: &'a str) -> Self {
        Self {
            id,
            name,
            active: true,
            deleted: false,
            unit_type: "Course Offering",
        }
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn deleted(mut self) -> Self {
        self.deleted = true;
        self
    }

    pub fn of_type(mut self, unit_type: &'a str) -> Self {
        self.unit_type = unit_type;
        self
    }
}

fn flag(b: bool) -> &'static str {
    if b {
        "True"
    } else {
        "False"
    }
}

/// "Organizational Units" CSV from explicit rows.
pub fn org_unit_rows(rows: &[OrgUnit<'_>]) -> String {
    let mut csv = format!("{ORG_UNITS_HEADER}\n");
    for row in rows {
        csv.push_str(&format!(
            "{id},District,{kind},{name},{id}-CODE,{active},{deleted}\n",
            id = row.id,
            kind = row.unit_type,
            name = row.name,
            active = flag(row.active),
            deleted = flag(row.deleted),
        ));
    }
    csv
}

/// "Organizational Units" CSV of course offerings; each row is
/// `(org_unit_id, name, active)`.
pub fn org_units_csv(rows: &[(&str, &str, bool)]) -> String {
    let rows: Vec<_> = rows
        .iter()
        .map(|&(id, name, active)| {
            let unit = OrgUnit::course(id, name);
            if active {
                unit
            } else {
                unit.inactive()
            }
        })
        .collect();
    org_unit_rows(&rows)
}

pub fn job(job_id: &str, provider: ProviderId) -> Value {
    json!({ "job_id": job_id, "provider_platform_id": provider.get() })
}
