//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries all
//! sub-configs for the server, the job runner, provider endpoints, asset
//! storage and staging. Every section defaults sensibly so a completely empty
//! `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::Error;

/// Environment variable overriding [`AssetConfig::app_url`].
pub const APP_URL_ENV: &str = "APP_URL";

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub jobs: JobsConfig,
    pub brightspace: BrightspaceConfig,
    pub assets: AssetConfig,
    pub staging: StagingConfig,
    pub videos: VideoConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist. Environment overrides are
    /// applied last.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let mut config = match path {
            None => Self::default(),
            Some(path) => match std::fs::read_to_string(path) {
                Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                    tracing::warn!("Failed to parse config file {}: {e}", path.display());
                    Self::default()
                }),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::info!("No config file at {}; using defaults", path.display());
                    Self::default()
                }
                Err(e) => {
                    tracing::warn!("Failed to read config file {}: {e}", path.display());
                    Self::default()
                }
            },
        };
        config.apply_env();
        config
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(APP_URL_ENV) {
            if !url.trim().is_empty() {
                self.assets.app_url = url.trim().to_string();
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }

        if self.jobs.ceiling_secs == 0 {
            warnings.push("jobs.ceiling_secs is 0; every job will be cancelled immediately".into());
        }

        if self.jobs.max_concurrent == 0 {
            warnings.push("jobs.max_concurrent is 0; it will be treated as 1".into());
        }

        if self.assets.app_url.is_empty() {
            warnings.push(format!(
                "assets.app_url is empty and {APP_URL_ENV} is unset; thumbnails and videos cannot be uploaded"
            ));
        }

        if self.assets.accept_invalid_certs {
            warnings.push("assets.accept_invalid_certs is enabled".into());
        }

        if self.brightspace.requests_per_second == 0 {
            warnings.push("brightspace.requests_per_second is 0; it will be treated as 1".into());
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8081,
            db_path: PathBuf::from("./data/coursebridge.db"),
        }
    }
}

/// Job runner limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Per-job execution ceiling.
    pub ceiling_secs: u64,
    /// Maximum number of jobs executing at the same time.
    pub max_concurrent: usize,
    /// How long shutdown waits for in-flight jobs before cancelling them.
    pub drain_timeout_secs: u64,
    /// Pause between successive milestone sub-requests.
    pub milestone_throttle_ms: u64,
}

impl JobsConfig {
    pub fn ceiling(&self) -> Duration {
        Duration::from_secs(self.ceiling_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn milestone_throttle(&self) -> Duration {
        Duration::from_millis(self.milestone_throttle_ms)
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            ceiling_secs: 30 * 60,
            max_concurrent: 8,
            drain_timeout_secs: 30,
            milestone_throttle_ms: 1000,
        }
    }
}

/// Brightspace (D2L) endpoints and client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrightspaceConfig {
    pub token_endpoint: String,
    pub scope: String,
    pub api_version: String,
    pub requests_per_second: u32,
    pub request_timeout_secs: u64,
}

impl Default for BrightspaceConfig {
    fn default() -> Self {
        Self {
            token_endpoint: "https://auth.brightspace.com/core/connect/token".into(),
            scope: "datahub:dataexports:download,read datasets:bds:read organizations:image:read users:profile:read users:userdata:read".into(),
            api_version: "1.28".into(),
            requests_per_second: 4,
            request_timeout_secs: 300,
        }
    }
}

/// Central asset storage used for thumbnail and video re-uploads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    /// Base URL of the platform; uploads go to `{app_url}/api/upload`.
    pub app_url: String,
    /// Skip TLS verification for the upload endpoint (self-signed deployments).
    pub accept_invalid_certs: bool,
}

/// Local staging area for downloaded export archives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
    /// Parent directory for per-job staging dirs; system temp dir when `None`.
    pub dir: Option<PathBuf>,
}

/// Video download settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub yt_dlp_path: PathBuf,
    pub download_timeout_secs: u64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            yt_dlp_path: PathBuf::from("yt-dlp"),
            download_timeout_secs: 600,
        }
    }
}
