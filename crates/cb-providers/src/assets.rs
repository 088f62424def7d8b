//! Re-upload of provider images and downloaded videos to the platform's
//! asset storage (`POST {app_url}/api/upload`, multipart field `file`).

use std::path::Path;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tokio_util::io::ReaderStream;

use cb_core::config::AssetConfig;
use cb_core::{Error, Result};

#[derive(Deserialize)]
struct UploadResponse {
    data: UploadData,
}

#[derive(Deserialize)]
struct UploadData {
    url: String,
}

#[derive(Clone)]
pub struct AssetUploader {
    http: reqwest::Client,
    endpoint: Option<String>,
}

impl AssetUploader {
    pub fn new(config: &AssetConfig, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build upload client: {e}")))?;
        let app_url = config.app_url.trim().trim_end_matches('/');
        Ok(Self {
            http,
            endpoint: (!app_url.is_empty()).then(|| format!("{app_url}/api/upload")),
        })
    }

    /// Upload an in-memory file; returns the stored asset URL.
    pub async fn upload_bytes(&self, filename: &str, bytes: Vec<u8>) -> Result<String> {
        let part = Part::bytes(bytes).file_name(filename.to_string());
        self.send(filename, part).await
    }

    /// Stream a file from disk; returns the stored asset URL.
    pub async fn upload_file(&self, filename: &str, path: &Path) -> Result<String> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| Error::Transfer(format!("failed to open {}: {e}", path.display())))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| Error::Transfer(format!("failed to stat {}: {e}", path.display())))?
            .len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let part = Part::stream_with_length(body, len).file_name(filename.to_string());
        self.send(filename, part).await
    }

    async fn send(&self, filename: &str, part: Part) -> Result<String> {
        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or_else(|| Error::Configuration("asset storage URL is not configured".into()))?;

        let resp = self
            .http
            .post(endpoint)
            .multipart(Form::new().part("file", part))
            .send()
            .await
            .map_err(|e| Error::Transfer(format!("upload of {filename} failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Transfer(format!(
                "asset storage returned {status} for {filename}"
            )));
        }

        let body: UploadResponse = resp
            .json()
            .await
            .map_err(|e| Error::Transfer(format!("unreadable upload response: {e}")))?;
        Ok(body.data.url)
    }
}
