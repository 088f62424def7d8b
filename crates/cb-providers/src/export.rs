//! Bulk data export pipeline.
//!
//! Resolves a named data set to the provider's artifact id, streams the
//! archive into per-job staging, and extracts it. Files only become visible
//! at their final path once complete: the archive is written as `.part` and
//! renamed after the body has been fully received, and extraction happens in
//! a scratch directory renamed into place after every entry is written.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use cb_core::{Error, Result};

use crate::http::ProviderClient;

/// A provider-side export artifact as listed by the data set endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExportArtifact {
    pub plugin_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub created_date: Option<String>,
    #[serde(default)]
    pub download_link: String,
    #[serde(default)]
    pub download_size: f64,
}

/// Files produced by extracting one export archive.
#[derive(Debug, Clone)]
pub struct ExtractedExport {
    pub name: String,
    pub dir: PathBuf,
    pub files: Vec<PathBuf>,
}

impl ExtractedExport {
    /// The first CSV in the archive.
    pub fn csv_file(&self) -> Result<&Path> {
        self.files
            .iter()
            .find(|p| {
                p.extension()
                    .map(|e| e.eq_ignore_ascii_case("csv"))
                    .unwrap_or(false)
            })
            .map(PathBuf::as_path)
            .ok_or_else(|| Error::Transfer(format!("export '{}' contains no CSV file", self.name)))
    }
}

pub struct BulkExport {
    client: ProviderClient,
    api_root: String,
    staging: PathBuf,
}

impl BulkExport {
    /// `base_url` is the provider root; `staging` must exist and be private
    /// to one job.
    pub fn new(client: ProviderClient, base_url: &str, api_version: &str, staging: PathBuf) -> Self {
        Self {
            client,
            api_root: format!(
                "{}/d2l/api/lp/{api_version}/dataExport/bds",
                base_url.trim_end_matches('/')
            ),
            staging,
        }
    }

    /// List all export artifacts.
    pub async fn list(&self, bearer: &str) -> Result<Vec<ExportArtifact>> {
        let url = format!("{}/list", self.api_root);
        let resp = self
            .client
            .send(|http| http.get(&url).bearer_auth(bearer))
            .await
            .map_err(|e| Error::Transfer(format!("export listing request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Transfer(format!("export listing returned {status}")));
        }

        resp.json()
            .await
            .map_err(|e| Error::Transfer(format!("unreadable export listing: {e}")))
    }

    /// Find the artifact whose name matches exactly.
    pub async fn resolve(&self, bearer: &str, name: &str) -> Result<ExportArtifact> {
        let artifacts = self.list(bearer).await?;
        select_artifact(artifacts, name)
    }

    /// Resolve, download and extract a named export.
    pub async fn fetch(&self, bearer: &str, name: &str) -> Result<ExtractedExport> {
        let artifact = self.resolve(bearer, name).await?;
        tracing::info!(
            export = %artifact.name,
            plugin_id = %artifact.plugin_id,
            size = artifact.download_size,
            "Downloading export"
        );

        let slug = slugify(&artifact.name);
        let archive = self.download(bearer, &artifact, &slug).await?;
        let dir = self.staging.join(&slug);

        let files = tokio::task::spawn_blocking({
            let archive = archive.clone();
            let dir = dir.clone();
            move || extract_archive(&archive, &dir)
        })
        .await
        .map_err(|e| Error::Transfer(format!("extraction task failed: {e}")))??;

        tracing::debug!(export = %artifact.name, files = files.len(), "Extracted export");
        Ok(ExtractedExport {
            name: artifact.name,
            dir,
            files,
        })
    }

    async fn download(&self, bearer: &str, artifact: &ExportArtifact, slug: &str) -> Result<PathBuf> {
        let url = format!("{}/download/{}", self.api_root, artifact.plugin_id);
        let part = self.staging.join(format!("{slug}.zip.part"));
        let done = self.staging.join(format!("{slug}.zip"));

        let result = self.stream_to(&url, bearer, &part).await;
        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e);
        }

        tokio::fs::rename(&part, &done)
            .await
            .map_err(|e| Error::Transfer(format!("failed to finalize archive: {e}")))?;
        Ok(done)
    }

    async fn stream_to(&self, url: &str, bearer: &str, dest: &Path) -> Result<()> {
        let resp = self
            .client
            .send(|http| http.get(url).bearer_auth(bearer))
            .await
            .map_err(|e| Error::Transfer(format!("export download request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Transfer(format!("export download returned {status}")));
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| Error::Transfer(format!("failed to create {}: {e}", dest.display())))?;

        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Transfer(format!("download interrupted: {e}")))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| Error::Transfer(format!("failed to write archive: {e}")))?;
        }
        file.flush()
            .await
            .map_err(|e| Error::Transfer(format!("failed to flush archive: {e}")))?;
        Ok(())
    }
}

fn select_artifact(artifacts: Vec<ExportArtifact>, name: &str) -> Result<ExportArtifact> {
    artifacts
        .into_iter()
        .find(|a| a.name == name)
        .ok_or_else(|| Error::not_found("export artifact", name))
}

fn io_transfer(e: std::io::Error) -> Error {
    Error::Transfer(format!("staging I/O failed: {e}"))
}

fn slugify(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Extract `archive` into `dest` through a scratch directory. Returns the
/// final paths of all extracted files.
fn extract_archive(archive: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    let scratch = dest.with_extension("extracting");
    if scratch.exists() {
        std::fs::remove_dir_all(&scratch).map_err(io_transfer)?;
    }

    match extract_into(archive, &scratch) {
        Ok(relative) => {
            if dest.exists() {
                std::fs::remove_dir_all(dest).map_err(io_transfer)?;
            }
            std::fs::rename(&scratch, dest)
                .map_err(|e| Error::Transfer(format!("failed to publish extracted files: {e}")))?;
            Ok(relative.into_iter().map(|p| dest.join(p)).collect())
        }
        Err(e) => {
            let _ = std::fs::remove_dir_all(&scratch);
            Err(e)
        }
    }
}

fn extract_into(archive: &Path, scratch: &Path) -> Result<Vec<PathBuf>> {
    let file = std::fs::File::open(archive)
        .map_err(|e| Error::Transfer(format!("failed to open archive: {e}")))?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| Error::Transfer(format!("corrupt archive: {e}")))?;

    std::fs::create_dir_all(scratch).map_err(io_transfer)?;
    let mut written = Vec::new();

    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| Error::Transfer(format!("corrupt archive entry {i}: {e}")))?;
        let relative = entry.enclosed_name().ok_or_else(|| {
            Error::Transfer(format!("archive entry '{}' escapes the extraction directory", entry.name()))
        })?;
        let target = scratch.join(&relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&target).map_err(io_transfer)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(io_transfer)?;
        }
        let mut out = std::fs::File::create(&target).map_err(io_transfer)?;
        std::io::copy(&mut entry, &mut out)
            .map_err(|e| Error::Transfer(format!("failed to extract '{}': {e}", relative.display())))?;
        written.push(relative);
    }

    Ok(written)
}
