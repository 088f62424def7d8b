//! Video imports for the YouTube content provider.
//!
//! Videos are registered as `processing`, downloaded with `yt-dlp`,
//! re-uploaded to asset storage and then marked `available`. A failed
//! download marks the video `has_error`; only an explicit retry job picks it
//! up again.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use cb_core::config::VideoConfig;
use cb_core::work::WorkUnitsExt;
use cb_core::{ContentProviderId, Error, Result};
use cb_db::models::{NewVideo, Video, VideoAvailability};
use cb_db::pool::{get_conn, DbPool};
use cb_db::queries::{content_providers, videos};
use cb_db::queries::videos::VideoDetails;

use crate::assets::AssetUploader;
use crate::service::ImportSummary;
use crate::tool::ToolCommand;

// ---------------------------------------------------------------------------
// Fetching
// ---------------------------------------------------------------------------

/// A downloaded video and the metadata reported for it.
#[derive(Debug, Clone, Default)]
pub struct FetchedVideo {
    pub external_id: String,
    pub title: String,
    pub description: String,
    pub channel_title: String,
    pub duration_secs: i64,
    pub thumbnail_url: String,
    pub file: PathBuf,
}

/// Downloads a video by URL into a directory.
///
/// A started download runs to completion or to the fetcher's own timeout;
/// job cancellation is observed between videos.
#[async_trait]
pub trait VideoFetcher: Send + Sync {
    async fn fetch(&self, url: &str, dest_dir: &Path) -> Result<FetchedVideo>;
}

/// [`VideoFetcher`] backed by the `yt-dlp` executable.
pub struct YtDlpFetcher {
    program: PathBuf,
    timeout: Duration,
}

impl YtDlpFetcher {
    pub fn new(config: &VideoConfig) -> Self {
        Self {
            program: config.yt_dlp_path.clone(),
            timeout: Duration::from_secs(config.download_timeout_secs),
        }
    }
}

#[derive(Deserialize)]
struct YtDlpInfo {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(rename = "_filename", default)]
    local_filename: Option<String>,
    #[serde(default)]
    filename: Option<String>,
}

fn parse_info(stdout: &str, dest_dir: &Path) -> Result<FetchedVideo> {
    let line = stdout
        .lines()
        .rev()
        .find(|l| l.trim_start().starts_with('{'))
        .ok_or_else(|| Error::tool("yt-dlp", "no metadata on stdout"))?;
    let info: YtDlpInfo = serde_json::from_str(line)
        .map_err(|e| Error::tool("yt-dlp", format!("unreadable metadata: {e}")))?;

    let file = info
        .local_filename
        .or(info.filename)
        .map(PathBuf::from)
        .unwrap_or_else(|| dest_dir.join(format!("{}.mp4", info.id)));

    Ok(FetchedVideo {
        external_id: info.id,
        title: info.title,
        description: info.description.unwrap_or_default(),
        channel_title: info.channel.or(info.uploader).unwrap_or_default(),
        duration_secs: info.duration.map(|d| d.round() as i64).unwrap_or_default(),
        thumbnail_url: info.thumbnail.unwrap_or_default(),
        file,
    })
}

#[async_trait]
impl VideoFetcher for YtDlpFetcher {
    async fn fetch(&self, url: &str, dest_dir: &Path) -> Result<FetchedVideo> {
        let template = dest_dir.join("%(id)s.%(ext)s");
        let output = ToolCommand::new(self.program.clone())
            .args(["--no-playlist", "--no-simulate", "--dump-json", "-f", "mp4", "-o"])
            .arg(template.to_string_lossy())
            .arg(url)
            .timeout(self.timeout)
            .execute()
            .await?;
        parse_info(&output.stdout, dest_dir)
    }
}

/// Extract the YouTube video id from a watch, short or embed URL.
pub fn youtube_id(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    let host = parsed.host_str()?.trim_start_matches("www.").trim_start_matches("m.");
    let mut segments = parsed.path_segments()?;

    let id = match host {
        "youtu.be" => segments.next().map(str::to_string),
        "youtube.com" | "music.youtube.com" => match segments.next() {
            Some("watch") => parsed
                .query_pairs()
                .find(|(k, _)| k == "v")
                .map(|(_, v)| v.into_owned()),
            Some("shorts") | Some("embed") | Some("live") => segments.next().map(str::to_string),
            _ => None,
        },
        _ => None,
    }?;

    let valid = id.len() == 11
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    valid.then_some(id)
}

// ---------------------------------------------------------------------------
// VideoService
// ---------------------------------------------------------------------------

pub struct VideoService {
    db: DbPool,
    fetcher: Arc<dyn VideoFetcher>,
    assets: AssetUploader,
    staging: PathBuf,
}

impl VideoService {
    /// `staging` is the job's private download directory.
    pub fn new(db: DbPool, fetcher: Arc<dyn VideoFetcher>, assets: AssetUploader, staging: PathBuf) -> Self {
        Self {
            db,
            fetcher,
            assets,
            staging,
        }
    }

    fn ensure_provider(&self, provider: ContentProviderId) -> Result<()> {
        let conn = get_conn(&self.db)?;
        content_providers::get_content_provider(&conn, provider)?
            .ok_or_else(|| Error::not_found("content provider", provider))?;
        Ok(())
    }

    /// Register and download the given URLs. With no URLs, process the
    /// provider's videos still in `processing`.
    pub async fn add_videos(
        &self,
        provider: ContentProviderId,
        urls: &[String],
        cancel: &CancellationToken,
    ) -> Result<ImportSummary> {
        self.ensure_provider(provider)?;
        let mut summary = ImportSummary::default();
        let mut pending = if urls.is_empty() {
            let conn = get_conn(&self.db)?;
            videos::list_by_availability(&conn, provider, VideoAvailability::Processing)?
        } else {
            Vec::new()
        };

        for url in urls {
            let Some(external_id) = youtube_id(url) else {
                tracing::warn!(url = %url, "Not a YouTube video URL");
                summary.rejected += 1;
                continue;
            };
            let new = NewVideo {
                open_content_provider_id: provider,
                external_id,
                url: url.clone(),
            };
            match get_conn(&self.db).and_then(|conn| videos::insert_or_get(&conn, &new)) {
                Ok(video) if video.availability == VideoAvailability::Available => {
                    tracing::debug!(video = %video.external_id, "Video already available");
                    summary.accepted += 1;
                    summary.updated += 1;
                }
                Ok(video) => pending.push(video),
                Err(e) => {
                    summary.accepted += 1;
                    summary.row_failed(&e);
                }
            }
        }

        summary += self.process_all(pending, cancel).await?;
        summary.into_result()
    }

    /// Reprocess only the provider's videos marked `has_error`.
    pub async fn retry_failed_videos(
        &self,
        provider: ContentProviderId,
        cancel: &CancellationToken,
    ) -> Result<ImportSummary> {
        self.ensure_provider(provider)?;
        let failed = {
            let conn = get_conn(&self.db)?;
            videos::list_by_availability(&conn, provider, VideoAvailability::HasError)?
        };
        tracing::info!(provider = %provider, count = failed.len(), "Retrying failed videos");

        self.process_all(failed, cancel).await?.into_result()
    }

    /// Videos are moved to `processing` one at a time as they start, so a
    /// cancelled run leaves the rest in whatever state they were listed in.
    async fn process_all(&self, pending: Vec<Video>, cancel: &CancellationToken) -> Result<ImportSummary> {
        let mut summary = ImportSummary::default();
        for video in pending.units(cancel) {
            let video = video?;
            summary.accepted += 1;
            if video.availability != VideoAvailability::Processing {
                if let Err(e) = get_conn(&self.db).and_then(|conn| videos::mark_processing(&conn, video.id)) {
                    summary.row_failed(&e);
                    continue;
                }
            }
            match self.process_video(&video).await {
                Ok(()) => summary.created += 1,
                Err(e) => {
                    summary.row_failed(&e);
                    if let Err(db) =
                        get_conn(&self.db).and_then(|conn| videos::mark_error(&conn, video.id, &e.to_string()))
                    {
                        tracing::error!(video = %video.external_id, error = %db, "Failed to record video error");
                    }
                }
            }
        }
        Ok(summary)
    }

    async fn process_video(&self, video: &Video) -> Result<()> {
        tracing::info!(video = %video.external_id, url = %video.url, "Downloading video");
        let fetched = self.fetcher.fetch(&video.url, &self.staging).await?;
        let filename = format!("videos/{}.mp4", video.external_id);
        let asset_url = self.assets.upload_file(&filename, &fetched.file).await;
        let _ = tokio::fs::remove_file(&fetched.file).await;
        let asset_url = asset_url?;

        let details = VideoDetails {
            title: fetched.title,
            description: fetched.description,
            channel_title: fetched.channel_title,
            duration_secs: fetched.duration_secs,
            thumbnail_url: fetched.thumbnail_url,
            asset_url,
        };
        let conn = get_conn(&self.db)?;
        videos::mark_available(&conn, video.id, &details)?;
        tracing::info!(video = %video.external_id, "Video available");
        Ok(())
    }
}
