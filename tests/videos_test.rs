//! Video download jobs with a stub downloader.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use cb_core::jobs::JobKind;
use cb_providers::assets::AssetUploader;
use cb_providers::videos::VideoService;
use cb_core::{ContentProviderId, Error, Result};
use cb_db::models::{NewVideo, VideoAvailability};
use cb_db::queries::videos::{self, VideoDetails};
use cb_db::queries::content_providers;
use cb_providers::videos::{FetchedVideo, VideoFetcher};
use common::TestHarness;

/// Writes a small file per URL and remembers what it was asked for.
#[derive(Default)]
struct StubFetcher {
    requested: Mutex<Vec<String>>,
    failing: Vec<String>,
    /// Cancelled while the first download is running.
    cancel_during_fetch: Option<CancellationToken>,
}

#[async_trait]
impl VideoFetcher for StubFetcher {
    async fn fetch(&self, url: &str, dest_dir: &Path) -> Result<FetchedVideo> {
        self.requested.lock().push(url.to_string());
        if let Some(token) = &self.cancel_during_fetch {
            token.cancel();
        }
        if self.failing.iter().any(|f| f == url) {
            return Err(Error::Tool {
                tool: "yt-dlp".into(),
                message: "video unavailable".into(),
            });
        }
        let id = cb_providers::videos::youtube_id(url).unwrap_or_default();
        let file = dest_dir.join(format!("{id}.mp4"));
        tokio::fs::write(&file, b"not really mp4").await.unwrap();
        Ok(FetchedVideo {
            external_id: id.clone(),
            title: format!("Video {id}"),
            description: String::new(),
            channel_title: "Channel".into(),
            duration_secs: 42,
            thumbnail_url: format!("https://i.ytimg.com/vi/{id}/default.jpg"),
            file,
        })
    }
}

async fn harness(fetcher: Arc<StubFetcher>) -> (TestHarness, ContentProviderId) {
    let mut h = TestHarness::new().await;
    h.ctx = h.ctx.clone().with_fetcher(fetcher);
    h.mount_uploads().await;
    let conn = h.db.get().unwrap();
    let youtube = content_providers::create_content_provider(
        &conn,
        content_providers::YOUTUBE,
        "https://www.youtube.com",
        "",
    )
    .unwrap();
    (h, youtube.id)
}

fn seed(h: &TestHarness, provider: ContentProviderId, id: &str, state: VideoAvailability) {
    let conn = h.db.get().unwrap();
    let video = videos::insert_or_get(
        &conn,
        &NewVideo {
            open_content_provider_id: provider,
            external_id: id.into(),
            url: format!("https://www.youtube.com/watch?v={id}"),
        },
    )
    .unwrap();
    match state {
        VideoAvailability::Processing => {}
        VideoAvailability::HasError => {
            videos::mark_error(&conn, video.id, "earlier failure").unwrap();
        }
        VideoAvailability::Available => {
            let details = VideoDetails {
                title: "Done".into(),
                asset_url: "/videos/done.mp4".into(),
                ..Default::default()
            };
            videos::mark_available(&conn, video.id, &details).unwrap();
        }
    }
}

fn state_of(h: &TestHarness, provider: ContentProviderId, id: &str) -> VideoAvailability {
    let conn = h.db.get().unwrap();
    videos::get_by_external_id(&conn, provider, id)
        .unwrap()
        .unwrap()
        .availability
}

#[tokio::test]
async fn retry_only_touches_failed_videos() {
    let fetcher = Arc::new(StubFetcher::default());
    let (h, youtube) = harness(fetcher.clone()).await;
    seed(&h, youtube, "aaaaaaaaaaa", VideoAvailability::HasError);
    seed(&h, youtube, "bbbbbbbbbbb", VideoAvailability::Available);
    seed(&h, youtube, "ccccccccccc", VideoAvailability::Processing);
    seed(&h, youtube, "ddddddddddd", VideoAvailability::HasError);

    let payload = json!({ "job_id": "job-retry", "provider_platform_id": youtube.get() });
    h.run_job(JobKind::RetryFailedVideos, payload).await;

    assert_eq!(h.completed(JobKind::RetryFailedVideos).len(), 1);
    let mut requested = fetcher.requested.lock().clone();
    requested.sort();
    assert_eq!(
        requested,
        vec![
            "https://www.youtube.com/watch?v=aaaaaaaaaaa",
            "https://www.youtube.com/watch?v=ddddddddddd",
        ]
    );
    assert_eq!(state_of(&h, youtube, "aaaaaaaaaaa"), VideoAvailability::Available);
    assert_eq!(state_of(&h, youtube, "ddddddddddd"), VideoAvailability::Available);
    assert_eq!(state_of(&h, youtube, "ccccccccccc"), VideoAvailability::Processing);

    let conn = h.db.get().unwrap();
    let untouched = videos::get_by_external_id(&conn, youtube, "bbbbbbbbbbb").unwrap().unwrap();
    assert_eq!(untouched.availability, VideoAvailability::Available);
    assert_eq!(untouched.asset_url, "/videos/done.mp4");
}

#[tokio::test]
async fn retry_leaves_other_providers_alone() {
    let fetcher = Arc::new(StubFetcher::default());
    let (h, youtube) = harness(fetcher.clone()).await;
    let other = {
        let conn = h.db.get().unwrap();
        content_providers::create_content_provider(&conn, "Mirror", "https://mirror.example", "")
            .unwrap()
            .id
    };
    seed(&h, other, "eeeeeeeeeee", VideoAvailability::HasError);

    let payload = json!({ "job_id": "job-retry", "provider_platform_id": youtube.get() });
    h.run_job(JobKind::RetryFailedVideos, payload).await;

    assert!(fetcher.requested.lock().is_empty());
    assert_eq!(state_of(&h, other, "eeeeeeeeeee"), VideoAvailability::HasError);
}

#[tokio::test]
async fn add_videos_downloads_new_urls_and_records_failures() {
    let fetcher = Arc::new(StubFetcher {
        failing: vec!["https://youtu.be/fffffffffff".into()],
        ..Default::default()
    });
    let (h, youtube) = harness(fetcher.clone()).await;

    let payload = json!({
        "job_id": "job-add",
        "provider_platform_id": youtube.get(),
        "video_urls": [
            "https://www.youtube.com/watch?v=ggggggggggg",
            "https://youtu.be/fffffffffff",
            "https://example.com/not-a-video",
        ],
    });
    h.run_job(JobKind::AddVideos, payload).await;

    assert_eq!(h.completed(JobKind::AddVideos).len(), 1);
    assert_eq!(state_of(&h, youtube, "ggggggggggg"), VideoAvailability::Available);
    assert_eq!(state_of(&h, youtube, "fffffffffff"), VideoAvailability::HasError);
    assert_eq!(fetcher.requested.lock().len(), 2);
    assert_eq!(h.requests_to("/api/upload").await, 1);
}

fn video_service(h: &TestHarness, fetcher: Arc<StubFetcher>, staging: &Path) -> VideoService {
    let assets = AssetUploader::new(&h.ctx.config.assets, Duration::from_secs(5)).unwrap();
    VideoService::new(h.db.clone(), fetcher, assets, staging.to_path_buf())
}

#[tokio::test]
async fn cancelled_retry_leaves_unstarted_videos_for_the_next_retry() {
    let cancel = CancellationToken::new();
    let fetcher = Arc::new(StubFetcher {
        cancel_during_fetch: Some(cancel.clone()),
        ..Default::default()
    });
    let (h, youtube) = harness(fetcher.clone()).await;
    seed(&h, youtube, "hhhhhhhhhhh", VideoAvailability::HasError);
    seed(&h, youtube, "iiiiiiiiiii", VideoAvailability::HasError);
    let staging = h.ctx.services().staging_dir().unwrap();

    let result = video_service(&h, fetcher.clone(), staging.path())
        .retry_failed_videos(youtube, &cancel)
        .await;

    // The download in flight when the job was cancelled still finished.
    assert!(matches!(result, Err(Error::Cancelled(_))));
    assert_eq!(fetcher.requested.lock().len(), 1);
    let mut states = vec![
        state_of(&h, youtube, "hhhhhhhhhhh"),
        state_of(&h, youtube, "iiiiiiiiiii"),
    ];
    states.sort_by_key(|s| s.as_str());
    assert_eq!(states, vec![VideoAvailability::Available, VideoAvailability::HasError]);

    let fresh = Arc::new(StubFetcher::default());
    video_service(&h, fresh.clone(), staging.path())
        .retry_failed_videos(youtube, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(fresh.requested.lock().len(), 1);
    assert_eq!(state_of(&h, youtube, "hhhhhhhhhhh"), VideoAvailability::Available);
    assert_eq!(state_of(&h, youtube, "iiiiiiiiiii"), VideoAvailability::Available);
}

#[tokio::test]
async fn retry_under_a_cancelled_token_changes_nothing() {
    let fetcher = Arc::new(StubFetcher::default());
    let (h, youtube) = harness(fetcher.clone()).await;
    seed(&h, youtube, "jjjjjjjjjjj", VideoAvailability::HasError);
    seed(&h, youtube, "kkkkkkkkkkk", VideoAvailability::HasError);
    let staging = h.ctx.services().staging_dir().unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = video_service(&h, fetcher.clone(), staging.path())
        .retry_failed_videos(youtube, &cancel)
        .await;

    assert!(matches!(result, Err(Error::Cancelled(_))));
    assert!(fetcher.requested.lock().is_empty());
    assert_eq!(state_of(&h, youtube, "jjjjjjjjjjj"), VideoAvailability::HasError);
    assert_eq!(state_of(&h, youtube, "kkkkkkkkkkk"), VideoAvailability::HasError);
}
