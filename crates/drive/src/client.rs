//! HTTP drive client.
//!
//! Two endpoints are used:
//! - `files.list` on the listing API, keyed by a leased API key
//! - `get_video_info` on the video info endpoint, which returns an
//!   url-encoded body plus a session cookie that must accompany the links

use crate::error::{DriveError, DriveResult};
use crate::types::{
    FOLDER_MIME_TYPE, FilesListResponse, FolderPage, SUPPORTED_VIDEO_MIME_TYPES, VideoInfo,
};
use async_trait::async_trait;
use ferry_core::CandidateLink;
use ferry_core::config::DriveConfig;
use reqwest::header::{ACCEPT, HeaderMap, SET_COOKIE};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

/// Cookie carrying the per-session token for resolved links.
pub const SESSION_COOKIE: &str = "DRIVE_STREAM";

const DEFAULT_RETRY_BASE: Duration = Duration::from_millis(100);

/// Lists the direct children of a folder, one page at a time.
#[async_trait]
pub trait FolderLister: Send + Sync {
    async fn list_folder(
        &self,
        folder_id: &str,
        api_key: &str,
        page_token: Option<&str>,
    ) -> DriveResult<FolderPage>;
}

/// Resolves an item to its playback links.
#[async_trait]
pub trait VideoInfoSource: Send + Sync {
    async fn video_info(&self, item_id: &str) -> DriveResult<VideoInfo>;
}

/// reqwest-backed drive client.
#[derive(Clone, Debug)]
pub struct HttpDriveClient {
    http: reqwest::Client,
    api_base_url: String,
    video_info_base_url: String,
    page_size: u32,
    max_retries: u32,
    retry_base: Duration,
}

impl HttpDriveClient {
    pub fn new(config: &DriveConfig) -> DriveResult<Self> {
        config.validate().map_err(DriveError::Config)?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            http,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            video_info_base_url: config.video_info_base_url.trim_end_matches('/').to_string(),
            page_size: config.page_size,
            max_retries: config.max_retries,
            retry_base: DEFAULT_RETRY_BASE,
        })
    }

    /// Base delay of the exponential retry backoff.
    pub fn with_retry_base(mut self, retry_base: Duration) -> Self {
        self.retry_base = retry_base;
        self
    }

    /// Send a request, retrying 429, 5xx and transport failures.
    async fn send_with_retry<F>(&self, build: F) -> DriveResult<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder + Send + Sync,
    {
        let mut attempt = 0u32;
        loop {
            let err = match build().send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status_code = response.status().as_u16();
                    let message = response.text().await.unwrap_or_default();
                    DriveError::Api {
                        status_code,
                        message,
                    }
                }
                Err(e) => DriveError::Http(e),
            };

            if !err.is_transient() || attempt >= self.max_retries {
                return Err(err);
            }
            attempt += 1;
            let backoff = self.retry_base * 2u32.saturating_pow(attempt);
            warn!(
                attempt,
                max_retries = self.max_retries,
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "drive request failed, retrying"
            );
            tokio::time::sleep(backoff).await;
        }
    }
}

#[async_trait]
impl FolderLister for HttpDriveClient {
    #[instrument(skip(self, api_key), fields(folder_id = %folder_id))]
    async fn list_folder(
        &self,
        folder_id: &str,
        api_key: &str,
        page_token: Option<&str>,
    ) -> DriveResult<FolderPage> {
        let url = format!("{}/files", self.api_base_url);
        let mut query: Vec<(&str, String)> = vec![
            ("q", listing_query(folder_id)),
            ("orderBy", "folder desc".to_string()),
            ("pageSize", self.page_size.to_string()),
            ("key", api_key.to_string()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }

        let response = self
            .send_with_retry(|| {
                self.http
                    .get(&url)
                    .header(ACCEPT, "application/json")
                    .query(&query)
            })
            .await?;
        let body: FilesListResponse = response
            .json()
            .await
            .map_err(|e| DriveError::Parse(format!("files list: {e}")))?;

        let page = FolderPage::from(body);
        debug!(
            leaves = page.leaves.len(),
            folders = page.folders.len(),
            has_next = page.next_page_token.is_some(),
            "listed folder page"
        );
        Ok(page)
    }
}

#[async_trait]
impl VideoInfoSource for HttpDriveClient {
    #[instrument(skip(self), fields(item_id = %item_id))]
    async fn video_info(&self, item_id: &str) -> DriveResult<VideoInfo> {
        let url = format!("{}/get_video_info", self.video_info_base_url);
        let response = self
            .send_with_retry(|| self.http.get(&url).query(&[("docid", item_id)]))
            .await?;
        let session_token = session_token(response.headers());
        let body = response.text().await?;
        parse_video_info(item_id, &body, session_token)
    }
}

/// `"<id>" in parents and (mimeType = "..." or ...)` over folders and
/// supported video types.
pub fn listing_query(folder_id: &str) -> String {
    let mimes = SUPPORTED_VIDEO_MIME_TYPES
        .iter()
        .chain(std::iter::once(&FOLDER_MIME_TYPE))
        .map(|mime| format!("mimeType = \"{mime}\""))
        .collect::<Vec<_>>()
        .join(" or ");
    format!("\"{folder_id}\" in parents and ({mimes})")
}

fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            (name.trim() == SESSION_COOKIE).then(|| value.trim().to_string())
        })
}

fn parse_video_info(
    item_id: &str,
    body: &str,
    session_token: Option<String>,
) -> DriveResult<VideoInfo> {
    let fields: HashMap<String, String> = url::form_urlencoded::parse(body.as_bytes())
        .into_owned()
        .collect();

    match fields.get("status") {
        Some(status) if !status.contains("fail") => {}
        status => {
            let reason = fields
                .get("reason")
                .cloned()
                .or_else(|| status.map(|s| format!("status {s}")))
                .unwrap_or_else(|| "missing status".to_string());
            return Err(DriveError::UpstreamRejected {
                item_id: item_id.to_string(),
                reason,
            });
        }
    }

    let session_token = session_token.ok_or_else(|| DriveError::MissingSessionToken {
        item_id: item_id.to_string(),
    })?;

    let stream_map = fields
        .get("fmt_stream_map")
        .ok_or_else(|| DriveError::MalformedStreamMap("missing fmt_stream_map".to_string()))?;
    let links = parse_stream_map(stream_map)?;
    let expiry = links.first().and_then(|link| link_expiry(&link.url));

    Ok(VideoInfo {
        item_id: item_id.to_string(),
        title: fields.get("title").cloned().unwrap_or_default(),
        duration: fields
            .get("length_seconds")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0),
        session_token,
        links,
        expiry,
    })
}

/// Comma-separated `tag|url` entries, order preserved.
fn parse_stream_map(raw: &str) -> DriveResult<Vec<CandidateLink>> {
    raw.split(',')
        .map(|entry| {
            let (tag, url) = entry
                .split_once('|')
                .filter(|(_, url)| !url.is_empty())
                .ok_or_else(|| DriveError::MalformedStreamMap(entry.to_string()))?;
            let tag = tag
                .trim()
                .parse::<u32>()
                .map_err(|_| DriveError::MalformedStreamMap(entry.to_string()))?;
            Ok(CandidateLink::new(tag, url))
        })
        .collect()
}

fn link_expiry(link: &str) -> Option<i64> {
    let url = Url::parse(link).ok()?;
    url.query_pairs()
        .find(|(name, _)| name == "expire")
        .and_then(|(_, value)| value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client_for(server: &MockServer, max_retries: u32) -> HttpDriveClient {
        let config = DriveConfig {
            api_base_url: server.base_url(),
            video_info_base_url: format!("{}/e", server.base_url()),
            page_size: 1000,
            request_timeout_secs: 5,
            max_retries,
        };
        HttpDriveClient::new(&config)
            .unwrap()
            .with_retry_base(Duration::from_millis(1))
    }

    fn info_body(pairs: &[(&str, &str)]) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in pairs {
            serializer.append_pair(k, v);
        }
        serializer.finish()
    }

    #[test]
    fn test_listing_query_covers_folders_and_videos() {
        let q = listing_query("ROOT");
        assert!(q.starts_with("\"ROOT\" in parents and ("));
        assert!(q.contains("mimeType = \"application/vnd.google-apps.folder\""));
        assert!(q.contains("mimeType = \"video/mp4\""));
        assert_eq!(
            q.matches(" or ").count(),
            SUPPORTED_VIDEO_MIME_TYPES.len()
        );
    }

    #[test]
    fn test_stream_map_parsing() {
        let links =
            parse_stream_map("22|https://v.example.com/a?expire=1700000000,18|https://v.example.com/b")
                .unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].quality_tag, 22);
        assert_eq!(links[0].resolution, Some(720));
        assert_eq!(links[1].extension.as_deref(), Some("mp4"));
        assert_eq!(link_expiry(&links[0].url), Some(1_700_000_000));

        assert!(matches!(
            parse_stream_map("22"),
            Err(DriveError::MalformedStreamMap(_))
        ));
        assert!(parse_stream_map("x|https://v.example.com/a").is_err());
    }

    #[test]
    fn test_status_checked_before_session_token() {
        let body = info_body(&[("status", "fail"), ("reason", "File not found")]);
        match parse_video_info("X", &body, None) {
            Err(DriveError::UpstreamRejected { reason, .. }) => assert_eq!(reason, "File not found"),
            other => panic!("unexpected: {other:?}"),
        }

        assert!(matches!(
            parse_video_info("X", "title=a", Some("tok".into())),
            Err(DriveError::UpstreamRejected { .. })
        ));

        let ok = info_body(&[("status", "ok"), ("fmt_stream_map", "18|https://v/a")]);
        assert!(matches!(
            parse_video_info("X", &ok, None),
            Err(DriveError::MissingSessionToken { .. })
        ));
    }

    #[tokio::test]
    async fn test_video_info_resolves_links_and_cookie() {
        let server = MockServer::start_async().await;
        let body = info_body(&[
            ("status", "ok"),
            ("title", "holiday.mp4"),
            ("length_seconds", "125"),
            (
                "fmt_stream_map",
                "37|https://v.example.com/1?expire=1700000000&id=a,22|https://v.example.com/2",
            ),
        ]);
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/e/get_video_info")
                    .query_param("docid", "ITEM1");
                then.status(200)
                    .header("set-cookie", "DRIVE_STREAM=sess-1; Domain=.example.com; Path=/")
                    .body(body);
            })
            .await;

        let client = client_for(&server, 0);
        let info = client.video_info("ITEM1").await.unwrap();
        mock.assert_async().await;

        assert_eq!(info.title, "holiday.mp4");
        assert_eq!(info.duration, 125);
        assert_eq!(info.session_token, "sess-1");
        assert_eq!(info.expiry, Some(1_700_000_000));
        let tags: Vec<u32> = info.links.iter().map(|l| l.quality_tag).collect();
        assert_eq!(tags, vec![37, 22]);
    }

    #[tokio::test]
    async fn test_list_folder_sends_query_and_splits_page() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/files")
                    .query_param("key", "API")
                    .query_param("orderBy", "folder desc")
                    .query_param("pageSize", "1000")
                    .query_param("pageToken", "t2")
                    .query_param("q", listing_query("ROOT").as_str());
                then.status(200).json_body(json!({
                    "files": [
                        {"id": "F1", "mimeType": FOLDER_MIME_TYPE},
                        {"id": "V1", "mimeType": "video/mp4"}
                    ],
                    "nextPageToken": "t3"
                }));
            })
            .await;

        let client = client_for(&server, 0);
        let page = client.list_folder("ROOT", "API", Some("t2")).await.unwrap();
        mock.assert_async().await;

        assert_eq!(page.folders, vec!["F1"]);
        assert_eq!(page.leaves, vec!["V1"]);
        assert_eq!(page.next_page_token.as_deref(), Some("t3"));
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/files");
                then.status(503);
            })
            .await;

        let client = client_for(&server, 2);
        let err = client.list_folder("ROOT", "API", None).await.unwrap_err();
        assert!(matches!(err, DriveError::Api { status_code: 503, .. }));
        assert_eq!(mock.hits_async().await, 3);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/files");
                then.status(403).body("keyInvalid");
            })
            .await;

        let client = client_for(&server, 3);
        let err = client.list_folder("ROOT", "BAD", None).await.unwrap_err();
        match err {
            DriveError::Api {
                status_code,
                message,
            } => {
                assert_eq!(status_code, 403);
                assert_eq!(message, "keyInvalid");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(mock.hits_async().await, 1);
    }
}
