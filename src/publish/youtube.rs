//! Video upload through the YouTube Data API.

use crate::auth::TokenSource;
use crate::config::PublishSettings;
use crate::error::{PipelineError, Result};
use crate::publish::oauth::InstalledAppFlow;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// OAuth scope required for uploads.
pub const UPLOAD_SCOPE: &str = "https://www.googleapis.com/auth/youtube.upload";

/// Tags attached to every published video.
pub const DEFAULT_TAGS: [&str; 4] = ["AI", "satisfying", "generated", "shorts"];

const UPLOAD_BASE_URL: &str = "https://www.googleapis.com";

/// Visibility of an uploaded video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Privacy {
    /// Listed and searchable.
    #[default]
    Public,
    /// Reachable by link only.
    Unlisted,
    /// Owner only.
    Private,
}

/// Title, description and listing settings of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoMetadata {
    /// Video title.
    pub title: String,
    /// Video description.
    pub description: String,
    /// Tags shown on the video page.
    pub tags: Vec<String>,
    /// Visibility after upload.
    pub privacy: Privacy,
}

impl VideoMetadata {
    /// Metadata with the default tags and public visibility.
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            tags: DEFAULT_TAGS.iter().map(|t| t.to_string()).collect(),
            privacy: Privacy::default(),
        }
    }

    fn resource(&self) -> VideoResource<'_> {
        VideoResource {
            snippet: Snippet {
                title: &self.title,
                description: &self.description,
                tags: &self.tags,
            },
            status: VideoStatus {
                privacy_status: self.privacy,
            },
        }
    }
}

/// Outcome of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishResult {
    /// ID assigned by YouTube.
    pub video_id: String,
    /// Public watch page.
    pub url: String,
}

impl PublishResult {
    fn new(video_id: String) -> Self {
        let url = format!("https://www.youtube.com/watch?v={}", video_id);
        Self { video_id, url }
    }
}

/// Builder for [`YouTubePublisher`].
#[derive(Clone, Default)]
pub struct YouTubePublisherBuilder {
    client_secret_file: Option<PathBuf>,
    redirect_port: u16,
    tokens: Option<Arc<dyn TokenSource>>,
    base_url: Option<String>,
    timeout: Option<Duration>,
}

impl YouTubePublisherBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses the client-secret file and redirect port from the settings.
    pub fn settings(mut self, settings: &PublishSettings) -> Self {
        self.client_secret_file = Some(settings.client_secret_file.clone());
        self.redirect_port = settings.redirect_port;
        self
    }

    /// Supplies upload tokens directly instead of running the consent flow.
    pub fn token_source(mut self, tokens: Arc<dyn TokenSource>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Overrides the API host (default `https://www.googleapis.com`).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the per-request timeout for the upload and the OAuth code
    /// exchange. Neither has one by default.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Builds the publisher.
    ///
    /// Without an explicit token source, the client-secret file is parsed now
    /// so a bad file fails before any video is generated.
    pub fn build(self) -> Result<YouTubePublisher> {
        let mut client = reqwest::Client::builder();
        if let Some(timeout) = self.timeout {
            client = client.timeout(timeout);
        }
        let client = client.build()?;

        let tokens: Arc<dyn TokenSource> = match (self.tokens, self.client_secret_file) {
            (Some(tokens), _) => tokens,
            (None, Some(path)) => Arc::new(
                InstalledAppFlow::from_client_secrets_file(&path, &[UPLOAD_SCOPE])?
                    .redirect_port(self.redirect_port)
                    .http_client(client.clone()),
            ),
            (None, None) => {
                return Err(PipelineError::Configuration(
                    "YouTube publisher: neither a token source nor a client secret file is set"
                        .into(),
                ))
            }
        };

        let base_url = self.base_url.unwrap_or_else(|| UPLOAD_BASE_URL.to_string());
        Ok(YouTubePublisher {
            client,
            tokens,
            timeout: self.timeout,
            upload_url: format!(
                "{}/upload/youtube/v3/videos",
                base_url.trim_end_matches('/')
            ),
        })
    }
}

/// Uploads a local video file to the authorized channel.
pub struct YouTubePublisher {
    client: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
    timeout: Option<Duration>,
    upload_url: String,
}

impl YouTubePublisher {
    /// Creates a new `YouTubePublisherBuilder`.
    pub fn builder() -> YouTubePublisherBuilder {
        YouTubePublisherBuilder::new()
    }

    /// Per-request timeout shared by the upload and the consent flow.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Uploads `path` as a public video with the default tags.
    pub async fn publish(
        &self,
        path: &Path,
        title: &str,
        description: &str,
    ) -> Result<PublishResult> {
        self.upload(path, &VideoMetadata::new(title, description))
            .await
    }

    /// Uploads `path` with explicit metadata.
    pub async fn upload(&self, path: &Path, metadata: &VideoMetadata) -> Result<PublishResult> {
        let video = tokio::fs::read(path).await.map_err(|e| PipelineError::Upload {
            status: None,
            message: format!("cannot read {}: {}", path.display(), e),
        })?;
        if video.is_empty() {
            return Err(PipelineError::Upload {
                status: None,
                message: format!("{} is empty", path.display()),
            });
        }

        let token = self.tokens.access_token().await?;
        let boundary = format!("autoreel-{}", uuid::Uuid::new_v4().simple());
        let resource = serde_json::to_vec(&metadata.resource())?;
        let body = multipart_related(&boundary, &resource, "video/mp4", &video);

        tracing::info!(
            path = %path.display(),
            size_bytes = video.len(),
            title = %metadata.title,
            "uploading video"
        );
        let response = self
            .client
            .post(&self.upload_url)
            .query(&[("uploadType", "multipart"), ("part", "snippet,status")])
            .bearer_auth(token)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .body(body)
            .send()
            .await
            .map_err(|e| PipelineError::Upload {
                status: None,
                message: e.to_string(),
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| PipelineError::Upload {
            status: Some(status.as_u16()),
            message: format!("failed to read upload response: {}", e),
        })?;
        if !status.is_success() {
            return Err(PipelineError::Upload {
                status: Some(status.as_u16()),
                message: text,
            });
        }

        let uploaded: UploadedVideo = serde_json::from_str(&text).map_err(|e| {
            PipelineError::Upload {
                status: Some(status.as_u16()),
                message: format!("malformed upload response ({}): {}", e, text),
            }
        })?;
        let video_id = uploaded
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| PipelineError::Upload {
                status: Some(status.as_u16()),
                message: format!("upload response has no video id: {}", text),
            })?;

        let result = PublishResult::new(video_id);
        tracing::info!(video_id = %result.video_id, url = %result.url, "video published");
        Ok(result)
    }
}

/// Builds a two-part `multipart/related` body: JSON metadata, then media.
fn multipart_related(boundary: &str, metadata: &[u8], media_type: &str, media: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(metadata.len() + media.len() + 256);
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata);
    body.extend_from_slice(format!("\r\n--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", media_type).as_bytes());
    body.extend_from_slice(media);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}

// ── YouTube Data API wire format ────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct VideoResource<'a> {
    snippet: Snippet<'a>,
    status: VideoStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Snippet<'a> {
    title: &'a str,
    description: &'a str,
    tags: &'a [String],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VideoStatus {
    privacy_status: Privacy,
}

#[derive(Debug, Deserialize)]
struct UploadedVideo {
    #[serde(default)]
    id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn publisher(server: &MockServer) -> YouTubePublisher {
        YouTubePublisher::builder()
            .token_source(Arc::new(StaticToken::new("ya29.upload")))
            .base_url(server.uri())
            .build()
            .unwrap()
    }

    #[test]
    fn test_metadata_wire_format() {
        let metadata = VideoMetadata::new("Satisfying AI Video - March 05, 2025", "Spinning top");
        let json = serde_json::to_value(metadata.resource()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "snippet": {
                    "title": "Satisfying AI Video - March 05, 2025",
                    "description": "Spinning top",
                    "tags": ["AI", "satisfying", "generated", "shorts"]
                },
                "status": {"privacyStatus": "public"}
            })
        );
    }

    #[test]
    fn test_multipart_layout() {
        let body = multipart_related("b0", br#"{"a":1}"#, "video/mp4", b"MP4");
        let text = String::from_utf8(body).unwrap();
        assert_eq!(
            text,
            "--b0\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{\"a\":1}\r\n\
             --b0\r\nContent-Type: video/mp4\r\n\r\nMP4\r\n--b0--\r\n"
        );
    }

    #[test]
    fn test_builder_requires_credentials() {
        let result = YouTubePublisher::builder().build();
        assert!(matches!(result, Err(PipelineError::Configuration(_))));
    }

    #[test]
    fn test_builder_rejects_bad_client_secret() {
        let dir = tempfile::tempdir().unwrap();
        let secret = dir.path().join("client_secret.json");
        std::fs::write(&secret, "{}").unwrap();
        let result = YouTubePublisher::builder()
            .settings(&PublishSettings {
                client_secret_file: secret,
                redirect_port: 0,
            })
            .build();
        assert!(matches!(result, Err(PipelineError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_publish_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/youtube/v3/videos"))
            .and(query_param("uploadType", "multipart"))
            .and(query_param("part", "snippet,status"))
            .and(header("authorization", "Bearer ya29.upload"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "dQw4w9WgXcQ"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("video.mp4");
        std::fs::write(&video, b"fake-mp4").unwrap();

        let result = publisher(&server)
            .publish(&video, "A title", "A description")
            .await
            .unwrap();
        assert_eq!(result.video_id, "dQw4w9WgXcQ");
        assert_eq!(result.url, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");

        let requests = server.received_requests().await.unwrap();
        let request = &requests[0];
        let content_type = request
            .headers
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(content_type.starts_with("multipart/related; boundary=autoreel-"));
        let body = String::from_utf8_lossy(&request.body);
        assert!(body.contains(r#""title":"A title""#));
        assert!(body.contains(r#""description":"A description""#));
        assert!(body.contains(r#""privacyStatus":"public""#));
        assert!(body.contains("fake-mp4"));
    }

    #[tokio::test]
    async fn test_publish_rejection_keeps_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/youtube/v3/videos"))
            .respond_with(ResponseTemplate::new(403).set_body_string("quotaExceeded"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("video.mp4");
        std::fs::write(&video, b"fake-mp4").unwrap();

        match publisher(&server).publish(&video, "t", "d").await.unwrap_err() {
            PipelineError::Upload { status, message } => {
                assert_eq!(status, Some(403));
                assert_eq!(message, "quotaExceeded");
            }
            other => panic!("Expected Upload error, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_publish_missing_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/youtube/v3/videos"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("video.mp4");
        std::fs::write(&video, b"fake-mp4").unwrap();

        let err = publisher(&server).publish(&video, "t", "d").await.unwrap_err();
        assert!(matches!(err, PipelineError::Upload { status: Some(200), .. }));
    }

    #[tokio::test]
    async fn test_missing_or_empty_file_is_not_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.mp4");
        let err = publisher(&server).publish(&missing, "t", "d").await.unwrap_err();
        assert!(matches!(err, PipelineError::Upload { status: None, .. }));

        let empty = dir.path().join("empty.mp4");
        std::fs::write(&empty, b"").unwrap();
        let err = publisher(&server).publish(&empty, "t", "d").await.unwrap_err();
        assert!(matches!(err, PipelineError::Upload { status: None, ref message } if message.contains("empty")));
    }
}
