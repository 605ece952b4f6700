//! Retrieval of generated videos from Cloud Storage.

use crate::auth::TokenSource;
use crate::error::{sanitize_error_message, PipelineError, Result};
use crate::video::types::RemoteVideo;
use std::path::Path;
use std::sync::Arc;
use url::Url;

const STORAGE_BASE_URL: &str = "https://storage.googleapis.com";

/// Downloads generated videos to local files.
#[derive(Clone)]
pub struct StorageClient {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenSource>,
}

impl StorageClient {
    /// Creates a client against the public Cloud Storage endpoint.
    pub fn new(client: reqwest::Client, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            client,
            base_url: STORAGE_BASE_URL.to_string(),
            tokens,
        }
    }

    /// Points the client at another storage endpoint.
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self> {
        Url::parse(base_url).map_err(|e| {
            PipelineError::Configuration(format!("invalid storage URL {}: {}", base_url, e))
        })?;
        self.base_url = base_url.to_string();
        Ok(self)
    }

    /// Maps `gs://bucket/object` to its HTTPS download URL.
    pub fn object_url(&self, gcs_uri: &str) -> Result<Url> {
        let rest = gcs_uri
            .strip_prefix("gs://")
            .ok_or_else(|| PipelineError::Download(format!("not a gs:// URI: {}", gcs_uri)))?;
        let (bucket, object) = rest
            .split_once('/')
            .filter(|(bucket, object)| !bucket.is_empty() && !object.is_empty())
            .ok_or_else(|| {
                PipelineError::Download(format!("gs:// URI has no object path: {}", gcs_uri))
            })?;

        let mut url = Url::parse(&self.base_url).map_err(|e| {
            PipelineError::Download(format!("bad storage URL {}: {}", self.base_url, e))
        })?;
        url.path_segments_mut()
            .map_err(|_| PipelineError::Download(format!("bad storage URL {}", self.base_url)))?
            .pop_if_empty()
            .push(bucket)
            .extend(object.split('/'));
        Ok(url)
    }

    /// Fetches the video bytes.
    pub async fn fetch(&self, video: &RemoteVideo) -> Result<Vec<u8>> {
        let url = match video {
            RemoteVideo::Inline(data) => {
                use base64::Engine;
                return base64::engine::general_purpose::STANDARD
                    .decode(data)
                    .map_err(|e| {
                        PipelineError::Download(format!("failed to decode inline video: {}", e))
                    });
            }
            RemoteVideo::Uri(uri) if uri.starts_with("gs://") => self.object_url(uri)?,
            RemoteVideo::Uri(uri) if uri.starts_with("https://") || uri.starts_with("http://") => {
                Url::parse(uri)
                    .map_err(|e| PipelineError::Download(format!("invalid URL {}: {}", uri, e)))?
            }
            RemoteVideo::Uri(uri) => {
                return Err(PipelineError::Download(format!(
                    "unsupported video location: {}",
                    uri
                )))
            }
        };

        let token = self.tokens.access_token().await?;
        let transport =
            |e: reqwest::Error| PipelineError::Download(format!("fetching {} failed: {}", url, e));
        let response = self
            .client
            .get(url.clone())
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PipelineError::Download(format!(
                "{} returned {}: {}",
                url,
                status.as_u16(),
                sanitize_error_message(&text)
            )));
        }

        Ok(response.bytes().await.map_err(transport)?.to_vec())
    }

    /// Fetches the video and writes it to `dest`, replacing any previous file.
    ///
    /// The file is checked after writing: it must exist and be non-empty.
    pub async fn download_to(&self, video: &RemoteVideo, dest: &Path) -> Result<u64> {
        let data = self.fetch(video).await?;
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &data).await?;
        verify_download(dest).await
    }
}

/// Returns the size of `path`, failing unless it is a non-empty file.
pub async fn verify_download(path: &Path) -> Result<u64> {
    let meta = tokio::fs::metadata(path).await.map_err(|e| {
        PipelineError::Download(format!("{} is missing after download: {}", path.display(), e))
    })?;
    if !meta.is_file() {
        return Err(PipelineError::Download(format!(
            "{} is not a regular file",
            path.display()
        )));
    }
    if meta.len() == 0 {
        return Err(PipelineError::Download(format!(
            "{} is empty after download",
            path.display()
        )));
    }
    Ok(meta.len())
}
