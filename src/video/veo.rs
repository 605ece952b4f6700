//! Veo on Vertex AI: job submission, status polling and retrieval.

use crate::auth::{GcloudTokenSource, TokenSource};
use crate::config::VertexSettings;
use crate::error::{sanitize_error_message, PipelineError, Result};
use crate::video::poll::{poll_until, PollPolicy};
use crate::video::storage::StorageClient;
use crate::video::types::{JobHandle, JobSettings, JobStatus, RemoteVideo};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// File name of the downloaded video inside the output directory.
pub const VIDEO_FILE_NAME: &str = "video.mp4";

/// Builder for [`VeoClient`].
#[derive(Clone)]
pub struct VeoClientBuilder {
    project: Option<String>,
    location: Option<String>,
    model_id: Option<String>,
    storage_uri: Option<String>,
    tokens: Option<Arc<dyn TokenSource>>,
    base_url: Option<String>,
    storage_base_url: Option<String>,
    job: JobSettings,
    poll: PollPolicy,
    output_dir: PathBuf,
    timeout: Duration,
}

impl Default for VeoClientBuilder {
    fn default() -> Self {
        Self {
            project: None,
            location: None,
            model_id: None,
            storage_uri: None,
            tokens: None,
            base_url: None,
            storage_base_url: None,
            job: JobSettings::default(),
            poll: PollPolicy::default(),
            output_dir: PathBuf::from("output"),
            timeout: Duration::from_secs(120),
        }
    }
}

impl VeoClientBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies project, location, model, bucket and `gcloud` path from the settings.
    pub fn settings(mut self, settings: &VertexSettings) -> Self {
        self.project = Some(settings.project.clone());
        self.location = Some(settings.location.clone());
        self.model_id = Some(settings.model_id.clone());
        self.storage_uri = Some(settings.storage_uri());
        self.tokens = Some(Arc::new(GcloudTokenSource::new(&settings.gcloud_path)));
        self
    }

    /// Sets the GCP project ID.
    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Sets the GCP location (e.g. "us-central1").
    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Sets the Veo model identifier.
    pub fn model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    /// Sets the `gs://` prefix that receives generated videos.
    pub fn storage_uri(mut self, uri: impl Into<String>) -> Self {
        self.storage_uri = Some(uri.into());
        self
    }

    /// Sets where bearer tokens come from. Defaults to `gcloud` on `PATH`.
    pub fn token_source(mut self, tokens: Arc<dyn TokenSource>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Overrides the Vertex AI endpoint (default `https://{location}-aiplatform.googleapis.com`).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Overrides the Cloud Storage endpoint.
    pub fn storage_base_url(mut self, url: impl Into<String>) -> Self {
        self.storage_base_url = Some(url.into());
        self
    }

    /// Replaces the fixed job parameters.
    pub fn job_settings(mut self, job: JobSettings) -> Self {
        self.job = job;
        self
    }

    /// Sets how the job is polled.
    pub fn poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// Sets the directory that receives `video.mp4`.
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Sets the per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builds the client.
    pub fn build(self) -> Result<VeoClient> {
        let missing =
            |name: &str| PipelineError::Configuration(format!("Veo client: {} not set", name));
        let project = self.project.ok_or_else(|| missing("project"))?;
        let location = self.location.ok_or_else(|| missing("location"))?;
        let model_id = self.model_id.ok_or_else(|| missing("model id"))?;
        let storage_uri = self.storage_uri.ok_or_else(|| missing("storage URI"))?;
        if !storage_uri.starts_with("gs://") {
            return Err(PipelineError::Configuration(format!(
                "storage URI must start with gs://, got {}",
                storage_uri
            )));
        }

        let tokens = self
            .tokens
            .unwrap_or_else(|| Arc::new(GcloudTokenSource::default()));
        let client = reqwest::Client::builder().timeout(self.timeout).build()?;

        let base_url = self
            .base_url
            .unwrap_or_else(|| format!("https://{}-aiplatform.googleapis.com", location));
        let model_url = format!(
            "{}/v1/projects/{}/locations/{}/publishers/google/models/{}",
            base_url.trim_end_matches('/'),
            project,
            location,
            model_id
        );

        let mut storage = StorageClient::new(client.clone(), tokens.clone());
        if let Some(url) = &self.storage_base_url {
            storage = storage.with_base_url(url)?;
        }

        Ok(VeoClient {
            client,
            tokens,
            storage,
            model_url,
            model_id,
            storage_uri,
            job: self.job,
            poll: self.poll,
            output_dir: self.output_dir,
        })
    }
}

/// Veo video generation client (Vertex AI backend).
pub struct VeoClient {
    client: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
    storage: StorageClient,
    model_url: String,
    model_id: String,
    storage_uri: String,
    job: JobSettings,
    poll: PollPolicy,
    output_dir: PathBuf,
}

impl VeoClient {
    /// Creates a new `VeoClientBuilder`.
    pub fn builder() -> VeoClientBuilder {
        VeoClientBuilder::new()
    }

    /// Returns the model identifier in use.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Returns the poll policy in use.
    pub fn poll_policy(&self) -> &PollPolicy {
        &self.poll
    }

    /// Local path the video is downloaded to.
    pub fn video_path(&self) -> PathBuf {
        self.output_dir.join(VIDEO_FILE_NAME)
    }

    fn request_body(&self, prompt: &str) -> VertexRequest {
        VertexRequest {
            instances: vec![VertexInstance {
                prompt: prompt.to_string(),
            }],
            parameters: VertexParameters {
                duration_seconds: self.job.duration_secs,
                aspect_ratio: self.job.aspect_ratio.clone(),
                generate_audio: self.job.generate_audio,
                storage_uri: self.storage_uri.clone(),
            },
        }
    }

    /// Submits a generation job for `prompt` and returns its handle.
    pub async fn submit_job(&self, prompt: &str) -> Result<JobHandle> {
        let url = format!("{}:predictLongRunning", self.model_url);
        let token = self.tokens.access_token().await?;

        let transport = |e: reqwest::Error| PipelineError::Submission {
            status: None,
            body: e.to_string(),
        };
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let text = response.text().await.map_err(transport)?;
        if !status.is_success() {
            return Err(PipelineError::Submission {
                status: Some(status.as_u16()),
                body: text,
            });
        }

        let name = serde_json::from_str::<VeoOperationResponse>(&text)
            .ok()
            .and_then(|op| op.name)
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| PipelineError::Submission {
                status: Some(status.as_u16()),
                body: text.clone(),
            })?;

        tracing::info!(operation = %name, model = %self.model_id, "video job submitted");
        Ok(JobHandle::new(name))
    }

    /// Queries the job status once.
    pub async fn fetch_status(&self, handle: &JobHandle) -> Result<JobStatus> {
        let url = format!("{}:fetchPredictOperation", self.model_url);
        let token = self.tokens.access_token().await?;
        let body = VertexFetchOperationRequest {
            operation_name: handle.as_str().to_string(),
        };

        let transport =
            |e: reqwest::Error| PipelineError::Polling(format!("status request failed: {}", e));
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let text = response.text().await.map_err(transport)?;
        if !status.is_success() {
            return Err(PipelineError::Polling(format!(
                "fetchPredictOperation returned {}: {}",
                status.as_u16(),
                sanitize_error_message(&text)
            )));
        }

        let operation: VeoOperationResponse = serde_json::from_str(&text).map_err(|e| {
            PipelineError::Polling(format!(
                "malformed operation status ({}): {}",
                e,
                sanitize_error_message(&text)
            ))
        })?;
        operation.into_status()
    }

    /// Polls until the job is done and returns the first video it produced.
    pub async fn await_job(
        &self,
        handle: &JobHandle,
        cancel: &CancellationToken,
    ) -> Result<RemoteVideo> {
        poll_until(&self.poll, cancel, |attempt| async move {
            let status = self.fetch_status(handle).await?;
            Ok::<_, PipelineError>(match status {
                JobStatus::Pending => {
                    tracing::debug!(operation = %handle, attempt, "video generation still running");
                    None
                }
                JobStatus::Done { video, count } => {
                    if count > 1 {
                        tracing::warn!(count, "job produced several videos, using the first");
                    }
                    Some(video)
                }
            })
        })
        .await
    }

    /// Waits for the job, then downloads its video to `<output_dir>/video.mp4`.
    ///
    /// The returned path is only handed out once the file is verified to exist
    /// and be non-empty.
    pub async fn await_and_fetch(
        &self,
        handle: &JobHandle,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let video = self.await_job(handle, cancel).await?;
        tracing::debug!(source = %video, "video generation complete");

        let dest = self.video_path();
        let size = self.download(&video, &dest, cancel).await?;
        tracing::info!(path = %dest.display(), size_bytes = size, "video downloaded");
        Ok(dest)
    }

    async fn download(
        &self,
        video: &RemoteVideo,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        tokio::select! {
            _ = cancel.cancelled() => Err(PipelineError::Cancelled),
            size = self.storage.download_to(video, dest) => size,
        }
    }
}

// ── Vertex AI wire format ───────────────────────────────────────────────────

/// Vertex AI request body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VertexRequest {
    instances: Vec<VertexInstance>,
    parameters: VertexParameters,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VertexInstance {
    prompt: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VertexParameters {
    duration_seconds: u32,
    aspect_ratio: String,
    generate_audio: bool,
    storage_uri: String,
}

/// Vertex AI poll request body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VertexFetchOperationRequest {
    operation_name: String,
}

#[derive(Debug, Deserialize)]
struct VeoOperationResponse {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    done: Option<bool>,
    #[serde(default)]
    response: Option<VeoVideoResponse>,
    #[serde(default)]
    error: Option<VeoError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VeoVideoResponse {
    #[serde(default)]
    videos: Option<Vec<VertexVideo>>,
    #[serde(default)]
    rai_media_filtered_count: Option<u32>,
    #[serde(default)]
    rai_media_filtered_reasons: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct VeoError {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

/// Vertex AI video entry in response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VertexVideo {
    /// GCS URI (gs://...), returned when `storageUri` is set.
    #[serde(default)]
    gcs_uri: Option<String>,
    /// HTTPS download URL, sometimes returned instead of a GCS URI.
    #[serde(default)]
    uri: Option<String>,
    /// Inline base64-encoded video data.
    #[serde(default)]
    bytes_base64_encoded: Option<String>,
}

impl VertexVideo {
    fn into_remote(self) -> Option<RemoteVideo> {
        self.gcs_uri
            .or(self.uri)
            .map(RemoteVideo::Uri)
            .or(self.bytes_base64_encoded.map(RemoteVideo::Inline))
    }
}

impl VeoOperationResponse {
    /// Interprets one status response.
    ///
    /// An `error` object means the remote job failed, whether or not `done`
    /// is set. A done job must report at least one video.
    fn into_status(self) -> Result<JobStatus> {
        if let Some(err) = self.error {
            let message = err.message.unwrap_or_else(|| "Unknown error".into());
            return Err(PipelineError::Polling(match err.code {
                Some(code) => format!("video generation failed (code {}): {}", code, message),
                None => format!("video generation failed: {}", message),
            }));
        }

        if !self.done.unwrap_or(false) {
            return Ok(JobStatus::Pending);
        }

        let response = self.response.ok_or_else(|| {
            PipelineError::Polling("operation is done but has no response".into())
        })?;
        let filtered = response.rai_media_filtered_count.unwrap_or(0);
        let reasons = response.rai_media_filtered_reasons.unwrap_or_default();
        let videos = response.videos.unwrap_or_default();
        let count = videos.len();

        match videos.into_iter().next() {
            Some(first) => {
                let video = first.into_remote().ok_or_else(|| {
                    PipelineError::Polling("first video entry has no location or data".into())
                })?;
                Ok(JobStatus::Done { video, count })
            }
            None if filtered > 0 => Err(PipelineError::Polling(format!(
                "video was filtered by Veo safety filters ({})",
                if reasons.is_empty() {
                    "no reason given".to_string()
                } else {
                    reasons.join("; ")
                }
            ))),
            None => Err(PipelineError::Polling(
                "video generation completed but no video data returned".into(),
            )),
        }
    }
}
