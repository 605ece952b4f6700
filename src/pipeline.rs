//! End-to-end run: prompt, video job, download, upload.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::prompt::{Prompt, PromptGenerator};
use crate::publish::{PublishResult, YouTubePublisher};
use crate::video::{verify_download, JobHandle, VeoClient};
use chrono::NaiveDate;
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Title used for the published video of a given day.
pub fn video_title(date: NaiveDate) -> String {
    format!("Satisfying AI Video - {}", date.format("%B %d, %Y"))
}

/// A video that was generated and downloaded but not published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedVideo {
    /// Operation name of the generation job.
    pub operation: JobHandle,
    /// Local file.
    pub path: PathBuf,
    /// File size in bytes.
    pub size_bytes: u64,
}

/// Summary of a complete run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    /// Prompt text, verbatim.
    pub prompt: String,
    /// Dated file the prompt was saved to.
    pub prompt_file: PathBuf,
    /// Operation name of the generation job.
    pub operation: JobHandle,
    /// Downloaded video.
    pub video_path: PathBuf,
    /// Size of the downloaded video.
    pub video_size_bytes: u64,
    /// Where the video was published.
    pub published: PublishResult,
}

/// The four stages wired together.
pub struct Pipeline {
    prompts: PromptGenerator,
    veo: VeoClient,
    publisher: YouTubePublisher,
}

impl Pipeline {
    /// Assembles a pipeline from already-built stages.
    pub fn new(prompts: PromptGenerator, veo: VeoClient, publisher: YouTubePublisher) -> Self {
        Self {
            prompts,
            veo,
            publisher,
        }
    }

    /// Builds every stage from the configuration.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let prompts = PromptGenerator::builder()
            .settings(&config.completion)
            .output_dir(&config.prompt_dir)
            .timeout(config.http_timeout)
            .build()?;
        let veo = VeoClient::builder()
            .settings(&config.vertex)
            .poll_policy(config.poll)
            .output_dir(&config.output_dir)
            .timeout(config.http_timeout)
            .build()?;
        let publisher = YouTubePublisher::builder()
            .settings(&config.publish)
            .timeout(config.http_timeout)
            .build()?;
        Ok(Self::new(prompts, veo, publisher))
    }

    /// Generates and saves today's prompt.
    pub async fn generate_prompt(&self, cancel: &CancellationToken) -> Result<Prompt> {
        let today = chrono::Local::now().date_naive();
        cancellable(cancel, self.prompts.generate_prompt_on(today)).await
    }

    /// Turns `prompt` into a local video file without publishing it.
    pub async fn render(&self, prompt: &str, cancel: &CancellationToken) -> Result<RenderedVideo> {
        let operation = cancellable(cancel, self.veo.submit_job(prompt)).await?;
        let path = self.veo.await_and_fetch(&operation, cancel).await?;
        let size_bytes = verify_download(&path).await?;
        Ok(RenderedVideo {
            operation,
            path,
            size_bytes,
        })
    }

    /// Publishes an existing file.
    pub async fn publish_file(
        &self,
        path: &Path,
        title: &str,
        description: &str,
        cancel: &CancellationToken,
    ) -> Result<PublishResult> {
        cancellable(cancel, self.publisher.publish(path, title, description)).await
    }

    /// Runs the whole pipeline for today's date.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<PipelineReport> {
        self.run_on(chrono::Local::now().date_naive(), cancel).await
    }

    /// Runs the whole pipeline as if it were `date`.
    ///
    /// The first failing stage ends the run; files written by earlier stages
    /// are left in place.
    pub async fn run_on(
        &self,
        date: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<PipelineReport> {
        let prompt = cancellable(cancel, self.prompts.generate_prompt_on(date)).await?;
        tracing::info!(prompt = %prompt.text, "stage 1/4: prompt generated");

        let operation = cancellable(cancel, self.veo.submit_job(&prompt.text)).await?;
        tracing::info!(operation = %operation, "stage 2/4: video job submitted");

        let video_path = self.veo.await_and_fetch(&operation, cancel).await?;
        let video_size_bytes = verify_download(&video_path).await?;
        tracing::info!(
            path = %video_path.display(),
            size_bytes = video_size_bytes,
            "stage 3/4: video downloaded"
        );

        let title = video_title(date);
        let published = self
            .publish_file(&video_path, &title, &prompt.text, cancel)
            .await?;
        tracing::info!(url = %published.url, "stage 4/4: video published");

        Ok(PipelineReport {
            prompt: prompt.text,
            prompt_file: prompt.path,
            operation,
            video_path,
            video_size_bytes,
            published,
        })
    }
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    stage: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        result = stage => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use crate::video::PollPolicy;
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MODEL_PATH: &str =
        "/v1/projects/my-project/locations/us-central1/publishers/google/models/veo-3.0-generate-001";

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 15).unwrap()
    }

    fn pipeline(server: &MockServer, dir: &Path) -> Pipeline {
        let prompts = PromptGenerator::builder()
            .endpoint(server.uri())
            .api_version("2024-10-21")
            .api_key("test-key")
            .deployment("gpt-4o")
            .output_dir(dir)
            .build()
            .unwrap();
        let veo = VeoClient::builder()
            .project("my-project")
            .location("us-central1")
            .model_id("veo-3.0-generate-001")
            .storage_uri("gs://bucket/")
            .token_source(Arc::new(StaticToken::new("ya29.vertex")))
            .base_url(server.uri())
            .storage_base_url(server.uri())
            .poll_policy(PollPolicy::default().interval(Duration::from_millis(10)))
            .output_dir(dir.join("output"))
            .build()
            .unwrap();
        let publisher = YouTubePublisher::builder()
            .token_source(Arc::new(StaticToken::new("ya29.youtube")))
            .base_url(server.uri())
            .build()
            .unwrap();
        Pipeline::new(prompts, veo, publisher)
    }

    async fn mount_prompt(server: &MockServer, content: &str) {
        Mock::given(method("POST"))
            .and(path("/openai/deployments/gpt-4o/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": content}}]
            })))
            .mount(server)
            .await;
    }

    async fn mount_submit(server: &MockServer, response: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path(format!("{}:predictLongRunning", MODEL_PATH)))
            .respond_with(response)
            .mount(server)
            .await;
    }

    async fn mount_job_done_after(server: &MockServer, pending: u64) {
        if pending > 0 {
            Mock::given(method("POST"))
                .and(path(format!("{}:fetchPredictOperation", MODEL_PATH)))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(serde_json::json!({"name": "op-123", "done": false})),
                )
                .up_to_n_times(pending)
                .with_priority(1)
                .mount(server)
                .await;
        }
        Mock::given(method("POST"))
            .and(path(format!("{}:fetchPredictOperation", MODEL_PATH)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "op-123",
                "done": true,
                "response": {"videos": [{"gcsUri": "gs://bucket/v1.mp4"}]}
            })))
            .with_priority(2)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/bucket/v1.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"mp4-data".to_vec()))
            .mount(server)
            .await;
    }

    async fn count_requests(server: &MockServer, suffix: &str) -> usize {
        server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.url.path().ends_with(suffix))
            .count()
    }

    #[test]
    fn test_video_title() {
        assert_eq!(video_title(date()), "Satisfying AI Video - October 15, 2026");
        assert_eq!(
            video_title(NaiveDate::from_ymd_opt(2025, 3, 5).unwrap()),
            "Satisfying AI Video - March 05, 2025"
        );
    }

    #[tokio::test]
    async fn test_full_run_publishes_prompt_as_description() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();

        mount_prompt(&server, "Spinning top on marble,").await;
        mount_submit(
            &server,
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"name": "op-123"})),
        )
        .await;
        mount_job_done_after(&server, 2).await;
        Mock::given(method("POST"))
            .and(path("/upload/youtube/v3/videos"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "yt-42"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let report = pipeline(&server, dir.path())
            .run_on(date(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.prompt, "Spinning top on marble,");
        assert_eq!(report.prompt_file, dir.path().join("prompt_2026-10-15.txt"));
        assert_eq!(
            std::fs::read_to_string(&report.prompt_file).unwrap(),
            "Spinning top on marble,"
        );
        assert_eq!(report.operation, JobHandle::new("op-123"));
        assert_eq!(report.video_path, dir.path().join("output").join("video.mp4"));
        assert_eq!(report.video_size_bytes, 8);
        assert_eq!(report.published.video_id, "yt-42");
        assert_eq!(report.published.url, "https://www.youtube.com/watch?v=yt-42");
        assert_eq!(count_requests(&server, ":fetchPredictOperation").await, 3);

        let requests = server.received_requests().await.unwrap();
        let upload = requests
            .iter()
            .find(|r| r.url.path() == "/upload/youtube/v3/videos")
            .unwrap();
        let body = String::from_utf8_lossy(&upload.body);
        assert!(body.contains(r#""description":"Spinning top on marble,""#));
        assert!(body.contains(r#""title":"Satisfying AI Video - October 15, 2026""#));
        assert!(body.contains("mp4-data"));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["operation"], "op-123");
        assert_eq!(json["published"]["video_id"], "yt-42");
    }

    #[tokio::test]
    async fn test_rejected_submission_stops_the_run() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();

        mount_prompt(&server, "Spinning top on marble,").await;
        mount_submit(
            &server,
            ResponseTemplate::new(429).set_body_string(r#"{"error": {"status": "RESOURCE_EXHAUSTED"}}"#),
        )
        .await;
        Mock::given(method("POST"))
            .and(path_regex(r"(fetchPredictOperation|/upload/)"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let err = pipeline(&server, dir.path())
            .run_on(date(), &CancellationToken::new())
            .await
            .unwrap_err();
        match &err {
            PipelineError::Submission { status, body } => {
                assert_eq!(*status, Some(429));
                assert!(body.contains("RESOURCE_EXHAUSTED"));
            }
            other => panic!("Expected Submission error, got: {:?}", other),
        }
        assert!(err.is_retryable());
        assert!(dir.path().join("prompt_2026-10-15.txt").exists());
        assert!(!dir.path().join("output").join("video.mp4").exists());
    }

    #[tokio::test]
    async fn test_failed_upload_keeps_video() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();

        mount_prompt(&server, "Kinetic sand slicing").await;
        mount_submit(
            &server,
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"name": "op-123"})),
        )
        .await;
        mount_job_done_after(&server, 0).await;
        Mock::given(method("POST"))
            .and(path("/upload/youtube/v3/videos"))
            .respond_with(ResponseTemplate::new(500).set_body_string("backendError"))
            .mount(&server)
            .await;

        let err = pipeline(&server, dir.path())
            .run_on(date(), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            PipelineError::Upload { status, message } => {
                assert_eq!(status, Some(500));
                assert_eq!(message, "backendError");
            }
            other => panic!("Expected Upload error, got: {:?}", other),
        }
        let video = dir.path().join("output").join("video.mp4");
        assert_eq!(std::fs::read(video).unwrap(), b"mp4-data");
    }

    #[tokio::test]
    async fn test_cancel_while_polling() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();

        mount_prompt(&server, "Soap cutting").await;
        mount_submit(
            &server,
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"name": "op-123"})),
        )
        .await;
        Mock::given(method("POST"))
            .and(path(format!("{}:fetchPredictOperation", MODEL_PATH)))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"done": false})),
            )
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = pipeline(&server, dir.path())
            .run_on(date(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
        assert_eq!(count_requests(&server, "/upload/youtube/v3/videos").await, 0);
    }

    #[tokio::test]
    async fn test_already_cancelled_sends_nothing() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = pipeline(&server, dir.path())
            .run_on(date(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_render_without_publish() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();

        mount_submit(
            &server,
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"name": "op-123"})),
        )
        .await;
        mount_job_done_after(&server, 1).await;

        let rendered = pipeline(&server, dir.path())
            .render("Marble run", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(rendered.operation, JobHandle::new("op-123"));
        assert_eq!(rendered.size_bytes, 8);
        assert_eq!(count_requests(&server, "/upload/youtube/v3/videos").await, 0);
    }

    #[test]
    fn test_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut vars = crate::config::tests::base_vars(dir.path());
        let secret = dir.path().join("installed.json");
        std::fs::write(
            &secret,
            r#"{"installed": {"client_id": "id", "client_secret": "s"}}"#,
        )
        .unwrap();
        vars.retain(|(k, _)| k != "YOUTUBE_CLIENT_SECRET_FILE");
        vars.push((
            "YOUTUBE_CLIENT_SECRET_FILE".into(),
            secret.display().to_string(),
        ));
        vars.push(("OUTPUT_DIR".into(), dir.path().join("out").display().to_string()));

        let config = PipelineConfig::from_vars(vars).unwrap();
        let pipeline = Pipeline::from_config(&config).unwrap();
        assert_eq!(pipeline.veo.video_path(), dir.path().join("out").join("video.mp4"));
        assert_eq!(pipeline.veo.model_id(), "veo-3.0-generate-001");
        assert_eq!(pipeline.publisher.timeout(), Some(config.http_timeout));
    }
}
