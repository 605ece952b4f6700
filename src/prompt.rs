//! Prompt generation via Azure OpenAI chat completions.

use crate::config::CompletionSettings;
use crate::error::{sanitize_error_message, PipelineError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Instruction sent to the completion API.
pub const DEFAULT_INSTRUCTION: &str =
    "Give me a short creative visual prompt for a 30-second satisfying video.";

/// A generated prompt and the file it was saved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Prompt {
    /// The prompt text exactly as returned by the API.
    pub text: String,
    /// Where the text was written.
    pub path: PathBuf,
}

impl std::fmt::Display for Prompt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

/// Name of the prompt file for a given day.
pub fn prompt_file_name(date: NaiveDate) -> String {
    format!("prompt_{}.txt", date.format("%Y-%m-%d"))
}

/// Builder for [`PromptGenerator`].
#[derive(Debug, Clone)]
pub struct PromptGeneratorBuilder {
    endpoint: Option<String>,
    api_version: Option<String>,
    api_key: Option<String>,
    deployment: Option<String>,
    instruction: String,
    output_dir: PathBuf,
    timeout: Duration,
}

impl Default for PromptGeneratorBuilder {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_version: None,
            api_key: None,
            deployment: None,
            instruction: DEFAULT_INSTRUCTION.to_string(),
            output_dir: PathBuf::from("."),
            timeout: Duration::from_secs(120),
        }
    }
}

impl PromptGeneratorBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies endpoint, version, key and deployment from the settings.
    pub fn settings(mut self, settings: &CompletionSettings) -> Self {
        self.endpoint = Some(settings.endpoint.clone());
        self.api_version = Some(settings.api_version.clone());
        self.api_key = Some(settings.api_key.clone());
        self.deployment = Some(settings.deployment.clone());
        self
    }

    /// Sets the resource endpoint.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the `api-version` query parameter.
    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    /// Sets the API key.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the deployment name.
    pub fn deployment(mut self, deployment: impl Into<String>) -> Self {
        self.deployment = Some(deployment.into());
        self
    }

    /// Replaces the instruction sent to the model.
    pub fn instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    /// Sets the directory that receives `prompt_<date>.txt`.
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Sets the per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builds the generator.
    pub fn build(self) -> Result<PromptGenerator> {
        let missing = |name: &str| {
            PipelineError::Configuration(format!("prompt generator: {} not set", name))
        };
        let endpoint = self.endpoint.ok_or_else(|| missing("endpoint"))?;
        let api_version = self.api_version.ok_or_else(|| missing("api version"))?;
        let api_key = self.api_key.ok_or_else(|| missing("api key"))?;
        let deployment = self.deployment.ok_or_else(|| missing("deployment"))?;

        Ok(PromptGenerator {
            client: reqwest::Client::builder().timeout(self.timeout).build()?,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_version,
            api_key,
            deployment,
            instruction: self.instruction,
            output_dir: self.output_dir,
        })
    }
}

/// Asks the completion API for a prompt and saves it to a dated file.
pub struct PromptGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_version: String,
    api_key: String,
    deployment: String,
    instruction: String,
    output_dir: PathBuf,
}

impl PromptGenerator {
    /// Creates a new `PromptGeneratorBuilder`.
    pub fn builder() -> PromptGeneratorBuilder {
        PromptGeneratorBuilder::new()
    }

    fn url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions",
            self.endpoint, self.deployment
        )
    }

    /// Requests one completion and writes it to `prompt_<today>.txt`.
    pub async fn generate_prompt(&self) -> Result<Prompt> {
        let today = chrono::Local::now().date_naive();
        self.generate_prompt_on(today).await
    }

    /// Same as [`generate_prompt`](Self::generate_prompt) with an explicit date.
    pub async fn generate_prompt_on(&self, date: NaiveDate) -> Result<Prompt> {
        let text = self.request_completion().await?;
        let path = write_prompt(&self.output_dir, date, &text).await?;
        tracing::info!(path = %path.display(), "prompt saved");
        Ok(Prompt { text, path })
    }

    async fn request_completion(&self) -> Result<String> {
        let body = ChatRequest {
            messages: vec![ChatMessage {
                role: "user",
                content: &self.instruction,
            }],
        };

        let transport = |e: reqwest::Error| {
            PipelineError::Generation(format!("completion request failed: {}", e))
        };
        let response = self
            .client
            .post(self.url())
            .query(&[("api-version", self.api_version.as_str())])
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let text = response.text().await.map_err(transport)?;
        if !status.is_success() {
            return Err(PipelineError::Generation(format!(
                "completion API returned {}: {}",
                status.as_u16(),
                sanitize_error_message(&text)
            )));
        }

        let completion: ChatResponse = serde_json::from_str(&text).map_err(|e| {
            PipelineError::Generation(format!(
                "malformed completion response ({}): {}",
                e,
                sanitize_error_message(&text)
            ))
        })?;
        extract_content(completion)
    }
}

fn extract_content(completion: ChatResponse) -> Result<String> {
    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| PipelineError::Generation("completion returned no choices".into()))?;

    match choice.message.and_then(|m| m.content) {
        Some(content) if !content.trim().is_empty() => Ok(content),
        _ => {
            let reason = choice
                .finish_reason
                .map(|r| format!(" (finish_reason: {})", r))
                .unwrap_or_default();
            Err(PipelineError::Generation(format!(
                "completion returned empty content{}",
                reason
            )))
        }
    }
}

async fn write_prompt(dir: &Path, date: NaiveDate, text: &str) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(prompt_file_name(date));
    tokio::fs::write(&path, text).await?;
    Ok(path)
}

// ── Wire format ─────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChatChoiceMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}
