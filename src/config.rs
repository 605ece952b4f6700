//! Run configuration, resolved once at startup from the environment.

use crate::error::{PipelineError, Result};
use crate::video::PollPolicy;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_OUTPUT_DIR: &str = "output";
const DEFAULT_PROMPT_DIR: &str = ".";
const DEFAULT_GCLOUD: &str = "gcloud";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 120;

/// Settings for the Azure OpenAI completion API.
#[derive(Debug, Clone)]
pub struct CompletionSettings {
    /// Resource endpoint, e.g. `https://my-resource.openai.azure.com`.
    pub endpoint: String,
    /// `api-version` query parameter.
    pub api_version: String,
    /// API key sent in the `api-key` header.
    pub api_key: String,
    /// Chat model deployment name.
    pub deployment: String,
}

/// Settings for Veo on Vertex AI and the output bucket.
#[derive(Debug, Clone)]
pub struct VertexSettings {
    /// GCP project ID.
    pub project: String,
    /// GCP location (e.g. "us-central1").
    pub location: String,
    /// Veo model identifier.
    pub model_id: String,
    /// Bucket that receives generated videos.
    pub bucket: String,
    /// Resolved `gcloud` executable used to mint bearer tokens.
    pub gcloud_path: PathBuf,
}

impl VertexSettings {
    /// Storage prefix handed to the generation service.
    pub fn storage_uri(&self) -> String {
        format!("gs://{}/", self.bucket)
    }
}

/// Settings for the YouTube upload and its consent flow.
#[derive(Debug, Clone)]
pub struct PublishSettings {
    /// OAuth client-secret JSON downloaded from the Google Cloud console.
    pub client_secret_file: PathBuf,
    /// Loopback port for the OAuth redirect; 0 picks a free port.
    pub redirect_port: u16,
}

/// Complete pipeline configuration.
///
/// Built once (usually with [`PipelineConfig::from_env`]) and passed by
/// reference into each stage.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Completion API settings.
    pub completion: CompletionSettings,
    /// Video generation settings.
    pub vertex: VertexSettings,
    /// Upload settings.
    pub publish: PublishSettings,
    /// Directory for the dated prompt file.
    pub prompt_dir: PathBuf,
    /// Directory for the downloaded video.
    pub output_dir: PathBuf,
    /// How the job status is polled.
    pub poll: PollPolicy,
    /// Per-request HTTP timeout.
    pub http_timeout: Duration,
}

impl PipelineConfig {
    /// Loads `.env` (if present) and reads the configuration from the
    /// process environment.
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(PipelineError::Configuration(format!(
                    "failed to load .env: {}",
                    e
                )));
            }
        }
        Self::from_vars(std::env::vars())
    }

    /// Loads the given env file, then reads the process environment.
    pub fn from_env_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        dotenvy::from_path(path).map_err(|e| {
            PipelineError::Configuration(format!("failed to load {}: {}", path.display(), e))
        })?;
        Self::from_vars(std::env::vars())
    }

    /// Builds the configuration from explicit key/value pairs.
    ///
    /// All missing required variables are reported in a single error.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(_, v)| !v.trim().is_empty())
            .collect();

        let mut missing = Vec::new();
        let mut require = |key: &'static str| -> String {
            match vars.get(key) {
                Some(v) => v.trim().to_string(),
                None => {
                    missing.push(key);
                    String::new()
                }
            }
        };

        let completion = CompletionSettings {
            endpoint: require("AZURE_OPENAI_ENDPOINT"),
            api_version: require("AZURE_OPENAI_API_VERSION"),
            api_key: require("AZURE_OPENAI_API_KEY"),
            deployment: require("AGENT1_DEPLOYMENT"),
        };
        let project = require("PROJECT_ID");
        let location = require("LOCATION");
        let model_id = require("VEO_MODEL_ID");
        let bucket = require("BUCKET_NAME");
        let client_secret_file = require("YOUTUBE_CLIENT_SECRET_FILE");

        if !missing.is_empty() {
            return Err(PipelineError::Configuration(format!(
                "missing required environment variables: {}",
                missing.join(", ")
            )));
        }

        let client_secret_file = PathBuf::from(client_secret_file);
        if !client_secret_file.is_file() {
            return Err(PipelineError::Configuration(format!(
                "YOUTUBE_CLIENT_SECRET_FILE does not exist: {}",
                client_secret_file.display()
            )));
        }

        let gcloud = vars
            .get("GCLOUD_PATH")
            .map(String::as_str)
            .unwrap_or(DEFAULT_GCLOUD);
        let gcloud_path = resolve_executable(gcloud, vars.get("PATH").map(String::as_str))
            .ok_or_else(|| {
                PipelineError::Configuration(format!(
                    "gcloud executable not found: {} (set GCLOUD_PATH)",
                    gcloud
                ))
            })?;

        let mut poll = PollPolicy::default();
        if let Some(secs) = parse_nonzero(&vars, "POLL_INTERVAL_SECS")? {
            poll = poll.interval(Duration::from_secs(secs));
        }
        if let Some(attempts) = parse_nonzero(&vars, "POLL_MAX_ATTEMPTS")? {
            let attempts = u32::try_from(attempts).map_err(|_| {
                PipelineError::Configuration("POLL_MAX_ATTEMPTS is too large".into())
            })?;
            poll = poll.max_attempts(attempts);
        }
        if let Some(secs) = parse_nonzero(&vars, "POLL_TIMEOUT_SECS")? {
            poll = poll.timeout(Duration::from_secs(secs));
        }

        let http_timeout = Duration::from_secs(
            parse_nonzero(&vars, "HTTP_TIMEOUT_SECS")?.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
        );
        let redirect_port = match parse_u64(&vars, "OAUTH_REDIRECT_PORT")? {
            Some(port) => u16::try_from(port).map_err(|_| {
                PipelineError::Configuration(format!("OAUTH_REDIRECT_PORT out of range: {}", port))
            })?,
            None => 0,
        };

        Ok(Self {
            completion,
            vertex: VertexSettings {
                project,
                location,
                model_id,
                bucket,
                gcloud_path,
            },
            publish: PublishSettings {
                client_secret_file,
                redirect_port,
            },
            prompt_dir: vars
                .get("PROMPT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PROMPT_DIR)),
            output_dir: vars
                .get("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            poll,
            http_timeout,
        })
    }

    /// Redacted view of the configuration for display.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "completion": {
                "endpoint": self.completion.endpoint,
                "api_version": self.completion.api_version,
                "deployment": self.completion.deployment,
                "api_key": redact(&self.completion.api_key),
            },
            "vertex": {
                "project": self.vertex.project,
                "location": self.vertex.location,
                "model_id": self.vertex.model_id,
                "storage_uri": self.vertex.storage_uri(),
                "gcloud_path": self.vertex.gcloud_path.display().to_string(),
            },
            "publish": {
                "client_secret_file": self.publish.client_secret_file.display().to_string(),
                "redirect_port": self.publish.redirect_port,
            },
            "prompt_dir": self.prompt_dir.display().to_string(),
            "output_dir": self.output_dir.display().to_string(),
            "poll": {
                "interval_secs": self.poll.interval.as_secs(),
                "max_attempts": self.poll.max_attempts,
                "timeout_secs": self.poll.timeout.map(|t| t.as_secs()),
            },
            "http_timeout_secs": self.http_timeout.as_secs(),
        })
    }
}

fn parse_u64(vars: &HashMap<String, String>, key: &str) -> Result<Option<u64>> {
    vars.get(key)
        .map(|raw| {
            raw.trim().parse::<u64>().map_err(|_| {
                PipelineError::Configuration(format!("{} must be a whole number, got {:?}", key, raw))
            })
        })
        .transpose()
}

/// Like [`parse_u64`], for limits where zero would stop all work.
fn parse_nonzero(vars: &HashMap<String, String>, key: &str) -> Result<Option<u64>> {
    match parse_u64(vars, key)? {
        Some(0) => Err(PipelineError::Configuration(format!(
            "{} must be greater than zero",
            key
        ))),
        other => Ok(other),
    }
}

fn redact(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "****".into();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}

/// Resolves a command name or path to an existing file.
///
/// Names containing a path separator must point at a file; bare names are
/// searched on `path_var`.
fn resolve_executable(program: &str, path_var: Option<&str>) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let path_var = path_var?;
    std::env::split_paths(path_var).find_map(|dir| {
        let direct = dir.join(program);
        if direct.is_file() {
            return Some(direct);
        }
        if cfg!(windows) {
            ["cmd", "exe", "bat"]
                .iter()
                .map(|ext| direct.with_extension(ext))
                .find(|p| p.is_file())
        } else {
            None
        }
    })
}
