//! Bearer credentials.

use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use std::path::PathBuf;

/// Something that can hand out a bearer token.
///
/// Tokens are treated as opaque and short-lived; implementations are asked
/// for a fresh one before every request and do no caching.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Returns a bearer token.
    async fn access_token(&self) -> Result<String>;
}

/// Mints tokens with `gcloud auth print-access-token`.
#[derive(Debug, Clone)]
pub struct GcloudTokenSource {
    program: PathBuf,
}

impl GcloudTokenSource {
    /// Uses the given `gcloud` executable.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for GcloudTokenSource {
    fn default() -> Self {
        Self::new("gcloud")
    }
}

#[async_trait]
impl TokenSource for GcloudTokenSource {
    async fn access_token(&self) -> Result<String> {
        let output = tokio::process::Command::new(&self.program)
            .args(["auth", "print-access-token"])
            .output()
            .await
            .map_err(|e| {
                PipelineError::Auth(format!(
                    "Failed to run {}: {}. Install the gcloud CLI from https://cloud.google.com/sdk/docs/install",
                    self.program.display(),
                    e
                ))
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::Auth(format!(
                "gcloud auth failed: {}",
                stderr.trim()
            )));
        }
        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(PipelineError::Auth(
                "gcloud printed an empty access token; run `gcloud auth login`".into(),
            ));
        }
        Ok(token)
    }
}

/// A fixed token, for service-account style setups and tests.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    /// Wraps an existing token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(****)")
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}
