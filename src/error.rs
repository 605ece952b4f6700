//! Error types for the pipeline.

use std::time::Duration;

/// Longest response body kept in log lines and display strings.
const MAX_DISPLAY_BODY: usize = 500;

/// Errors that can occur while running the pipeline.
///
/// Every stage has its own variant so a failed run tells the operator which
/// collaborator to look at. Variants that come from an HTTP response keep the
/// raw body; only the `Display` form is shortened.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Missing or invalid settings, detected before any network call.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The completion API failed or returned no usable text.
    #[error("prompt generation failed: {0}")]
    Generation(String),

    /// The video job submission was rejected.
    #[error("video job submission failed: {}", status_display(.status, .body))]
    Submission {
        /// HTTP status, when the failure came from a response.
        status: Option<u16>,
        /// Raw response body or a transport diagnostic.
        body: String,
    },

    /// The job status response was malformed, or the remote job failed.
    #[error("polling failed: {0}")]
    Polling(String),

    /// The generated asset could not be retrieved or verified.
    #[error("download failed: {0}")]
    Download(String),

    /// The hosting platform rejected the upload.
    #[error("upload failed: {}", status_display(.status, .message))]
    Upload {
        /// HTTP status, when the failure came from a response.
        status: Option<u16>,
        /// Raw response body or a local diagnostic.
        message: String,
    },

    /// A credential could not be obtained.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The poll budget ran out before the job finished.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The run was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// Network or HTTP transport error.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// I/O error (e.g., writing the prompt or video file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Returns true if rerunning the pipeline has a fair chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Submission {
                status: Some(status),
                ..
            }
            | Self::Upload {
                status: Some(status),
                ..
            } => *status == 429 || *status >= 500,
            Self::Submission { status: None, .. } => true,
            Self::Timeout(_) | Self::Network(_) => true,
            _ => false,
        }
    }

    /// Returns the raw response body attached to this error, if any.
    pub fn response_body(&self) -> Option<&str> {
        match self {
            Self::Submission {
                status: Some(_),
                body,
            } => Some(body),
            Self::Upload {
                status: Some(_),
                message,
            } => Some(message),
            _ => None,
        }
    }
}

fn status_display(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(status) => format!("{} - {}", status, sanitize_error_message(message)),
        None => sanitize_error_message(message),
    }
}

/// Shortens a response body for display, collapsing whitespace runs.
pub fn sanitize_error_message(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= MAX_DISPLAY_BODY {
        return collapsed;
    }
    let truncated: String = collapsed.chars().take(MAX_DISPLAY_BODY).collect();
    format!("{}... (truncated)", truncated)
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable() {
        assert!(PipelineError::Submission {
            status: Some(429),
            body: "quota".into()
        }
        .is_retryable());
        assert!(PipelineError::Submission {
            status: Some(503),
            body: String::new()
        }
        .is_retryable());
        assert!(PipelineError::Timeout(Duration::from_secs(30)).is_retryable());

        assert!(PipelineError::Submission {
            status: None,
            body: "connection refused".into()
        }
        .is_retryable());

        assert!(!PipelineError::Submission {
            status: Some(400),
            body: "bad".into()
        }
        .is_retryable());
        assert!(!PipelineError::Configuration("missing".into()).is_retryable());
        assert!(!PipelineError::Cancelled.is_retryable());
        assert!(!PipelineError::Upload {
            status: None,
            message: "file missing".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_response_body_is_raw() {
        let body = "x".repeat(2_000);
        let err = PipelineError::Submission {
            status: Some(500),
            body: body.clone(),
        };
        assert_eq!(err.response_body(), Some(body.as_str()));
        assert!(err.to_string().ends_with("... (truncated)"));
    }

    #[test]
    fn test_error_display() {
        let err = PipelineError::Submission {
            status: Some(429),
            body: "{\"error\": \"RESOURCE_EXHAUSTED\"}".into(),
        };
        assert_eq!(
            err.to_string(),
            "video job submission failed: 429 - {\"error\": \"RESOURCE_EXHAUSTED\"}"
        );

        let err = PipelineError::Upload {
            status: Some(500),
            message: "backend error".into(),
        };
        assert_eq!(err.to_string(), "upload failed: 500 - backend error");

        let err = PipelineError::Upload {
            status: None,
            message: "video file is empty".into(),
        };
        assert_eq!(err.to_string(), "upload failed: video file is empty");
    }

    #[test]
    fn test_sanitize_collapses_whitespace() {
        assert_eq!(sanitize_error_message("a\n   b\t c"), "a b c");
    }
}
