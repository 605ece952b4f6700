//! Core types for video jobs.

use serde::{Deserialize, Serialize};

/// Opaque handle of a submitted generation job (the operation name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(String);

impl JobHandle {
    /// Wraps an operation name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the operation name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fixed parameters of a generation job; the prompt is the only variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSettings {
    /// Video length in seconds.
    pub duration_secs: u32,
    /// Aspect ratio (e.g., "16:9").
    pub aspect_ratio: String,
    /// Whether Veo should generate an audio track.
    pub generate_audio: bool,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            duration_secs: 8,
            aspect_ratio: "16:9".to_string(),
            generate_audio: true,
        }
    }
}

/// Where a finished job put its video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteVideo {
    /// A `gs://` or `https://` location.
    Uri(String),
    /// Base64 video data returned inline in the operation.
    Inline(String),
}

impl std::fmt::Display for RemoteVideo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uri(uri) => f.write_str(uri),
            Self::Inline(data) => write!(f, "<inline, {} base64 chars>", data.len()),
        }
    }
}

/// One status snapshot of a generation job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// Still running.
    Pending,
    /// Finished; holds the first produced video and how many there were.
    Done {
        /// First entry of the operation's video list.
        video: RemoteVideo,
        /// Number of videos the job produced.
        count: usize,
    },
}
