#![warn(missing_docs)]
//! autoreel - daily AI video pipeline.
//!
//! One run asks Azure OpenAI for a short visual prompt, renders it with Veo
//! on Vertex AI, downloads the result from Cloud Storage and publishes it to
//! YouTube.
//!
//! # Quick Start
//!
//! ```no_run
//! use autoreel::{Pipeline, PipelineConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> autoreel::Result<()> {
//!     let config = PipelineConfig::from_env()?;
//!     let pipeline = Pipeline::from_config(&config)?;
//!     let report = pipeline.run(&CancellationToken::new()).await?;
//!     println!("published {}", report.published.url);
//!     Ok(())
//! }
//! ```
//!
//! # Stages
//!
//! Each stage can be used on its own:
//!
//! - [`PromptGenerator`]: completion request, dated prompt file
//! - [`VeoClient`]: job submission, polling and download
//! - [`YouTubePublisher`]: OAuth consent and multipart upload
//!
//! # Features
//!
//! - `cli` (default): the `autoreel` command-line binary

pub mod auth;
pub mod config;
mod error;
pub mod pipeline;
pub mod prompt;
pub mod publish;
pub mod video;

// Re-export error types at crate root
pub use error::{sanitize_error_message, PipelineError, Result};

pub use auth::{GcloudTokenSource, StaticToken, TokenSource};
pub use config::PipelineConfig;
pub use pipeline::{video_title, Pipeline, PipelineReport, RenderedVideo};
pub use prompt::{Prompt, PromptGenerator, PromptGeneratorBuilder};
pub use publish::{InstalledAppFlow, PublishResult, VideoMetadata, YouTubePublisher};
pub use video::{JobHandle, PollPolicy, VeoClient, VeoClientBuilder};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::error::{PipelineError, Result};
    pub use crate::{
        Pipeline, PipelineConfig, PollPolicy, PromptGenerator, TokenSource, VeoClient,
        YouTubePublisher,
    };
}
