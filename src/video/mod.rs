//! Video generation module.

mod poll;
mod storage;
mod types;
mod veo;

pub use poll::{poll_until, PollPolicy};
pub use storage::{verify_download, StorageClient};
pub use types::{JobHandle, JobSettings, JobStatus, RemoteVideo};
pub use veo::{VeoClient, VeoClientBuilder, VIDEO_FILE_NAME};
