//! Publishing to YouTube.

mod oauth;
mod youtube;

pub use oauth::{ClientSecret, ConsentRequest, InstalledAppFlow};
pub use youtube::{
    Privacy, PublishResult, VideoMetadata, YouTubePublisher, YouTubePublisherBuilder,
    DEFAULT_TAGS, UPLOAD_SCOPE,
};
