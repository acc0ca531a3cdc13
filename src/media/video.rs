use crate::Result;
use base64::Engine as _;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::{info, warn};

/// Hard ceiling on inline video payloads (15 MiB).
pub const MAX_VIDEO_BYTES: u64 = 15 * 1024 * 1024;

const MP4_DATA_URI_PREFIX: &str = "data:video/mp4;base64,";

/// Video input as accepted at the node boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoInput {
    RemoteUrl(String),
    /// Already encoded `data:` URI, sent as is.
    DataUri(String),
    LocalFile(PathBuf),
    InMemoryBytes(Vec<u8>),
}

impl VideoInput {
    /// Classify a user-supplied string. Blank input means no video.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }

        if is_remote_url(input) {
            Some(VideoInput::RemoteUrl(input.to_string()))
        } else if input.starts_with("data:") {
            Some(VideoInput::DataUri(input.to_string()))
        } else {
            Some(VideoInput::LocalFile(PathBuf::from(input)))
        }
    }
}

pub fn is_remote_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Result of encoding a video input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedVideo {
    /// Remote URL or `data:video/mp4;base64,...` URI.
    Url(String),
    TooLarge { bytes: u64 },
    NotFound(PathBuf),
}

impl EncodedVideo {
    pub fn into_url(self) -> Option<String> {
        match self {
            EncodedVideo::Url(url) => Some(url),
            _ => None,
        }
    }
}

pub async fn encode_video(input: &VideoInput) -> Result<EncodedVideo> {
    encode_video_with_limit(input, MAX_VIDEO_BYTES).await
}

/// Encode a video, refusing anything larger than `limit` bytes.
///
/// Local files are checked by metadata before any bytes are read.
pub async fn encode_video_with_limit(input: &VideoInput, limit: u64) -> Result<EncodedVideo> {
    match input {
        VideoInput::RemoteUrl(url) | VideoInput::DataUri(url) => Ok(EncodedVideo::Url(url.clone())),
        VideoInput::LocalFile(path) => {
            let metadata = match tokio::fs::metadata(path).await {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    warn!("Video file not found: {}", path.display());
                    return Ok(EncodedVideo::NotFound(path.clone()));
                }
                Err(e) => return Err(e.into()),
            };

            if !metadata.is_file() {
                warn!("Video path is not a file: {}", path.display());
                return Ok(EncodedVideo::NotFound(path.clone()));
            }

            let size = metadata.len();
            if size > limit {
                warn_too_large(size, limit);
                return Ok(EncodedVideo::TooLarge { bytes: size });
            }

            let bytes = tokio::fs::read(path).await?;
            info!(
                "Encoding video {} ({:.2} MB)",
                path.display(),
                megabytes(bytes.len() as u64)
            );
            Ok(EncodedVideo::Url(to_data_uri(&bytes)))
        }
        VideoInput::InMemoryBytes(bytes) => {
            let size = bytes.len() as u64;
            if size > limit {
                warn_too_large(size, limit);
                return Ok(EncodedVideo::TooLarge { bytes: size });
            }

            info!("Encoding in-memory video ({:.2} MB)", megabytes(size));
            Ok(EncodedVideo::Url(to_data_uri(bytes)))
        }
    }
}

fn to_data_uri(bytes: &[u8]) -> String {
    format!(
        "{}{}",
        MP4_DATA_URI_PREFIX,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

fn warn_too_large(size: u64, limit: u64) {
    warn!(
        "Video too large: {:.2} MB exceeds the {:.2} MB limit",
        megabytes(size),
        megabytes(limit)
    );
    warn!("Use a remote video URL or a shorter clip instead");
}

fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}
