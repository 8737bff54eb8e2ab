use futures_util::StreamExt;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use thiserror::Error;
use url::Url;

use crate::http::describe_reqwest_error;

const DEFAULT_MAX_BYTES: u64 = 10 * 1024 * 1024;

/// Limits applied to artifact downloads.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub max_bytes: u64,
    /// Lower-case media types without parameters.
    pub accepted_media_types: Vec<String>,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            accepted_media_types: vec!["image/jpeg".into(), "image/png".into()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedArtifact {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("invalid artifact URL: {0}")]
    InvalidUrl(String),
    #[error("artifact download returned status {0}")]
    Status(u16),
    #[error("artifact download timed out")]
    Timeout,
    #[error("artifact larger than {max_bytes} bytes (at least {seen})")]
    TooLarge { max_bytes: u64, seen: u64 },
    #[error("artifact has unsupported media type {0}")]
    UnsupportedMediaType(String),
    #[error("artifact download failed: {0}")]
    Network(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Network(describe_reqwest_error(&err))
        }
    }
}

/// Downloads rendered pages so they can be handed to an analyzer.
#[derive(Debug, Clone)]
pub struct ArtifactFetcher {
    client: reqwest::Client,
    settings: FetchSettings,
}

impl ArtifactFetcher {
    pub fn new(client: reqwest::Client, settings: FetchSettings) -> Self {
        Self { client, settings }
    }

    /// Download one artifact. Signed URLs are used exactly as given.
    pub async fn fetch(&self, url: &str) -> Result<FetchedArtifact, FetchError> {
        let url = Url::parse(url).map_err(|err| FetchError::InvalidUrl(err.to_string()))?;
        let response = self.client.get(url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let declared = response.content_length().unwrap_or(0);
        self.check_size(declared)?;

        let media_type = media_type(response.headers());
        if let Some(media_type) = &media_type {
            if !self.settings.accepted_media_types.contains(media_type) {
                return Err(FetchError::UnsupportedMediaType(media_type.clone()));
            }
        }

        let mut bytes = Vec::with_capacity(declared as usize);
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            self.check_size((bytes.len() + chunk.len()) as u64)?;
            bytes.extend_from_slice(&chunk);
        }

        Ok(FetchedArtifact {
            bytes,
            mime_type: media_type.unwrap_or_else(|| media_type_from_path(&url).to_string()),
        })
    }

    fn check_size(&self, seen: u64) -> Result<(), FetchError> {
        if seen > self.settings.max_bytes {
            return Err(FetchError::TooLarge {
                max_bytes: self.settings.max_bytes,
                seen,
            });
        }
        Ok(())
    }
}

fn media_type(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(CONTENT_TYPE)?.to_str().ok()?;
    let essence = raw.split(';').next().unwrap_or(raw).trim();
    (!essence.is_empty()).then(|| essence.to_ascii_lowercase())
}

// Export links carry the file extension in the path.
fn media_type_from_path(url: &Url) -> &'static str {
    if url.path().to_ascii_lowercase().ends_with(".png") {
        "image/png"
    } else {
        "image/jpeg"
    }
}
