use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use relay_logging::{relay_debug, relay_info, relay_warn};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use url::Url;

use crate::fetch::{ArtifactFetcher, FetchError};
use crate::http::{describe_reqwest_error, endpoint, read_failure};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("artifact download failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("analysis rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("analysis request failed: {0}")]
    Network(String),
    #[error("unexpected analysis response: {0}")]
    Decode(String),
    #[error("analysis returned no text")]
    Empty,
}

/// Turns one image into a text summary.
#[async_trait::async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(
        &self,
        image: &[u8],
        mime_type: &str,
        instruction: &str,
    ) -> Result<String, AnalysisError>;
}

/// Gemini `generateContent` with the image sent inline.
#[derive(Clone)]
pub struct GeminiAnalyzer {
    client: reqwest::Client,
    url: Url,
    api_key: String,
}

impl GeminiAnalyzer {
    pub fn new(
        client: reqwest::Client,
        api_base: &Url,
        model: &str,
        api_key: impl Into<String>,
    ) -> Result<Self, AnalysisError> {
        let url = endpoint(api_base, &format!("v1beta/models/{model}:generateContent"))
            .map_err(|e| AnalysisError::Decode(e.to_string()))?;
        Ok(Self {
            client,
            url,
            api_key: api_key.into(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[async_trait::async_trait]
impl Analyzer for GeminiAnalyzer {
    async fn analyze(
        &self,
        image: &[u8],
        mime_type: &str,
        instruction: &str,
    ) -> Result<String, AnalysisError> {
        let body = json!({
            "contents": [{
                "parts": [
                    { "text": instruction },
                    { "inline_data": { "mime_type": mime_type, "data": STANDARD.encode(image) } }
                ]
            }]
        });

        let response = self
            .client
            .post(self.url.clone())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| AnalysisError::Network(describe_reqwest_error(&err)))?;

        if !response.status().is_success() {
            let (status, body) = read_failure(response).await;
            return Err(AnalysisError::Rejected { status, body });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|err| AnalysisError::Decode(err.to_string()))?;
        let text = parsed
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.text)
            .collect::<Vec<_>>()
            .join("")
            .trim()
            .to_string();
        if text.is_empty() {
            return Err(AnalysisError::Empty);
        }
        Ok(text)
    }
}

/// Fetch and analyze each artifact in order, one at a time.
///
/// Waits `delay` before each download. A failing artifact is logged and
/// skipped; `None` means no summary could be produced at all.
pub async fn summarize_artifacts(
    fetcher: &ArtifactFetcher,
    analyzer: &dyn Analyzer,
    urls: &[String],
    instruction: &str,
    delay: Duration,
) -> Option<String> {
    let mut summaries = Vec::new();
    for (idx, url) in urls.iter().enumerate() {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        relay_debug!("Analyzing artifact {}/{}", idx + 1, urls.len());
        let result = match fetcher.fetch(url).await {
            Ok(artifact) => {
                analyzer
                    .analyze(&artifact.bytes, &artifact.mime_type, instruction)
                    .await
            }
            Err(err) => Err(AnalysisError::from(err)),
        };
        match result {
            Ok(text) => summaries.push((idx + 1, text)),
            Err(err) => relay_warn!("Analysis of artifact {} skipped: {}", idx + 1, err),
        }
    }

    match summaries.len() {
        0 => None,
        1 => summaries.pop().map(|(_, text)| text),
        n => {
            relay_info!("Analysis produced {} summaries", n);
            Some(
                summaries
                    .into_iter()
                    .map(|(page, text)| format!("[{page}] {text}"))
                    .collect::<Vec<_>>()
                    .join("\n\n"),
            )
        }
    }
}
