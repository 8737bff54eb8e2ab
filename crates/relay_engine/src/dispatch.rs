use std::sync::Arc;

use relay_core::{plan_batch, BatchError, BatchPolicy, OutboundMessage, Recipient};
use relay_logging::{relay_info, relay_warn};
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::http::{describe_reqwest_error, endpoint, is_retryable_status, read_failure};

const BROADCAST_PATH: &str = "v2/bot/message/broadcast";
const PUSH_PATH: &str = "v2/bot/message/push";

/// Produces the varying part of the cache-defeat suffix.
pub type StampFn = Arc<dyn Fn() -> String + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    pub policy: BatchPolicy,
    pub cache_defeat: bool,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            policy: BatchPolicy::default(),
            cache_defeat: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("delivery rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("delivery request failed: {0}")]
    Network(String),
    #[error("cannot build delivery batch: {0}")]
    Batch(#[from] BatchError),
    #[error("push recipient id is empty")]
    InvalidRecipient,
    #[error("invalid messaging endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
}

impl DeliveryError {
    pub fn is_retryable(&self) -> bool {
        match self {
            DeliveryError::Rejected { status, .. } => is_retryable_status(*status),
            DeliveryError::Network(_) => true,
            DeliveryError::Batch(_)
            | DeliveryError::InvalidRecipient
            | DeliveryError::Endpoint(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    /// Trailing images left out to respect the per-call cap.
    pub dropped_images: usize,
    pub recipient: Recipient,
}

#[derive(Serialize)]
struct DeliveryBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    to: Option<&'a str>,
    messages: &'a [OutboundMessage],
}

/// Sends one batch per call to the messaging API.
pub struct MessageDispatcher {
    client: reqwest::Client,
    broadcast_url: Url,
    push_url: Url,
    channel_token: String,
    settings: DispatchSettings,
    stamp: StampFn,
}

impl MessageDispatcher {
    pub fn new(
        client: reqwest::Client,
        api_base: &Url,
        channel_token: impl Into<String>,
        settings: DispatchSettings,
        stamp: StampFn,
    ) -> Result<Self, DeliveryError> {
        Ok(Self {
            client,
            broadcast_url: endpoint(api_base, BROADCAST_PATH)?,
            push_url: endpoint(api_base, PUSH_PATH)?,
            channel_token: channel_token.into(),
            settings,
            stamp,
        })
    }

    /// Deliver `text` and `images` in a single all-or-nothing call.
    ///
    /// When the batch would exceed the cap, trailing images are dropped and
    /// the count is reported back; the text is always kept.
    pub async fn dispatch(
        &self,
        text: Option<&str>,
        images: &[String],
        recipient: &Recipient,
    ) -> Result<DispatchReport, DeliveryError> {
        let (url, to) = match recipient {
            Recipient::Broadcast => (self.broadcast_url.clone(), None),
            Recipient::Push(id) if id.trim().is_empty() => {
                return Err(DeliveryError::InvalidRecipient)
            }
            Recipient::Push(id) => (self.push_url.clone(), Some(id.as_str())),
        };

        let stamp = self.settings.cache_defeat.then(|| (self.stamp)());
        let batch = plan_batch(text, images, &self.settings.policy, stamp.as_deref())?;
        if batch.dropped_images > 0 {
            relay_warn!(
                "Message cap {} reached: dropping the last {} of {} image(s)",
                self.settings.policy.max_messages,
                batch.dropped_images,
                images.len()
            );
        }

        let body = DeliveryBody {
            to,
            messages: &batch.messages,
        };
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.channel_token)
            .json(&body)
            .send()
            .await
            .map_err(|err| DeliveryError::Network(describe_reqwest_error(&err)))?;

        if !response.status().is_success() {
            let (status, body) = read_failure(response).await;
            return Err(DeliveryError::Rejected { status, body });
        }

        let mode = match recipient {
            Recipient::Broadcast => "broadcast",
            Recipient::Push(_) => "push",
        };
        relay_info!(
            "Delivered {} message(s) via {} ({} image(s))",
            batch.len(),
            mode,
            batch.image_count()
        );
        Ok(DispatchReport {
            sent: batch.len(),
            dropped_images: batch.dropped_images,
            recipient: recipient.clone(),
        })
    }
}
