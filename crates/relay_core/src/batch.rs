use thiserror::Error;

use crate::cache::cache_defeat;
use crate::{OutboundMessage, TextPlacement};

/// Messages the messaging API accepts in one delivery call.
pub const DEFAULT_MAX_MESSAGES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    pub max_messages: usize,
    pub text_placement: TextPlacement,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            max_messages: DEFAULT_MAX_MESSAGES,
            text_placement: TextPlacement::Before,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    #[error("nothing to deliver: no text and no images")]
    Empty,
    #[error("batch capacity must be at least 1")]
    ZeroCapacity,
}

/// Ordered messages for a single delivery call, never longer than the cap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryBatch {
    pub messages: Vec<OutboundMessage>,
    /// Trailing images left out to fit the cap.
    pub dropped_images: usize,
}

impl DeliveryBatch {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn image_count(&self) -> usize {
        self.messages.iter().filter(|m| !m.is_text()).count()
    }
}

/// Builds the delivery batch for one call.
///
/// Text always survives: when text plus images exceed the cap, images are
/// dropped from the end until the batch fits. Blank text counts as absent.
/// With `stamp` set, every kept image URL receives a cache-defeat suffix
/// built from the stamp and its 1-based position in `images`.
pub fn plan_batch(
    text: Option<&str>,
    images: &[String],
    policy: &BatchPolicy,
    stamp: Option<&str>,
) -> Result<DeliveryBatch, BatchError> {
    if policy.max_messages == 0 {
        return Err(BatchError::ZeroCapacity);
    }
    let text = text.filter(|t| !t.trim().is_empty());
    if text.is_none() && images.is_empty() {
        return Err(BatchError::Empty);
    }

    let image_room = policy.max_messages - usize::from(text.is_some());
    let kept = images.len().min(image_room);
    let dropped_images = images.len() - kept;

    let image_messages = images.iter().take(kept).enumerate().map(|(idx, url)| {
        let url = match stamp {
            Some(stamp) => cache_defeat(url, stamp, idx + 1),
            None => url.clone(),
        };
        OutboundMessage::image(url)
    });

    let mut messages = Vec::with_capacity(kept + 1);
    match (text, policy.text_placement) {
        (Some(text), TextPlacement::Before) => {
            messages.push(OutboundMessage::text(text));
            messages.extend(image_messages);
        }
        (Some(text), TextPlacement::After) => {
            messages.extend(image_messages);
            messages.push(OutboundMessage::text(text));
        }
        (None, _) => messages.extend(image_messages),
    }

    Ok(DeliveryBatch {
        messages,
        dropped_images,
    })
}
