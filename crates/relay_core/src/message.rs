use serde::Serialize;

/// One entry of the messaging API's `messages` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage {
    Text {
        text: String,
    },
    Image {
        #[serde(rename = "originalContentUrl")]
        original_content_url: String,
        #[serde(rename = "previewImageUrl")]
        preview_image_url: String,
    },
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        OutboundMessage::Text { text: text.into() }
    }

    /// Image message whose preview is the same URL as the full image.
    pub fn image(url: impl Into<String>) -> Self {
        let url = url.into();
        OutboundMessage::Image {
            preview_image_url: url.clone(),
            original_content_url: url,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, OutboundMessage::Text { .. })
    }
}

/// Who receives a delivery. Chosen by the caller, never inferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    Broadcast,
    Push(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextPlacement {
    #[default]
    Before,
    After,
}
