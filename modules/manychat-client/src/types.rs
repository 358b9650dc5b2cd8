use serde::Serialize;

/// One card in a carousel message.
#[derive(Debug, Clone, Serialize)]
pub struct Card {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    pub image_url: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<UrlButton>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UrlButton {
    #[serde(rename = "type")]
    pub button_type: String,
    pub caption: String,
    pub url: String,
}

impl UrlButton {
    pub fn new(caption: &str, url: &str) -> Self {
        Self {
            button_type: "url".to_string(),
            caption: caption.to_string(),
            url: url.to_string(),
        }
    }
}

/// Content pushed to a subscriber: plain text, a single image, or a card
/// carousel.
#[derive(Debug, Clone)]
pub enum ContentMessage {
    Text(String),
    Image { url: String },
    Cards(Vec<Card>),
}

impl ContentMessage {
    pub(crate) fn to_message_json(&self) -> serde_json::Value {
        match self {
            ContentMessage::Text(text) => serde_json::json!({
                "type": "text",
                "text": text,
            }),
            ContentMessage::Image { url } => serde_json::json!({
                "type": "image",
                "url": url,
            }),
            ContentMessage::Cards(cards) => serde_json::json!({
                "type": "cards",
                "elements": cards,
                "image_aspect_ratio": "square",
            }),
        }
    }
}
