pub mod error;
pub mod types;

pub use error::{ManyChatError, Result};
pub use types::{Card, ContentMessage, UrlButton};

use std::time::Duration;

const BASE_URL: &str = "https://api.manychat.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ManyChatClient {
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

impl ManyChatClient {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: BASE_URL.to_string(),
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("Failed to build messaging HTTP client"),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.to_string();
        self
    }

    async fn post(&self, path: &str, body: &serde_json::Value) -> Result<()> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ManyChatError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }

    /// Set a named custom field on a subscriber.
    ///
    /// Field updates drive the platform's automations; callers own the
    /// ordering of dependent fields.
    pub async fn set_custom_field(
        &self,
        subscriber_id: &str,
        field_name: &str,
        value: &str,
    ) -> Result<()> {
        tracing::debug!(subscriber_id, field_name, "Setting subscriber field");
        self.post(
            "/fb/subscriber/setCustomFieldByName",
            &serde_json::json!({
                "subscriber_id": subscriber_id,
                "field_name": field_name,
                "field_value": value,
            }),
        )
        .await
    }

    /// Push a content message (text, image, or carousel) to a subscriber.
    pub async fn send_content(
        &self,
        subscriber_id: &str,
        message: &ContentMessage,
    ) -> Result<()> {
        tracing::debug!(subscriber_id, "Sending content message");
        self.post(
            "/fb/sending/sendContent",
            &serde_json::json!({
                "subscriber_id": subscriber_id,
                "data": {
                    "version": "v2",
                    "content": {
                        "messages": [message.to_message_json()],
                    },
                },
                "message_tag": "ACCOUNT_UPDATE",
            }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn card_message_serializes_elements() {
        let message = ContentMessage::Cards(vec![Card {
            title: "Your script".to_string(),
            subtitle: Some("tap to copy".to_string()),
            image_url: "https://img.example/card.png".to_string(),
            buttons: vec![UrlButton::new("Open", "https://view.example/s/AbC123xy")],
        }]);
        let json = message.to_message_json();
        assert_eq!(json["type"], "cards");
        assert_eq!(json["elements"][0]["title"], "Your script");
        assert_eq!(json["elements"][0]["buttons"][0]["type"], "url");
    }

    #[test]
    fn text_message_shape() {
        let json = ContentMessage::Text("hello".to_string()).to_message_json();
        assert_eq!(json["type"], "text");
        assert_eq!(json["text"], "hello");
    }
}
