//! Card renderer client. Rendering itself is an external collaborator; this
//! is only the wire contract: script sections in, PNG bytes out.

use std::time::Duration;

use serde::Serialize;

use crate::error::{MediaError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize)]
pub struct RenderRequest {
    pub hook: String,
    pub body: String,
    pub cta: String,
    /// "card" for a single image, "carousel" for one image per section.
    pub layout: String,
}

pub struct RenderClient {
    base_url: String,
    http: reqwest::Client,
}

impl RenderClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("Failed to build render HTTP client"),
        }
    }

    pub async fn render_card(&self, request: &RenderRequest) -> Result<Vec<u8>> {
        let url = format!("{}/render", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| MediaError::ToolFailed(format!("render request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MediaError::ToolFailed(format!(
                "render service returned {status}: {body}"
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| MediaError::ToolFailed(format!("render body read failed: {e}")))?;
        Ok(bytes.to_vec())
    }
}
