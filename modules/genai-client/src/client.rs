use std::time::Duration;

use base64::Engine;
use tracing::debug;

use crate::error::{GenAiError, Result};
use crate::schema::StructuredOutput;
use crate::types::*;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Version string recorded on every generated script.
pub const GENERATOR_VERSION: &str = "genai/gemini-2.0-flash";

pub struct GenAiClient {
    api_key: String,
    project_id: String,
    model: String,
    base_url: String,
    http: reqwest::Client,
}

impl GenAiClient {
    pub fn new(project_id: &str, api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            project_id: project_id.to_string(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("Failed to build generator HTTP client"),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        debug!(model = %self.model, project = %self.project_id, "Generator request");

        let resp = self
            .http
            .post(&url)
            .header("x-goog-user-project", &self.project_id)
            .json(request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GenAiError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        Ok(resp.json().await?)
    }

    fn media_parts(media: &[MediaPart]) -> Vec<Part> {
        media
            .iter()
            .map(|m| Part::InlineData {
                mime_type: m.mime_type.clone(),
                data: base64::engine::general_purpose::STANDARD.encode(&m.bytes),
            })
            .collect()
    }

    /// Text-only completion. Used when a cached analysis makes the
    /// multimodal pass unnecessary.
    pub async fn generate_text(&self, prompt: &str) -> Result<String> {
        let request = GenerateRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![Part::Text(prompt.to_string())],
            }],
            generation_config: Some(GenerationConfig {
                temperature: Some(0.8),
                max_output_tokens: Some(2048),
                ..Default::default()
            }),
        };

        let response = self.generate(&request).await?;
        response.text().ok_or(GenAiError::Empty)
    }

    /// One-shot multimodal completion over frames and audio.
    pub async fn generate_multimodal(&self, prompt: &str, media: &[MediaPart]) -> Result<String> {
        let mut parts = vec![Part::Text(prompt.to_string())];
        parts.extend(Self::media_parts(media));

        let request = GenerateRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts,
            }],
            generation_config: Some(GenerationConfig {
                temperature: Some(0.8),
                max_output_tokens: Some(2048),
                ..Default::default()
            }),
        };

        let response = self.generate(&request).await?;
        response.text().ok_or(GenAiError::Empty)
    }

    /// Schema-constrained structured analysis of the reel media.
    pub async fn analyze_video(&self, prompt: &str, media: &[MediaPart]) -> Result<VideoAnalysis> {
        let mut parts = vec![Part::Text(prompt.to_string())];
        parts.extend(Self::media_parts(media));

        let request = GenerateRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts,
            }],
            generation_config: Some(GenerationConfig {
                temperature: Some(0.2),
                max_output_tokens: Some(2048),
                response_mime_type: Some("application/json".to_string()),
                response_schema: Some(VideoAnalysis::response_schema()),
            }),
        };

        let response = self.generate(&request).await?;
        let text = response.text().ok_or(GenAiError::Empty)?;
        Ok(serde_json::from_str(&text)?)
    }
}
