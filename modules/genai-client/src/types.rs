use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Wire types (generateContent)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Part {
    Text(String),
    #[serde(rename_all = "camelCase")]
    InlineData { mime_type: String, data: String },
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
pub struct Candidate {
    pub content: CandidateContent,
}

#[derive(Debug, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
pub struct CandidatePart {
    #[serde(default)]
    pub text: Option<String>,
}

impl GenerateResponse {
    /// Concatenated text of the first candidate.
    pub fn text(&self) -> Option<String> {
        let candidate = self.candidates.first()?;
        let joined: String = candidate
            .content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        if joined.is_empty() {
            None
        } else {
            Some(joined)
        }
    }
}

// ---------------------------------------------------------------------------
// Structured analysis contract
// ---------------------------------------------------------------------------

/// Structured description of a reel, produced with a schema-constrained
/// completion so it deserializes reliably.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct VideoAnalysis {
    /// Spoken-word transcript, if any speech was detected.
    #[serde(default)]
    pub transcript: Option<String>,
    /// Overall delivery tone (e.g. energetic, calm, sarcastic).
    #[serde(default)]
    pub tone: Option<String>,
    /// Opening device (question, bold claim, pattern interrupt, ...).
    #[serde(default)]
    pub hook_type: Option<String>,
    /// Broad content category (tutorial, storytime, product demo, ...).
    #[serde(default)]
    pub content_type: Option<String>,
    /// Creator niche if identifiable.
    #[serde(default)]
    pub niche: Option<String>,
    #[serde(default)]
    pub visual_cues: Vec<String>,
    #[serde(default)]
    pub scene_descriptions: Vec<String>,
}

/// Media attachment for a multimodal call.
#[derive(Debug, Clone)]
pub struct MediaPart {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl MediaPart {
    pub fn jpeg(bytes: Vec<u8>) -> Self {
        Self {
            mime_type: "image/jpeg".to_string(),
            bytes,
        }
    }

    pub fn wav(bytes: Vec<u8>) -> Self {
        Self {
            mime_type: "audio/wav".to_string(),
            bytes,
        }
    }
}
