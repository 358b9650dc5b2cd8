//! Seams between the pipeline and its collaborators. Real implementations
//! wrap the adapter crates; tests substitute recording mocks.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;

use genai_client::{GenAiClient, GenAiError, MediaPart};
use manychat_client::{Card, ContentMessage, ManyChatClient, ManyChatError};
use scriptflow_common::{ReelAnalysis, ScriptSections, ServiceError};
use scriptflow_media::{Downloader, Extractor, ImageUploader, MediaError, Prober, RenderClient, RenderRequest};

/// Media handed to the generator.
#[derive(Debug, Clone)]
pub struct MediaAttachment {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait ScriptGenerator: Send + Sync {
    async fn generate_text(&self, prompt: &str) -> Result<String, ServiceError>;
    async fn generate_multimodal(
        &self,
        prompt: &str,
        media: &[MediaAttachment],
    ) -> Result<String, ServiceError>;
    async fn analyze(
        &self,
        prompt: &str,
        media: &[MediaAttachment],
    ) -> Result<ReelAnalysis, ServiceError>;
    fn version(&self) -> String;
}

#[async_trait]
pub trait VideoSource: Send + Sync {
    async fn fetch(&self, url: &str, dir: &Path, name: &str) -> Result<PathBuf, ServiceError>;
    async fn probe_duration(&self, video: &Path) -> Result<f64, ServiceError>;
    async fn extract_frames(
        &self,
        video: &Path,
        dir: &Path,
        duration_secs: f64,
    ) -> Result<Vec<PathBuf>, ServiceError>;
    async fn extract_audio(&self, video: &Path, dir: &Path) -> Result<PathBuf, ServiceError>;
}

#[async_trait]
pub trait CardRenderer: Send + Sync {
    async fn render(&self, sections: &ScriptSections) -> Result<Vec<u8>, ServiceError>;
}

#[async_trait]
pub trait ImageHost: Send + Sync {
    async fn upload(&self, image: &[u8], name: &str) -> Result<String, ServiceError>;
}

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn set_field(
        &self,
        subscriber_id: &str,
        field: &str,
        value: &str,
    ) -> Result<(), ServiceError>;
    async fn send_text(&self, subscriber_id: &str, text: &str) -> Result<(), ServiceError>;
    async fn send_card(
        &self,
        subscriber_id: &str,
        title: &str,
        subtitle: &str,
        image_url: &str,
        view_url: &str,
    ) -> Result<(), ServiceError>;
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn media_error(service: &str, err: MediaError) -> ServiceError {
    if err.is_permanent() {
        ServiceError::PermanentUpstream {
            service: service.to_string(),
            reason: err.to_string(),
        }
    } else if matches!(err, MediaError::Timeout(_)) {
        ServiceError::Timeout {
            stage: service.to_string(),
        }
    } else {
        ServiceError::Upstream {
            service: service.to_string(),
            message: err.to_string(),
        }
    }
}

fn genai_error(service: &str, err: GenAiError) -> ServiceError {
    if err.is_permanent() {
        ServiceError::PermanentUpstream {
            service: service.to_string(),
            reason: err.to_string(),
        }
    } else {
        ServiceError::Upstream {
            service: service.to_string(),
            message: err.to_string(),
        }
    }
}

fn messaging_error(err: ManyChatError) -> ServiceError {
    ServiceError::Upstream {
        service: "messaging".to_string(),
        message: err.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Real implementations
// ---------------------------------------------------------------------------

#[async_trait]
impl ScriptGenerator for GenAiClient {
    async fn generate_text(&self, prompt: &str) -> Result<String, ServiceError> {
        GenAiClient::generate_text(self, prompt)
            .await
            .map_err(|e| genai_error("generation", e))
    }

    async fn generate_multimodal(
        &self,
        prompt: &str,
        media: &[MediaAttachment],
    ) -> Result<String, ServiceError> {
        let parts: Vec<MediaPart> = media
            .iter()
            .map(|m| MediaPart {
                mime_type: m.mime_type.clone(),
                bytes: m.bytes.clone(),
            })
            .collect();
        GenAiClient::generate_multimodal(self, prompt, &parts)
            .await
            .map_err(|e| genai_error("generation", e))
    }

    async fn analyze(
        &self,
        prompt: &str,
        media: &[MediaAttachment],
    ) -> Result<ReelAnalysis, ServiceError> {
        let parts: Vec<MediaPart> = media
            .iter()
            .map(|m| MediaPart {
                mime_type: m.mime_type.clone(),
                bytes: m.bytes.clone(),
            })
            .collect();
        let analysis = GenAiClient::analyze_video(self, prompt, &parts)
            .await
            .map_err(|e| genai_error("analysis", e))?;
        Ok(ReelAnalysis {
            transcript: analysis.transcript,
            tone: analysis.tone,
            hook_type: analysis.hook_type,
            content_type: analysis.content_type,
            niche: analysis.niche,
            visual_cues: analysis.visual_cues,
            scene_descriptions: analysis.scene_descriptions,
        })
    }

    fn version(&self) -> String {
        genai_client::GENERATOR_VERSION.to_string()
    }
}

/// Bundles the CLI tools behind the `VideoSource` seam.
pub struct MediaPipeline {
    pub downloader: Downloader,
    pub prober: Prober,
    pub extractor: Extractor,
}

#[async_trait]
impl VideoSource for MediaPipeline {
    async fn fetch(&self, url: &str, dir: &Path, name: &str) -> Result<PathBuf, ServiceError> {
        self.downloader
            .download(url, dir, name)
            .await
            .map_err(|e| media_error("download", e))
    }

    async fn probe_duration(&self, video: &Path) -> Result<f64, ServiceError> {
        self.prober
            .duration_secs(video)
            .await
            .map_err(|e| media_error("download", e))
    }

    async fn extract_frames(
        &self,
        video: &Path,
        dir: &Path,
        duration_secs: f64,
    ) -> Result<Vec<PathBuf>, ServiceError> {
        self.extractor
            .extract_frames(video, dir, duration_secs)
            .await
            .map_err(|e| media_error("download", e))
    }

    async fn extract_audio(&self, video: &Path, dir: &Path) -> Result<PathBuf, ServiceError> {
        self.extractor
            .extract_audio(video, dir)
            .await
            .map_err(|e| media_error("download", e))
    }
}

/// Renderer used when no render service is configured: a 1x1 placeholder
/// PNG keeps the delivery path intact end to end.
pub struct NoopRenderer;

const PLACEHOLDER_PNG_B64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

#[async_trait]
impl CardRenderer for NoopRenderer {
    async fn render(&self, _sections: &ScriptSections) -> Result<Vec<u8>, ServiceError> {
        base64::engine::general_purpose::STANDARD
            .decode(PLACEHOLDER_PNG_B64)
            .map_err(|e| ServiceError::Internal(format!("placeholder decode: {e}")))
    }
}

#[async_trait]
impl CardRenderer for RenderClient {
    async fn render(&self, sections: &ScriptSections) -> Result<Vec<u8>, ServiceError> {
        self.render_card(&RenderRequest {
            hook: sections.hook.clone(),
            body: sections.body.clone(),
            cta: sections.cta.clone(),
            layout: "card".to_string(),
        })
        .await
        .map_err(|e| media_error("upload", e))
    }
}

#[async_trait]
impl ImageHost for ImageUploader {
    async fn upload(&self, image: &[u8], name: &str) -> Result<String, ServiceError> {
        ImageUploader::upload(self, image, name)
            .await
            .map_err(|e| media_error("upload", e))
    }
}

#[async_trait]
impl Messenger for ManyChatClient {
    async fn set_field(
        &self,
        subscriber_id: &str,
        field: &str,
        value: &str,
    ) -> Result<(), ServiceError> {
        self.set_custom_field(subscriber_id, field, value)
            .await
            .map_err(messaging_error)
    }

    async fn send_text(&self, subscriber_id: &str, text: &str) -> Result<(), ServiceError> {
        self.send_content(subscriber_id, &ContentMessage::Text(text.to_string()))
            .await
            .map_err(messaging_error)
    }

    async fn send_card(
        &self,
        subscriber_id: &str,
        title: &str,
        subtitle: &str,
        image_url: &str,
        view_url: &str,
    ) -> Result<(), ServiceError> {
        self.send_content(
            subscriber_id,
            &ContentMessage::Cards(vec![Card {
                title: title.to_string(),
                subtitle: Some(subtitle.to_string()),
                image_url: image_url.to_string(),
                buttons: vec![manychat_client::UrlButton::new("Open script", view_url)],
            }]),
        )
        .await
        .map_err(messaging_error)
    }
}
