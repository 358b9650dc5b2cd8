//! Image host upload for rendered cards.

use std::time::Duration;

use base64::Engine;
use serde::Deserialize;
use tracing::info;

use crate::error::{MediaError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Supported image hosts.
pub enum UploadTarget {
    Imgbb { api_key: String },
    Cloudinary { cloud_name: String, upload_preset: String },
}

pub struct ImageUploader {
    target: UploadTarget,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct ImgbbResponse {
    data: ImgbbData,
}

#[derive(Deserialize)]
struct ImgbbData {
    url: String,
}

#[derive(Deserialize)]
struct CloudinaryResponse {
    secure_url: String,
}

impl ImageUploader {
    pub fn new(target: UploadTarget) -> Self {
        Self {
            target,
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("Failed to build upload HTTP client"),
        }
    }

    /// Upload PNG bytes, returning a public URL.
    pub async fn upload(&self, image: &[u8], name: &str) -> Result<String> {
        match &self.target {
            UploadTarget::Imgbb { api_key } => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(image);
                let form = reqwest::multipart::Form::new()
                    .text("image", encoded)
                    .text("name", name.to_string());

                let resp = self
                    .http
                    .post(format!("https://api.imgbb.com/1/upload?key={api_key}"))
                    .multipart(form)
                    .send()
                    .await
                    .map_err(|e| MediaError::ToolFailed(format!("upload failed: {e}")))?;

                let status = resp.status();
                if !status.is_success() {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(MediaError::ToolFailed(format!(
                        "image host returned {status}: {body}"
                    )));
                }

                let parsed: ImgbbResponse = resp
                    .json()
                    .await
                    .map_err(|e| MediaError::ToolFailed(format!("upload response parse: {e}")))?;
                info!(url = %parsed.data.url, "Image uploaded");
                Ok(parsed.data.url)
            }
            UploadTarget::Cloudinary {
                cloud_name,
                upload_preset,
            } => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(image);
                let form = reqwest::multipart::Form::new()
                    .text("file", format!("data:image/png;base64,{encoded}"))
                    .text("upload_preset", upload_preset.clone())
                    .text("public_id", name.to_string());

                let resp = self
                    .http
                    .post(format!(
                        "https://api.cloudinary.com/v1_1/{cloud_name}/image/upload"
                    ))
                    .multipart(form)
                    .send()
                    .await
                    .map_err(|e| MediaError::ToolFailed(format!("upload failed: {e}")))?;

                let status = resp.status();
                if !status.is_success() {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(MediaError::ToolFailed(format!(
                        "image host returned {status}: {body}"
                    )));
                }

                let parsed: CloudinaryResponse = resp
                    .json()
                    .await
                    .map_err(|e| MediaError::ToolFailed(format!("upload response parse: {e}")))?;
                info!(url = %parsed.secure_url, "Image uploaded");
                Ok(parsed.secure_url)
            }
        }
    }
}
