use anyhow::{bail, Result};

/// Video analysis strategy for the multimodal pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisMode {
    Audio,
    Frames,
    Hybrid,
}

impl AnalysisMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "audio" => Some(AnalysisMode::Audio),
            "frames" => Some(AnalysisMode::Frames),
            "hybrid" => Some(AnalysisMode::Hybrid),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisMode::Audio => "audio",
            AnalysisMode::Frames => "frames",
            AnalysisMode::Hybrid => "hybrid",
        }
    }
}

/// Image hosting provider for rendered cards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageProvider {
    Imgbb,
    Cloudinary,
}

impl ImageProvider {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "imgbb" => Some(ImageProvider::Imgbb),
            "cloudinary" => Some(ImageProvider::Cloudinary),
            _ => None,
        }
    }
}

/// Application configuration loaded from environment variables.
/// Secrets and env-specific values only; behavior that callers tune per
/// request travels in the request itself.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // Stores
    pub database_url: String,
    pub redis_url: String,

    // Generator
    pub genai_project_id: String,
    pub genai_api_key: String,

    // Delivery
    pub image_upload_api_key: String,
    pub image_provider: ImageProvider,
    pub manychat_api_key: String,
    pub render_service_url: Option<String>,

    // Queue & quotas
    pub queue_concurrency: usize,
    pub queue_rate_per_min: u32,
    pub user_rate_limit_per_hour: u32,
    pub beta_capacity: i64,

    // Pipeline
    pub analysis_mode: AnalysisMode,
    pub max_video_seconds: u32,
    pub max_video_bytes: u64,
    pub job_timeout_seconds: u64,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub ytdlp_path: String,
    pub cookies_path: Option<String>,

    // HTTP surface
    pub host: String,
    pub port: u16,
    pub public_base_url: String,
    pub supported_hosts: Vec<String>,
    pub admin_api_key: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let analysis_mode_raw =
            std::env::var("ANALYSIS_MODE").unwrap_or_else(|_| "hybrid".to_string());
        let Some(analysis_mode) = AnalysisMode::parse(&analysis_mode_raw) else {
            bail!("ANALYSIS_MODE must be one of audio|frames|hybrid, got {analysis_mode_raw:?}");
        };

        let image_provider_raw =
            std::env::var("IMAGE_PROVIDER").unwrap_or_else(|_| "imgbb".to_string());
        let Some(image_provider) = ImageProvider::parse(&image_provider_raw) else {
            bail!("IMAGE_PROVIDER must be one of imgbb|cloudinary, got {image_provider_raw:?}");
        };

        let config = Self {
            database_url: std::env::var("DATABASE_URL")?,
            redis_url: std::env::var("REDIS_URL")?,
            genai_project_id: std::env::var("GENAI_PROJECT_ID")?,
            genai_api_key: std::env::var("GENAI_API_KEY")?,
            image_upload_api_key: std::env::var("IMAGE_UPLOAD_API_KEY")?,
            image_provider,
            manychat_api_key: std::env::var("MANYCHAT_API_KEY")?,
            render_service_url: std::env::var("RENDER_SERVICE_URL").ok(),
            queue_concurrency: env_parsed("QUEUE_CONCURRENCY", 5),
            queue_rate_per_min: env_parsed("QUEUE_RATE_PER_MIN", 10),
            user_rate_limit_per_hour: env_parsed("USER_RATE_LIMIT_PER_HOUR", 10),
            beta_capacity: env_parsed("BETA_CAPACITY", 100),
            analysis_mode,
            max_video_seconds: env_parsed("MAX_VIDEO_SECONDS", 300),
            max_video_bytes: env_parsed("MAX_VIDEO_BYTES", 50 * 1024 * 1024),
            job_timeout_seconds: env_parsed("JOB_TIMEOUT_SECONDS", 300),
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
            ffprobe_path: std::env::var("FFPROBE_PATH").unwrap_or_else(|_| "ffprobe".to_string()),
            ytdlp_path: std::env::var("YTDLP_PATH").unwrap_or_else(|_| "yt-dlp".to_string()),
            cookies_path: std::env::var("COOKIES_PATH").ok(),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_parsed("PORT", 8080),
            public_base_url: std::env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            supported_hosts: std::env::var("SUPPORTED_HOSTS")
                .unwrap_or_else(|_| "instagram.com,www.instagram.com".to_string())
                .split(',')
                .filter(|s| !s.is_empty())
                .map(|s| s.trim().to_string())
                .collect(),
            admin_api_key: std::env::var("ADMIN_API_KEY").ok(),
        };

        config.log_redacted();
        Ok(config)
    }

    pub fn log_redacted(&self) {
        fn preview(val: &str) -> String {
            let head: String = val.chars().take(5).collect();
            format!("{head}...({} chars)", val.chars().count())
        }

        tracing::info!("Config loaded:");
        tracing::info!("  GENAI_API_KEY: {}", preview(&self.genai_api_key));
        tracing::info!("  MANYCHAT_API_KEY: {}", preview(&self.manychat_api_key));
        tracing::info!("  IMAGE_UPLOAD_API_KEY: {}", preview(&self.image_upload_api_key));
        tracing::info!("  ANALYSIS_MODE: {}", self.analysis_mode.as_str());
        tracing::info!("  QUEUE_CONCURRENCY: {}", self.queue_concurrency);
        tracing::info!("  BETA_CAPACITY: {}", self.beta_capacity);
        tracing::info!("  SUPPORTED_HOSTS: {:?}", self.supported_hosts);
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
