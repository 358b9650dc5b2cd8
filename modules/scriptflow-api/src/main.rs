use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    http::{header, HeaderValue},
    routing::{get, post},
    Router,
};
use tokio::sync::Mutex;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use genai_client::GenAiClient;
use manychat_client::ManyChatClient;
use scriptflow_cache::{KvStore, RedisKv};
use scriptflow_common::{AppConfig, ImageProvider};
use scriptflow_media::{
    Downloader, Extractor, ImageUploader, Prober, RenderClient, UploadTarget,
};
use scriptflow_runtime::{
    AccessGate, BreakerConfig, BreakerRegistry, JobQueue, QueueConfig, SessionManager, Telemetry,
    VariationCounter,
};
use scriptflow_store::{AnalysisRepo, DocumentStore, JobRepo, PgStore};
use scriptflow_worker::{
    CardRenderer, MediaPipeline, Messenger, NoopRenderer, PipelineWorker, WorkerConfig,
};

mod rest;
mod state;

pub use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("scriptflow=info".parse()?),
        )
        .init();

    let config = AppConfig::from_env()?;

    // Stores first: everything else hangs off them
    let pool = scriptflow_store::connect(&config.database_url, config.queue_concurrency).await?;
    scriptflow_store::migrate::migrate(&pool).await?;
    let store: Arc<dyn DocumentStore> = Arc::new(PgStore::new(pool));

    let kv: Arc<dyn KvStore> = Arc::new(RedisKv::connect(&config.redis_url).await?);

    let telemetry = Telemetry::new();
    let breakers = Arc::new(BreakerRegistry::new(
        BreakerConfig::default(),
        Some(kv.clone()),
    ));
    telemetry.clone().watch_breakers(breakers.subscribe());

    let sessions = Arc::new(SessionManager::new(kv.clone()));
    let variations = VariationCounter::new(kv.clone());
    let gate = AccessGate::new(
        store.clone(),
        kv.clone(),
        config.beta_capacity,
        config.user_rate_limit_per_hour,
    );

    // Queue and worker pool
    let queue_config = QueueConfig {
        concurrency: config.queue_concurrency,
        rate_per_min: config.queue_rate_per_min,
        ..Default::default()
    };
    let queue = JobQueue::new(store.clone(), queue_config);

    let messenger: Arc<dyn Messenger> = Arc::new(ManyChatClient::new(&config.manychat_api_key));
    let generator = Arc::new(GenAiClient::new(
        &config.genai_project_id,
        &config.genai_api_key,
    ));
    let video = Arc::new(MediaPipeline {
        downloader: Downloader::new(&config.ytdlp_path, config.cookies_path.clone())
            .with_limits(config.max_video_bytes, config.max_video_seconds),
        prober: Prober::new(&config.ffprobe_path),
        extractor: Extractor::new(&config.ffmpeg_path),
    });
    let renderer: Arc<dyn CardRenderer> = match &config.render_service_url {
        Some(url) => Arc::new(RenderClient::new(url)),
        None => {
            warn!("RENDER_SERVICE_URL not set, using placeholder card renderer");
            Arc::new(NoopRenderer)
        }
    };
    let uploader = match config.image_provider {
        ImageProvider::Imgbb => ImageUploader::new(UploadTarget::Imgbb {
            api_key: config.image_upload_api_key.clone(),
        }),
        ImageProvider::Cloudinary => {
            let (cloud_name, preset) = config
                .image_upload_api_key
                .split_once('/')
                .unwrap_or((config.image_upload_api_key.as_str(), "scriptflow"));
            ImageUploader::new(UploadTarget::Cloudinary {
                cloud_name: cloud_name.to_string(),
                upload_preset: preset.to_string(),
            })
        }
    };

    let worker = PipelineWorker::new(
        store.clone(),
        breakers.clone(),
        telemetry.clone(),
        sessions.clone(),
        generator,
        video,
        renderer,
        Arc::new(uploader),
        messenger.clone(),
        WorkerConfig {
            job_timeout: Duration::from_secs(config.job_timeout_seconds),
            public_base_url: config.public_base_url.clone(),
            analysis_mode: config.analysis_mode,
            max_video_seconds: config.max_video_seconds,
            ..Default::default()
        },
    );
    let queue_handle = tokio::spawn(queue.clone().run(Arc::new(worker)));

    // Gauge refresh and store TTL sweeps
    {
        let telemetry = telemetry.clone();
        let store = store.clone();
        let sessions = sessions.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(15));
            loop {
                tick.tick().await;
                if let Ok(depth) = store.queue_depth().await {
                    telemetry.queue_depth.set(depth);
                }
                if let Ok(active) = store.count_processing().await {
                    telemetry.active_jobs.set(active);
                }
                if let Ok(live) = sessions.active_count().await {
                    telemetry.active_sessions.set(live as i64);
                }
            }
        });
    }
    {
        let store = store.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(3600));
            loop {
                tick.tick().await;
                match store.delete_expired_analysis().await {
                    Ok(0) => {}
                    Ok(evicted) => info!(evicted, "Evicted expired reel analyses"),
                    Err(e) => warn!(error = %e, "Analysis TTL sweep failed"),
                }
            }
        });
    }

    let app_state = Arc::new(AppState {
        config: config.clone(),
        store,
        kv,
        gate,
        sessions,
        variations,
        queue: queue.clone(),
        breakers,
        telemetry,
        messenger,
        ip_limiter: Mutex::new(HashMap::new()),
    });

    let app = Router::new()
        .route("/api/v1/script/generate", post(rest::generate::api_generate))
        .route("/api/v1/feedback", post(rest::feedback::api_feedback))
        .route("/s/{public_id}", get(rest::view::view_script))
        .route("/health", get(rest::health::health))
        .route("/health/detailed", get(rest::health::health_detailed))
        .route("/metrics", get(rest::health::metrics_text))
        .route("/metrics/json", get(rest::health::metrics_json))
        .route("/api/v1/dataset/export", get(rest::admin::dataset_export))
        .route("/api/v1/feedback/stats", get(rest::admin::feedback_stats))
        .with_state(app_state)
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        );

    let addr = format!("{}:{}", config.host, config.port);
    info!("Scriptflow API starting on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Reverse boot order: stop taking requests, then drain the queue
    info!("Shutting down, draining in-flight jobs");
    queue.shutdown();
    queue_handle.await?;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
