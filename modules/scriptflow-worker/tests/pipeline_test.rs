//! End-to-end pipeline tests over mock collaborators: stage ordering,
//! cache paths, copy mode, delivery contract, timeout and fallback
//! behavior.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use scriptflow_cache::MemoryKv;
use scriptflow_common::{
    GenerationMode, JobPayload, JobRecord, JobStatus, ReelAnalysis, ReelAnalysisRecord,
    ScriptSections, ServiceError,
};
use scriptflow_runtime::{
    BreakerConfig, BreakerRegistry, JobProcessor, ProgressReporter, SessionManager, Telemetry,
};
use scriptflow_store::testutil::MemoryStore;
use scriptflow_store::{AnalysisRepo, ScriptRepo};
use scriptflow_worker::{
    mint_public_id_with, CardRenderer, ImageHost, MediaAttachment, Messenger, PipelineWorker,
    ScriptGenerator, VideoSource, WorkerConfig, FALLBACK_MARKER,
};

// ---------------------------------------------------------------------------
// Mocks
// ---------------------------------------------------------------------------

const SCRIPT_TEXT: &str = "[HOOK]\nGenerated hook\n\n[BODY]\nGenerated body\n\n[CTA]\nGenerated cta";

struct MockGenerator {
    text_calls: AtomicU32,
    multimodal_calls: AtomicU32,
    analyze_calls: AtomicU32,
    fail_generation: bool,
}

impl MockGenerator {
    fn new() -> Self {
        Self {
            text_calls: AtomicU32::new(0),
            multimodal_calls: AtomicU32::new(0),
            analyze_calls: AtomicU32::new(0),
            fail_generation: false,
        }
    }

    fn failing() -> Self {
        Self {
            fail_generation: true,
            ..Self::new()
        }
    }
}

#[async_trait]
impl ScriptGenerator for MockGenerator {
    async fn generate_text(&self, _prompt: &str) -> Result<String, ServiceError> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_generation {
            return Err(ServiceError::Upstream {
                service: "generation".to_string(),
                message: "model overloaded".to_string(),
            });
        }
        Ok(SCRIPT_TEXT.to_string())
    }

    async fn generate_multimodal(
        &self,
        _prompt: &str,
        _media: &[MediaAttachment],
    ) -> Result<String, ServiceError> {
        self.multimodal_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_generation {
            return Err(ServiceError::Upstream {
                service: "generation".to_string(),
                message: "model overloaded".to_string(),
            });
        }
        Ok(SCRIPT_TEXT.to_string())
    }

    async fn analyze(
        &self,
        _prompt: &str,
        _media: &[MediaAttachment],
    ) -> Result<ReelAnalysis, ServiceError> {
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);
        Ok(ReelAnalysis {
            transcript: Some("Watch this. It matters. Follow me.".to_string()),
            tone: Some("energetic".to_string()),
            hook_type: Some("question".to_string()),
            ..Default::default()
        })
    }

    fn version(&self) -> String {
        "mock/1".to_string()
    }
}

struct MockVideo {
    fetch_called: AtomicBool,
    duration: f64,
}

impl MockVideo {
    fn new() -> Self {
        Self {
            fetch_called: AtomicBool::new(false),
            duration: 22.0,
        }
    }

    fn with_duration(duration: f64) -> Self {
        Self {
            fetch_called: AtomicBool::new(false),
            duration,
        }
    }
}

#[async_trait]
impl VideoSource for MockVideo {
    async fn fetch(&self, _url: &str, dir: &Path, name: &str) -> Result<PathBuf, ServiceError> {
        self.fetch_called.store(true, Ordering::SeqCst);
        let path = dir.join(format!("{name}.mp4"));
        std::fs::write(&path, b"fake video").unwrap();
        Ok(path)
    }

    async fn probe_duration(&self, _video: &Path) -> Result<f64, ServiceError> {
        Ok(self.duration)
    }

    async fn extract_frames(
        &self,
        _video: &Path,
        dir: &Path,
        _duration_secs: f64,
    ) -> Result<Vec<PathBuf>, ServiceError> {
        std::fs::create_dir_all(dir).unwrap();
        let mut frames = Vec::new();
        for i in 0..2 {
            let frame = dir.join(format!("frame_{i:03}.jpg"));
            std::fs::write(&frame, b"jpeg").unwrap();
            frames.push(frame);
        }
        Ok(frames)
    }

    async fn extract_audio(&self, _video: &Path, dir: &Path) -> Result<PathBuf, ServiceError> {
        std::fs::create_dir_all(dir).unwrap();
        let audio = dir.join("audio.wav");
        std::fs::write(&audio, b"wav").unwrap();
        Ok(audio)
    }
}

struct MockRenderer;

#[async_trait]
impl CardRenderer for MockRenderer {
    async fn render(&self, _sections: &ScriptSections) -> Result<Vec<u8>, ServiceError> {
        Ok(vec![0x89, 0x50, 0x4e, 0x47])
    }
}

struct MockHost;

#[async_trait]
impl ImageHost for MockHost {
    async fn upload(&self, _image: &[u8], name: &str) -> Result<String, ServiceError> {
        Ok(format!("https://img.example/{name}.png"))
    }
}

#[derive(Default)]
struct MockMessenger {
    calls: Mutex<Vec<String>>,
    fail_fields: Vec<String>,
}

impl MockMessenger {
    fn failing_field(field: &str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_fields: vec![field.to_string()],
        }
    }

    fn log(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Messenger for MockMessenger {
    async fn set_field(
        &self,
        _subscriber_id: &str,
        field: &str,
        _value: &str,
    ) -> Result<(), ServiceError> {
        if self.fail_fields.iter().any(|f| f == field) {
            return Err(ServiceError::Upstream {
                service: "messaging".to_string(),
                message: format!("field {field} rejected"),
            });
        }
        self.calls.lock().unwrap().push(format!("field:{field}"));
        Ok(())
    }

    async fn send_text(&self, _subscriber_id: &str, text: &str) -> Result<(), ServiceError> {
        self.calls.lock().unwrap().push(format!("text:{text}"));
        Ok(())
    }

    async fn send_card(
        &self,
        _subscriber_id: &str,
        _title: &str,
        _subtitle: &str,
        _image_url: &str,
        _view_url: &str,
    ) -> Result<(), ServiceError> {
        self.calls.lock().unwrap().push("card".to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

struct Fixture {
    store: Arc<MemoryStore>,
    telemetry: Arc<Telemetry>,
    messenger: Arc<MockMessenger>,
    generator: Arc<MockGenerator>,
    video: Arc<MockVideo>,
    worker: PipelineWorker,
    temp: tempfile::TempDir,
}

fn fixture_with(
    generator: MockGenerator,
    video: MockVideo,
    messenger: MockMessenger,
    mut config: WorkerConfig,
) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let telemetry = Telemetry::new();
    let breakers = Arc::new(BreakerRegistry::new(BreakerConfig::default(), None));
    let sessions = Arc::new(SessionManager::new(Arc::new(MemoryKv::new())));
    let generator = Arc::new(generator);
    let video = Arc::new(video);
    let messenger = Arc::new(messenger);
    let temp = tempfile::tempdir().unwrap();
    config.temp_root = temp.path().to_path_buf();

    let worker = PipelineWorker::new(
        store.clone(),
        breakers,
        telemetry.clone(),
        sessions,
        generator.clone(),
        video.clone(),
        Arc::new(MockRenderer),
        Arc::new(MockHost),
        messenger.clone(),
        config,
    );

    Fixture {
        store,
        telemetry,
        messenger,
        generator,
        video,
        worker,
        temp,
    }
}

fn fixture() -> Fixture {
    fixture_with(
        MockGenerator::new(),
        MockVideo::new(),
        MockMessenger::default(),
        WorkerConfig::default(),
    )
}

fn job(request_hash: &str, attempts: i32) -> JobRecord {
    JobRecord {
        job_id: Uuid::new_v4(),
        subscriber_id: "12345".to_string(),
        request_hash: request_hash.to_string(),
        payload: JobPayload {
            subscriber_id: "12345".to_string(),
            reel_url: "https://www.instagram.com/reel/AbC".to_string(),
            reel_hash: "reel-hash-1".to_string(),
            request_hash: request_hash.to_string(),
            user_idea: "make it about coding".to_string(),
            variation_index: 0,
            mode: GenerationMode::Full,
            is_copy_mode: false,
            tone_hint: None,
            language_hint: None,
            intensity: Default::default(),
        },
        status: JobStatus::Processing,
        priority: 0,
        attempts,
        max_attempts: 3,
        error: None,
        result_script_id: None,
        heartbeat_at: None,
        started_at: Some(Utc::now()),
        completed_at: None,
        created_at: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn uncached_job_generates_persists_and_delivers_in_order() {
    let fx = fixture();
    let record = job("req-1", 1);

    let script_id = fx
        .worker
        .process(&record, ProgressReporter::detached(record.job_id))
        .await
        .unwrap();

    // Script persisted with the canonical layout and a valid public id
    let script = fx.store.find_by_request_hash("req-1").await.unwrap().unwrap();
    assert_eq!(script.id, script_id);
    assert!(script.script_text.contains("[HOOK]"));
    assert!(scriptflow_common::validate::is_valid_public_id(&script.public_id));
    assert_eq!(script.image_urls.len(), 1);
    assert!(script.script_url.as_deref().unwrap().contains(&script.public_id));

    // Tier-1 cache warmed
    assert!(fx.store.fresh_analysis("reel-hash-1").await.unwrap().is_some());

    // Dataset record appended
    assert_eq!(fx.store.dataset_len(), 1);

    // Copy-URL field strictly before image-URL field, then the card
    let log = fx.messenger.log();
    let copy_idx = log.iter().position(|c| c == "field:script_copy_url").unwrap();
    let image_idx = log.iter().position(|c| c == "field:script_image_url").unwrap();
    assert!(copy_idx < image_idx);
    assert!(log.contains(&"card".to_string()));

    // Multimodal one-shot, then a structured analysis pass
    assert_eq!(fx.generator.multimodal_calls.load(Ordering::SeqCst), 1);
    assert_eq!(fx.generator.analyze_calls.load(Ordering::SeqCst), 1);
    assert_eq!(fx.generator.text_calls.load(Ordering::SeqCst), 0);

    // Scratch directory cleaned up
    assert_eq!(std::fs::read_dir(fx.temp.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn tier1_hit_skips_download_and_uses_text_generation() {
    let fx = fixture();
    fx.store
        .upsert_analysis(&ReelAnalysisRecord {
            reel_hash: "reel-hash-1".to_string(),
            canonical_url: "https://www.instagram.com/reel/AbC".to_string(),
            analysis: ReelAnalysis {
                transcript: Some("Cached transcript. With sentences. Done.".to_string()),
                ..Default::default()
            },
            video_url: None,
            expires_at: Utc::now() + chrono::Duration::days(1),
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    let record = job("req-1", 1);
    fx.worker
        .process(&record, ProgressReporter::detached(record.job_id))
        .await
        .unwrap();

    assert!(!fx.video.fetch_called.load(Ordering::SeqCst));
    assert_eq!(fx.generator.text_calls.load(Ordering::SeqCst), 1);
    assert_eq!(fx.generator.multimodal_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn copy_mode_formats_transcript_without_calling_the_generator() {
    let fx = fixture();
    let mut record = job("req-1", 1);
    record.payload.is_copy_mode = true;

    fx.worker
        .process(&record, ProgressReporter::detached(record.job_id))
        .await
        .unwrap();

    let script = fx.store.find_by_request_hash("req-1").await.unwrap().unwrap();
    // Transcript sentences allocated: first → hook, last → CTA
    assert!(script.script_text.contains("Watch this."));
    assert!(script.script_text.contains("Follow me."));
    assert_eq!(fx.generator.text_calls.load(Ordering::SeqCst), 0);
    assert_eq!(fx.generator.multimodal_calls.load(Ordering::SeqCst), 0);
    assert_eq!(fx.generator.analyze_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn messaging_failure_never_fails_the_job() {
    let fx = fixture_with(
        MockGenerator::new(),
        MockVideo::new(),
        MockMessenger::failing_field("script_copy_url"),
        WorkerConfig::default(),
    );
    let record = job("req-1", 1);

    let result = fx
        .worker
        .process(&record, ProgressReporter::detached(record.job_id))
        .await;
    assert!(result.is_ok());

    // The trigger field must not fire when the copy URL never landed
    let log = fx.messenger.log();
    assert!(!log.iter().any(|c| c == "field:script_image_url"));
    assert!(!log.contains(&"card".to_string()));

    // The artifact is still durable and retrievable
    assert!(fx.store.find_by_request_hash("req-1").await.unwrap().is_some());
}

#[tokio::test]
async fn exhausted_deadline_times_out_and_cleans_up() {
    let mut config = WorkerConfig::default();
    config.job_timeout = Duration::ZERO;
    let fx = fixture_with(
        MockGenerator::new(),
        MockVideo::new(),
        MockMessenger::default(),
        config,
    );
    let record = job("req-1", 1);

    let result = fx
        .worker
        .process(&record, ProgressReporter::detached(record.job_id))
        .await;
    assert!(matches!(result, Err(ServiceError::Timeout { .. })));

    // Timeout error counted once
    assert_eq!(
        fx.telemetry.errors_total.with_label_values(&["timeout"]).get(),
        1
    );

    // Scratch removed on the error path; retryable non-final attempt sends
    // no fallback
    assert_eq!(std::fs::read_dir(fx.temp.path()).unwrap().count(), 0);
    assert!(fx.messenger.log().is_empty());
}

#[tokio::test]
async fn over_long_video_is_permanent_and_delivers_fallback() {
    let fx = fixture_with(
        MockGenerator::new(),
        MockVideo::with_duration(400.0),
        MockMessenger::default(),
        WorkerConfig::default(),
    );
    let record = job("req-1", 1);

    let result = fx
        .worker
        .process(&record, ProgressReporter::detached(record.job_id))
        .await;
    assert!(matches!(result, Err(ServiceError::PermanentUpstream { .. })));

    // Permanent failure on the first attempt is final: fallback goes out
    let log = fx.messenger.log();
    assert!(log.iter().any(|c| c.starts_with("text:") && c.contains(FALLBACK_MARKER)));
    assert!(log.iter().any(|c| c.contains("make it about coding")));
}

#[tokio::test]
async fn final_retry_exhaustion_delivers_fallback() {
    let fx = fixture_with(
        MockGenerator::failing(),
        MockVideo::new(),
        MockMessenger::default(),
        WorkerConfig::default(),
    );
    // attempts == max_attempts: this is the last try
    let record = job("req-1", 3);

    let result = fx
        .worker
        .process(&record, ProgressReporter::detached(record.job_id))
        .await;
    assert!(matches!(result, Err(ServiceError::Upstream { .. })));

    let log = fx.messenger.log();
    assert!(log.iter().any(|c| c.contains(FALLBACK_MARKER)));
}

#[tokio::test]
async fn non_final_transient_failure_sends_no_fallback() {
    let fx = fixture_with(
        MockGenerator::failing(),
        MockVideo::new(),
        MockMessenger::default(),
        WorkerConfig::default(),
    );
    let record = job("req-1", 1);

    let result = fx
        .worker
        .process(&record, ProgressReporter::detached(record.job_id))
        .await;
    assert!(matches!(result, Err(ServiceError::Upstream { .. })));
    assert!(fx.messenger.log().is_empty());
}

#[tokio::test]
async fn public_id_minting_retries_on_collision() {
    let store = MemoryStore::new();
    store
        .insert_script(&scriptflow_common::ScriptRecord {
            id: Uuid::new_v4(),
            request_hash: "other".to_string(),
            public_id: "TAKEN-01".to_string(),
            subscriber_id: "12345".to_string(),
            reel_url: "https://u/reel/A".to_string(),
            reel_hash: "rh".to_string(),
            user_idea: "idea".to_string(),
            variation_index: 0,
            mode: GenerationMode::Full,
            script_text: "[HOOK]\nx".to_string(),
            image_urls: vec![],
            script_url: None,
            generator_version: "mock".to_string(),
            generation_ms: 0,
            quality_score: None,
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    let mut draws = vec!["TAKEN-01".to_string(), "FRESH-02".to_string()].into_iter();
    let minted = mint_public_id_with(&store, move || draws.next().unwrap())
        .await
        .unwrap();
    assert_eq!(minted, "FRESH-02");
}
