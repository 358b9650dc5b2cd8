//! The per-job stage graph:
//!
//! load → tier-1 cache check → (miss: download → probe → frames/audio) →
//! generate → format → render → persist → deliver.
//!
//! Every I/O call sits behind a deadline check; scratch files are removed
//! on every exit path; the messaging contract (copy-URL field strictly
//! before image-URL field) is enforced here.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use rand::RngCore;
use tracing::{info, warn};
use uuid::Uuid;

use scriptflow_common::{
    AnalysisMode, DatasetRecord, JobPayload, JobRecord, ReelAnalysis, ReelAnalysisRecord,
    ScriptRecord, ScriptSections, ServiceError,
};
use scriptflow_runtime::{
    BreakerRegistry, JobProcessor, ProgressReporter, SessionManager, Telemetry,
};
use scriptflow_store::{AnalysisRepo, DatasetRepo, DocumentStore, ScriptRepo};

use crate::context::{partition_prior_scripts, PriorContext};
use crate::copy_mode::transcript_to_sections;
use crate::deadline::Deadline;
use crate::fallback::fallback_script;
use crate::prompts::{
    build_oneshot_prompt, build_text_prompt, PromptInputs, ANALYSIS_PROMPT,
};
use crate::traits::{CardRenderer, ImageHost, MediaAttachment, Messenger, ScriptGenerator, VideoSource};

/// Draw a public id from the 48-bit URL-safe space.
pub fn random_public_id() -> String {
    let mut bytes = [0u8; 6];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Retry-on-collision draw. Collisions are vanishingly rare; five draws is
/// plenty before declaring something else broken.
pub async fn mint_public_id_with<S, F>(store: &S, mut draw: F) -> Result<String, ServiceError>
where
    S: ScriptRepo + ?Sized,
    F: FnMut() -> String,
{
    for _ in 0..5 {
        let candidate = draw();
        match store.public_id_exists(&candidate).await {
            Ok(false) => return Ok(candidate),
            Ok(true) => continue,
            Err(e) => return Err(ServiceError::Internal(e.to_string())),
        }
    }
    Err(ServiceError::Internal(
        "public id collisions on five consecutive draws".to_string(),
    ))
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub job_timeout: Duration,
    pub temp_root: PathBuf,
    pub public_base_url: String,
    pub analysis_ttl: Duration,
    pub analysis_mode: AnalysisMode,
    pub max_video_seconds: u32,
    /// Name of the subscriber field holding the copy-view URL. Must be
    /// written before `image_field`.
    pub copy_field: String,
    /// Name of the subscriber field that triggers the platform automation.
    pub image_field: String,
    /// Also push a direct card message after the field updates.
    pub deliver_dm: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            job_timeout: Duration::from_secs(300),
            temp_root: std::env::temp_dir().join("scriptflow"),
            public_base_url: "http://localhost:8080".to_string(),
            analysis_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            analysis_mode: AnalysisMode::Hybrid,
            max_video_seconds: 300,
            copy_field: "script_copy_url".to_string(),
            image_field: "script_image_url".to_string(),
            deliver_dm: true,
        }
    }
}

pub struct PipelineWorker {
    store: Arc<dyn DocumentStore>,
    breakers: Arc<BreakerRegistry>,
    telemetry: Arc<Telemetry>,
    sessions: Arc<SessionManager>,
    generator: Arc<dyn ScriptGenerator>,
    video: Arc<dyn VideoSource>,
    renderer: Arc<dyn CardRenderer>,
    images: Arc<dyn ImageHost>,
    messenger: Arc<dyn Messenger>,
    config: WorkerConfig,
}

impl PipelineWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        breakers: Arc<BreakerRegistry>,
        telemetry: Arc<Telemetry>,
        sessions: Arc<SessionManager>,
        generator: Arc<dyn ScriptGenerator>,
        video: Arc<dyn VideoSource>,
        renderer: Arc<dyn CardRenderer>,
        images: Arc<dyn ImageHost>,
        messenger: Arc<dyn Messenger>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            breakers,
            telemetry,
            sessions,
            generator,
            video,
            renderer,
            images,
            messenger,
            config,
        }
    }

    /// Best-effort prior-script context; lookup failure is logged, never
    /// propagated.
    async fn prior_context(&self, payload: &JobPayload) -> PriorContext {
        match self.store.recent_for_reel(&payload.reel_hash, 5).await {
            Ok(scripts) => partition_prior_scripts(&scripts, &payload.user_idea),
            Err(e) => {
                warn!(reel_hash = %payload.reel_hash, error = %e, "Prior-script lookup failed");
                PriorContext::default()
            }
        }
    }

    fn read_media(
        &self,
        frames: &[PathBuf],
        audio: Option<&Path>,
    ) -> Result<Vec<MediaAttachment>, ServiceError> {
        let mut media = Vec::new();
        if self.config.analysis_mode != AnalysisMode::Audio {
            for frame in frames {
                let bytes = std::fs::read(frame)
                    .map_err(|e| ServiceError::Internal(format!("frame read: {e}")))?;
                media.push(MediaAttachment {
                    mime_type: "image/jpeg".to_string(),
                    bytes,
                });
            }
        }
        if self.config.analysis_mode != AnalysisMode::Frames {
            if let Some(audio) = audio {
                let bytes = std::fs::read(audio)
                    .map_err(|e| ServiceError::Internal(format!("audio read: {e}")))?;
                media.push(MediaAttachment {
                    mime_type: "audio/wav".to_string(),
                    bytes,
                });
            }
        }
        Ok(media)
    }

    /// Cheap path: a fresh tier-1 analysis exists.
    async fn run_cached(
        &self,
        payload: &JobPayload,
        record: ReelAnalysisRecord,
        deadline: &Deadline,
        progress: &ProgressReporter,
    ) -> Result<(ScriptSections, ReelAnalysis), ServiceError> {
        let analysis = record.analysis;

        if payload.is_copy_mode {
            return Ok((transcript_to_sections(&analysis), analysis));
        }

        progress.stage("generate");
        deadline.check("generate")?;
        let prior = self.prior_context(payload).await;
        let prompt = build_text_prompt(&PromptInputs {
            idea: &payload.user_idea,
            tone: payload.tone_hint,
            intensity: payload.intensity,
            mode: payload.mode,
            language: payload.language_hint.as_deref(),
            analysis: Some(&analysis),
            prior: &prior,
        });

        let started = Instant::now();
        let text = self
            .breakers
            .call("generation", self.generator.generate_text(&prompt))
            .await?;
        self.telemetry
            .generator_duration_ms
            .observe(started.elapsed().as_millis() as f64);

        Ok((ScriptSections::parse(&text), analysis))
    }

    /// Full path: download, extract, one-shot generation, then a structured
    /// analysis call to warm the tier-1 cache.
    async fn run_uncached(
        &self,
        payload: &JobPayload,
        job_id: Uuid,
        scratch: &Path,
        deadline: &Deadline,
        progress: &ProgressReporter,
    ) -> Result<(ScriptSections, ReelAnalysis), ServiceError> {
        progress.stage("download");
        deadline.check("download")?;
        let video_path = self
            .breakers
            .call(
                "download",
                self.video
                    .fetch(&payload.reel_url, scratch, &job_id.to_string()),
            )
            .await?;

        deadline.check("probe")?;
        let duration = self
            .breakers
            .call("download", self.video.probe_duration(&video_path))
            .await?;
        if duration > self.config.max_video_seconds as f64 {
            return Err(ServiceError::PermanentUpstream {
                service: "download".to_string(),
                reason: format!(
                    "video is {duration:.0}s, max {}s",
                    self.config.max_video_seconds
                ),
            });
        }

        progress.stage("extract");
        let frames = if self.config.analysis_mode != AnalysisMode::Audio {
            deadline.check("extract_frames")?;
            self.video
                .extract_frames(&video_path, &scratch.join("frames"), duration)
                .await?
        } else {
            Vec::new()
        };
        let audio = if self.config.analysis_mode != AnalysisMode::Frames {
            deadline.check("extract_audio")?;
            Some(self.video.extract_audio(&video_path, scratch).await?)
        } else {
            None
        };
        let media = self.read_media(&frames, audio.as_deref())?;

        // Copy mode skips the generator entirely: the structured analysis is
        // the product.
        if payload.is_copy_mode {
            progress.stage("analysis");
            deadline.check("analysis")?;
            let analysis = self.analyze_and_cache(payload, &media).await?;
            return Ok((transcript_to_sections(&analysis), analysis));
        }

        progress.stage("generate");
        deadline.check("generate")?;
        let prior = self.prior_context(payload).await;
        let prompt = build_oneshot_prompt(&PromptInputs {
            idea: &payload.user_idea,
            tone: payload.tone_hint,
            intensity: payload.intensity,
            mode: payload.mode,
            language: payload.language_hint.as_deref(),
            analysis: None,
            prior: &prior,
        });

        let started = Instant::now();
        let text = self
            .breakers
            .call(
                "generation",
                self.generator.generate_multimodal(&prompt, &media),
            )
            .await?;
        self.telemetry
            .generator_duration_ms
            .observe(started.elapsed().as_millis() as f64);

        // Warm the tier-1 cache so the next request takes the cheap path.
        // Best-effort: the script is already in hand.
        progress.stage("analysis");
        deadline.check("analysis")?;
        let analysis = match self.analyze_and_cache(payload, &media).await {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!(reel_hash = %payload.reel_hash, error = %e, "Analysis pass failed, cache not warmed");
                ReelAnalysis::default()
            }
        };

        Ok((ScriptSections::parse(&text), analysis))
    }

    async fn analyze_and_cache(
        &self,
        payload: &JobPayload,
        media: &[MediaAttachment],
    ) -> Result<ReelAnalysis, ServiceError> {
        let started = Instant::now();
        let result = self
            .breakers
            .call("analysis", self.generator.analyze(ANALYSIS_PROMPT, media))
            .await;
        self.telemetry
            .analysis_duration_ms
            .observe(started.elapsed().as_millis() as f64);

        let analysis = result?;

        let record = ReelAnalysisRecord {
            reel_hash: payload.reel_hash.clone(),
            canonical_url: payload.reel_url.clone(),
            analysis: analysis.clone(),
            video_url: None,
            expires_at: Utc::now()
                + chrono::Duration::from_std(self.config.analysis_ttl)
                    .unwrap_or_else(|_| chrono::Duration::days(7)),
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.upsert_analysis(&record).await {
            warn!(reel_hash = %payload.reel_hash, error = %e, "Tier-1 cache write failed");
        }

        Ok(analysis)
    }

    /// Persist and deliver, in the contractual side-effect order.
    async fn persist_and_deliver(
        &self,
        job: &JobRecord,
        sections: &ScriptSections,
        analysis: &ReelAnalysis,
        deadline: &Deadline,
        progress: &ProgressReporter,
        started: Instant,
    ) -> Result<Uuid, ServiceError> {
        let payload = &job.payload;

        // (a) render the artifact
        progress.stage("render");
        deadline.check("render")?;
        let image = self
            .breakers
            .call("upload", self.renderer.render(sections))
            .await?;

        // (b) mint the public handle
        let public_id = mint_public_id_with(self.store.as_ref(), random_public_id).await?;

        deadline.check("upload")?;
        let image_url = self
            .breakers
            .call("upload", self.images.upload(&image, &public_id))
            .await?;

        let script_url = format!(
            "{}/s/{public_id}",
            self.config.public_base_url.trim_end_matches('/')
        );

        // (c) the durable script record
        let script = ScriptRecord {
            id: Uuid::new_v4(),
            request_hash: payload.request_hash.clone(),
            public_id: public_id.clone(),
            subscriber_id: payload.subscriber_id.clone(),
            reel_url: payload.reel_url.clone(),
            reel_hash: payload.reel_hash.clone(),
            user_idea: payload.user_idea.clone(),
            variation_index: payload.variation_index,
            mode: payload.mode,
            script_text: sections.to_script_text(),
            image_urls: vec![image_url.clone()],
            script_url: Some(script_url.clone()),
            generator_version: self.generator.version(),
            generation_ms: started.elapsed().as_millis() as i64,
            quality_score: None,
            created_at: Utc::now(),
        };
        self.store
            .insert_script(&script)
            .await
            .map_err(|e| ServiceError::Internal(format!("script insert: {e}")))?;

        // (d) the dataset record; analytics must not fail the job
        let dataset = DatasetRecord {
            id: Uuid::new_v4(),
            request_hash: payload.request_hash.clone(),
            subscriber_id: payload.subscriber_id.clone(),
            schema_version: 1,
            record: serde_json::json!({
                "reel_url": payload.reel_url,
                "user_idea": payload.user_idea,
                "variation_index": payload.variation_index,
                "mode": payload.mode.as_str(),
                "is_copy_mode": payload.is_copy_mode,
                "tone_hint": payload.tone_hint.map(|t| t.as_str()),
                "generator_version": script.generator_version,
                "generation_ms": script.generation_ms,
                "analysis": analysis,
                "script_text": script.script_text,
            }),
            overall_rating: None,
            section_feedback: None,
            feedback_text: None,
            video_performance: None,
            validated: false,
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.append_dataset(&dataset).await {
            warn!(request_hash = %payload.request_hash, error = %e, "Dataset write failed");
        }

        // (e)/(f) field updates. The platform reads both fields atomically
        // on the image-URL change event, so the copy URL must land first;
        // if it did not, the trigger field stays untouched.
        progress.stage("deliver");
        deadline.check("deliver")?;
        let copy_set = match self
            .breakers
            .call(
                "messaging",
                self.messenger
                    .set_field(&payload.subscriber_id, &self.config.copy_field, &script_url),
            )
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(subscriber_id = %payload.subscriber_id, error = %e, "Copy-URL field update failed");
                false
            }
        };

        if copy_set {
            if let Err(e) = self
                .breakers
                .call(
                    "messaging",
                    self.messenger
                        .set_field(&payload.subscriber_id, &self.config.image_field, &image_url),
                )
                .await
            {
                warn!(subscriber_id = %payload.subscriber_id, error = %e, "Image-URL field update failed");
            } else if self.config.deliver_dm {
                // (g) optional direct delivery
                if let Err(e) = self
                    .breakers
                    .call(
                        "messaging",
                        self.messenger.send_card(
                            &payload.subscriber_id,
                            "Your script is ready",
                            &format!("Version #{}", payload.variation_index + 1),
                            &image_url,
                            &script_url,
                        ),
                    )
                    .await
                {
                    warn!(subscriber_id = %payload.subscriber_id, error = %e, "Card delivery failed");
                }
            }
        }

        if let Err(e) = self
            .sessions
            .record_result(&payload.subscriber_id, &payload.request_hash, script.id)
            .await
        {
            warn!(subscriber_id = %payload.subscriber_id, error = %e, "Session update failed");
        }

        info!(
            job_id = %job.job_id,
            script_id = %script.id,
            public_id = %public_id,
            ms = script.generation_ms,
            "Script delivered"
        );
        Ok(script.id)
    }

    async fn run(
        &self,
        job: &JobRecord,
        progress: &ProgressReporter,
        deadline: &Deadline,
        scratch: &Path,
        started: Instant,
    ) -> Result<Uuid, ServiceError> {
        let payload = &job.payload;

        progress.stage("cache_check");
        deadline.check("cache_check")?;
        let cached = self
            .store
            .fresh_analysis(&payload.reel_hash)
            .await
            .map_err(|e| ServiceError::Internal(format!("tier-1 lookup: {e}")))?;

        let (sections, analysis) = match cached {
            Some(record) => {
                self.telemetry
                    .cache_events_total
                    .with_label_values(&["tier1", "hit"])
                    .inc();
                self.run_cached(payload, record, deadline, progress).await?
            }
            None => {
                self.telemetry
                    .cache_events_total
                    .with_label_values(&["tier1", "miss"])
                    .inc();
                self.run_uncached(payload, job.job_id, scratch, deadline, progress)
                    .await?
            }
        };

        self.persist_and_deliver(job, &sections, &analysis, deadline, progress, started)
            .await
    }

    /// After the last attempt the subscriber still gets something useful: a
    /// deterministic skeleton built around their idea.
    async fn deliver_fallback(&self, payload: &JobPayload) {
        let sections = fallback_script(&payload.user_idea);
        if let Err(e) = self
            .messenger
            .send_text(&payload.subscriber_id, &sections.to_script_text())
            .await
        {
            warn!(subscriber_id = %payload.subscriber_id, error = %e, "Fallback delivery failed");
        }
    }
}

#[async_trait]
impl JobProcessor for PipelineWorker {
    async fn process(
        &self,
        job: &JobRecord,
        progress: ProgressReporter,
    ) -> Result<Uuid, ServiceError> {
        let started = Instant::now();
        let deadline = Deadline::new(self.config.job_timeout);

        let scratch = self
            .config
            .temp_root
            .join(scriptflow_media::sanitize_name(&job.job_id.to_string()));
        if let Err(e) = std::fs::create_dir_all(&scratch) {
            return Err(ServiceError::Internal(format!("scratch dir: {e}")));
        }

        let result = self.run(job, &progress, &deadline, &scratch, started).await;

        // Cleanup runs on every exit path.
        if let Err(e) = std::fs::remove_dir_all(&scratch) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(job_id = %job.job_id, error = %e, "Scratch cleanup failed");
            }
        }

        match &result {
            Ok(_) => {
                self.telemetry
                    .job_duration_ms
                    .observe(started.elapsed().as_millis() as f64);
            }
            Err(err) => {
                self.telemetry
                    .errors_total
                    .with_label_values(&[err.class()])
                    .inc();
                let final_attempt = !err.is_retryable() || job.attempts >= job.max_attempts;
                if final_attempt {
                    self.deliver_fallback(&job.payload).await;
                }
            }
        }

        result
    }
}
