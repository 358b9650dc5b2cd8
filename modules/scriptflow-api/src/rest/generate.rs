//! The ingress handler: validate, gate, classify intent, resolve the
//! (url, idea, variation) triple, consult the script cache, and either
//! answer inline or enqueue. Never waits on a worker.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use scriptflow_common::{
    canonicalize_url, reel_hash, request_hash, GenerationMode, IntentParser, IntentType,
    JobPayload, JobRecord, JobStatus, Polarity, ReelAnalysis, ScriptRecord, ServiceError,
    SessionState, ToneHint,
};
use scriptflow_common::validate::{
    coerce_placeholder, validate_idea, validate_language_hint, validate_reel_url,
    validate_subscriber_id,
};
use scriptflow_runtime::{Admission, EnqueueOutcome, GateOutcome};
use scriptflow_store::{AnalysisRepo, DatasetRepo, JobRepo, ScriptRepo};
use scriptflow_worker::Messenger;

use crate::rest::{check_ip_rate_limit, error_response, IP_RATE_LIMIT_PER_HOUR};
use crate::AppState;

#[derive(Deserialize)]
pub struct GenerateRequest {
    subscriber_id: Option<String>,
    reel_url: Option<String>,
    user_idea: Option<String>,
    tone_hint: Option<String>,
    language_hint: Option<String>,
    mode: Option<String>,
}

/// Default idea for the instant flow, synthesized from whatever the tier-1
/// cache knows about the reel. Priority: niche > hook type > content type >
/// generic.
pub fn default_idea(analysis: Option<&ReelAnalysis>) -> String {
    if let Some(analysis) = analysis {
        if let Some(niche) = analysis.niche.as_deref().filter(|s| !s.trim().is_empty()) {
            return format!("a fresh take for the {niche} audience");
        }
        if let Some(hook) = analysis.hook_type.as_deref().filter(|s| !s.trim().is_empty()) {
            return format!("a script built around a {hook} hook");
        }
        if let Some(content) = analysis
            .content_type
            .as_deref()
            .filter(|s| !s.trim().is_empty())
        {
            return format!("a {content} in the same style");
        }
    }
    "a script in the same style as this reel".to_string()
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (status, Json(body)).into_response()
}

fn with_quota_headers(mut response: Response, admission: &Admission) -> Response {
    let headers = response.headers_mut();
    if let Ok(value) = admission.remaining_quota.to_string().parse() {
        headers.insert("X-RateLimit-Remaining", value);
    }
    if let Ok(value) = admission.window_reset_secs.to_string().parse() {
        headers.insert("X-RateLimit-Reset", value);
    }
    response
}

fn cached_response(script: &ScriptRecord) -> Response {
    json_response(
        StatusCode::OK,
        serde_json::json!({
            "status": "success",
            "cached": true,
            "script": script.script_text,
            "imageUrl": script.image_urls.first(),
            "scriptUrl": script.script_url,
        }),
    )
}

fn info_response(message: &str) -> Response {
    json_response(
        StatusCode::OK,
        serde_json::json!({ "status": "info", "message": message }),
    )
}

pub async fn api_generate(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    Json(body): Json<GenerateRequest>,
) -> Response {
    let started = Instant::now();
    state
        .telemetry
        .requests_total
        .with_label_values(&["generate"])
        .inc();

    let response = handle_generate(&state, addr.ip(), body).await;
    state
        .telemetry
        .ingress_duration_ms
        .observe(started.elapsed().as_millis() as f64);
    response
}

async fn handle_generate(
    state: &Arc<AppState>,
    ip: std::net::IpAddr,
    body: GenerateRequest,
) -> Response {
    // Outer per-IP limit, before any store work
    {
        let mut limiter = state.ip_limiter.lock().await;
        if limiter.len() > 10_000 {
            let cutoff = Instant::now() - std::time::Duration::from_secs(3600);
            limiter.retain(|_, entries| {
                entries.retain(|t| *t > cutoff);
                !entries.is_empty()
            });
        }
        let entries = limiter.entry(ip).or_default();
        if !check_ip_rate_limit(entries, Instant::now(), IP_RATE_LIMIT_PER_HOUR) {
            state
                .telemetry
                .errors_total
                .with_label_values(&["quota"])
                .inc();
            return json_response(
                StatusCode::TOO_MANY_REQUESTS,
                serde_json::json!({
                    "status": "error",
                    "error": "quota",
                    "message": "too many requests from this address",
                }),
            );
        }
    }

    // Vendor placeholder convention: unsubstituted {{…}} values count as
    // absent.
    let subscriber_id = coerce_placeholder(body.subscriber_id);
    let reel_url_field = coerce_placeholder(body.reel_url);
    let user_idea = coerce_placeholder(body.user_idea).unwrap_or_default();
    let tone_hint_field = coerce_placeholder(body.tone_hint);
    let language_hint = coerce_placeholder(body.language_hint);
    let mode_field = coerce_placeholder(body.mode);

    let Some(subscriber_id) = subscriber_id else {
        return error_response(&ServiceError::Validation(
            "subscriber_id is required".to_string(),
        ));
    };
    if let Err(e) = validate_subscriber_id(&subscriber_id) {
        return validation_error(state, e);
    }

    // Structural injection characters are rejected regardless of intent.
    if let Some(bad) = user_idea
        .chars()
        .find(|c| ['<', '>', '{', '}', '`'].contains(c))
    {
        return validation_error(
            state,
            ServiceError::Validation(format!("user_idea contains a disallowed character: {bad:?}")),
        );
    }

    let mode = match mode_field.as_deref() {
        None => GenerationMode::Full,
        Some(raw) => match GenerationMode::parse(raw) {
            Some(mode) => mode,
            None => {
                return validation_error(
                    state,
                    ServiceError::Validation(format!("mode must be full or hook_only, got {raw:?}")),
                )
            }
        },
    };

    let tone_hint = match tone_hint_field.as_deref() {
        None => None,
        Some(raw) => match ToneHint::parse(raw) {
            Some(tone) => Some(tone),
            None => {
                return validation_error(
                    state,
                    ServiceError::Validation(format!("unknown tone_hint {raw:?}")),
                )
            }
        },
    };
    if let Some(hint) = language_hint.as_deref() {
        if let Err(e) = validate_language_hint(hint) {
            return validation_error(state, e);
        }
    }

    // Access & quota gate
    let admission = match state.gate.check(&subscriber_id).await {
        Ok(GateOutcome::Admitted(admission)) => admission,
        Ok(GateOutcome::Waitlisted { position }) => {
            return json_response(
                StatusCode::ACCEPTED,
                serde_json::json!({
                    "status": "waitlist",
                    "position": position,
                    "message": format!(
                        "You're #{position} on the waitlist — we'll let you in as spots open up."
                    ),
                }),
            );
        }
        Err(err) => {
            state
                .telemetry
                .errors_total
                .with_label_values(&[err.class()])
                .inc();
            return error_response(&err);
        }
    };

    // Intent resolution over the free text, with any embedded URL extracted
    let (embedded_url, parsed) = IntentParser::parse_with_url(&user_idea);
    let url_field = reel_url_field.or(embedded_url);

    if let Some(raw_url) = url_field.as_deref() {
        if let Err(e) = validate_reel_url(raw_url, &state.config.supported_hosts) {
            return validation_error(state, e);
        }
    }

    let session = match state.sessions.load(&subscriber_id).await {
        Ok(session) => session,
        Err(e) => {
            warn!(subscriber_id, error = %e, "Session load failed, proceeding fresh");
            Default::default()
        }
    };

    let effective_mode = if parsed.is_hook_only {
        GenerationMode::HookOnly
    } else {
        mode
    };
    let tone = tone_hint.or(parsed.detected_tone);

    // Branch on intent, in the contractual order
    let (canonical_url, idea, is_copy, explicit_redo) = match parsed.intent {
        IntentType::Redo => {
            match (&session.last_url, &session.last_idea) {
                (Some(url), Some(idea)) => (url.clone(), idea.clone(), false, true),
                _ => {
                    return info_response(
                        "Nothing to redo yet — send me a reel link and an idea first.",
                    );
                }
            }
        }
        IntentType::Copy => match url_field.as_deref() {
            Some(url) => {
                let canonical = canonicalize_url(url);
                let idea = if parsed.cleaned_message.len() > 3 {
                    parsed.cleaned_message.clone()
                } else {
                    "transcript copy".to_string()
                };
                (canonical, idea, true, false)
            }
            None => {
                return info_response("Send the reel link you want the transcript of.");
            }
        },
        IntentType::Generate => match url_field.as_deref() {
            Some(url) => {
                let canonical = canonicalize_url(url);
                let analysis = state
                    .store
                    .fresh_analysis(&reel_hash(&canonical))
                    .await
                    .ok()
                    .flatten();
                let idea = default_idea(analysis.as_ref().map(|r| &r.analysis));
                (canonical, idea, false, false)
            }
            None => {
                return info_response("Send a reel link with that and I'll take it from there.");
            }
        },
        IntentType::Idea => {
            let idea = parsed.cleaned_message.clone();
            if let Err(e) = validate_idea(&idea) {
                return validation_error(state, e);
            }
            match url_field.as_deref() {
                Some(url) => (canonicalize_url(url), idea, false, false),
                None => match (&session.state, &session.last_url) {
                    (SessionState::AwaitingIdea, Some(url)) => (url.clone(), idea, false, false),
                    _ => {
                        return info_response(
                            "Love the idea — now send me the reel link to model it on.",
                        );
                    }
                },
            }
        }
        IntentType::PositiveFeedback | IntentType::NegativeFeedback => {
            return handle_inline_feedback(state, &subscriber_id, &session.last_request_hash, &parsed.feedback_polarity)
                .await;
        }
        IntentType::Unknown => {
            match url_field.as_deref() {
                Some(url) if parsed.cleaned_message.is_empty() => {
                    // URL only: remember it and ask for the idea
                    let canonical = canonicalize_url(url);
                    if let Err(e) = state.sessions.observe_url(&subscriber_id, &canonical).await {
                        warn!(subscriber_id, error = %e, "Session write failed");
                    }
                    let _ = state
                        .messenger
                        .send_text(
                            &subscriber_id,
                            "Got the reel! What should your version be about?",
                        )
                        .await;
                    return info_response("Reel received — asked the subscriber for an idea.");
                }
                _ => {
                    if !user_idea.trim().is_empty() {
                        // Non-trigger text too short to be an idea
                        return validation_error(
                            state,
                            ServiceError::Validation(
                                "user_idea must be at least 4 characters".to_string(),
                            ),
                        );
                    }
                    let _ = state
                        .messenger
                        .send_text(
                            &subscriber_id,
                            "Send me an Instagram reel link plus a sentence about your angle, \
                             and I'll write you a script.",
                        )
                        .await;
                    return info_response("Sent onboarding guidance.");
                }
            }
        }
    };

    // Session bookkeeping for the resolved pair
    if !explicit_redo {
        if session.last_url.as_deref() != Some(canonical_url.as_str()) {
            if let Err(e) = state.sessions.observe_url(&subscriber_id, &canonical_url).await {
                warn!(subscriber_id, error = %e, "Session write failed");
            }
        }
        if let Err(e) = state.sessions.observe_idea(&subscriber_id, &idea).await {
            warn!(subscriber_id, error = %e, "Session write failed");
        }
    }

    let response = resolve_and_enqueue(
        state,
        &subscriber_id,
        &canonical_url,
        &idea,
        effective_mode,
        is_copy,
        tone,
        language_hint,
        parsed.intensity,
        parsed.intent,
        explicit_redo,
        &admission,
    )
    .await;

    match response {
        Ok(response) => with_quota_headers(response, &admission),
        Err(err) => {
            state
                .telemetry
                .errors_total
                .with_label_values(&[err.class()])
                .inc();
            error_response(&err)
        }
    }
}

fn validation_error(state: &Arc<AppState>, err: ServiceError) -> Response {
    state
        .telemetry
        .errors_total
        .with_label_values(&[err.class()])
        .inc();
    error_response(&err)
}

async fn handle_inline_feedback(
    state: &Arc<AppState>,
    subscriber_id: &str,
    last_request_hash: &Option<String>,
    polarity: &Option<Polarity>,
) -> Response {
    let polarity_label = match polarity {
        Some(Polarity::Positive) => "positive",
        Some(Polarity::Negative) => "negative",
        None => "unknown",
    };
    state
        .telemetry
        .feedback_total
        .with_label_values(&[polarity_label])
        .inc();

    if let Some(hash) = last_request_hash {
        let rating = match polarity {
            Some(Polarity::Positive) => Some(5),
            Some(Polarity::Negative) => Some(2),
            None => None,
        };
        let update = scriptflow_store::FeedbackUpdate {
            overall_rating: rating,
            ..Default::default()
        };
        if let Err(e) = state.store.apply_feedback(hash, &update).await {
            warn!(subscriber_id, error = %e, "Inline feedback write failed");
        }
    }

    let message = match polarity {
        Some(Polarity::Positive) => {
            "Glad it landed! Send another reel whenever you're ready, or say \"another\" for a fresh take."
        }
        _ => {
            "Thanks for the honesty — say \"another\" and I'll take a different angle."
        }
    };
    let _ = state.messenger.send_text(subscriber_id, message).await;
    info_response("Feedback recorded.")
}

#[allow(clippy::too_many_arguments)]
async fn resolve_and_enqueue(
    state: &Arc<AppState>,
    subscriber_id: &str,
    canonical_url: &str,
    idea: &str,
    mode: GenerationMode,
    is_copy: bool,
    tone: Option<ToneHint>,
    language_hint: Option<String>,
    intensity: scriptflow_common::Intensity,
    intent: IntentType,
    explicit_redo: bool,
    admission: &Admission,
) -> Result<Response, ServiceError> {
    let reel_h = reel_hash(canonical_url);

    // A first-variation request consults the tier-2 cache and the in-flight
    // set before claiming a new variation.
    if !explicit_redo {
        let hash0 = request_hash(subscriber_id, canonical_url, idea, 0, mode.as_str());

        match state.store.find_by_request_hash(&hash0).await {
            Ok(Some(script)) => {
                state
                    .telemetry
                    .cache_events_total
                    .with_label_values(&["tier2", "hit"])
                    .inc();
                return Ok(cached_response(&script));
            }
            Ok(None) => {
                state
                    .telemetry
                    .cache_events_total
                    .with_label_values(&["tier2", "miss"])
                    .inc();
            }
            Err(e) => {
                warn!(error = %e, "Tier-2 cache lookup failed, continuing");
            }
        }

        if let Ok(Some(job)) = state.store.find_active_by_request_hash(&hash0).await {
            return Ok(queued_response(&job, 1, false, admission));
        }
    }

    let ticket = state
        .variations
        .get_and_increment(subscriber_id, canonical_url, idea)
        .await
        .map_err(|e| ServiceError::Unavailable(format!("variation store unreachable: {e}")))?;

    // A redo that somehow starts a fresh family still honors the cache rule
    // for variation zero.
    if explicit_redo && ticket.index == 0 {
        let hash0 = request_hash(subscriber_id, canonical_url, idea, 0, mode.as_str());
        if let Ok(Some(script)) = state.store.find_by_request_hash(&hash0).await {
            state
                .telemetry
                .cache_events_total
                .with_label_values(&["tier2", "hit"])
                .inc();
            return Ok(cached_response(&script));
        }
    }

    let hash = request_hash(
        subscriber_id,
        canonical_url,
        idea,
        ticket.index,
        mode.as_str(),
    );

    let job_id = Uuid::new_v4();
    let job = JobRecord {
        job_id,
        subscriber_id: subscriber_id.to_string(),
        request_hash: hash.clone(),
        payload: JobPayload {
            subscriber_id: subscriber_id.to_string(),
            reel_url: canonical_url.to_string(),
            reel_hash: reel_h,
            request_hash: hash.clone(),
            user_idea: idea.to_string(),
            variation_index: ticket.index,
            mode,
            is_copy_mode: is_copy,
            tone_hint: tone,
            language_hint,
            intensity,
        },
        status: JobStatus::Queued,
        priority: 0,
        attempts: 0,
        max_attempts: 3,
        error: None,
        result_script_id: None,
        heartbeat_at: None,
        started_at: None,
        completed_at: None,
        created_at: Utc::now(),
    };

    match state.queue.enqueue(job).await? {
        EnqueueOutcome::Queued(job) => {
            if let Err(e) = state
                .sessions
                .mark_processing(subscriber_id, job.job_id, &hash)
                .await
            {
                warn!(subscriber_id, error = %e, "Session write failed");
            }
            info!(
                subscriber_id,
                job_id = %job.job_id,
                variation = ticket.index,
                intent = ?intent,
                copy = is_copy,
                "Generation queued"
            );
            Ok(queued_response(&job, ticket.index + 1, ticket.advisory, admission))
        }
        EnqueueOutcome::Duplicate(job) => Ok(queued_response(
            &job,
            job.payload.variation_index + 1,
            false,
            admission,
        )),
    }
}

fn queued_response(
    job: &JobRecord,
    variation_number: u32,
    advisory: bool,
    admission: &Admission,
) -> Response {
    let mut body = serde_json::json!({
        "status": "queued",
        "jobId": job.job_id,
        "variationNumber": variation_number,
        "message": format!(
            "On it! Writing version #{variation_number} now — it'll land in your inbox shortly."
        ),
        "remainingQuota": admission.remaining_quota,
    });
    if advisory {
        body["advisory"] = serde_json::json!(
            "That's a lot of takes on one idea — a fresh idea usually beats a seventh variation."
        );
    }
    json_response(StatusCode::ACCEPTED, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_idea_prefers_niche() {
        let analysis = ReelAnalysis {
            niche: Some("fitness".to_string()),
            hook_type: Some("question".to_string()),
            content_type: Some("tutorial".to_string()),
            ..Default::default()
        };
        assert_eq!(
            default_idea(Some(&analysis)),
            "a fresh take for the fitness audience"
        );
    }

    #[test]
    fn default_idea_falls_back_hook_then_content_then_generic() {
        let hook_only = ReelAnalysis {
            hook_type: Some("bold claim".to_string()),
            content_type: Some("tutorial".to_string()),
            ..Default::default()
        };
        assert_eq!(
            default_idea(Some(&hook_only)),
            "a script built around a bold claim hook"
        );

        let content_only = ReelAnalysis {
            content_type: Some("tutorial".to_string()),
            ..Default::default()
        };
        assert_eq!(default_idea(Some(&content_only)), "a tutorial in the same style");

        assert_eq!(
            default_idea(None),
            "a script in the same style as this reel"
        );
    }

    #[test]
    fn default_idea_skips_empty_fields() {
        let analysis = ReelAnalysis {
            niche: Some("  ".to_string()),
            hook_type: Some("question".to_string()),
            ..Default::default()
        };
        assert_eq!(
            default_idea(Some(&analysis)),
            "a script built around a question hook"
        );
    }
}
