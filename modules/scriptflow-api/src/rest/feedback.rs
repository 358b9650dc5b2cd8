//! Explicit feedback ingestion: ratings, section notes, and downstream
//! video performance, written into the dataset record and the per-user
//! memory.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use tracing::warn;

use scriptflow_common::validate::coerce_placeholder;
use scriptflow_common::ServiceError;
use scriptflow_store::{DatasetRepo, FeedbackUpdate, ScriptRepo, UserMemoryRepo};

use crate::rest::error_response;
use crate::AppState;

const FEEDBACK_TEXT_MAX: usize = 1_000;

#[derive(Deserialize)]
pub struct FeedbackRequest {
    subscriber_id: Option<String>,
    request_hash: Option<String>,
    overall_rating: Option<i32>,
    section_feedback: Option<serde_json::Value>,
    feedback_text: Option<String>,
    video_performance: Option<serde_json::Value>,
}

pub async fn api_feedback(
    State(state): State<Arc<AppState>>,
    Json(body): Json<FeedbackRequest>,
) -> Response {
    state
        .telemetry
        .requests_total
        .with_label_values(&["feedback"])
        .inc();

    let Some(subscriber_id) = coerce_placeholder(body.subscriber_id) else {
        return error_response(&ServiceError::Validation(
            "subscriber_id is required".to_string(),
        ));
    };
    let Some(request_hash) = coerce_placeholder(body.request_hash) else {
        return error_response(&ServiceError::Validation(
            "request_hash is required".to_string(),
        ));
    };

    if let Some(rating) = body.overall_rating {
        if !(1..=5).contains(&rating) {
            return error_response(&ServiceError::Validation(
                "overall_rating must be between 1 and 5".to_string(),
            ));
        }
    }
    let feedback_text = coerce_placeholder(body.feedback_text);
    if let Some(text) = feedback_text.as_deref() {
        if text.chars().count() > FEEDBACK_TEXT_MAX {
            return error_response(&ServiceError::Validation(format!(
                "feedback_text must be at most {FEEDBACK_TEXT_MAX} characters"
            )));
        }
    }

    let update = FeedbackUpdate {
        overall_rating: body.overall_rating,
        section_feedback: body.section_feedback,
        feedback_text: feedback_text.clone(),
        video_performance: body.video_performance,
    };

    match state.store.apply_feedback(&request_hash, &update).await {
        Ok(true) => {}
        Ok(false) => {
            return error_response(&ServiceError::Validation(
                "no generation found for that request_hash".to_string(),
            ));
        }
        Err(e) => {
            warn!(error = %e, "Feedback write failed");
            return error_response(&ServiceError::Unavailable(
                "feedback store unreachable".to_string(),
            ));
        }
    }

    if let Some(rating) = body.overall_rating {
        let polarity = if rating >= 4 {
            "positive"
        } else if rating <= 2 {
            "negative"
        } else {
            "neutral"
        };
        state
            .telemetry
            .feedback_total
            .with_label_values(&[polarity])
            .inc();

        // Score the script itself and remember the subscriber's taste
        if let Err(e) = state.store.set_quality(&request_hash, rating as f32).await {
            warn!(error = %e, "Quality score update failed");
        }
        let patch = serde_json::json!({
            "last_rating": rating,
            "last_feedback_at": chrono::Utc::now(),
        });
        if let Err(e) = state.store.merge_user_memory(&subscriber_id, patch).await {
            warn!(error = %e, "User memory update failed");
        }
    }

    (
        StatusCode::OK,
        Json(serde_json::json!({ "status": "ok" })),
    )
        .into_response()
}
