//! Liveness, readiness detail, and the metric expositions.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};

use scriptflow_cache::KvStore;
use scriptflow_store::JobRepo;

use crate::AppState;

pub async fn health(State(_state): State<Arc<AppState>>) -> Response {
    Json(serde_json::json!({ "status": "ok" })).into_response()
}

pub async fn health_detailed(State(state): State<Arc<AppState>>) -> Response {
    // Durable store probe
    let (durable_ok, queue_depth, active_jobs) = match state.store.queue_depth().await {
        Ok(depth) => {
            let active = state.store.count_processing().await.unwrap_or(-1);
            (true, depth, active)
        }
        Err(_) => (false, -1, -1),
    };

    // Ephemeral store probe
    let ephemeral_ok = state
        .kv
        .set("health:probe", "1", Duration::from_secs(10))
        .await
        .is_ok();

    let sessions = state.sessions.active_count().await.unwrap_or(0);

    let breakers: Vec<serde_json::Value> = state
        .breakers
        .snapshot()
        .into_iter()
        .map(|(service, breaker_state)| {
            serde_json::json!({
                "service": service,
                "state": breaker_state.gauge_value(),
            })
        })
        .collect();

    let healthy = durable_ok && ephemeral_ok;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(serde_json::json!({
            "status": if healthy { "ok" } else { "degraded" },
            "durable_store": durable_ok,
            "ephemeral_store": ephemeral_ok,
            "queue_depth": queue_depth,
            "active_jobs": active_jobs,
            "active_sessions": sessions,
            "breakers": breakers,
        })),
    )
        .into_response()
}

pub async fn metrics_text(State(state): State<Arc<AppState>>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.telemetry.render_text(),
    )
        .into_response()
}

pub async fn metrics_json(State(state): State<Arc<AppState>>) -> Response {
    Json(state.telemetry.render_json()).into_response()
}
