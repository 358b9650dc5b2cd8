//! Admin endpoints: dataset export and feedback aggregates. Gated by a
//! fixed API key header.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;

use scriptflow_common::DatasetRecord;
use scriptflow_store::DatasetRepo;

use crate::AppState;

const ADMIN_KEY_HEADER: &str = "x-admin-key";

fn check_admin_key(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let expected = state.config.admin_api_key.as_deref();
    let provided = headers.get(ADMIN_KEY_HEADER).and_then(|v| v.to_str().ok());
    match (expected, provided) {
        (Some(expected), Some(provided)) if expected == provided => Ok(()),
        _ => Err((
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({
                "status": "error",
                "error": "access_denied",
                "message": "admin key required",
            })),
        )
            .into_response()),
    }
}

#[derive(Deserialize)]
pub struct ExportQuery {
    format: Option<String>,
    limit: Option<i64>,
    skip: Option<i64>,
    validated: Option<bool>,
}

fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn records_to_csv(records: &[DatasetRecord]) -> String {
    let mut out = String::from(
        "id,request_hash,subscriber_id,schema_version,overall_rating,validated,created_at,record\n",
    );
    for record in records {
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{}\n",
            record.id,
            record.request_hash,
            record.subscriber_id,
            record.schema_version,
            record
                .overall_rating
                .map(|r| r.to_string())
                .unwrap_or_default(),
            record.validated,
            record.created_at.to_rfc3339(),
            csv_escape(&record.record.to_string()),
        ));
    }
    out
}

pub async fn dataset_export(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ExportQuery>,
) -> Response {
    if let Err(denied) = check_admin_key(&state, &headers) {
        return denied;
    }

    let limit = query.limit.unwrap_or(100);
    let skip = query.skip.unwrap_or(0);
    let validated_only = query.validated.unwrap_or(false);

    let records = match state.store.export_dataset(limit, skip, validated_only).await {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!(error = %e, "Dataset export failed");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "status": "error", "error": "unavailable" })),
            )
                .into_response();
        }
    };

    match query.format.as_deref() {
        Some("csv") => (
            [(header::CONTENT_TYPE, "text/csv")],
            records_to_csv(&records),
        )
            .into_response(),
        _ => Json(serde_json::json!({
            "status": "ok",
            "count": records.len(),
            "records": records,
        }))
        .into_response(),
    }
}

pub async fn feedback_stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = check_admin_key(&state, &headers) {
        return denied;
    }

    match state.store.feedback_stats().await {
        Ok(stats) => Json(serde_json::json!({ "status": "ok", "stats": stats })).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Feedback stats failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "status": "error", "error": "unavailable" })),
            )
                .into_response()
        }
    }
}
