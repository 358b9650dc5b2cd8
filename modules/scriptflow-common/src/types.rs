//! Shared domain types persisted by the store or carried through the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::intent::Intensity;

/// Job lifecycle. At most one job per request hash may be in
/// `Queued`/`Processing` at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Beta access state for a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessStatus {
    Active,
    Waitlist,
    Blocked,
}

impl AccessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessStatus::Active => "active",
            AccessStatus::Waitlist => "waitlist",
            AccessStatus::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(AccessStatus::Active),
            "waitlist" => Some(AccessStatus::Waitlist),
            "blocked" => Some(AccessStatus::Blocked),
            _ => None,
        }
    }
}

/// Full script vs hook-only generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    #[default]
    Full,
    HookOnly,
}

impl GenerationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationMode::Full => "full",
            GenerationMode::HookOnly => "hook_only",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "full" => Some(GenerationMode::Full),
            "hook_only" => Some(GenerationMode::HookOnly),
            _ => None,
        }
    }
}

/// Requested delivery tone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToneHint {
    Professional,
    Funny,
    Provocative,
    Educational,
    Casual,
}

impl ToneHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToneHint::Professional => "professional",
            ToneHint::Funny => "funny",
            ToneHint::Provocative => "provocative",
            ToneHint::Educational => "educational",
            ToneHint::Casual => "casual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "professional" => Some(ToneHint::Professional),
            "funny" => Some(ToneHint::Funny),
            "provocative" => Some(ToneHint::Provocative),
            "educational" => Some(ToneHint::Educational),
            "casual" => Some(ToneHint::Casual),
            _ => None,
        }
    }
}

/// A generated script, immutable after creation except for feedback-scored
/// quality fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptRecord {
    pub id: Uuid,
    pub request_hash: String,
    pub public_id: String,
    pub subscriber_id: String,
    pub reel_url: String,
    pub reel_hash: String,
    pub user_idea: String,
    pub variation_index: u32,
    pub mode: GenerationMode,
    pub script_text: String,
    pub image_urls: Vec<String>,
    pub script_url: Option<String>,
    pub generator_version: String,
    pub generation_ms: i64,
    pub quality_score: Option<f32>,
    pub created_at: DateTime<Utc>,
}

/// Everything the worker needs to execute one generation, carried in the
/// job's JSONB payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    pub subscriber_id: String,
    pub reel_url: String,
    pub reel_hash: String,
    pub request_hash: String,
    pub user_idea: String,
    pub variation_index: u32,
    pub mode: GenerationMode,
    #[serde(default)]
    pub is_copy_mode: bool,
    #[serde(default)]
    pub tone_hint: Option<ToneHint>,
    #[serde(default)]
    pub language_hint: Option<String>,
    #[serde(default)]
    pub intensity: Intensity,
}

/// A queued/processing/terminal job row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: Uuid,
    pub subscriber_id: String,
    pub request_hash: String,
    pub payload: JobPayload,
    pub status: JobStatus,
    pub priority: i32,
    pub attempts: i32,
    pub max_attempts: i32,
    pub error: Option<String>,
    pub result_script_id: Option<Uuid>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Beta-program user row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub subscriber_id: String,
    pub status: AccessStatus,
    pub registration_number: Option<i32>,
    pub request_count: i64,
    pub last_request_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Structured reel analysis produced by the generator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReelAnalysis {
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub tone: Option<String>,
    #[serde(default)]
    pub hook_type: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub niche: Option<String>,
    #[serde(default)]
    pub visual_cues: Vec<String>,
    #[serde(default)]
    pub scene_descriptions: Vec<String>,
}

/// Tier-1 cache row: analysis keyed by the canonical URL hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReelAnalysisRecord {
    pub reel_hash: String,
    pub canonical_url: String,
    pub analysis: ReelAnalysis,
    pub video_url: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Conversational position of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    AwaitingIdea,
    AwaitingConfirm,
    Processing,
}

/// Per-subscriber conversational memory, 30-minute sliding TTL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionContext {
    #[serde(default)]
    pub last_url: Option<String>,
    #[serde(default)]
    pub last_idea: Option<String>,
    #[serde(default)]
    pub last_request_hash: Option<String>,
    #[serde(default)]
    pub last_script_id: Option<Uuid>,
    #[serde(default)]
    pub variation_count: u32,
    #[serde(default)]
    pub state: SessionState,
    #[serde(default)]
    pub last_activity: Option<DateTime<Utc>>,
    #[serde(default)]
    pub active_job_id: Option<Uuid>,
}

/// One append-only record per completed generation. Feedback fields are
/// filled in later by the feedback endpoint; readers dispatch on
/// `schema_version`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub id: Uuid,
    pub request_hash: String,
    pub subscriber_id: String,
    pub schema_version: i32,
    pub record: serde_json::Value,
    pub overall_rating: Option<i32>,
    pub section_feedback: Option<serde_json::Value>,
    pub feedback_text: Option<String>,
    pub video_performance: Option<serde_json::Value>,
    pub validated: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_round_trips() {
        for s in [JobStatus::Queued, JobStatus::Processing, JobStatus::Completed, JobStatus::Failed] {
            assert_eq!(JobStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(JobStatus::parse("cancelled"), None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }

    #[test]
    fn session_context_deserializes_from_empty_object() {
        let ctx: SessionContext = serde_json::from_str("{}").unwrap();
        assert_eq!(ctx.state, SessionState::Idle);
        assert_eq!(ctx.variation_count, 0);
    }

    #[test]
    fn mode_parse_rejects_unknown() {
        assert_eq!(GenerationMode::parse("full"), Some(GenerationMode::Full));
        assert_eq!(GenerationMode::parse("hook_only"), Some(GenerationMode::HookOnly));
        assert_eq!(GenerationMode::parse("partial"), None);
    }
}
