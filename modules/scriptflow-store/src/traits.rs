//! Repository seams for the durable store.
//!
//! `PgStore` is the production implementation; `testutil::MemoryStore`
//! backs queue/worker tests. The worker and the gate only ever see
//! `Arc<dyn DocumentStore>`.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use scriptflow_common::{
    AccessStatus, DatasetRecord, JobRecord, ReelAnalysisRecord, ScriptRecord, UserRecord,
};

/// Outcome of a beta admission attempt for an unknown subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmitOutcome {
    Admitted { ordinal: i32 },
    Waitlisted { position: i64 },
}

/// Feedback fields applied to a dataset record after delivery.
#[derive(Debug, Clone, Default)]
pub struct FeedbackUpdate {
    pub overall_rating: Option<i32>,
    pub section_feedback: Option<serde_json::Value>,
    pub feedback_text: Option<String>,
    pub video_performance: Option<serde_json::Value>,
}

/// Aggregates for the feedback stats endpoint.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct FeedbackStats {
    pub total_records: i64,
    pub rated_records: i64,
    pub average_rating: Option<f64>,
    pub rating_counts: Vec<(i32, i64)>,
}

#[async_trait]
pub trait ScriptRepo: Send + Sync {
    async fn find_by_request_hash(&self, request_hash: &str) -> Result<Option<ScriptRecord>>;
    async fn find_by_public_id(&self, public_id: &str) -> Result<Option<ScriptRecord>>;
    /// Insert a new script. Fails on duplicate `request_hash` or `public_id`.
    async fn insert_script(&self, script: &ScriptRecord) -> Result<()>;
    async fn public_id_exists(&self, public_id: &str) -> Result<bool>;
    /// Most recent scripts for a reel, newest first.
    async fn recent_for_reel(&self, reel_hash: &str, limit: i64) -> Result<Vec<ScriptRecord>>;
    async fn set_quality(&self, request_hash: &str, score: f32) -> Result<bool>;
}

#[async_trait]
pub trait JobRepo: Send + Sync {
    /// Insert a queued job. Returns `false` when the job id already exists
    /// (queue-level dedup on the caller-supplied UUID).
    async fn insert_queued(&self, job: &JobRecord) -> Result<bool>;
    async fn find_job(&self, job_id: Uuid) -> Result<Option<JobRecord>>;
    async fn find_active_by_request_hash(&self, request_hash: &str) -> Result<Option<JobRecord>>;
    /// Claim the oldest queued job in the highest priority class, moving it
    /// to `processing` and bumping its attempt count. Safe under concurrent
    /// workers.
    async fn claim_next(&self) -> Result<Option<JobRecord>>;
    async fn heartbeat(&self, job_id: Uuid) -> Result<()>;
    async fn mark_completed(&self, job_id: Uuid, script_id: Uuid) -> Result<()>;
    async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<()>;
    /// Return a processing job to the queue for another attempt.
    async fn requeue(&self, job_id: Uuid, error: &str) -> Result<()>;
    /// Recover processing jobs whose heartbeat lapsed. Returns recovered ids.
    async fn recover_stalled(&self, stale_after: Duration) -> Result<Vec<Uuid>>;
    /// Evict terminal jobs past the retention horizon.
    async fn delete_terminal_older_than(&self, horizon: Duration) -> Result<u64>;
    async fn queue_depth(&self) -> Result<i64>;
    async fn count_processing(&self) -> Result<i64>;
}

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn find_user(&self, subscriber_id: &str) -> Result<Option<UserRecord>>;
    async fn count_users_by_status(&self, status: AccessStatus) -> Result<i64>;
    /// Admit a new subscriber if capacity allows, else append to the
    /// waitlist. Atomic with respect to concurrent admissions; ordinals are
    /// strictly monotonic and never reused.
    async fn admit_or_waitlist(&self, subscriber_id: &str, capacity: i64) -> Result<AdmitOutcome>;
    /// 1-based position in the waitlist, ordered by creation time.
    async fn waitlist_position(&self, subscriber_id: &str) -> Result<Option<i64>>;
    /// Promote waitlisted users oldest-first while capacity allows.
    /// Returns the promoted subscriber ids.
    async fn promote_waitlisted(&self, capacity: i64) -> Result<Vec<String>>;
    async fn touch_request(&self, subscriber_id: &str, at: DateTime<Utc>) -> Result<()>;
}

#[async_trait]
pub trait AnalysisRepo: Send + Sync {
    /// Tier-1 lookup; expired rows are treated as absent.
    async fn fresh_analysis(&self, reel_hash: &str) -> Result<Option<ReelAnalysisRecord>>;
    async fn upsert_analysis(&self, record: &ReelAnalysisRecord) -> Result<()>;
    async fn delete_expired_analysis(&self) -> Result<u64>;
}

#[async_trait]
pub trait DatasetRepo: Send + Sync {
    async fn append_dataset(&self, record: &DatasetRecord) -> Result<()>;
    /// Apply feedback to the newest record for a request hash. Returns
    /// `false` when no record exists.
    async fn apply_feedback(&self, request_hash: &str, update: &FeedbackUpdate) -> Result<bool>;
    async fn feedback_stats(&self) -> Result<FeedbackStats>;
    async fn export_dataset(
        &self,
        limit: i64,
        skip: i64,
        validated_only: bool,
    ) -> Result<Vec<DatasetRecord>>;
}

#[async_trait]
pub trait UserMemoryRepo: Send + Sync {
    async fn user_memory(&self, subscriber_id: &str) -> Result<Option<serde_json::Value>>;
    /// Shallow-merge `patch` into the stored memory object.
    async fn merge_user_memory(&self, subscriber_id: &str, patch: serde_json::Value) -> Result<()>;
}

/// The full durable-store surface, implemented by `PgStore` and
/// `MemoryStore`.
pub trait DocumentStore:
    ScriptRepo + JobRepo + UserRepo + AnalysisRepo + DatasetRepo + UserMemoryRepo
{
}

impl<T> DocumentStore for T where
    T: ScriptRepo + JobRepo + UserRepo + AnalysisRepo + DatasetRepo + UserMemoryRepo
{
}
