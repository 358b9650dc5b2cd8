//! In-memory `DocumentStore` used by queue and worker tests (and handy for
//! local development without Postgres). Mirrors the Postgres semantics that
//! matter to callers: dedup on job id, single-claim FIFO, monotonic status
//! transitions, TTL sweeps.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use scriptflow_common::{
    AccessStatus, DatasetRecord, JobRecord, JobStatus, ReelAnalysisRecord, ScriptRecord,
    UserRecord,
};

use crate::traits::{
    AdmitOutcome, AnalysisRepo, DatasetRepo, FeedbackStats, FeedbackUpdate, JobRepo, ScriptRepo,
    UserMemoryRepo, UserRepo,
};

#[derive(Default)]
struct Inner {
    scripts: Vec<ScriptRecord>,
    jobs: HashMap<Uuid, JobRecord>,
    users: HashMap<String, UserRecord>,
    analysis: HashMap<String, ReelAnalysisRecord>,
    dataset: Vec<DatasetRecord>,
    memory: HashMap<String, serde_json::Value>,
    next_ordinal: i32,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: age a processing job's heartbeat so stall recovery fires.
    pub fn age_heartbeat(&self, job_id: Uuid, by: Duration) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(job) = inner.jobs.get_mut(&job_id) {
            if let Some(hb) = job.heartbeat_at {
                job.heartbeat_at = Some(hb - chrono::Duration::from_std(by).unwrap());
            }
        }
    }

    /// Test hook: age a terminal job's completion timestamp.
    pub fn age_completion(&self, job_id: Uuid, by: Duration) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(job) = inner.jobs.get_mut(&job_id) {
            if let Some(done) = job.completed_at {
                job.completed_at = Some(done - chrono::Duration::from_std(by).unwrap());
            }
        }
    }

    pub fn job_snapshot(&self, job_id: Uuid) -> Option<JobRecord> {
        self.inner.lock().unwrap().jobs.get(&job_id).cloned()
    }

    pub fn dataset_len(&self) -> usize {
        self.inner.lock().unwrap().dataset.len()
    }
}

#[async_trait]
impl ScriptRepo for MemoryStore {
    async fn find_by_request_hash(&self, request_hash: &str) -> Result<Option<ScriptRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .scripts
            .iter()
            .find(|s| s.request_hash == request_hash)
            .cloned())
    }

    async fn find_by_public_id(&self, public_id: &str) -> Result<Option<ScriptRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.scripts.iter().find(|s| s.public_id == public_id).cloned())
    }

    async fn insert_script(&self, script: &ScriptRecord) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner
            .scripts
            .iter()
            .any(|s| s.request_hash == script.request_hash || s.public_id == script.public_id)
        {
            anyhow::bail!("duplicate script key");
        }
        inner.scripts.push(script.clone());
        Ok(())
    }

    async fn public_id_exists(&self, public_id: &str) -> Result<bool> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.scripts.iter().any(|s| s.public_id == public_id))
    }

    async fn recent_for_reel(&self, reel_hash: &str, limit: i64) -> Result<Vec<ScriptRecord>> {
        let inner = self.inner.lock().unwrap();
        let mut matching: Vec<ScriptRecord> = inner
            .scripts
            .iter()
            .filter(|s| s.reel_hash == reel_hash)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit as usize);
        Ok(matching)
    }

    async fn set_quality(&self, request_hash: &str, score: f32) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        match inner.scripts.iter_mut().find(|s| s.request_hash == request_hash) {
            Some(script) => {
                script.quality_score = Some(score);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl JobRepo for MemoryStore {
    async fn insert_queued(&self, job: &JobRecord) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        if inner.jobs.contains_key(&job.job_id) {
            return Ok(false);
        }
        let mut stored = job.clone();
        stored.status = JobStatus::Queued;
        stored.attempts = 0;
        inner.jobs.insert(job.job_id, stored);
        Ok(true)
    }

    async fn find_job(&self, job_id: Uuid) -> Result<Option<JobRecord>> {
        Ok(self.inner.lock().unwrap().jobs.get(&job_id).cloned())
    }

    async fn find_active_by_request_hash(&self, request_hash: &str) -> Result<Option<JobRecord>> {
        let inner = self.inner.lock().unwrap();
        let mut active: Vec<&JobRecord> = inner
            .jobs
            .values()
            .filter(|j| {
                j.request_hash == request_hash
                    && matches!(j.status, JobStatus::Queued | JobStatus::Processing)
            })
            .collect();
        active.sort_by_key(|j| j.created_at);
        Ok(active.first().map(|j| (*j).clone()))
    }

    async fn claim_next(&self) -> Result<Option<JobRecord>> {
        let mut inner = self.inner.lock().unwrap();
        let next_id = {
            let mut queued: Vec<&JobRecord> = inner
                .jobs
                .values()
                .filter(|j| j.status == JobStatus::Queued)
                .collect();
            queued.sort_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.created_at.cmp(&b.created_at))
            });
            queued.first().map(|j| j.job_id)
        };
        let Some(job_id) = next_id else {
            return Ok(None);
        };
        let job = inner.jobs.get_mut(&job_id).unwrap();
        job.status = JobStatus::Processing;
        job.attempts += 1;
        job.started_at = Some(Utc::now());
        job.heartbeat_at = Some(Utc::now());
        Ok(Some(job.clone()))
    }

    async fn heartbeat(&self, job_id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(job) = inner.jobs.get_mut(&job_id) {
            if job.status == JobStatus::Processing {
                job.heartbeat_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn mark_completed(&self, job_id: Uuid, script_id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(job) = inner.jobs.get_mut(&job_id) {
            if job.status == JobStatus::Processing {
                job.status = JobStatus::Completed;
                job.completed_at = Some(Utc::now());
                job.result_script_id = Some(script_id);
                job.error = None;
            }
        }
        Ok(())
    }

    async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(job) = inner.jobs.get_mut(&job_id) {
            if job.status == JobStatus::Processing {
                job.status = JobStatus::Failed;
                job.completed_at = Some(Utc::now());
                job.error = Some(error.to_string());
            }
        }
        Ok(())
    }

    async fn requeue(&self, job_id: Uuid, error: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(job) = inner.jobs.get_mut(&job_id) {
            if job.status == JobStatus::Processing {
                job.status = JobStatus::Queued;
                job.heartbeat_at = None;
                job.error = Some(error.to_string());
            }
        }
        Ok(())
    }

    async fn recover_stalled(&self, stale_after: Duration) -> Result<Vec<Uuid>> {
        let cutoff = Utc::now() - chrono::Duration::from_std(stale_after)?;
        let mut inner = self.inner.lock().unwrap();
        let mut recovered = Vec::new();
        for job in inner.jobs.values_mut() {
            if job.status == JobStatus::Processing
                && job.heartbeat_at.is_some_and(|hb| hb < cutoff)
            {
                job.status = JobStatus::Queued;
                job.heartbeat_at = None;
                job.error = Some("stalled: heartbeat lapsed".to_string());
                recovered.push(job.job_id);
            }
        }
        Ok(recovered)
    }

    async fn delete_terminal_older_than(&self, horizon: Duration) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::from_std(horizon)?;
        let mut inner = self.inner.lock().unwrap();
        let before = inner.jobs.len();
        inner.jobs.retain(|_, job| {
            !(job.status.is_terminal() && job.completed_at.is_some_and(|at| at < cutoff))
        });
        Ok((before - inner.jobs.len()) as u64)
    }

    async fn queue_depth(&self) -> Result<i64> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.jobs.values().filter(|j| j.status == JobStatus::Queued).count() as i64)
    }

    async fn count_processing(&self) -> Result<i64> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Processing)
            .count() as i64)
    }
}

#[async_trait]
impl UserRepo for MemoryStore {
    async fn find_user(&self, subscriber_id: &str) -> Result<Option<UserRecord>> {
        Ok(self.inner.lock().unwrap().users.get(subscriber_id).cloned())
    }

    async fn count_users_by_status(&self, status: AccessStatus) -> Result<i64> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.users.values().filter(|u| u.status == status).count() as i64)
    }

    async fn admit_or_waitlist(&self, subscriber_id: &str, capacity: i64) -> Result<AdmitOutcome> {
        let mut inner = self.inner.lock().unwrap();
        let active = inner
            .users
            .values()
            .filter(|u| u.status == AccessStatus::Active)
            .count() as i64;

        if active < capacity {
            inner.next_ordinal = inner
                .next_ordinal
                .max(
                    inner
                        .users
                        .values()
                        .filter_map(|u| u.registration_number)
                        .max()
                        .unwrap_or(0),
                )
                + 1;
            let ordinal = inner.next_ordinal;
            inner.users.insert(
                subscriber_id.to_string(),
                UserRecord {
                    subscriber_id: subscriber_id.to_string(),
                    status: AccessStatus::Active,
                    registration_number: Some(ordinal),
                    request_count: 0,
                    last_request_at: None,
                    created_at: Utc::now(),
                },
            );
            Ok(AdmitOutcome::Admitted { ordinal })
        } else {
            let created_at = Utc::now();
            inner.users.entry(subscriber_id.to_string()).or_insert(UserRecord {
                subscriber_id: subscriber_id.to_string(),
                status: AccessStatus::Waitlist,
                registration_number: None,
                request_count: 0,
                last_request_at: None,
                created_at,
            });
            let own_created = inner.users[subscriber_id].created_at;
            let position = inner
                .users
                .values()
                .filter(|u| u.status == AccessStatus::Waitlist && u.created_at <= own_created)
                .count() as i64;
            Ok(AdmitOutcome::Waitlisted { position })
        }
    }

    async fn waitlist_position(&self, subscriber_id: &str) -> Result<Option<i64>> {
        let inner = self.inner.lock().unwrap();
        let Some(user) = inner.users.get(subscriber_id) else {
            return Ok(None);
        };
        if user.status != AccessStatus::Waitlist {
            return Ok(None);
        }
        Ok(Some(
            inner
                .users
                .values()
                .filter(|u| u.status == AccessStatus::Waitlist && u.created_at <= user.created_at)
                .count() as i64,
        ))
    }

    async fn promote_waitlisted(&self, capacity: i64) -> Result<Vec<String>> {
        let mut inner = self.inner.lock().unwrap();
        let mut promoted = Vec::new();
        loop {
            let active = inner
                .users
                .values()
                .filter(|u| u.status == AccessStatus::Active)
                .count() as i64;
            if active >= capacity {
                break;
            }
            let oldest = inner
                .users
                .values()
                .filter(|u| u.status == AccessStatus::Waitlist)
                .min_by_key(|u| u.created_at)
                .map(|u| u.subscriber_id.clone());
            let Some(id) = oldest else { break };
            inner.next_ordinal = inner
                .next_ordinal
                .max(
                    inner
                        .users
                        .values()
                        .filter_map(|u| u.registration_number)
                        .max()
                        .unwrap_or(0),
                )
                + 1;
            let ordinal = inner.next_ordinal;
            if let Some(user) = inner.users.get_mut(&id) {
                user.status = AccessStatus::Active;
                user.registration_number = Some(ordinal);
            }
            promoted.push(id);
        }
        Ok(promoted)
    }

    async fn touch_request(&self, subscriber_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(user) = inner.users.get_mut(subscriber_id) {
            user.request_count += 1;
            user.last_request_at = Some(at);
        }
        Ok(())
    }
}

#[async_trait]
impl AnalysisRepo for MemoryStore {
    async fn fresh_analysis(&self, reel_hash: &str) -> Result<Option<ReelAnalysisRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .analysis
            .get(reel_hash)
            .filter(|r| r.expires_at > Utc::now())
            .cloned())
    }

    async fn upsert_analysis(&self, record: &ReelAnalysisRecord) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.analysis.insert(record.reel_hash.clone(), record.clone());
        Ok(())
    }

    async fn delete_expired_analysis(&self) -> Result<u64> {
        let now = Utc::now();
        let mut inner = self.inner.lock().unwrap();
        let before = inner.analysis.len();
        inner.analysis.retain(|_, r| r.expires_at > now);
        Ok((before - inner.analysis.len()) as u64)
    }
}

#[async_trait]
impl DatasetRepo for MemoryStore {
    async fn append_dataset(&self, record: &DatasetRecord) -> Result<()> {
        self.inner.lock().unwrap().dataset.push(record.clone());
        Ok(())
    }

    async fn apply_feedback(&self, request_hash: &str, update: &FeedbackUpdate) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let target = inner
            .dataset
            .iter_mut()
            .filter(|r| r.request_hash == request_hash)
            .max_by_key(|r| r.created_at);
        match target {
            Some(record) => {
                if update.overall_rating.is_some() {
                    record.overall_rating = update.overall_rating;
                }
                if update.section_feedback.is_some() {
                    record.section_feedback = update.section_feedback.clone();
                }
                if update.feedback_text.is_some() {
                    record.feedback_text = update.feedback_text.clone();
                }
                if update.video_performance.is_some() {
                    record.video_performance = update.video_performance.clone();
                }
                record.validated = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn feedback_stats(&self) -> Result<FeedbackStats> {
        let inner = self.inner.lock().unwrap();
        let total = inner.dataset.len() as i64;
        let ratings: Vec<i32> = inner
            .dataset
            .iter()
            .filter_map(|r| r.overall_rating)
            .collect();
        let rated = ratings.len() as i64;
        let average = if ratings.is_empty() {
            None
        } else {
            Some(ratings.iter().map(|r| *r as f64).sum::<f64>() / rated as f64)
        };
        let mut counts: HashMap<i32, i64> = HashMap::new();
        for r in &ratings {
            *counts.entry(*r).or_default() += 1;
        }
        let mut rating_counts: Vec<(i32, i64)> = counts.into_iter().collect();
        rating_counts.sort();
        Ok(FeedbackStats {
            total_records: total,
            rated_records: rated,
            average_rating: average,
            rating_counts,
        })
    }

    async fn export_dataset(
        &self,
        limit: i64,
        skip: i64,
        validated_only: bool,
    ) -> Result<Vec<DatasetRecord>> {
        let inner = self.inner.lock().unwrap();
        let mut records: Vec<DatasetRecord> = inner
            .dataset
            .iter()
            .filter(|r| !validated_only || r.validated)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records
            .into_iter()
            .skip(skip.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }
}

#[async_trait]
impl UserMemoryRepo for MemoryStore {
    async fn user_memory(&self, subscriber_id: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.inner.lock().unwrap().memory.get(subscriber_id).cloned())
    }

    async fn merge_user_memory(
        &self,
        subscriber_id: &str,
        patch: serde_json::Value,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .memory
            .entry(subscriber_id.to_string())
            .or_insert_with(|| serde_json::json!({}));
        if let (Some(base), Some(extra)) = (entry.as_object_mut(), patch.as_object()) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }
        Ok(())
    }
}
