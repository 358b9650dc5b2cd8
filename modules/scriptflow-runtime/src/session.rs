//! Per-subscriber conversational state, 30-minute sliding TTL.
//!
//! This module is the only writer to session records; everything else
//! reads the snapshots it returns.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use scriptflow_cache::{KvError, KvStore};
use scriptflow_common::{SessionContext, SessionState};

const SESSION_TTL: Duration = Duration::from_secs(30 * 60);

/// Whether an observed idea repeats the previous one for the same URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdeaNovelty {
    /// Identical (case-insensitive, trimmed) to the previous idea: a redo
    /// of the same variation family.
    SameAsLast,
    /// A new variation family.
    New,
}

pub struct SessionManager {
    kv: Arc<dyn KvStore>,
}

impl SessionManager {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn key(subscriber_id: &str) -> String {
        format!("session:{subscriber_id}")
    }

    /// Load the subscriber's session, or a fresh one if absent or corrupt.
    pub async fn load(&self, subscriber_id: &str) -> Result<SessionContext, KvError> {
        match self.kv.get(&Self::key(subscriber_id)).await? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(ctx) => Ok(ctx),
                Err(e) => {
                    warn!(subscriber_id, error = %e, "Corrupt session record, starting fresh");
                    Ok(SessionContext::default())
                }
            },
            None => Ok(SessionContext::default()),
        }
    }

    /// Persist a session. Every write slides the TTL.
    pub async fn save(&self, subscriber_id: &str, ctx: &SessionContext) -> Result<(), KvError> {
        let mut ctx = ctx.clone();
        ctx.last_activity = Some(Utc::now());
        let raw = serde_json::to_string(&ctx)
            .map_err(|e| KvError::Value(e.to_string()))?;
        self.kv.set(&Self::key(subscriber_id), &raw, SESSION_TTL).await
    }

    /// A URL was observed: remember it, expect an idea next, and reset the
    /// in-session variation count.
    pub async fn observe_url(
        &self,
        subscriber_id: &str,
        canonical_url: &str,
    ) -> Result<SessionContext, KvError> {
        let mut ctx = self.load(subscriber_id).await?;
        ctx.last_url = Some(canonical_url.to_string());
        ctx.state = SessionState::AwaitingIdea;
        ctx.variation_count = 0;
        self.save(subscriber_id, &ctx).await?;
        Ok(ctx)
    }

    /// An idea was observed. Returns whether it repeats the previous idea
    /// for this URL.
    pub async fn observe_idea(
        &self,
        subscriber_id: &str,
        idea: &str,
    ) -> Result<(SessionContext, IdeaNovelty), KvError> {
        let mut ctx = self.load(subscriber_id).await?;
        let novelty = match &ctx.last_idea {
            Some(prev) if prev.trim().eq_ignore_ascii_case(idea.trim()) => IdeaNovelty::SameAsLast,
            _ => IdeaNovelty::New,
        };
        ctx.last_idea = Some(idea.to_string());
        self.save(subscriber_id, &ctx).await?;
        Ok((ctx, novelty))
    }

    /// A job was enqueued for this session.
    pub async fn mark_processing(
        &self,
        subscriber_id: &str,
        job_id: Uuid,
        request_hash: &str,
    ) -> Result<(), KvError> {
        let mut ctx = self.load(subscriber_id).await?;
        ctx.state = SessionState::Processing;
        ctx.active_job_id = Some(job_id);
        ctx.last_request_hash = Some(request_hash.to_string());
        ctx.variation_count += 1;
        self.save(subscriber_id, &ctx).await
    }

    /// A generation completed.
    pub async fn record_result(
        &self,
        subscriber_id: &str,
        request_hash: &str,
        script_id: Uuid,
    ) -> Result<(), KvError> {
        let mut ctx = self.load(subscriber_id).await?;
        ctx.state = SessionState::AwaitingConfirm;
        ctx.last_request_hash = Some(request_hash.to_string());
        ctx.last_script_id = Some(script_id);
        ctx.active_job_id = None;
        self.save(subscriber_id, &ctx).await
    }

    pub async fn clear(&self, subscriber_id: &str) -> Result<(), KvError> {
        self.kv.delete(&Self::key(subscriber_id)).await
    }

    /// Count of live sessions, for the gauge. Diagnostic path only.
    pub async fn active_count(&self) -> Result<usize, KvError> {
        Ok(self.kv.scan_prefix("session:").await?.len())
    }
}
