//! Durable job queue: at-least-once delivery over the jobs table, bounded
//! concurrency, a queue-wide start rate limit, retry with exponential
//! backoff, stall detection, and terminal-state eviction.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use scriptflow_common::{JobRecord, ServiceError};
use scriptflow_store::{DocumentStore, JobRepo};

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Concurrent jobs per process.
    pub concurrency: usize,
    /// Queue-wide cap on job starts per minute, independent of per-user
    /// limits. Shields upstream APIs.
    pub rate_per_min: u32,
    /// Attempts per job before it fails terminally.
    pub max_attempts: i32,
    /// Base for exponential retry backoff.
    pub backoff_base: Duration,
    /// How often a processing job refreshes its heartbeat.
    pub heartbeat_interval: Duration,
    /// A processing job whose heartbeat is older than this is recovered.
    pub stall_after: Duration,
    /// Terminal jobs are evicted after this horizon.
    pub terminal_ttl: Duration,
    /// Idle sleep between claim attempts.
    pub poll_interval: Duration,
    /// Interval between maintenance sweeps.
    pub sweep_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            rate_per_min: 10,
            max_attempts: 3,
            backoff_base: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(10),
            stall_after: Duration::from_secs(60),
            terminal_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            poll_interval: Duration::from_millis(500),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub enum QueueEvent {
    Completed { job_id: Uuid, script_id: Uuid },
    Failed { job_id: Uuid, error: String },
    Stalled { job_id: Uuid },
    Progress { job_id: Uuid, stage: String },
}

#[derive(Debug, Clone)]
pub enum EnqueueOutcome {
    /// A new job was persisted and queued.
    Queued(JobRecord),
    /// An equivalent job was already in flight; its record is returned.
    Duplicate(JobRecord),
}

/// Stage progress handle given to the processor.
#[derive(Clone)]
pub struct ProgressReporter {
    job_id: Uuid,
    events: broadcast::Sender<QueueEvent>,
}

impl ProgressReporter {
    pub fn stage(&self, stage: &str) {
        let _ = self.events.send(QueueEvent::Progress {
            job_id: self.job_id,
            stage: stage.to_string(),
        });
    }

    /// Reporter with no queue behind it, for tests and ad-hoc invocations.
    pub fn detached(job_id: Uuid) -> Self {
        let (events, _) = broadcast::channel(16);
        Self { job_id, events }
    }
}

/// Executes one job; the pipeline worker implements this.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    /// Returns the resulting script id on success.
    async fn process(
        &self,
        job: &JobRecord,
        progress: ProgressReporter,
    ) -> Result<Uuid, ServiceError>;
}

/// Sliding-window start limiter. Prunes expired entries and records the new
/// start when allowed.
pub fn check_rate_limit(
    entries: &mut VecDeque<Instant>,
    now: Instant,
    window: Duration,
    max: usize,
) -> bool {
    while entries.front().is_some_and(|t| now.duration_since(*t) >= window) {
        entries.pop_front();
    }
    if entries.len() >= max {
        return false;
    }
    entries.push_back(now);
    true
}

/// Exponential backoff for the n-th attempt (1-indexed): base * 2^(n-1).
pub fn retry_backoff(base: Duration, attempt: i32) -> Duration {
    let exp = attempt.clamp(1, 16) - 1;
    base * 2u32.pow(exp as u32)
}

pub struct JobQueue {
    store: Arc<dyn DocumentStore>,
    config: QueueConfig,
    events: broadcast::Sender<QueueEvent>,
    starts: Mutex<VecDeque<Instant>>,
    stopping: AtomicBool,
}

impl JobQueue {
    pub fn new(store: Arc<dyn DocumentStore>, config: QueueConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            store,
            config,
            events,
            starts: Mutex::new(VecDeque::new()),
            stopping: AtomicBool::new(false),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    /// Enqueue a job with dedup at two levels: at most one active job per
    /// request hash, and the caller-supplied job id is unique.
    pub async fn enqueue(&self, job: JobRecord) -> Result<EnqueueOutcome, ServiceError> {
        if let Some(existing) = self
            .store
            .find_active_by_request_hash(&job.request_hash)
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?
        {
            return Ok(EnqueueOutcome::Duplicate(existing));
        }

        let inserted = self
            .store
            .insert_queued(&job)
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;

        if inserted {
            info!(job_id = %job.job_id, request_hash = %job.request_hash, "Job queued");
            Ok(EnqueueOutcome::Queued(job))
        } else {
            let existing = self
                .store
                .find_job(job.job_id)
                .await
                .map_err(|e| ServiceError::Internal(e.to_string()))?
                .ok_or_else(|| ServiceError::Internal("duplicate job vanished".to_string()))?;
            Ok(EnqueueOutcome::Duplicate(existing))
        }
    }

    /// Claim-and-process loop. Returns after `shutdown()` once in-flight
    /// jobs drain.
    pub async fn run(self: Arc<Self>, processor: Arc<dyn JobProcessor>) {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut last_sweep = Instant::now();
        self.sweep().await;

        info!(
            concurrency = self.config.concurrency,
            rate_per_min = self.config.rate_per_min,
            "Job queue running"
        );

        while !self.stopping.load(Ordering::SeqCst) {
            while tasks.try_join_next().is_some() {}

            if last_sweep.elapsed() >= self.config.sweep_interval {
                self.sweep().await;
                last_sweep = Instant::now();
            }

            let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                tokio::time::sleep(self.config.poll_interval).await;
                continue;
            };

            let rate_ok = {
                let mut starts = self.starts.lock().unwrap();
                check_rate_limit(
                    &mut starts,
                    Instant::now(),
                    Duration::from_secs(60),
                    self.config.rate_per_min as usize,
                )
            };
            if !rate_ok {
                drop(permit);
                tokio::time::sleep(self.config.poll_interval).await;
                continue;
            }

            match self.store.claim_next().await {
                Ok(Some(job)) => {
                    let queue = self.clone();
                    let processor = processor.clone();
                    tasks.spawn(async move {
                        queue.process_one(job, processor).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    // The start slot was not used; give it back.
                    self.starts.lock().unwrap().pop_back();
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                Err(e) => {
                    drop(permit);
                    self.starts.lock().unwrap().pop_back();
                    warn!(error = %e, "Job claim failed");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }

        while tasks.join_next().await.is_some() {}
        info!("Job queue drained");
    }

    async fn process_one(&self, job: JobRecord, processor: Arc<dyn JobProcessor>) {
        let job_id = job.job_id;
        let _ = self.events.send(QueueEvent::Progress {
            job_id,
            stage: "started".to_string(),
        });

        // Heartbeat while the processor runs; recovered by the stall sweep
        // if this process dies.
        let heartbeat = {
            let store = self.store.clone();
            let interval = self.config.heartbeat_interval;
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(interval).await;
                    if let Err(e) = store.heartbeat(job_id).await {
                        warn!(job_id = %job_id, error = %e, "Heartbeat write failed");
                    }
                }
            })
        };

        let progress = ProgressReporter {
            job_id,
            events: self.events.clone(),
        };
        let result = processor.process(&job, progress).await;
        heartbeat.abort();

        match result {
            Ok(script_id) => {
                if let Err(e) = self.store.mark_completed(job_id, script_id).await {
                    warn!(job_id = %job_id, error = %e, "Failed to mark job completed");
                }
                let _ = self.events.send(QueueEvent::Completed { job_id, script_id });
            }
            Err(err) => {
                let retry = err.is_retryable() && job.attempts < job.max_attempts;
                if retry {
                    let backoff = retry_backoff(self.config.backoff_base, job.attempts);
                    warn!(
                        job_id = %job_id,
                        attempt = job.attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Job attempt failed, requeueing after backoff"
                    );
                    tokio::time::sleep(backoff).await;
                    if let Err(e) = self.store.requeue(job_id, &err.to_string()).await {
                        warn!(job_id = %job_id, error = %e, "Failed to requeue job");
                    }
                } else {
                    warn!(job_id = %job_id, error = %err, "Job failed terminally");
                    if let Err(e) = self.store.mark_failed(job_id, &err.to_string()).await {
                        warn!(job_id = %job_id, error = %e, "Failed to mark job failed");
                    }
                    let _ = self.events.send(QueueEvent::Failed {
                        job_id,
                        error: err.to_string(),
                    });
                }
            }
        }
    }

    /// Stall recovery and terminal eviction. Also run periodically by the
    /// claim loop.
    pub async fn sweep(&self) {
        match self.store.recover_stalled(self.config.stall_after).await {
            Ok(recovered) => {
                for job_id in recovered {
                    warn!(job_id = %job_id, "Recovered stalled job");
                    let _ = self.events.send(QueueEvent::Stalled { job_id });
                }
            }
            Err(e) => warn!(error = %e, "Stall recovery sweep failed"),
        }

        match self
            .store
            .delete_terminal_older_than(self.config.terminal_ttl)
            .await
        {
            Ok(0) => {}
            Ok(evicted) => info!(evicted, "Evicted expired terminal jobs"),
            Err(e) => warn!(error = %e, "Terminal eviction sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    use chrono::Utc;
    use scriptflow_common::{GenerationMode, JobPayload, JobStatus};
    use scriptflow_store::testutil::MemoryStore;

    fn payload(hash: &str) -> JobPayload {
        JobPayload {
            subscriber_id: "12345".to_string(),
            reel_url: "https://www.instagram.com/reel/AbC".to_string(),
            reel_hash: "rh".to_string(),
            request_hash: hash.to_string(),
            user_idea: "make it about coding".to_string(),
            variation_index: 0,
            mode: GenerationMode::Full,
            is_copy_mode: false,
            tone_hint: None,
            language_hint: None,
            intensity: Default::default(),
        }
    }

    fn job(hash: &str) -> JobRecord {
        JobRecord {
            job_id: Uuid::new_v4(),
            subscriber_id: "12345".to_string(),
            request_hash: hash.to_string(),
            payload: payload(hash),
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
        }
    }

    fn fast_config() -> QueueConfig {
        QueueConfig {
            concurrency: 2,
            rate_per_min: 100,
            max_attempts: 3,
            backoff_base: Duration::from_millis(5),
            heartbeat_interval: Duration::from_millis(20),
            stall_after: Duration::from_secs(60),
            terminal_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            poll_interval: Duration::from_millis(10),
            sweep_interval: Duration::from_secs(600),
        }
    }

    struct StubProcessor {
        fail_first: u32,
        permanent: bool,
        calls: AtomicU32,
    }

    impl StubProcessor {
        fn succeeding() -> Self {
            Self { fail_first: 0, permanent: false, calls: AtomicU32::new(0) }
        }

        fn failing_first(n: u32) -> Self {
            Self { fail_first: n, permanent: false, calls: AtomicU32::new(0) }
        }

        fn permanent_failure() -> Self {
            Self { fail_first: u32::MAX, permanent: true, calls: AtomicU32::new(0) }
        }
    }

    #[async_trait]
    impl JobProcessor for StubProcessor {
        async fn process(
            &self,
            _job: &JobRecord,
            progress: ProgressReporter,
        ) -> Result<Uuid, ServiceError> {
            progress.stage("working");
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.permanent {
                return Err(ServiceError::PermanentUpstream {
                    service: "download".to_string(),
                    reason: "login required".to_string(),
                });
            }
            if call < self.fail_first {
                return Err(ServiceError::Upstream {
                    service: "generation".to_string(),
                    message: "flaky".to_string(),
                });
            }
            Ok(Uuid::new_v4())
        }
    }

    async fn wait_for_status(
        store: &MemoryStore,
        job_id: Uuid,
        status: JobStatus,
    ) -> JobRecord {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(job) = store.job_snapshot(job_id) {
                if job.status == status {
                    return job;
                }
            }
            assert!(Instant::now() < deadline, "timed out waiting for {status:?}");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn enqueue_dedups_on_active_request_hash() {
        let store = Arc::new(MemoryStore::new());
        let queue = JobQueue::new(store, fast_config());

        let first = job("hash-1");
        let first_id = first.job_id;
        assert!(matches!(
            queue.enqueue(first).await.unwrap(),
            EnqueueOutcome::Queued(_)
        ));

        let second = job("hash-1");
        let outcome = queue.enqueue(second).await.unwrap();
        let EnqueueOutcome::Duplicate(existing) = outcome else {
            panic!("expected duplicate");
        };
        assert_eq!(existing.job_id, first_id);
    }

    #[tokio::test]
    async fn enqueue_dedups_on_job_id() {
        let store = Arc::new(MemoryStore::new());
        let queue = JobQueue::new(store.clone(), fast_config());

        let mut first = job("hash-1");
        let reused_id = first.job_id;
        queue.enqueue(first.clone()).await.unwrap();

        // Same job id resubmitted after the first terminally completed
        store.claim_next().await.unwrap();
        store.mark_completed(reused_id, Uuid::new_v4()).await.unwrap();

        first.request_hash = "hash-2".to_string();
        let outcome = queue.enqueue(first).await.unwrap();
        assert!(matches!(outcome, EnqueueOutcome::Duplicate(_)));
    }

    #[tokio::test]
    async fn processes_job_to_completion() {
        let store = Arc::new(MemoryStore::new());
        let queue = JobQueue::new(store.clone(), fast_config());
        let mut events = queue.subscribe();

        let record = job("hash-1");
        let job_id = record.job_id;
        queue.enqueue(record).await.unwrap();

        let runner = tokio::spawn(queue.clone().run(Arc::new(StubProcessor::succeeding())));

        let done = wait_for_status(&store, job_id, JobStatus::Completed).await;
        assert_eq!(done.attempts, 1);
        assert!(done.result_script_id.is_some());

        // Completed event observed
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match events.try_recv() {
                Ok(QueueEvent::Completed { job_id: id, .. }) if id == job_id => break,
                Ok(_) => {}
                Err(_) => {
                    assert!(Instant::now() < deadline, "no completed event");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }

        queue.shutdown();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn retries_transient_failures_with_backoff() {
        let store = Arc::new(MemoryStore::new());
        let queue = JobQueue::new(store.clone(), fast_config());

        let record = job("hash-1");
        let job_id = record.job_id;
        queue.enqueue(record).await.unwrap();

        let runner = tokio::spawn(queue.clone().run(Arc::new(StubProcessor::failing_first(1))));

        let done = wait_for_status(&store, job_id, JobStatus::Completed).await;
        assert_eq!(done.attempts, 2);

        queue.shutdown();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn permanent_failures_do_not_retry() {
        let store = Arc::new(MemoryStore::new());
        let queue = JobQueue::new(store.clone(), fast_config());

        let record = job("hash-1");
        let job_id = record.job_id;
        queue.enqueue(record).await.unwrap();

        let runner = tokio::spawn(queue.clone().run(Arc::new(StubProcessor::permanent_failure())));

        let done = wait_for_status(&store, job_id, JobStatus::Failed).await;
        assert_eq!(done.attempts, 1);
        assert!(done.error.unwrap().contains("login required"));

        queue.shutdown();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn exhausted_retries_fail_terminally() {
        let store = Arc::new(MemoryStore::new());
        let mut config = fast_config();
        config.max_attempts = 2;
        let queue = JobQueue::new(store.clone(), config);

        let mut record = job("hash-1");
        record.max_attempts = 2;
        let job_id = record.job_id;
        queue.enqueue(record).await.unwrap();

        let runner = tokio::spawn(queue.clone().run(Arc::new(StubProcessor::failing_first(99))));

        let done = wait_for_status(&store, job_id, JobStatus::Failed).await;
        assert_eq!(done.attempts, 2);

        queue.shutdown();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn stall_sweep_requeues_and_emits() {
        let store = Arc::new(MemoryStore::new());
        let queue = JobQueue::new(store.clone(), fast_config());
        let mut events = queue.subscribe();

        let record = job("hash-1");
        let job_id = record.job_id;
        queue.enqueue(record).await.unwrap();

        // Simulate a worker that died mid-job
        store.claim_next().await.unwrap();
        store.age_heartbeat(job_id, Duration::from_secs(120));

        queue.sweep().await;

        let snapshot = store.job_snapshot(job_id).unwrap();
        assert_eq!(snapshot.status, JobStatus::Queued);
        assert!(matches!(events.try_recv(), Ok(QueueEvent::Stalled { job_id: id }) if id == job_id));
    }

    #[tokio::test]
    async fn terminal_eviction_sweep() {
        let store = Arc::new(MemoryStore::new());
        let queue = JobQueue::new(store.clone(), fast_config());

        let record = job("hash-1");
        let job_id = record.job_id;
        queue.enqueue(record).await.unwrap();
        store.claim_next().await.unwrap();
        store.mark_completed(job_id, Uuid::new_v4()).await.unwrap();
        store.age_completion(job_id, Duration::from_secs(8 * 24 * 60 * 60));

        queue.sweep().await;
        assert!(store.job_snapshot(job_id).is_none());
    }

    #[test]
    fn rate_limit_allows_then_blocks() {
        let mut entries = VecDeque::new();
        let now = Instant::now();
        for _ in 0..10 {
            assert!(check_rate_limit(&mut entries, now, Duration::from_secs(60), 10));
        }
        assert!(!check_rate_limit(&mut entries, now, Duration::from_secs(60), 10));
    }

    #[test]
    fn rate_limit_window_rolls_over() {
        let mut entries = VecDeque::new();
        let t0 = Instant::now();
        for _ in 0..10 {
            assert!(check_rate_limit(&mut entries, t0, Duration::from_secs(60), 10));
        }
        let later = t0 + Duration::from_secs(61);
        assert!(check_rate_limit(&mut entries, later, Duration::from_secs(60), 10));
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = Duration::from_secs(2);
        assert_eq!(retry_backoff(base, 1), Duration::from_secs(2));
        assert_eq!(retry_backoff(base, 2), Duration::from_secs(4));
        assert_eq!(retry_backoff(base, 3), Duration::from_secs(8));
    }
}
