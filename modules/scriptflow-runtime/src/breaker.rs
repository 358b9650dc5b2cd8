//! Per-service circuit breakers with an optional distributed mirror.
//!
//! The local state machine is authoritative and fast; the KV mirror is
//! best-effort so multi-instance deployments converge. A mirror-store
//! outage must never take requests down with it: mirror reads and writes
//! that fail are ignored and the local view wins.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use scriptflow_cache::KvStore;
use scriptflow_common::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    /// Gauge encoding: CLOSED=0, HALF_OPEN=1, OPEN=2.
    pub fn gauge_value(&self) -> i64 {
        match self {
            BreakerState::Closed => 0,
            BreakerState::HalfOpen => 1,
            BreakerState::Open => 2,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures within the window before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a half-open probe.
    pub reset_timeout: Duration,
    /// Successes required in half-open before closing.
    pub success_threshold: u32,
    /// Failures older than this no longer count toward the threshold.
    pub failure_window: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            success_threshold: 2,
            failure_window: Duration::from_secs(60),
        }
    }
}

/// Emitted on every state transition; telemetry keeps the per-service gauge
/// from these.
#[derive(Debug, Clone)]
pub struct BreakerEvent {
    pub service: String,
    pub from: BreakerState,
    pub to: BreakerState,
}

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    first_failure_at: Option<Instant>,
    opened_at: Option<Instant>,
    half_open_successes: u32,
}

pub struct Breaker {
    service: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    events: broadcast::Sender<BreakerEvent>,
}

impl Breaker {
    fn new(service: &str, config: BreakerConfig, events: broadcast::Sender<BreakerEvent>) -> Self {
        Self {
            service: service.to_string(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                first_failure_at: None,
                opened_at: None,
                half_open_successes: 0,
            }),
            events,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap().state
    }

    /// Check whether a call may proceed. `Err` carries milliseconds until
    /// the next half-open probe.
    pub fn try_acquire(&self) -> Result<(), u64> {
        self.try_acquire_at(Instant::now())
    }

    pub fn record_success(&self) {
        self.record_success_at(Instant::now())
    }

    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now())
    }

    // Time-parameterized variants keep the state machine testable without
    // sleeping.

    pub fn try_acquire_at(&self, now: Instant) -> Result<(), u64> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let opened_at = inner.opened_at.unwrap_or(now);
                let probe_at = opened_at + self.config.reset_timeout;
                if probe_at <= now {
                    self.transition(&mut inner, BreakerState::HalfOpen);
                    inner.half_open_successes = 0;
                    Ok(())
                } else {
                    Err((probe_at - now).as_millis() as u64)
                }
            }
        }
    }

    pub fn record_success_at(&self, _now: Instant) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures = 0;
                inner.first_failure_at = None;
            }
            BreakerState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    self.transition(&mut inner, BreakerState::Closed);
                    inner.consecutive_failures = 0;
                    inner.first_failure_at = None;
                    inner.opened_at = None;
                    inner.half_open_successes = 0;
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn record_failure_at(&self, now: Instant) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed => {
                let window_start = inner.first_failure_at.unwrap_or(now);
                if now.duration_since(window_start) > self.config.failure_window {
                    // Window rolled over; this failure starts a fresh streak.
                    inner.consecutive_failures = 1;
                    inner.first_failure_at = Some(now);
                } else {
                    inner.consecutive_failures += 1;
                    if inner.first_failure_at.is_none() {
                        inner.first_failure_at = Some(now);
                    }
                }
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.opened_at = Some(now);
                    self.transition(&mut inner, BreakerState::Open);
                }
            }
            BreakerState::HalfOpen => {
                inner.opened_at = Some(now);
                self.transition(&mut inner, BreakerState::Open);
            }
            BreakerState::Open => {}
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: BreakerState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        match to {
            BreakerState::Open => warn!(service = %self.service, "Circuit opened"),
            BreakerState::HalfOpen => info!(service = %self.service, "Circuit half-open, probing"),
            BreakerState::Closed => info!(service = %self.service, "Circuit closed"),
        }
        let _ = self.events.send(BreakerEvent {
            service: self.service.clone(),
            from,
            to,
        });
    }
}

/// Named breakers, one per external service, plus the shared event topic
/// and the optional distributed mirror.
pub struct BreakerRegistry {
    breakers: Mutex<HashMap<String, Arc<Breaker>>>,
    config: BreakerConfig,
    events: broadcast::Sender<BreakerEvent>,
    mirror: Option<Arc<dyn KvStore>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig, mirror: Option<Arc<dyn KvStore>>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            breakers: Mutex::new(HashMap::new()),
            config,
            events,
            mirror,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.events.subscribe()
    }

    pub fn breaker(&self, service: &str) -> Arc<Breaker> {
        let mut breakers = self.breakers.lock().unwrap();
        breakers
            .entry(service.to_string())
            .or_insert_with(|| {
                Arc::new(Breaker::new(service, self.config, self.events.clone()))
            })
            .clone()
    }

    /// Snapshot of every known breaker's state.
    pub fn snapshot(&self) -> Vec<(String, BreakerState)> {
        let breakers = self.breakers.lock().unwrap();
        breakers
            .iter()
            .map(|(name, b)| (name.clone(), b.state()))
            .collect()
    }

    /// Run `fut` through the named breaker. Denied calls return
    /// [`ServiceError::CircuitOpen`] without touching the upstream.
    pub async fn call<T, F>(&self, service: &str, fut: F) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, ServiceError>>,
    {
        let breaker = self.breaker(service);

        if let Err(retry_after_ms) = breaker.try_acquire() {
            return Err(ServiceError::CircuitOpen {
                service: service.to_string(),
                retry_after_ms,
            });
        }

        // A peer instance may have opened the circuit already. Mirror errors
        // fail open: the breaker must never be the sole cause of an outage.
        if breaker.state() == BreakerState::Closed {
            if let Some(remaining_ms) = self.mirror_open_remaining(service).await {
                return Err(ServiceError::CircuitOpen {
                    service: service.to_string(),
                    retry_after_ms: remaining_ms,
                });
            }
        }

        match fut.await {
            Ok(value) => {
                breaker.record_success();
                self.mirror_write(service, breaker.state()).await;
                Ok(value)
            }
            Err(err) => {
                if Self::counts_as_breaker_failure(&err) {
                    breaker.record_failure();
                    self.mirror_write(service, breaker.state()).await;
                }
                Err(err)
            }
        }
    }

    fn counts_as_breaker_failure(err: &ServiceError) -> bool {
        matches!(
            err,
            ServiceError::Upstream { .. }
                | ServiceError::PermanentUpstream { .. }
                | ServiceError::Timeout { .. }
                | ServiceError::Internal(_)
        )
    }

    async fn mirror_open_remaining(&self, service: &str) -> Option<u64> {
        let mirror = self.mirror.as_ref()?;
        let key = format!("circuit:{service}:state");
        match mirror.get(&key).await {
            Ok(Some(state)) if state == "open" => {
                let remaining = mirror
                    .ttl(&key)
                    .await
                    .ok()
                    .flatten()
                    .unwrap_or(self.config.reset_timeout);
                Some(remaining.as_millis() as u64)
            }
            Ok(_) => None,
            Err(e) => {
                debug!(service, error = %e, "Breaker mirror read failed, allowing call");
                None
            }
        }
    }

    async fn mirror_write(&self, service: &str, state: BreakerState) {
        let Some(mirror) = self.mirror.as_ref() else {
            return;
        };
        let key = format!("circuit:{service}:state");
        let result = match state {
            // The open flag expires on its own at the next probe time.
            BreakerState::Open => {
                mirror
                    .set(&key, state.as_str(), self.config.reset_timeout)
                    .await
            }
            _ => mirror.delete(&key).await,
        };
        if let Err(e) = result {
            debug!(service, error = %e, "Breaker mirror write failed, local view wins");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_breaker(config: BreakerConfig) -> Breaker {
        let (events, _) = broadcast::channel(16);
        Breaker::new("test", config, events)
    }

    fn quick_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(10),
            success_threshold: 2,
            failure_window: Duration::from_secs(60),
        }
    }

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = test_breaker(quick_config());
        let t0 = Instant::now();
        breaker.record_failure_at(t0);
        breaker.record_failure_at(t0 + Duration::from_secs(1));
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.record_failure_at(t0 + Duration::from_secs(2));
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn success_resets_failure_streak() {
        let breaker = test_breaker(quick_config());
        let t0 = Instant::now();
        breaker.record_failure_at(t0);
        breaker.record_failure_at(t0);
        breaker.record_success_at(t0);
        breaker.record_failure_at(t0);
        breaker.record_failure_at(t0);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn open_denies_with_time_until_probe() {
        let breaker = test_breaker(quick_config());
        let t0 = Instant::now();
        for _ in 0..3 {
            breaker.record_failure_at(t0);
        }
        let denied = breaker.try_acquire_at(t0 + Duration::from_secs(4));
        let remaining = denied.unwrap_err();
        assert!(remaining > 5_000 && remaining <= 6_000, "remaining={remaining}");
    }

    #[test]
    fn transitions_to_half_open_after_reset_timeout() {
        let breaker = test_breaker(quick_config());
        let t0 = Instant::now();
        for _ in 0..3 {
            breaker.record_failure_at(t0);
        }
        assert!(breaker.try_acquire_at(t0 + Duration::from_secs(10)).is_ok());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn half_open_closes_after_success_threshold() {
        let breaker = test_breaker(quick_config());
        let t0 = Instant::now();
        for _ in 0..3 {
            breaker.record_failure_at(t0);
        }
        let probe = t0 + Duration::from_secs(10);
        assert!(breaker.try_acquire_at(probe).is_ok());
        breaker.record_success_at(probe);
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.record_success_at(probe);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_reopens_on_single_failure() {
        let breaker = test_breaker(quick_config());
        let t0 = Instant::now();
        for _ in 0..3 {
            breaker.record_failure_at(t0);
        }
        let probe = t0 + Duration::from_secs(10);
        assert!(breaker.try_acquire_at(probe).is_ok());
        breaker.record_failure_at(probe);
        assert_eq!(breaker.state(), BreakerState::Open);
        // Re-opened: denied again until the next reset timeout
        assert!(breaker.try_acquire_at(probe + Duration::from_secs(1)).is_err());
    }

    #[test]
    fn failures_outside_window_start_a_fresh_streak() {
        let breaker = test_breaker(quick_config());
        let t0 = Instant::now();
        breaker.record_failure_at(t0);
        breaker.record_failure_at(t0 + Duration::from_secs(1));
        // Third failure lands past the 60s window
        breaker.record_failure_at(t0 + Duration::from_secs(90));
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn registry_call_counts_failures_and_denies() {
        let registry = BreakerRegistry::new(quick_config(), None);
        for _ in 0..3 {
            let result: Result<(), ServiceError> = registry
                .call("download", async {
                    Err(ServiceError::Upstream {
                        service: "download".into(),
                        message: "boom".into(),
                    })
                })
                .await;
            assert!(result.is_err());
        }
        let denied: Result<(), ServiceError> = registry.call("download", async { Ok(()) }).await;
        assert!(matches!(denied, Err(ServiceError::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn registry_does_not_count_validation_errors() {
        let registry = BreakerRegistry::new(quick_config(), None);
        for _ in 0..5 {
            let _: Result<(), ServiceError> = registry
                .call("generation", async {
                    Err(ServiceError::Validation("bad input".into()))
                })
                .await;
        }
        assert_eq!(registry.breaker("generation").state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn mirror_open_flag_denies_closed_local() {
        use scriptflow_cache::MemoryKv;
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        kv.set("circuit:messaging:state", "open", Duration::from_secs(30))
            .await
            .unwrap();
        let registry = BreakerRegistry::new(quick_config(), Some(kv));
        let denied: Result<(), ServiceError> = registry.call("messaging", async { Ok(()) }).await;
        assert!(matches!(denied, Err(ServiceError::CircuitOpen { .. })));
    }
}
