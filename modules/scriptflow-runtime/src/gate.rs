//! Access and quota gate: beta admission, short-term blocks, and the
//! per-subscriber rate window. Sub-gates run in order and short-circuit.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use scriptflow_cache::KvStore;
use scriptflow_common::{AccessStatus, ServiceError};
use scriptflow_store::{AdmitOutcome, DocumentStore, UserRepo};

const QUOTA_WINDOW: Duration = Duration::from_secs(60 * 60);
const BLOCK_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Successful gate result, carried into response headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    /// Requests left in the current window after this one.
    pub remaining_quota: u32,
    /// Seconds until the window resets.
    pub window_reset_secs: u64,
    /// Ordinal assigned if this request admitted a new subscriber.
    pub new_ordinal: Option<i32>,
    /// Set when this request promoted the subscriber off the waitlist.
    pub promoted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Admitted(Admission),
    Waitlisted { position: i64 },
}

pub struct AccessGate {
    users: Arc<dyn DocumentStore>,
    kv: Arc<dyn KvStore>,
    capacity: i64,
    quota_per_hour: u32,
}

impl AccessGate {
    pub fn new(
        users: Arc<dyn DocumentStore>,
        kv: Arc<dyn KvStore>,
        capacity: i64,
        quota_per_hour: u32,
    ) -> Self {
        Self {
            users,
            kv,
            capacity,
            quota_per_hour,
        }
    }

    /// Run the full gate chain for one request.
    pub async fn check(&self, subscriber_id: &str) -> Result<GateOutcome, ServiceError> {
        // 1. Beta admission
        let mut new_ordinal = None;
        let mut promoted = false;

        let user = self
            .users
            .find_user(subscriber_id)
            .await
            .map_err(|e| ServiceError::Unavailable(format!("user store unreachable: {e}")))?;

        match user.map(|u| u.status) {
            None => {
                let outcome = self
                    .users
                    .admit_or_waitlist(subscriber_id, self.capacity)
                    .await
                    .map_err(|e| {
                        ServiceError::Unavailable(format!("admission store unreachable: {e}"))
                    })?;
                match outcome {
                    AdmitOutcome::Admitted { ordinal } => {
                        info!(subscriber_id, ordinal, "Admitted new beta subscriber");
                        new_ordinal = Some(ordinal);
                    }
                    AdmitOutcome::Waitlisted { position } => {
                        info!(subscriber_id, position, "Subscriber waitlisted");
                        return Ok(GateOutcome::Waitlisted { position });
                    }
                }
            }
            Some(AccessStatus::Blocked) => {
                return Err(ServiceError::AccessDenied(
                    "this account is blocked".to_string(),
                ));
            }
            Some(AccessStatus::Waitlist) => {
                let promotions = self
                    .users
                    .promote_waitlisted(self.capacity)
                    .await
                    .unwrap_or_default();
                if promotions.iter().any(|id| id == subscriber_id) {
                    info!(subscriber_id, "Promoted subscriber from waitlist");
                    promoted = true;
                } else {
                    let position = self
                        .users
                        .waitlist_position(subscriber_id)
                        .await
                        .ok()
                        .flatten()
                        .unwrap_or(0);
                    return Ok(GateOutcome::Waitlisted { position });
                }
            }
            Some(AccessStatus::Active) => {}
        }

        // 2. Short-term block flag. Read failures allow: the durable status
        // above is the authoritative block.
        match self.kv.get(&format!("blocked:{subscriber_id}")).await {
            Ok(Some(_)) => {
                return Err(ServiceError::AccessDenied(
                    "this account is temporarily blocked".to_string(),
                ));
            }
            Ok(None) => {}
            Err(e) => warn!(subscriber_id, error = %e, "Block-flag read failed, allowing"),
        }

        // 3. Per-subscriber quota. This is an abuse control: a store error
        // denies (fail closed).
        let quota_key = format!("user_rl:{subscriber_id}");
        let used = self
            .kv
            .incr(&quota_key, QUOTA_WINDOW)
            .await
            .map_err(|e| ServiceError::Unavailable(format!("quota store unreachable: {e}")))?;

        let window_reset_secs = self
            .kv
            .ttl(&quota_key)
            .await
            .ok()
            .flatten()
            .unwrap_or(QUOTA_WINDOW)
            .as_secs();

        if used > self.quota_per_hour as i64 {
            return Err(ServiceError::QuotaExceeded {
                retry_after: window_reset_secs,
            });
        }

        let remaining_quota = self.quota_per_hour.saturating_sub(used as u32);

        // Bookkeeping, best-effort.
        if let Err(e) = self.users.touch_request(subscriber_id, Utc::now()).await {
            warn!(subscriber_id, error = %e, "Failed to record request timestamp");
        }

        Ok(GateOutcome::Admitted(Admission {
            remaining_quota,
            window_reset_secs,
            new_ordinal,
            promoted,
        }))
    }

    /// Set the short-term block flag for a subscriber.
    pub async fn block_temporarily(&self, subscriber_id: &str) -> Result<(), ServiceError> {
        self.kv
            .set(&format!("blocked:{subscriber_id}"), "1", BLOCK_TTL)
            .await
            .map_err(|e| ServiceError::Unavailable(format!("block store unreachable: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use scriptflow_cache::{KvError, MemoryKv};
    use scriptflow_store::testutil::MemoryStore;

    fn gate_with(capacity: i64, quota: u32) -> (AccessGate, Arc<MemoryStore>, Arc<MemoryKv>) {
        let store = Arc::new(MemoryStore::new());
        let kv = Arc::new(MemoryKv::new());
        let gate = AccessGate::new(store.clone(), kv.clone(), capacity, quota);
        (gate, store, kv)
    }

    #[tokio::test]
    async fn admits_new_subscriber_with_next_ordinal() {
        let (gate, _, _) = gate_with(10, 10);
        let outcome = gate.check("11111").await.unwrap();
        let GateOutcome::Admitted(admission) = outcome else {
            panic!("expected admission");
        };
        assert_eq!(admission.new_ordinal, Some(1));

        let outcome = gate.check("22222").await.unwrap();
        let GateOutcome::Admitted(admission) = outcome else {
            panic!("expected admission");
        };
        assert_eq!(admission.new_ordinal, Some(2));
    }

    #[tokio::test]
    async fn waitlists_at_capacity_with_position() {
        let (gate, _, _) = gate_with(1, 10);
        gate.check("11111").await.unwrap();
        let outcome = gate.check("22222").await.unwrap();
        assert_eq!(outcome, GateOutcome::Waitlisted { position: 1 });
        let outcome = gate.check("33333").await.unwrap();
        assert_eq!(outcome, GateOutcome::Waitlisted { position: 2 });
    }

    #[tokio::test]
    async fn waitlisted_subscriber_promoted_when_capacity_grows() {
        let (gate, store, kv) = gate_with(1, 10);
        gate.check("11111").await.unwrap();
        gate.check("22222").await.unwrap(); // waitlisted

        // Capacity raised: a new gate sees the larger limit
        let bigger = AccessGate::new(store.clone(), kv.clone(), 2, 10);
        let outcome = bigger.check("22222").await.unwrap();
        let GateOutcome::Admitted(admission) = outcome else {
            panic!("expected promotion");
        };
        assert!(admission.promoted);
        // Promotion assigned a fresh, monotonic ordinal
        let user = store.find_user("22222").await.unwrap().unwrap();
        assert_eq!(user.registration_number, Some(2));
        assert_eq!(user.status, AccessStatus::Active);
    }

    #[tokio::test]
    async fn blocked_user_is_denied() {
        let (gate, _, _) = gate_with(10, 10);
        gate.check("11111").await.unwrap();
        gate.block_temporarily("11111").await.unwrap();
        let denied = gate.check("11111").await;
        assert!(matches!(denied, Err(ServiceError::AccessDenied(_))));
    }

    #[tokio::test]
    async fn quota_denies_past_ceiling_with_reset_window() {
        let (gate, _, _) = gate_with(10, 3);
        for _ in 0..3 {
            assert!(matches!(
                gate.check("11111").await.unwrap(),
                GateOutcome::Admitted(_)
            ));
        }
        let denied = gate.check("11111").await;
        let Err(ServiceError::QuotaExceeded { retry_after }) = denied else {
            panic!("expected quota denial, got {denied:?}");
        };
        assert!(retry_after <= QUOTA_WINDOW.as_secs());
    }

    #[tokio::test]
    async fn quota_window_resets_after_an_hour() {
        let (gate, _, kv) = gate_with(10, 2);
        gate.check("11111").await.unwrap();
        gate.check("11111").await.unwrap();
        assert!(gate.check("11111").await.is_err());
        kv.advance(Duration::from_secs(60 * 60 + 1));
        assert!(gate.check("11111").await.is_ok());
    }

    #[tokio::test]
    async fn remaining_quota_counts_down() {
        let (gate, _, _) = gate_with(10, 3);
        let GateOutcome::Admitted(first) = gate.check("11111").await.unwrap() else {
            panic!()
        };
        assert_eq!(first.remaining_quota, 2);
        let GateOutcome::Admitted(second) = gate.check("11111").await.unwrap() else {
            panic!()
        };
        assert_eq!(second.remaining_quota, 1);
    }

    /// KV double whose counter operations always fail.
    struct BrokenKv;

    #[async_trait]
    impl KvStore for BrokenKv {
        async fn get(&self, _key: &str) -> Result<Option<String>, KvError> {
            Err(KvError::Connection("down".into()))
        }
        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), KvError> {
            Err(KvError::Connection("down".into()))
        }
        async fn delete(&self, _key: &str) -> Result<(), KvError> {
            Err(KvError::Connection("down".into()))
        }
        async fn incr(&self, _key: &str, _ttl: Duration) -> Result<i64, KvError> {
            Err(KvError::Connection("down".into()))
        }
        async fn ttl(&self, _key: &str) -> Result<Option<Duration>, KvError> {
            Err(KvError::Connection("down".into()))
        }
        async fn expire(&self, _key: &str, _ttl: Duration) -> Result<(), KvError> {
            Err(KvError::Connection("down".into()))
        }
        async fn scan_prefix(&self, _prefix: &str) -> Result<Vec<String>, KvError> {
            Err(KvError::Connection("down".into()))
        }
    }

    #[tokio::test]
    async fn quota_store_outage_fails_closed() {
        let store = Arc::new(MemoryStore::new());
        let gate = AccessGate::new(store, Arc::new(BrokenKv), 10, 10);
        let denied = gate.check("11111").await;
        assert!(matches!(denied, Err(ServiceError::Unavailable(_))));
    }
}
