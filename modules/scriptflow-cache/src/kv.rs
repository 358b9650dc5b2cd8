//! Ephemeral KV primitives: sessions, counters, short-term flags, and the
//! distributed breaker mirror all live behind this trait.
//!
//! Callers must tolerate a single operation failing without invalidating
//! the request; every method returns a `Result` and nothing here panics.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::AsyncCommands;

use crate::error::{KvError, Result};

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Atomic increment. The TTL is applied when the key is created and left
    /// untouched on subsequent increments (fixed windows and monotonic
    /// counters both rely on this).
    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64>;

    /// Remaining TTL, `None` for missing or non-expiring keys.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Refresh a key's TTL without touching its value.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Enumerate keys under a prefix. For diagnostics, not hot paths.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

// ---------------------------------------------------------------------------
// Redis
// ---------------------------------------------------------------------------

/// Redis-backed store on a shared `ConnectionManager` (auto-reconnecting,
/// cheap to clone per operation).
#[derive(Clone)]
pub struct RedisKv {
    manager: redis::aio::ConnectionManager,
}

impl RedisKv {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| KvError::Connection(e.to_string()))?;
        let manager = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| KvError::Connection(e.to_string()))?;
        tracing::info!("Connected to ephemeral store");
        Ok(Self { manager })
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64> {
        let mut conn = self.manager.clone();
        let value: i64 = conn.incr(key, 1).await?;
        if value == 1 {
            conn.expire::<_, ()>(key, ttl.as_secs() as i64).await?;
        }
        Ok(value)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.manager.clone();
        let secs: i64 = conn.ttl(key).await?;
        // -2 = missing, -1 = no expiry
        if secs < 0 {
            Ok(None)
        } else {
            Ok(Some(Duration::from_secs(secs as u64)))
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.expire::<_, ()>(key, ttl.as_secs() as i64).await?;
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys)
    }
}

// ---------------------------------------------------------------------------
// In-memory (tests and local development)
// ---------------------------------------------------------------------------

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

/// In-memory `KvStore` with real TTL semantics plus a manual clock offset so
/// tests can cross window boundaries without sleeping.
#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, Entry>>,
    clock_offset: Mutex<Duration>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the store's notion of "now" by `d`.
    pub fn advance(&self, d: Duration) {
        *self.clock_offset.lock().unwrap() += d;
    }

    fn now(&self) -> Instant {
        Instant::now() + *self.clock_offset.lock().unwrap()
    }

    fn live_value(&self, key: &str) -> Option<String> {
        let now = self.now();
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) => {
                if entry.expires_at.is_some_and(|at| at <= now) {
                    entries.remove(key);
                    None
                } else {
                    Some(entry.value.clone())
                }
            }
            None => None,
        }
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.live_value(key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let expires_at = Some(self.now() + ttl);
        self.entries.lock().unwrap().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64> {
        let current = self.live_value(key);
        let mut entries = self.entries.lock().unwrap();
        match current {
            Some(value) => {
                let n: i64 = value
                    .parse()
                    .map_err(|_| KvError::Value(format!("non-integer value at {key}")))?;
                let next = n + 1;
                if let Some(entry) = entries.get_mut(key) {
                    entry.value = next.to_string();
                }
                Ok(next)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: "1".to_string(),
                        expires_at: Some(self.now() + ttl),
                    },
                );
                Ok(1)
            }
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let now = self.now();
        let entries = self.entries.lock().unwrap();
        Ok(entries.get(key).and_then(|entry| {
            entry
                .expires_at
                .filter(|at| *at > now)
                .map(|at| at - now)
        }))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let now = self.now();
        if let Some(entry) = self.entries.lock().unwrap().get_mut(key) {
            entry.expires_at = Some(now + ttl);
        }
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let now = self.now();
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .iter()
            .filter(|(k, entry)| {
                k.starts_with(prefix) && !entry.expires_at.is_some_and(|at| at <= now)
            })
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete() {
        let kv = MemoryKv::new();
        kv.set("a", "1", Duration::from_secs(60)).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap().as_deref(), Some("1"));
        kv.delete("a").await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn incr_is_monotonic_and_keeps_first_ttl() {
        let kv = MemoryKv::new();
        assert_eq!(kv.incr("c", Duration::from_secs(60)).await.unwrap(), 1);
        assert_eq!(kv.incr("c", Duration::from_secs(9999)).await.unwrap(), 2);
        assert_eq!(kv.incr("c", Duration::from_secs(9999)).await.unwrap(), 3);
        // TTL from the first incr still applies
        let ttl = kv.ttl("c").await.unwrap().unwrap();
        assert!(ttl <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn expiry_advances_with_clock() {
        let kv = MemoryKv::new();
        kv.set("s", "v", Duration::from_secs(30)).await.unwrap();
        kv.advance(Duration::from_secs(31));
        assert_eq!(kv.get("s").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expire_refreshes_ttl() {
        let kv = MemoryKv::new();
        kv.set("s", "v", Duration::from_secs(10)).await.unwrap();
        kv.advance(Duration::from_secs(8));
        kv.expire("s", Duration::from_secs(30)).await.unwrap();
        kv.advance(Duration::from_secs(15));
        assert_eq!(kv.get("s").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn scan_prefix_filters() {
        let kv = MemoryKv::new();
        kv.set("session:1", "a", Duration::from_secs(60)).await.unwrap();
        kv.set("session:2", "b", Duration::from_secs(60)).await.unwrap();
        kv.set("blocked:1", "c", Duration::from_secs(60)).await.unwrap();
        let mut keys = kv.scan_prefix("session:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["session:1", "session:2"]);
    }
}
