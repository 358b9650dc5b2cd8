//! Monotonic variation counters, keyed by (subscriber, canonical URL,
//! normalized idea). Separate from the session: 7-day TTL, atomic
//! increments, and the only source of truth for ordering within a family.

use std::sync::Arc;
use std::time::Duration;

use scriptflow_cache::{KvError, KvStore};
use scriptflow_common::normalize_idea;

const VARIATION_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Past this many variations the response carries an advisory nudge.
/// Never blocks.
const SOFT_CEILING: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariationTicket {
    /// 0-indexed variation ordinal.
    pub index: u32,
    /// Set once the subscriber has gone past the soft ceiling for this
    /// family.
    pub advisory: bool,
}

pub struct VariationCounter {
    kv: Arc<dyn KvStore>,
}

impl VariationCounter {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn key(subscriber_id: &str, canonical_url: &str, idea: &str) -> String {
        format!(
            "variation:{subscriber_id}:{canonical_url}:{}",
            normalize_idea(idea)
        )
    }

    /// Atomically increment and return the 0-indexed variation for this
    /// (subscriber, url, idea) family.
    pub async fn get_and_increment(
        &self,
        subscriber_id: &str,
        canonical_url: &str,
        idea: &str,
    ) -> Result<VariationTicket, KvError> {
        let key = Self::key(subscriber_id, canonical_url, idea);
        let value = self.kv.incr(&key, VARIATION_TTL).await?;
        let index = (value - 1).max(0) as u32;
        Ok(VariationTicket {
            index,
            advisory: index >= SOFT_CEILING,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptflow_cache::MemoryKv;

    #[tokio::test]
    async fn indices_are_a_strictly_increasing_prefix_of_naturals() {
        let counter = VariationCounter::new(Arc::new(MemoryKv::new()));
        for expected in 0..8u32 {
            let ticket = counter
                .get_and_increment("100", "https://u/reel/A", "idea")
                .await
                .unwrap();
            assert_eq!(ticket.index, expected);
        }
    }

    #[tokio::test]
    async fn families_are_independent() {
        let counter = VariationCounter::new(Arc::new(MemoryKv::new()));
        counter.get_and_increment("100", "https://u/reel/A", "idea one").await.unwrap();
        counter.get_and_increment("100", "https://u/reel/A", "idea one").await.unwrap();
        let other = counter
            .get_and_increment("100", "https://u/reel/A", "idea two")
            .await
            .unwrap();
        assert_eq!(other.index, 0);
        let other_url = counter
            .get_and_increment("100", "https://u/reel/B", "idea one")
            .await
            .unwrap();
        assert_eq!(other_url.index, 0);
    }

    #[tokio::test]
    async fn idea_normalization_collapses_case_and_spacing() {
        let counter = VariationCounter::new(Arc::new(MemoryKv::new()));
        counter.get_and_increment("100", "https://u/reel/A", "My Idea").await.unwrap();
        let second = counter
            .get_and_increment("100", "https://u/reel/A", "  my   idea ")
            .await
            .unwrap();
        assert_eq!(second.index, 1);
    }

    #[tokio::test]
    async fn advisory_past_soft_ceiling_never_blocks() {
        let counter = VariationCounter::new(Arc::new(MemoryKv::new()));
        for _ in 0..5 {
            let ticket = counter
                .get_and_increment("100", "https://u/reel/A", "idea")
                .await
                .unwrap();
            assert!(!ticket.advisory);
        }
        let sixth = counter
            .get_and_increment("100", "https://u/reel/A", "idea")
            .await
            .unwrap();
        assert_eq!(sixth.index, 5);
        assert!(sixth.advisory);
        // Still not blocked
        let seventh = counter
            .get_and_increment("100", "https://u/reel/A", "idea")
            .await
            .unwrap();
        assert_eq!(seventh.index, 6);
    }
}
