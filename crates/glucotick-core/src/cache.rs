//! In-process TTL cache for the last history batch.

use std::time::Duration;

use tokio::time::Instant;

use crate::HistoryBatch;

#[derive(Debug, Clone)]
struct CachedHistory {
    history: HistoryBatch,
    captured_at: Instant,
}

/// Single-slot history cache owned by the monitor loop.
///
/// Uses the tokio clock so paused-time tests control expiry.
#[derive(Debug, Clone)]
pub struct EphemeralCache {
    slot: Option<CachedHistory>,
    ttl: Duration,
}

impl EphemeralCache {
    pub fn new(ttl: Duration) -> Self {
        Self { slot: None, ttl }
    }

    /// TTL matching a history fetch interval in minutes.
    pub fn for_interval_minutes(minutes: u32) -> Self {
        Self::new(Duration::from_secs(u64::from(minutes) * 60))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn set_ttl(&mut self, ttl: Duration) {
        self.ttl = ttl;
    }

    /// Returns the cached batch only while `now - captured_at < ttl`.
    pub fn get(&self, now: Instant) -> Option<&HistoryBatch> {
        self.slot
            .as_ref()
            .filter(|cached| now.saturating_duration_since(cached.captured_at) < self.ttl)
            .map(|cached| &cached.history)
    }

    /// Replaces the slot unconditionally.
    pub fn put(&mut self, history: HistoryBatch, now: Instant) {
        self.slot = Some(CachedHistory {
            history,
            captured_at: now,
        });
    }

    pub fn clear(&mut self) {
        self.slot = None;
    }

    pub fn is_empty(&self) -> bool {
        self.slot.is_none()
    }
}

impl Default for EphemeralCache {
    fn default() -> Self {
        Self::for_interval_minutes(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Reading, TrendDirection, UtcDateTime};

    fn batch(value: f64) -> HistoryBatch {
        let reading = Reading::new(value, UtcDateTime::now(), TrendDirection::Stable)
            .expect("valid reading");
        HistoryBatch::new(vec![reading])
    }

    #[test]
    fn entry_expires_exactly_at_ttl() {
        let mut cache = EphemeralCache::for_interval_minutes(5);
        let start = Instant::now();
        cache.put(batch(100.0), start);

        assert!(cache.get(start + Duration::from_secs(299)).is_some());
        assert!(cache.get(start + Duration::from_secs(300)).is_none());
    }

    #[test]
    fn put_replaces_previous_batch() {
        let mut cache = EphemeralCache::default();
        let start = Instant::now();
        cache.put(batch(100.0), start);
        cache.put(batch(140.0), start);

        let latest = cache.get(start).and_then(HistoryBatch::latest).map(|r| r.value);
        assert_eq!(latest, Some(140.0));
    }

    #[test]
    fn clear_empties_slot() {
        let mut cache = EphemeralCache::default();
        cache.put(batch(100.0), Instant::now());
        cache.clear();

        assert!(cache.is_empty());
        assert!(cache.get(Instant::now()).is_none());
    }
}
