//! Process-wide pending-interaction store.
//!
//! Keyed by opaque string (`"{chatID}_{messageID}"`, `"add_custom_{chatID}"`,
//! ...), values are the raw encoded [`bridge_core::model::PendingPayload`].
//! A background sweep evicts entries past their TTL so an abandoned flow
//! doesn't pin memory forever.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Default eviction window.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

struct Entry {
    value: String,
    inserted_at: Instant,
}

pub struct PendingStore {
    ttl: Duration,
    entries: DashMap<String, Entry>,
}

impl PendingStore {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: DashMap::new() }
    }

    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), Entry { value: value.into(), inserted_at: Instant::now() });
    }

    /// Remove and return the value, or `None` if absent or expired — a
    /// single caller ever observes `Some` for a given key.
    pub fn take(&self, key: &str) -> Option<String> {
        let (_, entry) = self.entries.remove(key)?;
        if entry.inserted_at.elapsed() > self.ttl {
            return None;
        }
        Some(entry.value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.get(key).map(|e| e.inserted_at.elapsed() <= self.ttl).unwrap_or(false)
    }

    /// Drop every entry older than the TTL. Call this periodically from a
    /// background task; `take` already self-polices on read, this just
    /// reclaims memory for keys nobody ever reads again.
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.inserted_at.elapsed() <= self.ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_removes_and_returns_once() {
        let store = PendingStore::new(DEFAULT_TTL);
        store.put("42_7", "Buy milk|||DELIM|||7");
        assert_eq!(store.take("42_7").as_deref(), Some("Buy milk|||DELIM|||7"));
        assert_eq!(store.take("42_7"), None);
    }

    #[test]
    fn expired_entry_is_not_returned() {
        let store = PendingStore::new(Duration::from_millis(1));
        store.put("k", "v");
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(store.take("k"), None);
    }

    #[test]
    fn sweep_drops_only_expired_entries() {
        let store = PendingStore::new(Duration::from_millis(5));
        store.put("stale", "v");
        std::thread::sleep(Duration::from_millis(20));
        store.put("fresh", "v");
        let dropped = store.sweep();
        assert_eq!(dropped, 1);
        assert!(store.contains("fresh"));
        assert!(!store.contains("stale"));
    }
}
