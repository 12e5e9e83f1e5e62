//! Bounded LRU of recently-seen callback IDs. A duplicate callback short-circuits after the caller
//! sends an empty "answer" back to the chat platform.

use std::sync::Mutex;

use lru::LruCache;
use std::num::NonZeroUsize;

pub struct CallbackDedup {
    seen: Mutex<LruCache<String, ()>>,
}

impl CallbackDedup {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self { seen: Mutex::new(LruCache::new(capacity)) }
    }

    /// Returns `true` the first time `callback_id` is seen; `false` on every
    /// subsequent call until it's evicted by capacity pressure.
    pub fn first_sighting(&self, callback_id: &str) -> bool {
        let mut seen = self.seen.lock().unwrap();
        if seen.get(callback_id).is_some() {
            false
        } else {
            seen.put(callback_id.to_string(), ());
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sighting_then_duplicate() {
        let dedup = CallbackDedup::new(8);
        assert!(dedup.first_sighting("cb-1"));
        assert!(!dedup.first_sighting("cb-1"));
    }

    #[test]
    fn capacity_evicts_oldest() {
        let dedup = CallbackDedup::new(2);
        assert!(dedup.first_sighting("a"));
        assert!(dedup.first_sighting("b"));
        assert!(dedup.first_sighting("c")); // evicts "a"
        assert!(dedup.first_sighting("a")); // "a" is new again
    }
}
