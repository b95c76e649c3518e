use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::warn;

pub const DEFAULT_CAPACITY: usize = 1000;

type Key = [u8; 32];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    InFlight,
    Done,
}

/// What to do with a delivery.
pub enum Delivery {
    /// First sighting; process it and complete the guard on success.
    Fresh(DeliveryGuard),
    /// Already processed successfully.
    Duplicate,
    /// Another handler is processing the same body right now.
    InFlight,
}

struct Lru {
    capacity: usize,
    entries: HashMap<Key, (Entry, u64)>,
    order: VecDeque<(Key, u64)>,
    tick: u64,
}

impl Lru {
    fn touch(&mut self, key: Key, entry: Entry) {
        self.tick += 1;
        self.entries.insert(key, (entry, self.tick));
        self.order.push_back((key, self.tick));
        self.evict();
    }

    // `order` may hold stale ticks for re-touched keys; they are skipped here.
    fn evict(&mut self) {
        while self.entries.len() > self.capacity {
            let Some((key, tick)) = self.order.pop_front() else {
                break;
            };
            if self.entries.get(&key).is_some_and(|(_, t)| *t == tick) {
                self.entries.remove(&key);
            }
        }
        if self.order.len() > self.capacity * 4 {
            let entries = &self.entries;
            self.order
                .retain(|(key, tick)| entries.get(key).is_some_and(|(_, t)| t == tick));
        }
    }
}

/// Bounded record of webhook bodies, keyed by SHA-256 of the raw bytes.
///
/// A body is marked `Done` only after it was processed successfully, so a
/// delivery that failed midway is processed again on retry.
#[derive(Clone)]
pub struct DedupCache {
    inner: Arc<Mutex<Lru>>,
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Lru {
                capacity: capacity.max(1),
                entries: HashMap::new(),
                order: VecDeque::new(),
                tick: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Lru> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn begin(&self, key: Key) -> Delivery {
        let mut lru = self.lock();
        match lru.entries.get(&key).map(|(e, _)| *e) {
            Some(Entry::Done) => {
                lru.touch(key, Entry::Done);
                Delivery::Duplicate
            }
            Some(Entry::InFlight) => Delivery::InFlight,
            None => {
                lru.touch(key, Entry::InFlight);
                Delivery::Fresh(DeliveryGuard {
                    cache: self.clone(),
                    key,
                    finished: false,
                })
            }
        }
    }

    fn complete(&self, key: Key) {
        self.lock().touch(key, Entry::Done);
    }

    fn abort(&self, key: Key) {
        let mut lru = self.lock();
        if matches!(lru.entries.get(&key), Some((Entry::InFlight, _))) {
            lru.entries.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.lock().entries.contains_key(key)
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Held while a delivery is processed. Dropping it without `complete` forgets
/// the body so the sender's retry is processed again.
pub struct DeliveryGuard {
    cache: DedupCache,
    key: Key,
    finished: bool,
}

impl DeliveryGuard {
    pub fn complete(mut self) {
        self.finished = true;
        self.cache.complete(self.key);
    }
}

impl Drop for DeliveryGuard {
    fn drop(&mut self) {
        if !self.finished {
            warn!("Webhook delivery {} not completed, forgetting it", hex::encode(&self.key[..8]));
            self.cache.abort(self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u8) -> Key {
        [n; 32]
    }

    #[test]
    fn completed_delivery_is_a_duplicate() {
        let cache = DedupCache::new(10);
        let Delivery::Fresh(guard) = cache.begin(key(1)) else {
            panic!("first delivery must be fresh");
        };
        assert!(matches!(cache.begin(key(1)), Delivery::InFlight));
        guard.complete();
        assert!(matches!(cache.begin(key(1)), Delivery::Duplicate));
    }

    #[test]
    fn dropped_guard_allows_reprocessing() {
        let cache = DedupCache::new(10);
        match cache.begin(key(2)) {
            Delivery::Fresh(guard) => drop(guard),
            _ => panic!("first delivery must be fresh"),
        }
        assert!(!cache.contains(&key(2)));
        assert!(matches!(cache.begin(key(2)), Delivery::Fresh(_)));
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = DedupCache::new(2);
        for n in 1..=2 {
            if let Delivery::Fresh(g) = cache.begin(key(n)) {
                g.complete();
            }
        }
        // Touch 1 so 2 becomes the oldest.
        assert!(matches!(cache.begin(key(1)), Delivery::Duplicate));
        if let Delivery::Fresh(g) = cache.begin(key(3)) {
            g.complete();
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&key(1)));
        assert!(!cache.contains(&key(2)));
        assert!(cache.contains(&key(3)));
    }
}
