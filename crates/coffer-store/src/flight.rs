//! Bounded single-flight cache: one shared future per key.
//!
//! The first caller for a key starts the work; everyone else, concurrent or
//! later, awaits a clone of the same [`Shared`] future. Entries are evicted
//! least-recently-used once the cache is over capacity.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Mutex;

use futures::future::{BoxFuture, FutureExt, Shared};

pub type Flight<V> = Shared<BoxFuture<'static, V>>;

struct Entry<V: Clone> {
    flight: Flight<V>,
    last_used: u64,
}

struct Inner<K, V: Clone> {
    entries: HashMap<K, Entry<V>>,
    tick: u64,
}

pub struct SingleFlight<K, V: Clone> {
    capacity: usize,
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                tick: 0,
            }),
        }
    }

    /// Return the flight for `key`, calling `start` only if there is none.
    /// The boolean is `true` for the caller whose `start` ran.
    pub fn get_or_start<F, Fut>(&self, key: K, start: F) -> (Flight<V>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.tick += 1;
        let tick = inner.tick;

        if let Some(entry) = inner.entries.get_mut(&key) {
            entry.last_used = tick;
            return (entry.flight.clone(), false);
        }

        let flight = start().boxed().shared();
        inner.entries.insert(
            key,
            Entry {
                flight: flight.clone(),
                last_used: tick,
            },
        );

        if inner.entries.len() > self.capacity {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                inner.entries.remove(&oldest);
            }
        }

        (flight, true)
    }

    /// Drop `key` if it still maps to `flight`, so the next caller retries.
    pub fn forget(&self, key: &K, flight: &Flight<V>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let same = inner
            .entries
            .get(key)
            .is_some_and(|e| e.flight.ptr_eq(flight));
        if same {
            inner.entries.remove(key);
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_second_caller_shares_first_flight() {
        let cache: SingleFlight<&str, u32> = SingleFlight::new(4);
        let runs = Arc::new(AtomicUsize::new(0));

        let r = runs.clone();
        let (a, started_a) = cache.get_or_start("k", move || async move {
            r.fetch_add(1, Ordering::SeqCst);
            7
        });
        let r = runs.clone();
        let (b, started_b) = cache.get_or_start("k", move || async move {
            r.fetch_add(1, Ordering::SeqCst);
            8
        });

        assert!(started_a);
        assert!(!started_b);
        assert_eq!(a.await, 7);
        assert_eq!(b.await, 7);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_evicts_least_recently_used() {
        let cache: SingleFlight<u32, u32> = SingleFlight::new(2);
        let _ = cache.get_or_start(1, || async { 1 });
        let _ = cache.get_or_start(2, || async { 2 });
        // touch 1 so 2 becomes the oldest
        let _ = cache.get_or_start(1, || async { 0 });
        let _ = cache.get_or_start(3, || async { 3 });

        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&1));
        assert!(!cache.contains(&2));
        assert!(cache.contains(&3));
    }

    #[tokio::test]
    async fn test_forget_only_matching_flight() {
        let cache: SingleFlight<u32, u32> = SingleFlight::new(4);
        let (first, _) = cache.get_or_start(1, || async { 1 });
        cache.forget(&1, &first);
        assert!(cache.is_empty());

        let (second, started) = cache.get_or_start(1, || async { 2 });
        assert!(started);
        cache.forget(&1, &first);
        assert!(cache.contains(&1));
        assert_eq!(second.await, 2);
    }
}
