//! Lazily created, never evicted barriers keyed by partition.
//!
//! The registry is the only state shared between connections. A key is
//! written once, on its first request, and stays for the life of the process;
//! growth is bounded by the number of distinct partitions in a run.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, PoisonError, RwLock};

use metrics::counter;
use tracing::info;

use crate::barrier::{Barrier, BarrierOptions};
use crate::metrics::RENDEZVOUS_BARRIERS_CREATED_TOTAL;
use crate::types::PartitionKey;

/// Maps each [`PartitionKey`] to exactly one [`Barrier`].
#[derive(Debug)]
pub struct BarrierRegistry {
    options: BarrierOptions,
    barriers: RwLock<HashMap<PartitionKey, Arc<Barrier>>>,
}

impl BarrierRegistry {
    /// Creates an empty registry whose barriers all use `options`.
    pub fn new(options: BarrierOptions) -> Self {
        Self {
            options,
            barriers: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the options every barrier of this registry is created with.
    pub fn options(&self) -> BarrierOptions {
        self.options
    }

    /// Returns the barrier for `key`, creating it on first use.
    ///
    /// Concurrent callers racing on a new key all receive the same instance:
    /// the existence check is repeated under the write lock, so only one of
    /// them inserts. Locks are held only for the map operation itself.
    pub fn get_or_create(&self, key: &PartitionKey) -> Arc<Barrier> {
        if let Some(barrier) = self.get(key) {
            return barrier;
        }

        let mut barriers = self
            .barriers
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        match barriers.entry(key.clone()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                info!(%key, parties = self.options.parties, "creating barrier");
                counter!(RENDEZVOUS_BARRIERS_CREATED_TOTAL).increment(1);

                entry
                    .insert(Arc::new(Barrier::new(self.options)))
                    .clone()
            }
        }
    }

    /// Returns the barrier for `key` if it was already created.
    pub fn get(&self, key: &PartitionKey) -> Option<Arc<Barrier>> {
        self.barriers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Returns the number of keys created so far.
    pub fn len(&self) -> usize {
        self.barriers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns whether no key was created yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::thread;

    use metrics::{
        Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit,
    };

    use super::*;

    /// Records the keys of every counter registered through it.
    #[derive(Default)]
    struct CounterKeys(Mutex<Vec<Key>>);

    impl Recorder for CounterKeys {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
            self.0.lock().unwrap().push(key.clone());
            Counter::noop()
        }

        fn register_gauge(&self, _: &Key, _: &Metadata<'_>) -> Gauge {
            Gauge::noop()
        }

        fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
            Histogram::noop()
        }
    }

    fn key(start: &str) -> PartitionKey {
        PartitionKey::new(start, "2024-01-02")
    }

    #[test]
    fn same_key_resolves_to_same_barrier() {
        let registry = BarrierRegistry::new(BarrierOptions::new(2));

        let first = registry.get_or_create(&key("2024-01-01"));
        let second = registry.get_or_create(&key("2024-01-01"));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn distinct_keys_get_distinct_barriers() {
        let registry = BarrierRegistry::new(BarrierOptions::new(2));

        let a = registry.get_or_create(&key("2024-01-01"));
        let b = registry.get_or_create(&key("2024-01-02"));

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn barriers_use_registry_party_count() {
        let registry = BarrierRegistry::new(BarrierOptions::new(5));

        assert_eq!(registry.get_or_create(&key("x")).parties(), 5);
    }

    #[test]
    fn get_does_not_create() {
        let registry = BarrierRegistry::new(BarrierOptions::new(2));

        assert!(registry.get(&key("2024-01-01")).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn created_counter_is_not_labeled_by_key() {
        let recorder = CounterKeys::default();
        let registry = BarrierRegistry::new(BarrierOptions::new(2));

        metrics::with_local_recorder(&recorder, || {
            registry.get_or_create(&key("2024-01-01"));
            registry.get_or_create(&key("2024-01-02"));
            registry.get_or_create(&key("2024-01-02"));
        });

        let keys = recorder.0.lock().unwrap();
        let created: Vec<_> = keys
            .iter()
            .filter(|key| key.name() == RENDEZVOUS_BARRIERS_CREATED_TOTAL)
            .collect();
        assert_eq!(created.len(), 2);
        assert!(created.iter().all(|key| key.labels().next().is_none()));
    }

    #[test]
    fn concurrent_creation_of_a_new_key_has_a_single_winner() {
        const CALLERS: usize = 64;

        for round in 0..20 {
            let registry = Arc::new(BarrierRegistry::new(BarrierOptions::new(CALLERS)));
            let start = Arc::new(std::sync::Barrier::new(CALLERS));
            let key = key(&format!("round-{round}"));

            let handles: Vec<_> = (0..CALLERS)
                .map(|_| {
                    let registry = registry.clone();
                    let start = start.clone();
                    let key = key.clone();
                    thread::spawn(move || {
                        start.wait();
                        registry.get_or_create(&key)
                    })
                })
                .collect();

            let barriers: Vec<_> = handles
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .collect();

            let first = &barriers[0];
            assert!(barriers.iter().all(|barrier| Arc::ptr_eq(first, barrier)));
            assert_eq!(registry.len(), 1);
        }
    }
}
