use crate::distribution::hash_code;
use linked_hash_map::LinkedHashMap;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::Mutex;

/// Backing collection of a local scheduler. Keys are unique. Safe for concurrent callers while a
/// worker peeks and removes.
pub trait ScheduledEntries<K, V>: Send + Sync {
    /// Adds the entry, or updates the value and position of an existing key.
    fn add(&self, key: K, value: V);

    /// Returns the removed value. No-op if absent.
    fn remove(&self, key: &K) -> Option<V>;

    /// Removes the entry only if it still maps to `value`.
    fn remove_if(&self, key: &K, value: &V) -> bool;

    fn contains(&self, key: &K) -> bool;

    /// Next entry in iteration order, without blocking.
    fn peek(&self) -> Option<(K, V)>;

    /// Snapshot in iteration order.
    fn entries(&self) -> Vec<(K, V)>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&self);
}

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
struct SortKey<V> {
    value: V,
    // Deterministic tie-break for equal values, then insertion order for hash collisions.
    key_hash: u64,
    sequence: u64,
}

struct SortedState<K, V> {
    index: HashMap<K, SortKey<V>>,
    order: BTreeMap<SortKey<V>, K>,
    next_sequence: u64,
}

/// Iterates by value ascending. Used when due-time ordering matters, e.g. expiration.
pub struct SortedScheduledEntries<K, V> {
    state: Mutex<SortedState<K, V>>,
}

impl<K, V> SortedScheduledEntries<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone + Ord,
{
    pub fn new() -> Self {
        SortedScheduledEntries {
            state: Mutex::new(SortedState {
                index: HashMap::new(),
                order: BTreeMap::new(),
                next_sequence: 0,
            }),
        }
    }
}

impl<K, V> Default for SortedScheduledEntries<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone + Ord,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ScheduledEntries<K, V> for SortedScheduledEntries<K, V>
where
    K: Clone + Eq + Hash + Send,
    V: Clone + Ord + Send,
{
    fn add(&self, key: K, value: V) {
        let mut state = self.state.lock().expect("SortedScheduledEntries mutex guard poison");
        let sort_key = SortKey {
            value,
            key_hash: hash_code(&key),
            sequence: state.next_sequence,
        };
        state.next_sequence += 1;

        if let Some(previous) = state.index.insert(key.clone(), sort_key.clone()) {
            state.order.remove(&previous);
        }
        state.order.insert(sort_key, key);
    }

    fn remove(&self, key: &K) -> Option<V> {
        let mut state = self.state.lock().expect("SortedScheduledEntries mutex guard poison");
        let sort_key = state.index.remove(key)?;
        state.order.remove(&sort_key);

        Some(sort_key.value)
    }

    fn remove_if(&self, key: &K, value: &V) -> bool {
        let mut state = self.state.lock().expect("SortedScheduledEntries mutex guard poison");
        let matches = matches!(state.index.get(key), Some(sort_key) if sort_key.value == *value);
        if !matches {
            return false;
        }

        if let Some(sort_key) = state.index.remove(key) {
            state.order.remove(&sort_key);
        }
        true
    }

    fn contains(&self, key: &K) -> bool {
        self.state
            .lock()
            .expect("SortedScheduledEntries mutex guard poison")
            .index
            .contains_key(key)
    }

    fn peek(&self) -> Option<(K, V)> {
        let state = self.state.lock().expect("SortedScheduledEntries mutex guard poison");
        state
            .order
            .iter()
            .next()
            .map(|(sort_key, key)| (key.clone(), sort_key.value.clone()))
    }

    fn entries(&self) -> Vec<(K, V)> {
        let state = self.state.lock().expect("SortedScheduledEntries mutex guard poison");
        state
            .order
            .iter()
            .map(|(sort_key, key)| (key.clone(), sort_key.value.clone()))
            .collect()
    }

    fn len(&self) -> usize {
        self.state
            .lock()
            .expect("SortedScheduledEntries mutex guard poison")
            .index
            .len()
    }

    fn clear(&self) {
        let mut state = self.state.lock().expect("SortedScheduledEntries mutex guard poison");
        state.index.clear();
        state.order.clear();
    }
}

/// Iterates in insertion order regardless of value. Used when only FIFO fairness matters.
pub struct QueuedScheduledEntries<K: Eq + Hash, V> {
    queue: Mutex<LinkedHashMap<K, V>>,
}

impl<K: Eq + Hash, V> QueuedScheduledEntries<K, V> {
    pub fn new() -> Self {
        QueuedScheduledEntries {
            queue: Mutex::new(LinkedHashMap::new()),
        }
    }
}

impl<K: Eq + Hash, V> Default for QueuedScheduledEntries<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ScheduledEntries<K, V> for QueuedScheduledEntries<K, V>
where
    K: Clone + Eq + Hash + Send,
    V: Clone + PartialEq + Send,
{
    fn add(&self, key: K, value: V) {
        let mut queue = self.queue.lock().expect("QueuedScheduledEntries mutex guard poison");
        // Re-adding moves the key to the back of the queue.
        queue.remove(&key);
        queue.insert(key, value);
    }

    fn remove(&self, key: &K) -> Option<V> {
        self.queue
            .lock()
            .expect("QueuedScheduledEntries mutex guard poison")
            .remove(key)
    }

    fn remove_if(&self, key: &K, value: &V) -> bool {
        let mut queue = self.queue.lock().expect("QueuedScheduledEntries mutex guard poison");
        if queue.get(key) == Some(value) {
            queue.remove(key);
            true
        } else {
            false
        }
    }

    fn contains(&self, key: &K) -> bool {
        self.queue
            .lock()
            .expect("QueuedScheduledEntries mutex guard poison")
            .contains_key(key)
    }

    fn peek(&self) -> Option<(K, V)> {
        self.queue
            .lock()
            .expect("QueuedScheduledEntries mutex guard poison")
            .front()
            .map(|(key, value)| (key.clone(), value.clone()))
    }

    fn entries(&self) -> Vec<(K, V)> {
        self.queue
            .lock()
            .expect("QueuedScheduledEntries mutex guard poison")
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    fn len(&self) -> usize {
        self.queue.lock().expect("QueuedScheduledEntries mutex guard poison").len()
    }

    fn clear(&self) {
        self.queue.lock().expect("QueuedScheduledEntries mutex guard poison").clear();
    }
}
