use crate::distribution::{ConsistentHash, ConsistentHashSource};
use crate::group::Registration;
use std::sync::Arc;

/// Key-value store replicated across the group. Every write is visible on the nodes that are
/// members of the writer's current topology.
#[async_trait::async_trait]
pub trait ReplicatedStore<K, V>: ConsistentHashSource {
    async fn get(&self, key: &K) -> Result<Option<V>, StoreError>;

    /// Returns the previous value.
    async fn put(&self, key: K, value: V) -> Result<Option<V>, StoreError>;

    /// Returns the existing value if there is one, in which case nothing was written.
    async fn put_if_absent(&self, key: K, value: V) -> Result<Option<V>, StoreError>;

    /// Returns the removed value.
    async fn remove(&self, key: &K) -> Result<Option<V>, StoreError>;

    /// Removes the entry only if it still holds `expected`.
    async fn remove_if_unmodified(&self, key: &K, expected: &V) -> Result<bool, StoreError>;

    /// Replaces the entry only if it still holds `expected`.
    async fn replace_if_unmodified(&self, key: &K, expected: &V, value: V) -> Result<bool, StoreError>;

    /// Keys held by the local copy.
    async fn keys(&self) -> Result<Vec<K>, StoreError>;

    fn register_listener(&self, listener: Arc<dyn StoreListener<K, V>>) -> Registration;
}

#[derive(Clone, Debug)]
pub enum StoreEvent<K, V> {
    Created {
        key: K,
        value: V,
        origin_local: bool,
    },
    Modified {
        key: K,
        value: V,
        origin_local: bool,
    },
    Removed {
        key: K,
        old_value: Option<V>,
        origin_local: bool,
    },
    /// Ownership moved from `start` to `end`.
    TopologyChanged {
        start: Arc<ConsistentHash>,
        end: Arc<ConsistentHash>,
    },
}

impl<K, V> StoreEvent<K, V> {
    /// Whether this node performed the write. Topology changes originate nowhere in particular.
    pub fn is_origin_local(&self) -> bool {
        match self {
            StoreEvent::Created { origin_local, .. }
            | StoreEvent::Modified { origin_local, .. }
            | StoreEvent::Removed { origin_local, .. } => *origin_local,
            StoreEvent::TopologyChanged { .. } => false,
        }
    }
}

/// Called on the store's notification path. Must not block.
pub trait StoreListener<K, V>: Send + Sync {
    fn on_event(&self, event: &StoreEvent<K, V>);
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store is closed")]
    Closed,

    #[error("Store operation failed: {0}")]
    Failed(String),
}
