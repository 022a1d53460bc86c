use crate::distribution::{ConsistentHash, ConsistentHashOptions, ConsistentHashOptionsValidated, ConsistentHashSource};
use crate::group::{Address, Group, GroupListener, GroupMembership, Registration};
use crate::store::api::{ReplicatedStore, StoreError, StoreEvent, StoreListener};
use std::collections::HashMap;
use std::convert::TryFrom;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Fully replicated in-process store. Each node keeps its own copy of the data and follows the
/// topology of its own group view.
///
/// * Writes apply to every node of the writer's current topology.
/// * A node entering a view whose coordinator it did not see before takes over the
///   coordinator's copy. So does every node of a merged view.
/// * On a merge the topology change starts from the coordinator partition's hash.
pub struct InMemoryStoreCluster<K, V> {
    inner: Arc<ClusterInner<K, V>>,
}

impl<K, V> Clone for InMemoryStoreCluster<K, V> {
    fn clone(&self) -> Self {
        InMemoryStoreCluster {
            inner: self.inner.clone(),
        }
    }
}

struct ClusterInner<K, V> {
    logger: slog::Logger,
    options: ConsistentHashOptionsValidated,
    nodes: Mutex<HashMap<Address, Arc<StoreNode<K, V>>>>,
    // Held while a write checks and applies, and while topology moves.
    writes: Mutex<()>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreCreationError {
    #[error("Illegal options for configuring store: {0}")]
    IllegalOptions(String),

    #[error("{0} already has a store in this cluster")]
    AlreadyJoined(Address),
}

impl<K, V> InMemoryStoreCluster<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(logger: slog::Logger, options: ConsistentHashOptions) -> Result<Self, StoreCreationError> {
        let options = ConsistentHashOptionsValidated::try_from(options)
            .map_err(|e| StoreCreationError::IllegalOptions(e.to_string()))?;

        Ok(InMemoryStoreCluster {
            inner: Arc::new(ClusterInner {
                logger,
                options,
                nodes: Mutex::new(HashMap::new()),
                writes: Mutex::new(()),
            }),
        })
    }

    /// Creates the store of `group`'s local member and starts following its views.
    pub fn join(&self, group: Arc<dyn Group>) -> Result<InMemoryReplicatedStore<K, V>, StoreCreationError> {
        let address = group.local_address();
        let membership = group.membership();
        let hash = Arc::new(ConsistentHash::with_validated_options(
            membership.addresses(),
            &self.inner.options,
        ));
        let node = Arc::new(StoreNode {
            logger: self.inner.logger.new(slog::o!("Store" => group.local_member().to_string())),
            address,
            cluster: Arc::downgrade(&self.inner),
            data: Mutex::new(HashMap::new()),
            topology: Mutex::new(Topology {
                view_id: membership.view_id(),
                hash: hash.clone(),
                previous_hash: hash,
            }),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        {
            let _writes = self.inner.lock_writes();
            let mut nodes = self.inner.lock_nodes();
            if nodes.contains_key(&address) {
                return Err(StoreCreationError::AlreadyJoined(address));
            }

            let coordinator = membership.coordinator().address();
            if coordinator != address {
                if let Some(coordinator) = nodes.get(&coordinator) {
                    *node.lock_data() = coordinator.lock_data().clone();
                }
            }
            nodes.insert(address, node.clone());
        }

        let registration = group.register(Arc::new(ViewFollower {
            node: Arc::downgrade(&node),
        }));
        slog::info!(node.logger, "Joined store cluster with {} members", membership.members().len());

        Ok(InMemoryReplicatedStore {
            node,
            registration: Mutex::new(Some(registration)),
        })
    }
}

impl<K, V> ClusterInner<K, V> {
    fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().expect("InMemoryStoreCluster writes mutex guard poison")
    }

    fn lock_nodes(&self) -> MutexGuard<'_, HashMap<Address, Arc<StoreNode<K, V>>>> {
        self.nodes.lock().expect("InMemoryStoreCluster nodes mutex guard poison")
    }

    fn node(&self, address: &Address) -> Option<Arc<StoreNode<K, V>>> {
        self.lock_nodes().get(address).cloned()
    }

    fn replicas(&self, hash: &ConsistentHash) -> Vec<Arc<StoreNode<K, V>>> {
        let nodes = self.lock_nodes();
        hash.members()
            .iter()
            .filter_map(|address| nodes.get(address).cloned())
            .collect()
    }
}

struct Topology {
    view_id: u64,
    hash: Arc<ConsistentHash>,
    previous_hash: Arc<ConsistentHash>,
}

enum Mutation<V> {
    Put(V),
    Remove,
}

struct StoreNode<K, V> {
    logger: slog::Logger,
    address: Address,
    cluster: Weak<ClusterInner<K, V>>,
    data: Mutex<HashMap<K, V>>,
    topology: Mutex<Topology>,
    listeners: Mutex<Vec<(u64, Arc<dyn StoreListener<K, V>>)>>,
    next_listener_id: AtomicU64,
    closed: AtomicBool,
}

impl<K, V> StoreNode<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    fn lock_data(&self) -> MutexGuard<'_, HashMap<K, V>> {
        self.data.lock().expect("InMemoryReplicatedStore data mutex guard poison")
    }

    fn lock_topology(&self) -> MutexGuard<'_, Topology> {
        self.topology.lock().expect("InMemoryReplicatedStore topology mutex guard poison")
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Vec<(u64, Arc<dyn StoreListener<K, V>>)>> {
        self.listeners.lock().expect("InMemoryReplicatedStore listeners mutex guard poison")
    }

    fn cluster(&self) -> Result<Arc<ClusterInner<K, V>>, StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        self.cluster.upgrade().ok_or(StoreError::Closed)
    }

    fn hash(&self) -> Arc<ConsistentHash> {
        self.lock_topology().hash.clone()
    }

    /// Hash this node had in effect just before installing view `view_id`.
    fn hash_before(&self, view_id: u64) -> Arc<ConsistentHash> {
        let topology = self.lock_topology();
        if topology.view_id >= view_id {
            topology.previous_hash.clone()
        } else {
            topology.hash.clone()
        }
    }

    fn get(&self, key: &K) -> Result<Option<V>, StoreError> {
        self.cluster()?;
        Ok(self.lock_data().get(key).cloned())
    }

    /// Decides a mutation from the local copy, then applies it to every replica.
    fn mutate<R, F>(&self, key: &K, decide: F) -> Result<R, StoreError>
    where
        F: FnOnce(Option<&V>) -> (Option<Mutation<V>>, R),
    {
        let cluster = self.cluster()?;

        let mut notifications = Vec::new();
        let result = {
            let _writes = cluster.lock_writes();
            let current = self.lock_data().get(key).cloned();
            let (mutation, result) = decide(current.as_ref());

            if let Some(mutation) = mutation {
                for replica in cluster.replicas(&self.hash()) {
                    let origin_local = replica.address == self.address;
                    if let Some(event) = replica.apply(key, &mutation, origin_local) {
                        notifications.push((replica, event));
                    }
                }
            }
            result
        };

        for (replica, event) in notifications {
            replica.notify(&event);
        }
        Ok(result)
    }

    fn apply(&self, key: &K, mutation: &Mutation<V>, origin_local: bool) -> Option<StoreEvent<K, V>> {
        let mut data = self.lock_data();
        match mutation {
            Mutation::Put(value) => match data.insert(key.clone(), value.clone()) {
                None => Some(StoreEvent::Created {
                    key: key.clone(),
                    value: value.clone(),
                    origin_local,
                }),
                Some(_) => Some(StoreEvent::Modified {
                    key: key.clone(),
                    value: value.clone(),
                    origin_local,
                }),
            },
            Mutation::Remove => data.remove(key).map(|old_value| StoreEvent::Removed {
                key: key.clone(),
                old_value: Some(old_value),
                origin_local,
            }),
        }
    }

    fn notify(&self, event: &StoreEvent<K, V>) {
        let listeners: Vec<_> = self.lock_listeners().iter().map(|(_, l)| l.clone()).collect();
        for listener in listeners {
            listener.on_event(event);
        }
    }

    fn install_view(&self, previous: &GroupMembership, current: &GroupMembership, merged: bool) {
        let cluster = match self.cluster() {
            Ok(cluster) => cluster,
            Err(_) => return,
        };
        let end = Arc::new(ConsistentHash::with_validated_options(current.addresses(), &cluster.options));

        let start = {
            let _writes = cluster.lock_writes();

            let coordinator_address = current.coordinator().address();
            let coordinator = if coordinator_address != self.address
                && (merged || !previous.contains(&coordinator_address))
            {
                cluster.node(&coordinator_address)
            } else {
                None
            };

            let start = match (&coordinator, merged) {
                (Some(coordinator), true) => coordinator.hash_before(current.view_id()),
                _ => self.hash(),
            };

            if let Some(coordinator) = coordinator {
                let data = coordinator.lock_data().clone();
                slog::debug!(
                    self.logger,
                    "Taking over {} entries from {}",
                    data.len(),
                    coordinator.address
                );
                *self.lock_data() = data;
            }

            let mut topology = self.lock_topology();
            topology.previous_hash = std::mem::replace(&mut topology.hash, end.clone());
            topology.view_id = current.view_id();
            start
        };

        slog::info!(
            self.logger,
            "Topology moved from {} to {} members{}",
            start.members().len(),
            end.members().len(),
            if merged { " (merge)" } else { "" }
        );
        self.notify(&StoreEvent::TopologyChanged { start, end });
    }
}

/// Group listener of one node. Weak so a dropped store stops following views.
struct ViewFollower<K, V> {
    node: Weak<StoreNode<K, V>>,
}

impl<K, V> GroupListener for ViewFollower<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    fn membership_changed(&self, previous: &GroupMembership, current: &GroupMembership, merged: bool) {
        if let Some(node) = self.node.upgrade() {
            node.install_view(previous, current, merged);
        }
    }
}

/// One node's handle onto an `InMemoryStoreCluster`.
pub struct InMemoryReplicatedStore<K, V> {
    node: Arc<StoreNode<K, V>>,
    registration: Mutex<Option<Registration>>,
}

impl<K, V> InMemoryReplicatedStore<K, V> {
    pub fn local_address(&self) -> Address {
        self.node.address
    }

    /// Stops following views and leaves the cluster. Later operations fail with
    /// `StoreError::Closed`. Idempotent.
    pub fn close(&self) {
        let registration = self
            .registration
            .lock()
            .expect("InMemoryReplicatedStore registration mutex guard poison")
            .take();
        if let Some(registration) = registration {
            registration.close();
        }

        if !self.node.closed.swap(true, Ordering::AcqRel) {
            if let Some(cluster) = self.node.cluster.upgrade() {
                cluster.lock_nodes().remove(&self.node.address);
            }
            slog::info!(self.node.logger, "Left store cluster");
        }
    }
}

impl<K, V> Drop for InMemoryReplicatedStore<K, V> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<K, V> ConsistentHashSource for InMemoryReplicatedStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    fn current_consistent_hash(&self) -> Arc<ConsistentHash> {
        self.node.hash()
    }
}

#[async_trait::async_trait]
impl<K, V> ReplicatedStore<K, V> for InMemoryReplicatedStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> Result<Option<V>, StoreError> {
        self.node.get(key)
    }

    async fn put(&self, key: K, value: V) -> Result<Option<V>, StoreError> {
        self.node
            .mutate(&key, |current| (Some(Mutation::Put(value)), current.cloned()))
    }

    async fn put_if_absent(&self, key: K, value: V) -> Result<Option<V>, StoreError> {
        self.node.mutate(&key, |current| match current {
            Some(existing) => (None, Some(existing.clone())),
            None => (Some(Mutation::Put(value)), None),
        })
    }

    async fn remove(&self, key: &K) -> Result<Option<V>, StoreError> {
        self.node.mutate(key, |current| match current {
            Some(existing) => (Some(Mutation::Remove), Some(existing.clone())),
            None => (None, None),
        })
    }

    async fn remove_if_unmodified(&self, key: &K, expected: &V) -> Result<bool, StoreError> {
        self.node.mutate(key, |current| match current {
            Some(existing) if existing == expected => (Some(Mutation::Remove), true),
            _ => (None, false),
        })
    }

    async fn replace_if_unmodified(&self, key: &K, expected: &V, value: V) -> Result<bool, StoreError> {
        self.node.mutate(key, |current| match current {
            Some(existing) if existing == expected => (Some(Mutation::Put(value)), true),
            _ => (None, false),
        })
    }

    async fn keys(&self) -> Result<Vec<K>, StoreError> {
        self.node.cluster()?;
        Ok(self.node.lock_data().keys().cloned().collect())
    }

    fn register_listener(&self, listener: Arc<dyn StoreListener<K, V>>) -> Registration {
        let id = self.node.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.node.lock_listeners().push((id, listener));

        let node = Arc::downgrade(&self.node);
        Registration::new(move || {
            if let Some(node) = node.upgrade() {
                node.lock_listeners().retain(|(listener_id, _)| *listener_id != id);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_logger;
    use crate::transport::{Channel, InMemoryChannel, InMemoryNetwork};

    type TestStore = InMemoryReplicatedStore<String, u64>;

    /// Records every event it hears.
    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<StoreEvent<String, u64>>>,
    }

    impl StoreListener<String, u64> for Recorder {
        fn on_event(&self, event: &StoreEvent<String, u64>) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    impl Recorder {
        fn take(&self) -> Vec<StoreEvent<String, u64>> {
            std::mem::take(&mut *self.events.lock().unwrap())
        }
    }

    fn cluster() -> InMemoryStoreCluster<String, u64> {
        InMemoryStoreCluster::new(test_logger(), ConsistentHashOptions::default()).unwrap()
    }

    fn join(cluster: &InMemoryStoreCluster<String, u64>, channel: &InMemoryChannel) -> TestStore {
        cluster.join(channel.group()).unwrap()
    }

    #[tokio::test]
    async fn writes_replicate_to_every_member() {
        // -- setup --
        let network = InMemoryNetwork::new(test_logger(), "cluster");
        let cluster = cluster();
        let channel_a = network.join("a");
        let channel_b = network.join("b");
        let a = join(&cluster, &channel_a);
        let b = join(&cluster, &channel_b);
        let recorder_a = Arc::new(Recorder::default());
        let recorder_b = Arc::new(Recorder::default());
        let _registration_a = a.register_listener(recorder_a.clone());
        let _registration_b = b.register_listener(recorder_b.clone());

        // -- execute & verify --

        // 1. Create.
        assert_eq!(a.put("k".to_string(), 1).await.unwrap(), None);
        assert_eq!(b.get(&"k".to_string()).await.unwrap(), Some(1));
        assert!(matches!(
            recorder_a.take().as_slice(),
            [StoreEvent::Created { origin_local: true, value: 1, .. }]
        ));
        assert!(matches!(
            recorder_b.take().as_slice(),
            [StoreEvent::Created { origin_local: false, value: 1, .. }]
        ));

        // 2. Modify from the other side.
        assert_eq!(b.put("k".to_string(), 2).await.unwrap(), Some(1));
        assert_eq!(a.get(&"k".to_string()).await.unwrap(), Some(2));
        assert!(matches!(
            recorder_a.take().as_slice(),
            [StoreEvent::Modified { origin_local: false, value: 2, .. }]
        ));

        // 3. Remove.
        assert_eq!(a.remove(&"k".to_string()).await.unwrap(), Some(2));
        assert_eq!(b.get(&"k".to_string()).await.unwrap(), None);
        assert!(matches!(
            recorder_b.take().as_slice(),
            [StoreEvent::Modified { .. }, StoreEvent::Removed { old_value: Some(2), origin_local: false, .. }]
        ));

        // 4. Removing nothing is silent.
        recorder_a.take();
        assert_eq!(a.remove(&"k".to_string()).await.unwrap(), None);
        assert!(recorder_a.take().is_empty());
    }

    #[tokio::test]
    async fn conditional_writes() {
        let network = InMemoryNetwork::new(test_logger(), "cluster");
        let cluster = cluster();
        let store = join(&cluster, &network.join("a"));
        let key = "k".to_string();

        assert_eq!(store.put_if_absent(key.clone(), 1).await.unwrap(), None);
        assert_eq!(store.put_if_absent(key.clone(), 2).await.unwrap(), Some(1));

        assert!(!store.replace_if_unmodified(&key, &5, 3).await.unwrap());
        assert!(store.replace_if_unmodified(&key, &1, 3).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), Some(3));

        assert!(!store.remove_if_unmodified(&key, &1).await.unwrap());
        assert!(store.remove_if_unmodified(&key, &3).await.unwrap());
        assert_eq!(store.keys().await.unwrap(), Vec::<String>::new());
    }

    #[tokio::test]
    async fn joining_node_copies_existing_data() {
        // -- setup --
        let network = InMemoryNetwork::new(test_logger(), "cluster");
        let cluster = cluster();
        let a = join(&cluster, &network.join("a"));
        a.put("k".to_string(), 1).await.unwrap();
        let recorder = Arc::new(Recorder::default());
        let _registration = a.register_listener(recorder.clone());

        // -- execute --
        let channel_b = network.join("b");
        let b = join(&cluster, &channel_b);

        // -- verify --
        assert_eq!(b.get(&"k".to_string()).await.unwrap(), Some(1));
        assert_eq!(a.current_consistent_hash().members().len(), 2);
        assert_eq!(a.current_consistent_hash(), b.current_consistent_hash());

        let events = recorder.take();
        assert_eq!(events.len(), 1);
        match &events[0] {
            StoreEvent::TopologyChanged { start, end } => {
                assert_eq!(start.members(), &[a.local_address()]);
                assert!(end.contains(&b.local_address()));
            }
            other => panic!("Unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn merge_adopts_coordinator_partition() {
        // -- setup --
        let network = InMemoryNetwork::new(test_logger(), "cluster");
        let cluster = cluster();
        let a = join(&cluster, &network.join("a"));
        let b = join(&cluster, &network.join("b"));
        let c = join(&cluster, &network.join("c"));
        network.split(&[c.local_address()]);

        a.put("majority".to_string(), 1).await.unwrap();
        c.put("minority".to_string(), 2).await.unwrap();
        assert_eq!(c.get(&"majority".to_string()).await.unwrap(), None);
        assert_eq!(a.get(&"minority".to_string()).await.unwrap(), None);

        let recorder_a = Arc::new(Recorder::default());
        let recorder_c = Arc::new(Recorder::default());
        let _registration_a = a.register_listener(recorder_a.clone());
        let _registration_c = c.register_listener(recorder_c.clone());

        // -- execute --
        network.heal();

        // -- verify --

        // 1. Data follows the coordinator's partition.
        assert_eq!(c.get(&"majority".to_string()).await.unwrap(), Some(1));
        assert_eq!(c.get(&"minority".to_string()).await.unwrap(), None);

        // 2. Both sides start from the majority's hash.
        let majority = vec![a.local_address(), b.local_address()];
        for recorder in [recorder_a, recorder_c].iter() {
            match recorder.take().as_slice() {
                [StoreEvent::TopologyChanged { start, end }] => {
                    assert_eq!(start.members(), majority.as_slice());
                    assert_eq!(end.members().len(), 3);
                }
                other => panic!("Unexpected events {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn closed_store_rejects_operations() {
        let network = InMemoryNetwork::new(test_logger(), "cluster");
        let cluster = cluster();
        let a = join(&cluster, &network.join("a"));

        a.close();
        a.close();

        assert!(matches!(a.get(&"k".to_string()).await, Err(StoreError::Closed)));
        assert!(matches!(a.put("k".to_string(), 1).await, Err(StoreError::Closed)));
    }

    #[tokio::test]
    async fn duplicate_join_rejected() {
        let network = InMemoryNetwork::new(test_logger(), "cluster");
        let cluster = cluster();
        let channel = network.join("a");
        let _store = join(&cluster, &channel);

        assert!(matches!(
            cluster.join(channel.group()),
            Err(StoreCreationError::AlreadyJoined(_))
        ));
    }
}
