use crate::distribution::{for_consistent_hash, ConsistentHash, Locality};
use crate::group::{Address, Group, GroupMember, Registration};
use crate::registry::options::{RegistryOptions, RegistryOptionsValidated};
use crate::store::{ReplicatedStore, StoreError, StoreEvent, StoreListener};
use crate::worker::SerialWorker;
use std::collections::HashMap;
use std::convert::TryFrom;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Receives entry changes made by other members. Each listener is called from its own worker,
/// in the order the store reported the changes.
pub trait RegistryListener<K, V>: Send + Sync {
    fn added_entries(&self, added: &HashMap<K, V>);

    fn updated_entries(&self, updated: &HashMap<K, V>);

    fn removed_entries(&self, removed: &HashMap<K, V>);
}

pub struct ClusterRegistryConfig<K, V> {
    pub logger: slog::Logger,
    pub group: Arc<dyn Group>,
    /// Holds one entry per member, keyed by the member's address.
    pub store: Arc<dyn ReplicatedStore<Address, (K, V)>>,
    /// This member's entry.
    pub entry: (K, V),
    pub options: RegistryOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryCreationError {
    #[error("Illegal options for configuring registry: {0}")]
    IllegalOptions(String),

    #[error("Failed to publish local entry")]
    Store(#[from] StoreError),
}

type Transition = (Arc<ConsistentHash>, Arc<ConsistentHash>);

#[derive(Clone)]
enum Notification<K, V> {
    Added(HashMap<K, V>),
    Updated(HashMap<K, V>),
    Removed(HashMap<K, V>),
}

/// Registry of one entry per group member, replicated through a store.
///
/// Entries of members that left are cleaned up by whichever member now primarily owns the
/// departed member's address. A member that finds itself newly part of the topology after a
/// partition heals publishes its entry again.
pub struct ClusterRegistry<K, V> {
    inner: Arc<RegistryInner<K, V>>,
    topology: Arc<SerialWorker<Transition>>,
    store_registration: Mutex<Option<Registration>>,
    closed: AtomicBool,
}

struct RegistryInner<K, V> {
    logger: slog::Logger,
    group: Arc<dyn Group>,
    store: Arc<dyn ReplicatedStore<Address, (K, V)>>,
    entry: (K, V),
    options: RegistryOptionsValidated,
    listeners: Mutex<HashMap<u64, Arc<SerialWorker<Notification<K, V>>>>>,
    next_listener_id: AtomicU64,
}

impl<K, V> ClusterRegistry<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Publishes the local entry and starts following the store.
    pub async fn new(config: ClusterRegistryConfig<K, V>) -> Result<Self, RegistryCreationError> {
        let options = RegistryOptionsValidated::try_from(config.options)
            .map_err(|e| RegistryCreationError::IllegalOptions(e.to_string()))?;
        let logger = config
            .logger
            .new(slog::o!("Registry" => config.group.local_member().to_string()));

        config
            .store
            .put(config.group.local_address(), config.entry.clone())
            .await?;

        let inner = Arc::new(RegistryInner {
            logger: logger.clone(),
            group: config.group,
            store: config.store,
            entry: config.entry,
            options,
            listeners: Mutex::new(HashMap::new()),
            next_listener_id: AtomicU64::new(0),
        });

        let topology_inner = inner.clone();
        let topology = Arc::new(SerialWorker::spawn(
            logger.new(slog::o!("Worker" => "topology")),
            move |(start, end): Transition| {
                let inner = topology_inner.clone();
                async move { inner.reconcile(start, end).await }
            },
        ));

        let store_registration = inner.store.register_listener(Arc::new(StoreAdapter {
            inner: Arc::downgrade(&inner),
            topology: topology.clone(),
        }));
        slog::info!(logger, "Registry started");

        Ok(ClusterRegistry {
            inner,
            topology,
            store_registration: Mutex::new(Some(store_registration)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn group(&self) -> Arc<dyn Group> {
        self.inner.group.clone()
    }

    pub fn local_entry(&self) -> &(K, V) {
        &self.inner.entry
    }

    /// Entry of `member`, if it has one. Store failures read as no entry.
    pub async fn entry(&self, member: &GroupMember) -> Option<(K, V)> {
        self.inner.get(&member.address()).await
    }

    /// Entries of the current members.
    pub async fn entries(&self) -> HashMap<K, V> {
        let membership = self.inner.group.membership();
        let mut entries = HashMap::new();
        for member in membership.members() {
            if let Some((key, value)) = self.inner.get(&member.address()).await {
                entries.insert(key, value);
            }
        }
        entries
    }

    /// Starts a dedicated worker for `listener`. Closing the registration stops it.
    pub fn register(&self, listener: Arc<dyn RegistryListener<K, V>>) -> Registration {
        if self.closed.load(Ordering::Acquire) {
            return Registration::empty();
        }

        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let worker = Arc::new(SerialWorker::spawn(
            self.inner.logger.new(slog::o!("Listener" => id)),
            move |notification: Notification<K, V>| {
                let listener = listener.clone();
                async move {
                    match notification {
                        Notification::Added(entries) => listener.added_entries(&entries),
                        Notification::Updated(entries) => listener.updated_entries(&entries),
                        Notification::Removed(entries) => listener.removed_entries(&entries),
                    }
                }
            },
        ));
        self.inner.lock_listeners().insert(id, worker);

        let inner = Arc::downgrade(&self.inner);
        Registration::new(move || {
            if let Some(inner) = inner.upgrade() {
                let worker = inner.lock_listeners().remove(&id);
                if let Some(worker) = worker {
                    worker.shutdown_in_background(inner.options.worker_shutdown_timeout);
                }
            }
        })
    }

    /// Removes the local entry and stops every worker, each within the worker shutdown timeout.
    /// Failing to remove the entry is logged: whoever owns this member's address removes it once
    /// this member leaves. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(registration) = self.take_store_registration() {
            registration.close();
        }

        let local = self.inner.group.local_address();
        if let Err(e) = self.inner.store.remove(&local).await {
            slog::warn!(self.inner.logger, "Failed to remove local entry: {}", e);
        }

        let timeout = self.inner.options.worker_shutdown_timeout;
        self.topology.shutdown(timeout).await;
        for worker in self.inner.drain_listeners() {
            worker.shutdown(timeout).await;
        }
        slog::info!(self.inner.logger, "Registry closed");
    }

    fn take_store_registration(&self) -> Option<Registration> {
        self.store_registration
            .lock()
            .expect("ClusterRegistry store registration mutex guard poison")
            .take()
    }
}

impl<K, V> Drop for ClusterRegistry<K, V> {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Ok(mut registration) = self.store_registration.lock() {
            if let Some(registration) = registration.take() {
                registration.close();
            }
        }

        let timeout = self.inner.options.worker_shutdown_timeout;
        self.topology.shutdown_in_background(timeout);
        if let Ok(mut listeners) = self.inner.listeners.lock() {
            for (_, worker) in listeners.drain() {
                worker.shutdown_in_background(timeout);
            }
        }
    }
}

impl<K, V> RegistryInner<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn lock_listeners(&self) -> MutexGuard<'_, HashMap<u64, Arc<SerialWorker<Notification<K, V>>>>> {
        self.listeners.lock().expect("ClusterRegistry listeners mutex guard poison")
    }

    fn drain_listeners(&self) -> Vec<Arc<SerialWorker<Notification<K, V>>>> {
        self.lock_listeners().drain().map(|(_, worker)| worker).collect()
    }

    async fn get(&self, address: &Address) -> Option<(K, V)> {
        match self.store.get(address).await {
            Ok(entry) => entry,
            Err(e) => {
                slog::warn!(self.logger, "Failed to read entry of {}: {}", address, e);
                None
            }
        }
    }

    fn notify(&self, notification: Notification<K, V>) {
        let workers: Vec<_> = self.lock_listeners().values().cloned().collect();
        for worker in workers {
            worker.submit(notification.clone());
        }
    }

    async fn reconcile(&self, start: Arc<ConsistentHash>, end: Arc<ConsistentHash>) {
        let local = self.group.local_address();
        let locality = for_consistent_hash(local, end.clone());

        // Entries of members that left, now owned here.
        let mut removed = HashMap::new();
        for address in start.members().iter().filter(|address| !end.contains(address)) {
            if !locality.is_local(address) {
                continue;
            }

            match self.store.remove(address).await {
                Ok(Some((key, value))) => {
                    removed.insert(key, value);
                }
                Ok(None) => {}
                Err(e) => slog::warn!(self.logger, "Failed to remove entry of departed {}: {}", address, e),
            }
        }
        if !removed.is_empty() {
            slog::info!(self.logger, "Removed {} entries of departed members", removed.len());
            self.notify(Notification::Removed(removed));
        }

        // Back from a partition: our entry may have been cleaned up by the other side.
        if !start.contains(&local) && end.contains(&local) {
            match self.store.put_if_absent(local, self.entry.clone()).await {
                Ok(None) => {
                    slog::info!(self.logger, "Republished local entry after merge");
                    let (key, value) = self.entry.clone();
                    self.notify(Notification::Added(single(key, value)));
                }
                Ok(Some(_)) => {}
                Err(e) => slog::warn!(self.logger, "Failed to republish local entry: {}", e),
            }
        }
    }
}

/// Store listener of a registry. Only forwards: entry changes go to the listener workers and
/// topology changes to the topology worker.
struct StoreAdapter<K, V> {
    inner: Weak<RegistryInner<K, V>>,
    topology: Arc<SerialWorker<Transition>>,
}

impl<K, V> StoreListener<Address, (K, V)> for StoreAdapter<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn on_event(&self, event: &StoreEvent<Address, (K, V)>) {
        if let StoreEvent::TopologyChanged { start, end } = event {
            self.topology.submit((start.clone(), end.clone()));
            return;
        }
        if event.is_origin_local() {
            return;
        }

        let inner = match self.inner.upgrade() {
            Some(inner) => inner,
            None => return,
        };
        match event {
            StoreEvent::Created { value: (key, value), .. } => {
                inner.notify(Notification::Added(single(key.clone(), value.clone())))
            }
            StoreEvent::Modified { value: (key, value), .. } => {
                inner.notify(Notification::Updated(single(key.clone(), value.clone())))
            }
            StoreEvent::Removed {
                old_value: Some((key, value)),
                ..
            } => inner.notify(Notification::Removed(single(key.clone(), value.clone()))),
            _ => {}
        }
    }
}

fn single<K: Eq + Hash, V>(key: K, value: V) -> HashMap<K, V> {
    let mut entries = HashMap::with_capacity(1);
    entries.insert(key, value);
    entries
}
