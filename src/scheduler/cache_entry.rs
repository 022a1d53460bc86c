use crate::scheduler::local::{LocalScheduler, SchedulerKey};
use crate::scheduler::time::{Clock, RealClock};
use crate::store::ReplicatedStore;
use std::sync::Arc;
use tokio::time::Instant;

/// Scheduler of cache entries by id. `M` is whatever metadata decides when an entry is due.
#[async_trait::async_trait]
pub trait Scheduler<I, M>: Send + Sync {
    /// Looks up the entry and schedules it if its metadata yields a time.
    async fn schedule(&self, id: I);

    /// Schedules from the given metadata without looking up the entry.
    async fn schedule_with_meta_data(&self, id: I, meta_data: M);

    async fn cancel(&self, id: &I);

    async fn contains(&self, id: &I) -> bool;

    async fn close(&self);
}

/// Resolves the current value of an entry by id.
#[async_trait::async_trait]
pub trait Locator<I, V>: Send + Sync {
    async fn locate(&self, id: &I) -> Option<V>;
}

#[async_trait::async_trait]
impl<I, V, F> Locator<I, V> for F
where
    I: Sync,
    F: Fn(&I) -> Option<V> + Send + Sync,
{
    async fn locate(&self, id: &I) -> Option<V> {
        self(id)
    }
}

/// Locates entries in a replicated store. Store failures read as "no entry".
pub struct StoreLocator<I, V> {
    logger: slog::Logger,
    store: Arc<dyn ReplicatedStore<I, V>>,
}

impl<I, V> StoreLocator<I, V> {
    pub fn new(logger: slog::Logger, store: Arc<dyn ReplicatedStore<I, V>>) -> Self {
        StoreLocator { logger, store }
    }
}

#[async_trait::async_trait]
impl<I, V> Locator<I, V> for StoreLocator<I, V>
where
    I: SchedulerKey,
    V: Send + Sync + 'static,
{
    async fn locate(&self, id: &I) -> Option<V> {
        match self.store.get(id).await {
            Ok(value) => value,
            Err(e) => {
                slog::warn!(self.logger, "Failed to locate {:?}: {}", id, e);
                None
            }
        }
    }
}

pub type MetaDataFunction<I, V, M> = Arc<dyn Fn(&I, &V) -> M + Send + Sync>;

/// `None` means never schedule, e.g. for an immortal entry.
pub type SchedulingFunction<M> = Arc<dyn Fn(&M) -> Option<Instant> + Send + Sync>;

/// Richer key types that carry a scheduler id.
pub trait Key<I>: Send + Sync {
    fn id(&self) -> &I;
}

/// Key-typed convenience methods for any scheduler.
#[async_trait::async_trait]
pub trait KeyScheduler<I, M>: Scheduler<I, M> {
    async fn schedule_key<T: Key<I>>(&self, key: &T);

    async fn cancel_key<T: Key<I>>(&self, key: &T);

    async fn contains_key<T: Key<I>>(&self, key: &T) -> bool;
}

#[async_trait::async_trait]
impl<I, M, S> KeyScheduler<I, M> for S
where
    I: Clone + Send + Sync + 'static,
    M: Send + 'static,
    S: Scheduler<I, M> + ?Sized,
{
    async fn schedule_key<T: Key<I>>(&self, key: &T) {
        self.schedule(key.id().clone()).await;
    }

    async fn cancel_key<T: Key<I>>(&self, key: &T) {
        self.cancel(key.id()).await;
    }

    async fn contains_key<T: Key<I>>(&self, key: &T) -> bool {
        self.contains(key.id()).await
    }
}

pub struct CacheEntrySchedulerConfig<I, V, M, C: Clock> {
    pub scheduler: LocalScheduler<I, C>,
    pub locator: Arc<dyn Locator<I, V>>,
    pub meta_data: MetaDataFunction<I, V, M>,
    pub scheduling: SchedulingFunction<M>,
}

/// Local scheduler of cache entries. Entries are identified by id and looked up through a locator
/// instead of being referenced, so the scheduler never holds on to the cache it schedules for.
pub struct CacheEntryScheduler<I, V, M, C: Clock = RealClock> {
    scheduler: LocalScheduler<I, C>,
    locator: Arc<dyn Locator<I, V>>,
    meta_data: MetaDataFunction<I, V, M>,
    scheduling: SchedulingFunction<M>,
}

impl<I, V, M, C> CacheEntryScheduler<I, V, M, C>
where
    I: SchedulerKey,
    V: Send + Sync + 'static,
    M: Send + Sync + 'static,
    C: Clock,
{
    pub fn new(config: CacheEntrySchedulerConfig<I, V, M, C>) -> Self {
        CacheEntryScheduler {
            scheduler: config.scheduler,
            locator: config.locator,
            meta_data: config.meta_data,
            scheduling: config.scheduling,
        }
    }

    pub fn start(&self) {
        self.scheduler.start();
    }

    pub async fn stop(&self) {
        self.scheduler.stop().await;
    }

    pub fn local_scheduler(&self) -> &LocalScheduler<I, C> {
        &self.scheduler
    }

    /// Schedules from an entry already at hand, skipping the locator.
    pub fn schedule_entry<T: Key<I>>(&self, key: &T, value: &V) {
        let meta_data = (self.meta_data)(key.id(), value);
        self.schedule_meta_data(key.id().clone(), &meta_data);
    }

    fn schedule_meta_data(&self, id: I, meta_data: &M) {
        if let Some(due) = (self.scheduling)(meta_data) {
            self.scheduler.schedule(id, due);
        }
    }
}

#[async_trait::async_trait]
impl<I, V, M, C> Scheduler<I, M> for CacheEntryScheduler<I, V, M, C>
where
    I: SchedulerKey,
    V: Send + Sync + 'static,
    M: Send + Sync + 'static,
    C: Clock,
{
    async fn schedule(&self, id: I) {
        if let Some(value) = self.locator.locate(&id).await {
            let meta_data = (self.meta_data)(&id, &value);
            self.schedule_meta_data(id, &meta_data);
        }
    }

    async fn schedule_with_meta_data(&self, id: I, meta_data: M) {
        self.schedule_meta_data(id, &meta_data);
    }

    async fn cancel(&self, id: &I) {
        self.scheduler.cancel(id);
    }

    async fn contains(&self, id: &I) -> bool {
        self.scheduler.contains(id)
    }

    async fn close(&self) {
        self.scheduler.close().await;
    }
}
