use crate::scheduler::cache_entry::{MetaDataFunction, SchedulingFunction};
use crate::scheduler::local::{ScheduledTask, SchedulerKey, TaskError};
use crate::scheduler::time::Clock;
use crate::store::ReplicatedStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

pub trait ExpirationMetaData {
    /// `None` marks an immortal entry.
    fn timeout(&self) -> Option<Duration>;

    fn last_access_time(&self) -> SystemTime;

    fn is_immortal(&self) -> bool {
        self.timeout().is_none()
    }

    /// `None` if immortal, or too far out to be represented.
    fn expiration_time(&self) -> Option<SystemTime> {
        self.timeout()
            .and_then(|timeout| self.last_access_time().checked_add(timeout))
    }

    fn is_expired(&self, now: SystemTime) -> bool {
        match self.expiration_time() {
            Some(expiration_time) => expiration_time <= now,
            None => false,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SimpleExpirationMetaData {
    timeout: Option<Duration>,
    last_access_time: SystemTime,
}

impl SimpleExpirationMetaData {
    pub fn new(timeout: Option<Duration>, last_access_time: SystemTime) -> Self {
        SimpleExpirationMetaData {
            timeout,
            last_access_time,
        }
    }

    pub fn immortal(last_access_time: SystemTime) -> Self {
        Self::new(None, last_access_time)
    }
}

impl ExpirationMetaData for SimpleExpirationMetaData {
    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn last_access_time(&self) -> SystemTime {
        self.last_access_time
    }
}

/// Due at last access plus timeout, never for immortal entries.
pub fn expiration_scheduling<M, C>(clock: C) -> SchedulingFunction<M>
where
    M: ExpirationMetaData + 'static,
    C: Clock,
{
    Arc::new(move |meta_data: &M| meta_data.expiration_time().and_then(|time| clock.instant_at(time)))
}

/// Removes an expired entry from the store. An entry that was accessed since it was scheduled is
/// left alone: whoever touched it rescheduled it.
pub struct ExpirationTask<I, V, M, C> {
    logger: slog::Logger,
    store: Arc<dyn ReplicatedStore<I, V>>,
    meta_data: MetaDataFunction<I, V, M>,
    clock: C,
}

impl<I, V, M, C> ExpirationTask<I, V, M, C> {
    pub fn new(
        logger: slog::Logger,
        store: Arc<dyn ReplicatedStore<I, V>>,
        meta_data: MetaDataFunction<I, V, M>,
        clock: C,
    ) -> Self {
        ExpirationTask {
            logger,
            store,
            meta_data,
            clock,
        }
    }
}

#[async_trait::async_trait]
impl<I, V, M, C> ScheduledTask<I> for ExpirationTask<I, V, M, C>
where
    I: SchedulerKey,
    V: PartialEq + Send + Sync + 'static,
    M: ExpirationMetaData + Send + Sync + 'static,
    C: Clock,
{
    async fn execute(&self, id: &I) -> Result<bool, TaskError> {
        let value = match self.store.get(id).await? {
            Some(value) => value,
            None => return Ok(true),
        };

        if !(self.meta_data)(id, &value).is_expired(self.clock.system_time()) {
            return Ok(true);
        }

        // A concurrent modification means the entry was touched again. Its writer reschedules it.
        if self.store.remove_if_unmodified(id, &value).await? {
            slog::debug!(self.logger, "Expired {:?}", id);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::ConsistentHashOptions;
    use crate::scheduler::time;
    use crate::store::InMemoryStoreCluster;
    use crate::test_utils::test_logger;
    use crate::transport::{Channel, InMemoryNetwork};

    #[test]
    fn expiration_time() {
        let last_access = SystemTime::UNIX_EPOCH + Duration::from_secs(1000);
        let mortal = SimpleExpirationMetaData::new(Some(Duration::from_secs(30)), last_access);
        let immortal = SimpleExpirationMetaData::immortal(last_access);

        assert_eq!(mortal.expiration_time(), Some(last_access + Duration::from_secs(30)));
        assert!(!mortal.is_expired(last_access + Duration::from_secs(29)));
        assert!(mortal.is_expired(last_access + Duration::from_secs(30)));
        assert!(immortal.is_immortal());
        assert_eq!(immortal.expiration_time(), None);
        assert!(!immortal.is_expired(last_access + Duration::from_secs(1_000_000)));
    }

    #[test]
    fn scheduling_uses_clock() {
        let (clock, _controller) = time::mocked_clock();
        let now = clock.system_time();
        let scheduling = expiration_scheduling::<SimpleExpirationMetaData, _>(clock.clone());

        let due = scheduling(&SimpleExpirationMetaData::new(Some(Duration::from_secs(60)), now));
        assert_eq!(due, Some(clock.now() + Duration::from_secs(60)));

        let never = scheduling(&SimpleExpirationMetaData::immortal(now));
        assert_eq!(never, None);

        let too_far = scheduling(&SimpleExpirationMetaData::new(Some(Duration::MAX), now));
        assert_eq!(too_far, None);
    }

    #[test]
    fn overflowing_timeout_never_expires() {
        let last_access = SystemTime::now();
        let meta_data = SimpleExpirationMetaData::new(Some(Duration::MAX), last_access);

        assert_eq!(meta_data.expiration_time(), None);
        assert!(!meta_data.is_immortal());
        assert!(!meta_data.is_expired(last_access + Duration::from_secs(1_000_000)));
    }

    #[tokio::test]
    async fn task_removes_only_expired_entries() {
        // -- setup --
        let (clock, mut controller) = time::mocked_clock();
        let network = InMemoryNetwork::new(test_logger(), "cluster");
        let cluster =
            InMemoryStoreCluster::<String, SimpleExpirationMetaData>::new(test_logger(), ConsistentHashOptions::default())
                .unwrap();
        let store = Arc::new(cluster.join(network.join("a").group()).unwrap());

        let session = "session".to_string();
        let immortal = "immortal".to_string();
        let now = clock.system_time();
        store
            .put(session.clone(), SimpleExpirationMetaData::new(Some(Duration::from_secs(60)), now))
            .await
            .unwrap();
        store
            .put(immortal.clone(), SimpleExpirationMetaData::immortal(now))
            .await
            .unwrap();

        let meta_data: MetaDataFunction<String, SimpleExpirationMetaData, SimpleExpirationMetaData> =
            Arc::new(|_: &String, value: &SimpleExpirationMetaData| value.clone());
        let shared: Arc<dyn ReplicatedStore<String, SimpleExpirationMetaData>> = store.clone();
        let task = ExpirationTask::new(test_logger(), shared, meta_data, clock.clone());

        // -- execute & verify --

        // 1. Not expired yet. Done anyway: whoever touches it reschedules it.
        assert!(task.execute(&session).await.unwrap());
        assert!(store.get(&session).await.unwrap().is_some());

        // 2. Expired.
        controller.advance(Duration::from_secs(60));
        assert!(task.execute(&session).await.unwrap());
        assert!(store.get(&session).await.unwrap().is_none());

        // 3. Gone or immortal entries are left alone.
        assert!(task.execute(&session).await.unwrap());
        assert!(task.execute(&immortal).await.unwrap());
        assert!(store.get(&immortal).await.unwrap().is_some());
    }
}
