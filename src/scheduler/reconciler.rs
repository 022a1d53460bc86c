use crate::distribution::{for_consistent_hash, ConsistentHash, ConsistentHashOptionsValidated, Locality};
use crate::group::{Address, Registration};
use crate::scheduler::cache_entry::Scheduler;
use crate::scheduler::local::{SchedulerCreationError, SchedulerKey};
use crate::scheduler::options::{SchedulerOptions, SchedulerOptionsValidated};
use crate::store::{ReplicatedStore, StoreEvent, StoreListener};
use crate::worker::SerialWorker;
use std::convert::TryFrom;
use std::sync::{Arc, Mutex};
use tokio::time::Duration;

enum Transition {
    /// Takes over the keys owned under the topology current when it is handled.
    Initial,
    Changed(Arc<ConsistentHash>, Arc<ConsistentHash>),
}

pub struct OwnershipReconcilerConfig<I, V, M> {
    pub logger: slog::Logger,
    pub local: Address,
    pub store: Arc<dyn ReplicatedStore<I, V>>,
    pub scheduler: Arc<dyn Scheduler<I, M>>,
    /// Only `close_timeout` applies.
    pub options: SchedulerOptions,
}

/// Moves scheduled entries along with ownership. On creation every key this node is primary owner
/// of is scheduled. When the store's topology changes, every key this node just became primary
/// owner of is scheduled, and every key it stopped owning is cancelled. Transitions are handled
/// one at a time, off the store's notification path.
pub struct OwnershipReconciler {
    logger: slog::Logger,
    worker: Arc<SerialWorker<Transition>>,
    registration: Mutex<Option<Registration>>,
    close_timeout: Duration,
}

impl OwnershipReconciler {
    pub fn new<I, V, M>(config: OwnershipReconcilerConfig<I, V, M>) -> Result<Self, SchedulerCreationError>
    where
        I: SchedulerKey,
        V: Send + Sync + 'static,
        M: Send + Sync + 'static,
    {
        let options = SchedulerOptionsValidated::try_from(config.options)
            .map_err(|e| SchedulerCreationError::IllegalOptions(e.to_string()))?;
        let logger = config.logger.new(slog::o!("Reconciler" => config.local.to_string()));

        let local = config.local;
        let store = config.store;
        let scheduler = config.scheduler;
        let worker_store = store.clone();
        let worker_logger = logger.clone();
        let worker = Arc::new(SerialWorker::spawn(logger.clone(), move |transition: Transition| {
            let (start, end) = match transition {
                Transition::Initial => (
                    Arc::new(ConsistentHash::with_validated_options(
                        Vec::new(),
                        &ConsistentHashOptionsValidated::default(),
                    )),
                    worker_store.current_consistent_hash(),
                ),
                Transition::Changed(start, end) => (start, end),
            };
            reconcile(
                worker_logger.clone(),
                local,
                worker_store.clone(),
                scheduler.clone(),
                start,
                end,
            )
        }));

        // Queued ahead of any change the listener forwards.
        worker.submit(Transition::Initial);
        let registration = store.register_listener(Arc::new(TopologyForwarder {
            worker: worker.clone(),
        }));

        Ok(OwnershipReconciler {
            logger,
            worker,
            registration: Mutex::new(Some(registration)),
            close_timeout: options.close_timeout,
        })
    }

    /// Stops listening and waits for an in-flight transition within the close timeout.
    /// Idempotent.
    pub async fn close(&self) {
        if let Some(registration) = self.take_registration() {
            registration.close();
            slog::debug!(self.logger, "Closing");
        }
        self.worker.shutdown(self.close_timeout).await;
    }

    fn take_registration(&self) -> Option<Registration> {
        self.registration
            .lock()
            .expect("OwnershipReconciler registration mutex guard poison")
            .take()
    }
}

impl Drop for OwnershipReconciler {
    fn drop(&mut self) {
        if let Some(registration) = self.take_registration() {
            registration.close();
        }
        self.worker.shutdown_in_background(self.close_timeout);
    }
}

struct TopologyForwarder {
    worker: Arc<SerialWorker<Transition>>,
}

impl<I, V> StoreListener<I, V> for TopologyForwarder {
    fn on_event(&self, event: &StoreEvent<I, V>) {
        if let StoreEvent::TopologyChanged { start, end } = event {
            self.worker.submit(Transition::Changed(start.clone(), end.clone()));
        }
    }
}

async fn reconcile<I, V, M>(
    logger: slog::Logger,
    local: Address,
    store: Arc<dyn ReplicatedStore<I, V>>,
    scheduler: Arc<dyn Scheduler<I, M>>,
    start: Arc<ConsistentHash>,
    end: Arc<ConsistentHash>,
) where
    I: SchedulerKey,
{
    let keys = match store.keys().await {
        Ok(keys) => keys,
        Err(e) => {
            slog::warn!(logger, "Skipping reconciliation, failed to read keys: {}", e);
            return;
        }
    };

    let was_local = for_consistent_hash(local, start);
    let is_local = for_consistent_hash(local, end);
    let mut scheduled = 0;
    let mut cancelled = 0;
    for key in keys {
        match (was_local.is_local(&key), is_local.is_local(&key)) {
            (false, true) => {
                scheduler.schedule(key).await;
                scheduled += 1;
            }
            (true, false) => {
                scheduler.cancel(&key).await;
                cancelled += 1;
            }
            _ => {}
        }
    }

    slog::debug!(logger, "Reconciled ownership: scheduled {}, cancelled {}", scheduled, cancelled);
}
