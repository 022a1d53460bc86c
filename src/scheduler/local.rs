use crate::dispatcher::CommandError;
use crate::scheduler::entries::ScheduledEntries;
use crate::scheduler::options::{SchedulerOptions, SchedulerOptionsValidated};
use crate::scheduler::stop_signal;
use crate::scheduler::time::{Clock, RealClock};
use std::convert::TryFrom;
use std::error::Error;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

pub type TaskError = Box<dyn Error + Send + Sync>;

pub trait SchedulerKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T: Clone + Eq + Hash + Debug + Send + Sync + 'static> SchedulerKey for T {}

/// The work run for a due entry. `Ok(true)` completes the entry, anything else retries it.
#[async_trait::async_trait]
pub trait ScheduledTask<K>: Send + Sync {
    async fn execute(&self, key: &K) -> Result<bool, TaskError>;
}

#[async_trait::async_trait]
impl<K, F> ScheduledTask<K> for F
where
    K: Sync,
    F: Fn(&K) -> Result<bool, TaskError> + Send + Sync,
{
    async fn execute(&self, key: &K) -> Result<bool, TaskError> {
        self(key)
    }
}

pub struct LocalSchedulerConfig<K> {
    pub logger: slog::Logger,
    pub name: String,
    pub entries: Arc<dyn ScheduledEntries<K, Instant>>,
    pub task: Arc<dyn ScheduledTask<K>>,
    pub options: SchedulerOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerCreationError {
    #[error("Illegal options for configuring scheduler: {0}")]
    IllegalOptions(String),

    #[error("Failed to create command dispatcher")]
    Dispatcher(#[from] CommandError),
}

/// Single-node, time-ordered task runner.
///
/// Starts stopped. While stopped, `schedule` only records entries. While running, one worker
/// repeatedly takes the head entry, sleeps until it is due and runs the task for it. A task
/// returning `Ok(false)`, an error, or panicking leaves the entry in place for the next pass.
/// `close` is terminal and drops whatever is still scheduled.
pub struct LocalScheduler<K, C: Clock = RealClock> {
    logger: slog::Logger,
    entries: Arc<dyn ScheduledEntries<K, Instant>>,
    task: Arc<dyn ScheduledTask<K>>,
    clock: C,
    options: SchedulerOptionsValidated,
    wake: Arc<Notify>,
    state: Mutex<State>,
}

enum State {
    Stopped,
    Running(WorkerHandle),
    Closed,
}

struct WorkerHandle {
    stopper: stop_signal::Stopper,
    join_handle: JoinHandle<()>,
}

impl<K: SchedulerKey> LocalScheduler<K> {
    pub fn new(config: LocalSchedulerConfig<K>) -> Result<Self, SchedulerCreationError> {
        Self::with_clock(config, RealClock)
    }
}

impl<K: SchedulerKey, C: Clock> LocalScheduler<K, C> {
    pub fn with_clock(config: LocalSchedulerConfig<K>, clock: C) -> Result<Self, SchedulerCreationError> {
        let options = SchedulerOptionsValidated::try_from(config.options)
            .map_err(|e| SchedulerCreationError::IllegalOptions(e.to_string()))?;

        Ok(LocalScheduler {
            logger: config.logger.new(slog::o!("Scheduler" => config.name)),
            entries: config.entries,
            task: config.task,
            clock,
            options,
            wake: Arc::new(Notify::new()),
            state: Mutex::new(State::Stopped),
        })
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Records `key` to run at `due`, replacing any earlier schedule for it. Ignored once closed.
    pub fn schedule(&self, key: K, due: Instant) {
        let state = self.state.lock().expect("LocalScheduler state mutex guard poison");
        if let State::Closed = *state {
            slog::debug!(self.logger, "Ignoring schedule of {:?}, scheduler is closed", key);
            return;
        }

        self.entries.add(key.clone(), due);
        drop(state);

        if self.is_head(&key) {
            self.wake.notify_one();
        }
    }

    /// Removes `key` whether or not it is due. Returns whether it was scheduled.
    pub fn cancel(&self, key: &K) -> bool {
        let was_head = self.is_head(key);
        let removed = self.entries.remove(key).is_some();

        if removed && was_head {
            self.wake.notify_one();
        }
        removed
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_running(&self) -> bool {
        matches!(
            *self.state.lock().expect("LocalScheduler state mutex guard poison"),
            State::Running(_)
        )
    }

    /// Spawns the worker. No-op if already running or closed.
    pub fn start(&self) {
        let mut state = self.state.lock().expect("LocalScheduler state mutex guard poison");
        if let State::Stopped = *state {
            let (stopper, stop_check) = stop_signal::new();
            let worker = Worker {
                logger: self.logger.clone(),
                entries: self.entries.clone(),
                task: self.task.clone(),
                clock: self.clock.clone(),
                wake: self.wake.clone(),
                stop_check,
                retry_interval: self.options.retry_interval,
            };
            let join_handle = tokio::spawn(worker.run());

            *state = State::Running(WorkerHandle { stopper, join_handle });
            slog::info!(self.logger, "Scheduler started with {} entries", self.entries.len());
        }
    }

    /// Stops the worker, keeping scheduled entries. Safe to call before `start`.
    pub async fn stop(&self) {
        let worker = {
            let mut state = self.state.lock().expect("LocalScheduler state mutex guard poison");
            match std::mem::replace(&mut *state, State::Stopped) {
                State::Running(worker) => Some(worker),
                State::Stopped => None,
                State::Closed => {
                    *state = State::Closed;
                    None
                }
            }
        };

        if let Some(worker) = worker {
            self.join(worker).await;
            slog::info!(self.logger, "Scheduler stopped");
        }
    }

    /// Stops the worker and drops remaining entries without running them. Idempotent.
    pub async fn close(&self) {
        let previous = {
            let mut state = self.state.lock().expect("LocalScheduler state mutex guard poison");
            std::mem::replace(&mut *state, State::Closed)
        };

        match previous {
            State::Closed => return,
            State::Running(worker) => self.join(worker).await,
            State::Stopped => {}
        }

        let dropped = self.entries.len();
        self.entries.clear();
        slog::info!(self.logger, "Scheduler closed, dropped {} entries", dropped);
    }

    fn is_head(&self, key: &K) -> bool {
        matches!(self.entries.peek(), Some((head, _)) if head == *key)
    }

    async fn join(&self, worker: WorkerHandle) {
        worker.stopper.stop();

        let mut join_handle = worker.join_handle;
        match tokio::time::timeout(self.options.close_timeout, &mut join_handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => slog::error!(self.logger, "Scheduler worker failed: {:?}", e),
            Err(_) => {
                slog::warn!(
                    self.logger,
                    "Scheduler worker did not finish within {:?}, aborting it",
                    self.options.close_timeout
                );
                // The worker aborts its running task on the way out.
                worker.stopper.abort();
                if tokio::time::timeout(self.options.close_timeout, &mut join_handle)
                    .await
                    .is_err()
                {
                    join_handle.abort();
                }
            }
        }
    }
}

struct Worker<K, C> {
    logger: slog::Logger,
    entries: Arc<dyn ScheduledEntries<K, Instant>>,
    task: Arc<dyn ScheduledTask<K>>,
    clock: C,
    wake: Arc<Notify>,
    stop_check: stop_signal::StopCheck,
    retry_interval: Duration,
}

impl<K: SchedulerKey, C: Clock> Worker<K, C> {
    async fn run(mut self) {
        while !self.stop_check.should_stop() {
            match self.entries.peek() {
                None => {
                    tokio::select! {
                        _ = self.wake.notified() => {}
                        _ = self.stop_check.stopped() => {}
                    }
                }
                Some((_, due)) if self.clock.now() < due => {
                    // Re-peek after waking: the head may have been cancelled or replaced.
                    tokio::select! {
                        _ = self.clock.sleep_until(due) => {}
                        _ = self.wake.notified() => {}
                        _ = self.stop_check.stopped() => {}
                    }
                }
                Some((key, due)) => {
                    if self.stop_check.should_stop() {
                        break;
                    }
                    self.execute(key, due).await;
                }
            }
        }

        slog::debug!(self.logger, "Scheduler worker exited");
    }

    async fn execute(&mut self, key: K, due: Instant) {
        let task = self.task.clone();
        let task_key = key.clone();
        // Spawned so a panicking task is contained to its own tokio task.
        let mut handle = tokio::spawn(async move { task.execute(&task_key).await });
        let outcome = tokio::select! {
            outcome = &mut handle => outcome,
            _ = self.stop_check.aborted() => {
                handle.abort();
                slog::warn!(self.logger, "Task for {:?} aborted", key);
                return;
            }
        };

        match outcome {
            Ok(Ok(true)) => {
                // Conditional, so a reschedule that raced with the task is kept.
                self.entries.remove_if(&key, &due);
                return;
            }
            Ok(Ok(false)) => {
                slog::debug!(self.logger, "Task for {:?} did not complete, will retry", key);
            }
            Ok(Err(e)) => {
                slog::warn!(self.logger, "Task for {:?} failed, will retry: {}", key, e);
            }
            Err(e) => {
                slog::error!(self.logger, "Task for {:?} panicked, will retry: {:?}", key, e);
            }
        }

        self.pause_before_retry().await;
    }

    async fn pause_before_retry(&mut self) {
        if self.retry_interval == Duration::from_secs(0) {
            tokio::task::yield_now().await;
            return;
        }

        tokio::select! {
            _ = self.clock.sleep(self.retry_interval) => {}
            _ = self.wake.notified() => {}
            _ = self.stop_check.stopped() => {}
        }
    }
}
