use crate::dispatcher::{Command, CommandDispatcher, CommandDispatcherFactory, CommandError};
use crate::distribution::KeyDistribution;
use crate::group::{Group, GroupMember};
use crate::scheduler::cache_entry::Scheduler;
use crate::scheduler::local::{SchedulerCreationError, SchedulerKey};
use crate::scheduler::options::{PrimaryOwnerOptions, PrimaryOwnerOptionsValidated};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt::Debug;
use std::sync::Arc;

/// Scheduler call shipped to the primary owner of an id and run against its local scheduler.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum SchedulerCommand<I, M> {
    Schedule(I),
    ScheduleWithMetaData(I, M),
    Cancel(I),
    Contains(I),
}

impl<I, M> SchedulerCommand<I, M> {
    pub fn id(&self) -> &I {
        match self {
            SchedulerCommand::Schedule(id)
            | SchedulerCommand::ScheduleWithMetaData(id, _)
            | SchedulerCommand::Cancel(id)
            | SchedulerCommand::Contains(id) => id,
        }
    }
}

#[async_trait::async_trait]
impl<I, M> Command for SchedulerCommand<I, M>
where
    I: SchedulerKey + Serialize + DeserializeOwned,
    M: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    type Context = Arc<dyn Scheduler<I, M>>;
    /// Whether the id is scheduled, for `Contains`. Always true otherwise.
    type Output = bool;

    async fn execute(self, scheduler: &Self::Context) -> Result<bool, CommandError> {
        match self {
            SchedulerCommand::Schedule(id) => scheduler.schedule(id).await,
            SchedulerCommand::ScheduleWithMetaData(id, meta_data) => {
                scheduler.schedule_with_meta_data(id, meta_data).await
            }
            SchedulerCommand::Cancel(id) => scheduler.cancel(&id).await,
            SchedulerCommand::Contains(id) => return Ok(scheduler.contains(&id).await),
        }
        Ok(true)
    }
}

pub struct PrimaryOwnerSchedulerConfig<I, M> {
    pub logger: slog::Logger,
    /// Dispatchers with the same id on every member reach each other.
    pub id: String,
    /// This member's scheduler. Runs the commands addressed to this member.
    pub scheduler: Arc<dyn Scheduler<I, M>>,
    pub distribution: Arc<dyn KeyDistribution<I>>,
    pub options: PrimaryOwnerOptions,
}

/// Scheduler that keeps every id scheduled only on its primary owner. Each call is forwarded as
/// a `SchedulerCommand` to whichever member currently owns the id.
pub struct PrimaryOwnerScheduler<I, M> {
    logger: slog::Logger,
    group: Arc<dyn Group>,
    dispatcher: Arc<dyn CommandDispatcher<SchedulerCommand<I, M>>>,
    distribution: Arc<dyn KeyDistribution<I>>,
    options: PrimaryOwnerOptionsValidated,
}

impl<I, M> PrimaryOwnerScheduler<I, M>
where
    I: SchedulerKey + Serialize + DeserializeOwned,
    M: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    pub fn new<F: CommandDispatcherFactory>(
        factory: &F,
        config: PrimaryOwnerSchedulerConfig<I, M>,
    ) -> Result<Self, SchedulerCreationError> {
        let options = PrimaryOwnerOptionsValidated::try_from(config.options)
            .map_err(|e| SchedulerCreationError::IllegalOptions(e.to_string()))?;
        let dispatcher =
            factory.create_command_dispatcher::<SchedulerCommand<I, M>>(&config.id, config.scheduler)?;

        Ok(PrimaryOwnerScheduler {
            logger: config.logger.new(slog::o!("Scheduler" => config.id)),
            group: factory.group(),
            dispatcher,
            distribution: config.distribution,
            options,
        })
    }

    fn primary_owner(&self, id: &I) -> Option<GroupMember> {
        let address = self.distribution.primary_owner(id)?;
        self.group.membership().member(&address).cloned()
    }

    /// Runs `command` on the id's primary owner. An owner that left meanwhile is re-resolved and
    /// retried. Returns `None` when the command could not be run anywhere.
    async fn execute(&self, command: SchedulerCommand<I, M>) -> Option<bool> {
        for attempt in 1..=self.options.max_attempts {
            let owner = match self.primary_owner(command.id()) {
                Some(owner) => owner,
                None => {
                    slog::debug!(
                        self.logger,
                        "No primary owner in view for {:?} (attempt {})",
                        command.id(),
                        attempt
                    );
                    tokio::task::yield_now().await;
                    continue;
                }
            };

            match self.dispatcher.dispatch_to_member(command.clone(), &owner).await {
                Ok(result) => return Some(result),
                Err(e) if e.is_cancellation() => {
                    slog::debug!(
                        self.logger,
                        "{} is gone, retrying {:?} (attempt {}): {}",
                        owner,
                        command,
                        attempt,
                        e
                    );
                }
                Err(e) => {
                    slog::warn!(self.logger, "Failed to run {:?} on {}: {}", command, owner, e);
                    return None;
                }
            }
        }

        slog::warn!(
            self.logger,
            "Giving up on {:?} after {} attempts",
            command,
            self.options.max_attempts
        );
        None
    }
}

#[async_trait::async_trait]
impl<I, M> Scheduler<I, M> for PrimaryOwnerScheduler<I, M>
where
    I: SchedulerKey + Serialize + DeserializeOwned,
    M: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    async fn schedule(&self, id: I) {
        self.execute(SchedulerCommand::Schedule(id)).await;
    }

    async fn schedule_with_meta_data(&self, id: I, meta_data: M) {
        self.execute(SchedulerCommand::ScheduleWithMetaData(id, meta_data)).await;
    }

    async fn cancel(&self, id: &I) {
        self.execute(SchedulerCommand::Cancel(id.clone())).await;
    }

    async fn contains(&self, id: &I) -> bool {
        self.execute(SchedulerCommand::Contains(id.clone()))
            .await
            .unwrap_or(false)
    }

    /// Unregisters from the group, then closes this member's scheduler.
    async fn close(&self) {
        self.dispatcher.close();
        self.dispatcher.context().close().await;
    }
}
