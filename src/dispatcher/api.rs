use crate::dispatcher::command::{Command, CommandError};
use crate::dispatcher::response::{response_channel, CommandResponse};
use crate::group::{Group, GroupMember};
use std::collections::HashMap;
use std::sync::Arc;

/// Sends commands to the dispatchers registered under the same id on other members.
pub trait CommandDispatcher<C: Command>: Send + Sync {
    /// Context commands execute against on this member.
    fn context(&self) -> &C::Context;

    /// Resolves with `CommandError::MemberAbsent` if `member` has no dispatcher with this id.
    fn dispatch_to_member(&self, command: C, member: &GroupMember) -> CommandResponse<C::Output>;

    /// One response per current member, minus `excluding`.
    fn dispatch_to_group(
        &self,
        command: C,
        excluding: &[GroupMember],
    ) -> HashMap<GroupMember, CommandResponse<C::Output>>;

    /// Unregisters this dispatcher. Idempotent.
    fn close(&self);
}

pub trait CommandDispatcherFactory: Send + Sync {
    fn group(&self) -> Arc<dyn Group>;

    /// Dispatchers created with the same `id` on different members can address each other.
    fn create_command_dispatcher<C: Command>(
        &self,
        id: &str,
        context: C::Context,
    ) -> Result<Arc<dyn CommandDispatcher<C>>, CommandError>;
}

/// Runs a command against the local context on the runtime's pool.
pub(crate) fn execute_locally<C: Command>(command: C, context: Arc<C::Context>) -> CommandResponse<C::Output> {
    let (responder, response) = response_channel();
    tokio::spawn(async move {
        responder.send(command.execute(&context).await);
    });

    response
}

pub(crate) fn dispatch_to_each<C, F>(
    group: &dyn Group,
    command: C,
    excluding: &[GroupMember],
    mut dispatch: F,
) -> HashMap<GroupMember, CommandResponse<C::Output>>
where
    C: Command,
    F: FnMut(C, &GroupMember) -> CommandResponse<C::Output>,
{
    group
        .membership()
        .members()
        .iter()
        .filter(|member| !excluding.contains(member))
        .map(|member| (member.clone(), dispatch(command.clone(), member)))
        .collect()
}
