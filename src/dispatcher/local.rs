use crate::dispatcher::api::{dispatch_to_each, execute_locally, CommandDispatcher, CommandDispatcherFactory};
use crate::dispatcher::command::{Command, CommandError};
use crate::dispatcher::response::CommandResponse;
use crate::group::{Group, GroupMember, LocalGroup};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Dispatchers of a non-clustered node. Every command runs locally.
pub struct LocalCommandDispatcherFactory {
    group: Arc<LocalGroup>,
}

impl LocalCommandDispatcherFactory {
    pub fn new(group: Arc<LocalGroup>) -> Self {
        LocalCommandDispatcherFactory { group }
    }
}

impl CommandDispatcherFactory for LocalCommandDispatcherFactory {
    fn group(&self) -> Arc<dyn Group> {
        self.group.clone()
    }

    fn create_command_dispatcher<C: Command>(
        &self,
        _id: &str,
        context: C::Context,
    ) -> Result<Arc<dyn CommandDispatcher<C>>, CommandError> {
        Ok(Arc::new(LocalCommandDispatcher::<C> {
            group: self.group.clone(),
            context: Arc::new(context),
            closed: AtomicBool::new(false),
        }))
    }
}

struct LocalCommandDispatcher<C: Command> {
    group: Arc<LocalGroup>,
    context: Arc<C::Context>,
    closed: AtomicBool,
}

impl<C: Command> CommandDispatcher<C> for LocalCommandDispatcher<C> {
    fn context(&self) -> &C::Context {
        &self.context
    }

    fn dispatch_to_member(&self, command: C, member: &GroupMember) -> CommandResponse<C::Output> {
        if self.closed.load(Ordering::Acquire) {
            CommandResponse::completed(Err(CommandError::Closed))
        } else if member == self.group.local_member() {
            execute_locally(command, self.context.clone())
        } else {
            CommandResponse::completed(Err(CommandError::MemberAbsent(member.address())))
        }
    }

    fn dispatch_to_group(
        &self,
        command: C,
        excluding: &[GroupMember],
    ) -> HashMap<GroupMember, CommandResponse<C::Output>> {
        dispatch_to_each(&*self.group, command, excluding, |command, member| {
            self.dispatch_to_member(command, member)
        })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
