use crate::dispatcher::api::{dispatch_to_each, execute_locally, CommandDispatcher, CommandDispatcherFactory};
use crate::dispatcher::codec;
use crate::dispatcher::command::{Command, CommandError};
use crate::dispatcher::response::{response_channel, CommandResponse};
use crate::group::{Address, Group, GroupMember, Registration};
use crate::transport::{Channel, RequestHandler, TransportError};
use bytes::Bytes;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

/// Creates dispatchers that reach remote members through a `Channel`.
pub struct ChannelCommandDispatcherFactory {
    logger: slog::Logger,
    channel: Arc<dyn Channel>,
}

impl ChannelCommandDispatcherFactory {
    pub fn new(logger: slog::Logger, channel: Arc<dyn Channel>) -> Self {
        ChannelCommandDispatcherFactory { logger, channel }
    }
}

impl CommandDispatcherFactory for ChannelCommandDispatcherFactory {
    fn group(&self) -> Arc<dyn Group> {
        self.channel.group()
    }

    fn create_command_dispatcher<C: Command>(
        &self,
        id: &str,
        context: C::Context,
    ) -> Result<Arc<dyn CommandDispatcher<C>>, CommandError> {
        let logger = self.logger.new(slog::o!("Dispatcher" => id.to_string()));
        let context = Arc::new(context);

        let handler = CommandHandler::<C> {
            logger: logger.clone(),
            context: context.clone(),
            _command: PhantomData,
        };
        let registration = self.channel.register_handler(id, Arc::new(handler))?;
        slog::debug!(logger, "Registered dispatcher");

        Ok(Arc::new(ChannelCommandDispatcher {
            logger,
            id: id.to_string(),
            channel: self.channel.clone(),
            group: self.channel.group(),
            context,
            registration: Mutex::new(Some(registration)),
        }))
    }
}

struct ChannelCommandDispatcher<C: Command> {
    logger: slog::Logger,
    id: String,
    channel: Arc<dyn Channel>,
    group: Arc<dyn Group>,
    context: Arc<C::Context>,
    registration: Mutex<Option<Registration>>,
}

impl<C: Command> ChannelCommandDispatcher<C> {
    fn is_closed(&self) -> bool {
        self.registration
            .lock()
            .expect("ChannelCommandDispatcher registration mutex guard poison")
            .is_none()
    }

    fn dispatch_remote(&self, command: C, destination: Address) -> CommandResponse<C::Output> {
        let payload = match codec::encode(&command) {
            Ok(payload) => payload,
            Err(e) => return CommandResponse::completed(Err(e.into())),
        };

        let (responder, response) = response_channel();
        let channel = self.channel.clone();
        let service = self.id.clone();
        tokio::spawn(async move {
            let result = match channel.send_request(destination, &service, payload).await {
                Ok(reply) => decode_reply::<C::Output>(&reply),
                Err(e) if e.is_member_absent() => Err(CommandError::MemberAbsent(destination)),
                Err(e) => Err(CommandError::Transport(e)),
            };
            responder.send(result);
        });

        response
    }
}

impl<C: Command> CommandDispatcher<C> for ChannelCommandDispatcher<C> {
    fn context(&self) -> &C::Context {
        &self.context
    }

    fn dispatch_to_member(&self, command: C, member: &GroupMember) -> CommandResponse<C::Output> {
        if self.is_closed() {
            return CommandResponse::completed(Err(CommandError::Closed));
        }

        if member.address() == self.group.local_address() {
            execute_locally(command, self.context.clone())
        } else {
            self.dispatch_remote(command, member.address())
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
        let registration = self
            .registration
            .lock()
            .expect("ChannelCommandDispatcher registration mutex guard poison")
            .take();

        if let Some(registration) = registration {
            registration.close();
            slog::debug!(self.logger, "Closed dispatcher");
        }
    }
}

impl<C: Command> Drop for ChannelCommandDispatcher<C> {
    fn drop(&mut self) {
        self.close();
    }
}

fn decode_reply<R: serde::de::DeserializeOwned>(reply: &[u8]) -> Result<R, CommandError> {
    let result: Result<R, String> = codec::decode(reply)?;
    result.map_err(CommandError::Execution)
}

/// Serves commands for one dispatcher id. Holds the context only, never the dispatcher.
struct CommandHandler<C: Command> {
    logger: slog::Logger,
    context: Arc<C::Context>,
    _command: PhantomData<fn() -> C>,
}

#[async_trait::async_trait]
impl<C: Command> RequestHandler for CommandHandler<C> {
    async fn handle(&self, sender: Address, payload: Bytes) -> Result<Bytes, TransportError> {
        let command: C = codec::decode(&payload).map_err(|e| {
            slog::warn!(self.logger, "Dropping undecodable command from {}: {}", sender, e);
            TransportError::Handler(e.to_string())
        })?;

        let result = command.execute(&self.context).await.map_err(|e| e.to_string());

        codec::encode(&result).map_err(|e| {
            slog::warn!(self.logger, "Failed to encode reply for {}: {}", sender, e);
            TransportError::Handler(e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_logger;
    use crate::transport::InMemoryNetwork;
    use serde::{Deserialize, Serialize};

    /// Context is the member's name.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    enum TestCommand {
        Greet(String),
        Fail,
    }

    #[async_trait::async_trait]
    impl Command for TestCommand {
        type Context = String;
        type Output = String;

        async fn execute(self, context: &String) -> Result<String, CommandError> {
            match self {
                TestCommand::Greet(from) => Ok(format!("{} greets {}", from, context)),
                TestCommand::Fail => Err(CommandError::execution("told to fail")),
            }
        }
    }

    fn factory(channel: crate::transport::InMemoryChannel) -> ChannelCommandDispatcherFactory {
        ChannelCommandDispatcherFactory::new(test_logger(), Arc::new(channel))
    }

    #[tokio::test]
    async fn dispatch_to_member_and_group() {
        // -- setup --
        let network = InMemoryNetwork::new(test_logger(), "cluster");
        let a = factory(network.join("a"));
        let b = factory(network.join("b"));
        let c = factory(network.join("c"));
        let dispatcher_a = a.create_command_dispatcher::<TestCommand>("greeter", "a".to_string()).unwrap();
        let _dispatcher_b = b.create_command_dispatcher::<TestCommand>("greeter", "b".to_string()).unwrap();
        let _dispatcher_c = c.create_command_dispatcher::<TestCommand>("greeter", "c".to_string()).unwrap();

        let member_a = a.group().local_member().clone();
        let member_b = b.group().local_member().clone();

        // -- execute & verify --

        // 1. Remote member.
        let reply = dispatcher_a
            .dispatch_to_member(TestCommand::Greet("x".to_string()), &member_b)
            .await
            .unwrap();
        assert_eq!(reply, "x greets b");

        // 2. Local member.
        let reply = dispatcher_a
            .dispatch_to_member(TestCommand::Greet("x".to_string()), &member_a)
            .await
            .unwrap();
        assert_eq!(reply, "x greets a");

        // 3. Group, excluding self.
        let responses = dispatcher_a.dispatch_to_group(TestCommand::Greet("x".to_string()), &[member_a.clone()]);
        assert_eq!(responses.len(), 2);
        assert!(!responses.contains_key(&member_a));
        for (member, response) in responses {
            assert_eq!(response.await.unwrap(), format!("x greets {}", member.name()));
        }

        // 4. Execution failure is carried back.
        let err = dispatcher_a.dispatch_to_member(TestCommand::Fail, &member_b).await.unwrap_err();
        assert!(matches!(err, CommandError::Execution(ref message) if message.contains("told to fail")));
        assert!(!err.is_cancellation());
    }

    #[tokio::test]
    async fn dispatch_to_absent_member() {
        // -- setup --
        let network = InMemoryNetwork::new(test_logger(), "cluster");
        let a = factory(network.join("a"));
        let b = factory(network.join("b"));
        let dispatcher_a = a.create_command_dispatcher::<TestCommand>("greeter", "a".to_string()).unwrap();
        let member_b = b.group().local_member().clone();

        // -- execute & verify --

        // 1. No dispatcher registered on b.
        let early = dispatcher_a.dispatch_to_member(TestCommand::Greet("x".to_string()), &member_b);
        let err = early.await.unwrap_err();
        assert!(err.is_cancellation());

        // 2. b registers later, a fresh dispatch succeeds.
        let dispatcher_b = b.create_command_dispatcher::<TestCommand>("greeter", "b".to_string()).unwrap();
        assert!(dispatcher_a
            .dispatch_to_member(TestCommand::Greet("x".to_string()), &member_b)
            .await
            .is_ok());

        // 3. b closes its dispatcher.
        dispatcher_b.close();
        dispatcher_b.close();
        let err = dispatcher_a
            .dispatch_to_member(TestCommand::Greet("x".to_string()), &member_b)
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::MemberAbsent(address) if address == member_b.address()));

        // 4. b leaves the group.
        let _dispatcher_b = b.create_command_dispatcher::<TestCommand>("greeter", "b".to_string()).unwrap();
        network.leave(&member_b.address());
        let err = dispatcher_a
            .dispatch_to_member(TestCommand::Greet("x".to_string()), &member_b)
            .await
            .unwrap_err();
        assert!(err.is_cancellation());
    }

    #[tokio::test]
    async fn closed_dispatcher_rejects_dispatch() {
        let network = InMemoryNetwork::new(test_logger(), "cluster");
        let a = factory(network.join("a"));
        let dispatcher = a.create_command_dispatcher::<TestCommand>("greeter", "a".to_string()).unwrap();
        let member_a = a.group().local_member().clone();

        dispatcher.close();

        let err = dispatcher.dispatch_to_member(TestCommand::Fail, &member_a).await.unwrap_err();
        assert!(matches!(err, CommandError::Closed));
    }

    #[tokio::test]
    async fn duplicate_id_rejected() {
        let network = InMemoryNetwork::new(test_logger(), "cluster");
        let a = factory(network.join("a"));
        let _dispatcher = a.create_command_dispatcher::<TestCommand>("greeter", "a".to_string()).unwrap();

        let result = a.create_command_dispatcher::<TestCommand>("greeter", "a".to_string());

        assert!(matches!(
            result,
            Err(CommandError::Transport(TransportError::DuplicateService(_)))
        ));
    }
}
