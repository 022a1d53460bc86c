use crate::dispatcher::codec::CodecError;
use crate::group::Address;
use crate::transport::TransportError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Display;

/// A unit of work shipped to a member and executed there against that member's context.
///
/// Commands are plain data: they are marshalled for remote members, so they must not carry
/// references to live objects of the sender.
#[async_trait::async_trait]
pub trait Command: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Bound by the dispatcher on the receiving member.
    type Context: Send + Sync + 'static;
    type Output: Serialize + DeserializeOwned + Send + 'static;

    async fn execute(self, context: &Self::Context) -> Result<Self::Output, CommandError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    // The target has no dispatcher registered under the same id, e.g. because it left.
    #[error("Member {0} has no live dispatcher for this command")]
    MemberAbsent(Address),
    #[error("Command was cancelled before it completed")]
    Cancelled,
    #[error("Command execution failed: {0}")]
    Execution(String),
    #[error("Dispatcher is closed")]
    Closed,
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl CommandError {
    pub fn execution(cause: impl Display) -> Self {
        CommandError::Execution(cause.to_string())
    }

    /// Expected outcomes during view changes. Callers may re-resolve the target and retry.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, CommandError::MemberAbsent(_) | CommandError::Cancelled)
    }
}
