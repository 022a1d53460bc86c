use crate::group::{Address, Group, Registration};
use bytes::Bytes;
use std::sync::Arc;

/// Serves requests addressed to one service id on the local member.
#[async_trait::async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, sender: Address, payload: Bytes) -> Result<Bytes, TransportError>;
}

/// Reliable request/response messaging between members of a group. Requests are correlated with
/// their replies by the channel.
#[async_trait::async_trait]
pub trait Channel: Send + Sync {
    fn group(&self) -> Arc<dyn Group>;

    /// Serves `service` on the local member until the registration is closed.
    fn register_handler(
        &self,
        service: &str,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<Registration, TransportError>;

    async fn send_request(&self, destination: Address, service: &str, payload: Bytes) -> Result<Bytes, TransportError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Member {0} is not part of the sender's view")]
    MemberNotInView(Address),
    #[error("No service '{service}' registered on member {member}")]
    NoSuchService { member: Address, service: String },
    #[error("Service '{0}' is already registered")]
    DuplicateService(String),
    #[error("Channel is closed")]
    Closed,
    #[error("Request handler failed: {0}")]
    Handler(String),
}

impl TransportError {
    /// The destination has no live endpoint for the request. Expected during view changes.
    pub fn is_member_absent(&self) -> bool {
        matches!(
            self,
            TransportError::MemberNotInView(_) | TransportError::NoSuchService { .. }
        )
    }
}
