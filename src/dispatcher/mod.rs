mod api;
mod channel;
mod codec;
mod command;
mod local;
mod response;

pub use api::CommandDispatcher;
pub use api::CommandDispatcherFactory;
pub use channel::ChannelCommandDispatcherFactory;
pub use codec::decode;
pub use codec::encode;
pub use codec::CodecError;
pub use command::Command;
pub use command::CommandError;
pub use local::LocalCommandDispatcherFactory;
pub use response::CommandResponse;
