mod api;
mod in_memory;

pub use api::Channel;
pub use api::RequestHandler;
pub use api::TransportError;
pub use in_memory::InMemoryChannel;
pub use in_memory::InMemoryGroup;
pub use in_memory::InMemoryNetwork;
