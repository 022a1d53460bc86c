mod api;
mod in_memory;

pub use api::ReplicatedStore;
pub use api::StoreError;
pub use api::StoreEvent;
pub use api::StoreListener;
pub use in_memory::InMemoryReplicatedStore;
pub use in_memory::InMemoryStoreCluster;
pub use in_memory::StoreCreationError;
