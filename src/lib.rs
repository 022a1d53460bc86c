mod dispatcher;
mod distribution;
mod group;
mod registry;
mod scheduler;
mod store;
mod transport;
mod worker;

#[cfg(test)]
mod test_utils;

pub use dispatcher::decode;
pub use dispatcher::encode;
pub use dispatcher::ChannelCommandDispatcherFactory;
pub use dispatcher::CodecError;
pub use dispatcher::Command;
pub use dispatcher::CommandDispatcher;
pub use dispatcher::CommandDispatcherFactory;
pub use dispatcher::CommandError;
pub use dispatcher::CommandResponse;
pub use dispatcher::LocalCommandDispatcherFactory;
pub use distribution::for_consistent_hash;
pub use distribution::for_current_consistent_hash;
pub use distribution::ConsistentHash;
pub use distribution::ConsistentHashKeyDistribution;
pub use distribution::ConsistentHashLocality;
pub use distribution::ConsistentHashOptions;
pub use distribution::ConsistentHashSource;
pub use distribution::CurrentConsistentHashLocality;
pub use distribution::CurrentKeyDistribution;
pub use distribution::DistributionLocality;
pub use distribution::KeyDistribution;
pub use distribution::Locality;
pub use distribution::SimpleLocality;
pub use group::Address;
pub use group::Group;
pub use group::GroupListener;
pub use group::GroupMember;
pub use group::GroupMembership;
pub use group::LocalGroup;
pub use group::Registration;
pub use registry::ClusterRegistry;
pub use registry::ClusterRegistryConfig;
pub use registry::RegistryCreationError;
pub use registry::RegistryListener;
pub use registry::RegistryOptions;
pub use scheduler::expiration_scheduling;
pub use scheduler::CacheEntryScheduler;
pub use scheduler::CacheEntrySchedulerConfig;
pub use scheduler::Clock;
pub use scheduler::ExpirationMetaData;
pub use scheduler::ExpirationTask;
pub use scheduler::Key;
pub use scheduler::KeyScheduler;
pub use scheduler::LocalScheduler;
pub use scheduler::LocalSchedulerConfig;
pub use scheduler::Locator;
pub use scheduler::MetaDataFunction;
pub use scheduler::OwnershipReconciler;
pub use scheduler::OwnershipReconcilerConfig;
pub use scheduler::PrimaryOwnerOptions;
pub use scheduler::PrimaryOwnerScheduler;
pub use scheduler::PrimaryOwnerSchedulerConfig;
pub use scheduler::QueuedScheduledEntries;
pub use scheduler::RealClock;
pub use scheduler::ScheduledEntries;
pub use scheduler::ScheduledTask;
pub use scheduler::Scheduler;
pub use scheduler::SchedulerCommand;
pub use scheduler::SchedulerCreationError;
pub use scheduler::SchedulerKey;
pub use scheduler::SchedulerOptions;
pub use scheduler::SchedulingFunction;
pub use scheduler::SimpleExpirationMetaData;
pub use scheduler::SortedScheduledEntries;
pub use scheduler::StoreLocator;
pub use scheduler::TaskError;
pub use store::InMemoryReplicatedStore;
pub use store::InMemoryStoreCluster;
pub use store::ReplicatedStore;
pub use store::StoreCreationError;
pub use store::StoreError;
pub use store::StoreEvent;
pub use store::StoreListener;
pub use transport::Channel;
pub use transport::InMemoryChannel;
pub use transport::InMemoryGroup;
pub use transport::InMemoryNetwork;
pub use transport::RequestHandler;
pub use transport::TransportError;

// The crate root and every module root only hold `mod` and `pub use` lines. Modules are private;
// types are exported one by one.
