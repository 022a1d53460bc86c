mod cache_entry;
mod entries;
mod expiration;
mod local;
mod options;
mod primary_owner;
mod reconciler;
mod stop_signal;
mod time;

pub use cache_entry::CacheEntryScheduler;
pub use cache_entry::CacheEntrySchedulerConfig;
pub use cache_entry::Key;
pub use cache_entry::KeyScheduler;
pub use cache_entry::Locator;
pub use cache_entry::MetaDataFunction;
pub use cache_entry::Scheduler;
pub use cache_entry::SchedulingFunction;
pub use cache_entry::StoreLocator;
pub use entries::QueuedScheduledEntries;
pub use entries::ScheduledEntries;
pub use entries::SortedScheduledEntries;
pub use expiration::expiration_scheduling;
pub use expiration::ExpirationMetaData;
pub use expiration::ExpirationTask;
pub use expiration::SimpleExpirationMetaData;
pub use local::LocalScheduler;
pub use local::LocalSchedulerConfig;
pub use local::ScheduledTask;
pub use local::SchedulerCreationError;
pub use local::SchedulerKey;
pub use local::TaskError;
pub use options::PrimaryOwnerOptions;
pub use options::SchedulerOptions;
pub use primary_owner::PrimaryOwnerScheduler;
pub use primary_owner::PrimaryOwnerSchedulerConfig;
pub use primary_owner::SchedulerCommand;
pub use reconciler::OwnershipReconciler;
pub use reconciler::OwnershipReconcilerConfig;
pub use time::Clock;
pub use time::RealClock;
