mod consistent_hash;
mod locality;
mod options;

pub use consistent_hash::ConsistentHash;
pub use locality::for_consistent_hash;
pub use locality::for_current_consistent_hash;
pub use locality::ConsistentHashKeyDistribution;
pub use locality::ConsistentHashLocality;
pub use locality::ConsistentHashSource;
pub use locality::CurrentConsistentHashLocality;
pub use locality::CurrentKeyDistribution;
pub use locality::DistributionLocality;
pub use locality::KeyDistribution;
pub use locality::Locality;
pub use locality::SimpleLocality;
pub use options::ConsistentHashOptions;

pub(crate) use consistent_hash::hash_code;
pub(crate) use options::ConsistentHashOptionsValidated;
