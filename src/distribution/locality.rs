use crate::distribution::consistent_hash::ConsistentHash;
use crate::group::Address;
use std::hash::Hash;
use std::sync::Arc;

/// Anything that knows the consistent hash currently in effect, typically a replicated store.
pub trait ConsistentHashSource: Send + Sync {
    fn current_consistent_hash(&self) -> Arc<ConsistentHash>;
}

pub trait KeyDistribution<K: ?Sized>: Send + Sync {
    /// `None` when nobody owns the key, which only happens for a memberless hash.
    fn primary_owner(&self, key: &K) -> Option<Address>;

    /// Primary owner first, then backups.
    fn owners(&self, key: &K) -> Vec<Address>;
}

pub trait Locality<K: ?Sized>: Send + Sync {
    /// Whether the local node is the primary owner of `key`. A hint, not a lease.
    fn is_local(&self, key: &K) -> bool;
}

/// Distribution bound to one explicit snapshot.
#[derive(Clone)]
pub struct ConsistentHashKeyDistribution {
    hash: Arc<ConsistentHash>,
}

impl ConsistentHashKeyDistribution {
    pub fn new(hash: Arc<ConsistentHash>) -> Self {
        ConsistentHashKeyDistribution { hash }
    }
}

impl<K: Hash + ?Sized> KeyDistribution<K> for ConsistentHashKeyDistribution {
    fn primary_owner(&self, key: &K) -> Option<Address> {
        self.hash.locate_primary_owner(key)
    }

    fn owners(&self, key: &K) -> Vec<Address> {
        self.hash.locate_owners(key)
    }
}

/// Distribution that reads whatever snapshot is current at call time.
#[derive(Clone)]
pub struct CurrentKeyDistribution {
    source: Arc<dyn ConsistentHashSource>,
}

impl CurrentKeyDistribution {
    pub fn new(source: Arc<dyn ConsistentHashSource>) -> Self {
        CurrentKeyDistribution { source }
    }
}

impl<K: Hash + ?Sized> KeyDistribution<K> for CurrentKeyDistribution {
    fn primary_owner(&self, key: &K) -> Option<Address> {
        self.source.current_consistent_hash().locate_primary_owner(key)
    }

    fn owners(&self, key: &K) -> Vec<Address> {
        self.source.current_consistent_hash().locate_owners(key)
    }
}

#[derive(Clone)]
pub struct DistributionLocality<D> {
    local: Address,
    distribution: D,
}

pub type ConsistentHashLocality = DistributionLocality<ConsistentHashKeyDistribution>;
pub type CurrentConsistentHashLocality = DistributionLocality<CurrentKeyDistribution>;

impl<D> DistributionLocality<D> {
    pub fn new(local: Address, distribution: D) -> Self {
        DistributionLocality { local, distribution }
    }
}

impl<K: ?Sized, D: KeyDistribution<K>> Locality<K> for DistributionLocality<D> {
    fn is_local(&self, key: &K) -> bool {
        self.distribution.primary_owner(key) == Some(self.local)
    }
}

/// Locality bound to an explicit snapshot, e.g. the "start" or "end" hash of a topology change.
pub fn for_consistent_hash(local: Address, hash: Arc<ConsistentHash>) -> ConsistentHashLocality {
    DistributionLocality::new(local, ConsistentHashKeyDistribution::new(hash))
}

/// Locality that follows topology changes. Races with a concurrent change are tolerated.
pub fn for_current_consistent_hash(
    local: Address,
    source: Arc<dyn ConsistentHashSource>,
) -> CurrentConsistentHashLocality {
    DistributionLocality::new(local, CurrentKeyDistribution::new(source))
}

/// Locality of a non-clustered node.
#[derive(Copy, Clone, Debug)]
pub struct SimpleLocality(bool);

impl SimpleLocality {
    pub fn new(local: bool) -> Self {
        SimpleLocality(local)
    }
}

impl Default for SimpleLocality {
    fn default() -> Self {
        SimpleLocality(true)
    }
}

impl<K: ?Sized> Locality<K> for SimpleLocality {
    fn is_local(&self, _key: &K) -> bool {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::ConsistentHashOptions;
    use std::sync::Mutex;

    struct SwappableSource {
        hash: Mutex<Arc<ConsistentHash>>,
    }

    impl ConsistentHashSource for SwappableSource {
        fn current_consistent_hash(&self) -> Arc<ConsistentHash> {
            self.hash.lock().unwrap().clone()
        }
    }

    fn hash_of(ids: &[u128]) -> Arc<ConsistentHash> {
        let members = ids.iter().copied().map(Address::new).collect();
        Arc::new(ConsistentHash::new(members, ConsistentHashOptions::default()).unwrap())
    }

    #[test]
    fn exactly_one_member_is_local() {
        let hash = hash_of(&[1, 2, 3]);
        let localities: Vec<_> = hash
            .members()
            .iter()
            .map(|m| for_consistent_hash(*m, hash.clone()))
            .collect();

        for key in 0..200u64 {
            let local_count = localities.iter().filter(|l| l.is_local(&key)).count();
            assert_eq!(local_count, 1, "key {}", key);
        }
    }

    #[test]
    fn current_locality_follows_source() {
        // -- setup --
        let source = Arc::new(SwappableSource {
            hash: Mutex::new(hash_of(&[1, 2])),
        });
        let locality = for_current_consistent_hash(Address::new(1), source.clone());
        let distribution = CurrentKeyDistribution::new(source.clone());

        // Find a key owned by member 2.
        let key = (0..1000u64)
            .find(|k| distribution.primary_owner(k) == Some(Address::new(2)))
            .unwrap();
        assert!(!locality.is_local(&key));

        // -- execute --
        *source.hash.lock().unwrap() = hash_of(&[1]);

        // -- verify --
        assert!(locality.is_local(&key));
        assert_eq!(distribution.owners(&key), vec![Address::new(1)]);
    }

    #[test]
    fn simple_locality() {
        assert!(Locality::<str>::is_local(&SimpleLocality::default(), "anything"));
        assert!(!Locality::<str>::is_local(&SimpleLocality::new(false), "anything"));
    }
}
