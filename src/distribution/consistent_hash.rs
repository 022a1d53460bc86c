use crate::distribution::options::{ConsistentHashOptions, ConsistentHashOptionsValidated};
use crate::group::Address;
use itertools::Itertools;
use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::hash::{Hash, Hasher};
use wyhash::{wyrng, WyHash};

/// Immutable mapping of key segment to its ordered owners, primary owner first.
///
/// Owners of a segment are the first distinct members found walking a hash ring clockwise from
/// the segment's position. Each member sits on the ring at several pseudo-random positions, so
/// a member leaving only hands its own segments to the next member on the ring and every other
/// segment keeps its primary owner.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConsistentHash {
    members: Vec<Address>,
    segment_owners: Vec<Vec<Address>>,
}

impl ConsistentHash {
    pub fn new(members: Vec<Address>, options: ConsistentHashOptions) -> Result<Self, &'static str> {
        let options = ConsistentHashOptionsValidated::try_from(options)?;
        Ok(Self::with_validated_options(members, &options))
    }

    pub(crate) fn with_validated_options(members: Vec<Address>, options: &ConsistentHashOptionsValidated) -> Self {
        let members: Vec<Address> = members.into_iter().unique().collect();

        let mut ring = BTreeMap::new();
        for member in members.iter() {
            let mut key = hash_code(member);
            ring.insert(key, *member);
            for _ in 1..options.virtual_nodes {
                key = wyrng(&mut key);
                ring.insert(key, *member);
            }
        }

        let stride = u64::MAX / options.segments as u64;
        let segment_owners = (0..options.segments)
            .map(|segment| {
                let position = stride * segment as u64;
                ring.range(position..)
                    .chain(ring.range(..position))
                    .map(|(_, member)| *member)
                    .unique()
                    .take(options.owners)
                    .collect()
            })
            .collect();

        ConsistentHash {
            members,
            segment_owners,
        }
    }

    pub fn members(&self) -> &[Address] {
        &self.members
    }

    pub fn contains(&self, member: &Address) -> bool {
        self.members.contains(member)
    }

    pub fn segments(&self) -> usize {
        self.segment_owners.len()
    }

    /// The key partitioning function. Stable across processes for equal keys.
    pub fn segment_for<K: Hash + ?Sized>(&self, key: &K) -> usize {
        (hash_code(key) % self.segment_owners.len() as u64) as usize
    }

    pub fn segment_owners(&self, segment: usize) -> &[Address] {
        &self.segment_owners[segment]
    }

    /// `None` only for a hash with no members.
    pub fn locate_primary_owner<K: Hash + ?Sized>(&self, key: &K) -> Option<Address> {
        self.segment_owners(self.segment_for(key)).first().copied()
    }

    pub fn locate_owners<K: Hash + ?Sized>(&self, key: &K) -> Vec<Address> {
        self.segment_owners(self.segment_for(key)).to_vec()
    }

    /// Segments whose primary owner is `member`.
    pub fn primary_segments_of(&self, member: &Address) -> Vec<usize> {
        self.segment_owners
            .iter()
            .enumerate()
            .filter(|(_, owners)| owners.first() == Some(member))
            .map(|(segment, _)| segment)
            .collect()
    }
}

pub(crate) fn hash_code<H: Hash + ?Sized>(item: &H) -> u64 {
    let mut hasher = WyHash::with_seed(0);
    item.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addresses(ids: std::ops::Range<u128>) -> Vec<Address> {
        ids.map(Address::new).collect()
    }

    fn options(owners: usize) -> ConsistentHashOptions {
        ConsistentHashOptions {
            segments: Some(64),
            owners: Some(owners),
            virtual_nodes: Some(8),
        }
    }

    #[test]
    fn owners_are_distinct_members() {
        let hash = ConsistentHash::new(addresses(1..5), options(3)).unwrap();

        assert_eq!(hash.segments(), 64);
        for segment in 0..hash.segments() {
            let owners = hash.segment_owners(segment);
            assert_eq!(owners.len(), 3);
            assert_eq!(owners.iter().unique().count(), 3);
            assert!(owners.iter().all(|o| hash.contains(o)));
        }
    }

    #[test]
    fn owners_capped_by_member_count() {
        let hash = ConsistentHash::new(addresses(1..3), options(5)).unwrap();

        assert_eq!(hash.locate_owners("key").len(), 2);
    }

    #[test]
    fn primary_owner_is_first_owner() {
        let hash = ConsistentHash::new(addresses(1..5), options(2)).unwrap();

        for key in 0..100u32 {
            assert_eq!(hash.locate_primary_owner(&key), hash.locate_owners(&key).first().copied());
        }
    }

    #[test]
    fn equal_members_give_equal_hash() {
        let a = ConsistentHash::new(addresses(1..5), options(2)).unwrap();
        let mut reversed = addresses(1..5);
        reversed.reverse();
        let b = ConsistentHash::new(reversed, options(2)).unwrap();

        for segment in 0..a.segments() {
            assert_eq!(a.segment_owners(segment), b.segment_owners(segment));
        }
    }

    #[test]
    fn member_leaving_only_moves_its_own_segments() {
        let before = ConsistentHash::new(addresses(1..6), options(2)).unwrap();
        let leaving = Address::new(3);
        let after = ConsistentHash::new(
            addresses(1..6).into_iter().filter(|a| *a != leaving).collect(),
            options(2),
        )
        .unwrap();

        for segment in 0..before.segments() {
            let primary_before = before.segment_owners(segment)[0];
            let primary_after = after.segment_owners(segment)[0];
            if primary_before == leaving {
                assert_ne!(primary_after, leaving);
            } else {
                assert_eq!(primary_before, primary_after);
            }
        }
    }

    #[test]
    fn every_member_is_primary_somewhere() {
        let hash = ConsistentHash::new(addresses(1..5), ConsistentHashOptions::default()).unwrap();

        for member in hash.members() {
            assert!(!hash.primary_segments_of(member).is_empty());
        }
    }

    #[test]
    fn empty_hash_has_no_owner() {
        let hash = ConsistentHash::new(Vec::new(), options(2)).unwrap();

        assert_eq!(hash.locate_primary_owner("key"), None);
        assert!(hash.locate_owners("key").is_empty());
    }
}
