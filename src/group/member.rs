use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Opaque identity of a node within a group. Totally ordered so views can be sorted and compared.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Address(u128);

impl Address {
    pub fn new(value: u128) -> Self {
        Address(value)
    }

    pub fn random() -> Self {
        Address(rand::thread_rng().gen())
    }

    pub fn into_inner(self) -> u128 {
        self.0
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({:08x})", (self.0 >> 96) as u32)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// An addressable participant of a group. Equality, hashing and ordering only look at the address,
/// the name is for humans.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroupMember {
    address: Address,
    name: String,
}

impl GroupMember {
    pub fn new(address: Address, name: impl Into<String>) -> Self {
        GroupMember {
            address,
            name: name.into(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for GroupMember {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for GroupMember {}

impl Hash for GroupMember {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl PartialOrd for GroupMember {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GroupMember {
    fn cmp(&self, other: &Self) -> Ordering {
        self.address.cmp(&other.address)
    }
}

impl fmt::Display for GroupMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn member_identity_is_address_only() {
        let address = Address::new(42);
        let a = GroupMember::new(address, "node-a");
        let renamed = GroupMember::new(address, "node-a-restarted");
        let other = GroupMember::new(Address::new(43), "node-a");

        assert_eq!(a, renamed);
        assert_ne!(a, other);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(!set.insert(renamed));
        assert!(set.insert(other));
    }

    #[test]
    fn member_ordering_follows_address() {
        let low = GroupMember::new(Address::new(1), "zzz");
        let high = GroupMember::new(Address::new(2), "aaa");

        assert!(low < high);
    }
}
