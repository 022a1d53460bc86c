use crate::group::member::{Address, GroupMember};
use crate::group::membership::GroupMembership;
use crate::group::registration::Registration;
use std::sync::Arc;

/// A group of cooperating nodes as seen from one of them.
pub trait Group: Send + Sync {
    fn name(&self) -> &str;

    fn local_member(&self) -> &GroupMember;

    fn local_address(&self) -> Address {
        self.local_member().address()
    }

    /// Current view. Each call may observe a newer snapshot.
    fn membership(&self) -> Arc<GroupMembership>;

    fn is_singleton(&self) -> bool {
        self.membership().members().len() == 1
    }

    /// Subscribes to future view changes until the returned registration is closed.
    fn register(&self, listener: Arc<dyn GroupListener>) -> Registration;
}

pub trait GroupListener: Send + Sync {
    /// `merged` is set when the new view is the result of a network partition healing.
    fn membership_changed(&self, previous: &GroupMembership, current: &GroupMembership, merged: bool);
}

/// Group of a non-clustered node. The view never changes.
pub struct LocalGroup {
    name: String,
    membership: Arc<GroupMembership>,
}

impl LocalGroup {
    pub fn new(name: impl Into<String>, local_member: GroupMember) -> Self {
        LocalGroup {
            name: name.into(),
            membership: Arc::new(GroupMembership::singleton(local_member)),
        }
    }
}

impl Group for LocalGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn local_member(&self) -> &GroupMember {
        self.membership.coordinator()
    }

    fn membership(&self) -> Arc<GroupMembership> {
        self.membership.clone()
    }

    fn is_singleton(&self) -> bool {
        true
    }

    fn register(&self, _listener: Arc<dyn GroupListener>) -> Registration {
        Registration::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_group() {
        let member = GroupMember::new(Address::new(7), "solo");
        let group = LocalGroup::new("local", member.clone());

        assert_eq!(group.name(), "local");
        assert_eq!(group.local_member(), &member);
        assert_eq!(group.local_address(), Address::new(7));
        assert!(group.is_singleton());
        assert_eq!(group.membership().members(), &[member]);
    }
}
