use crate::group::member::{Address, GroupMember};

/// Immutable snapshot of a group view. A view change always produces a whole new snapshot, so
/// "previous vs current" is a plain diff of two values.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GroupMembership {
    view_id: u64,
    members: Vec<GroupMember>,
    coordinator: usize,
}

impl GroupMembership {
    /// Panics if `members` is empty or `coordinator` is out of bounds; both would be a bug in
    /// whatever produced the view.
    pub fn new(view_id: u64, members: Vec<GroupMember>, coordinator: usize) -> Self {
        assert!(!members.is_empty(), "A group view must contain at least one member");
        assert!(
            coordinator < members.len(),
            "Coordinator index {} out of bounds for view of {} members",
            coordinator,
            members.len()
        );

        GroupMembership {
            view_id,
            members,
            coordinator,
        }
    }

    pub fn singleton(member: GroupMember) -> Self {
        Self::new(0, vec![member], 0)
    }

    pub fn view_id(&self) -> u64 {
        self.view_id
    }

    pub fn members(&self) -> &[GroupMember] {
        &self.members
    }

    pub fn coordinator(&self) -> &GroupMember {
        &self.members[self.coordinator]
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.members.iter().map(GroupMember::address).collect()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.member(address).is_some()
    }

    pub fn member(&self, address: &Address) -> Option<&GroupMember> {
        self.members.iter().find(|m| m.address() == *address)
    }

    /// Members of `previous` that are not part of this view.
    pub fn left_members(&self, previous: &GroupMembership) -> Vec<GroupMember> {
        previous
            .members
            .iter()
            .filter(|m| !self.contains(&m.address()))
            .cloned()
            .collect()
    }

    /// Members of this view that were not part of `previous`.
    pub fn joined_members(&self, previous: &GroupMembership) -> Vec<GroupMember> {
        previous.left_members(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: u128) -> GroupMember {
        GroupMember::new(Address::new(id), format!("node-{}", id))
    }

    #[test]
    fn view_diff() {
        let previous = GroupMembership::new(1, vec![member(1), member(2), member(3)], 0);
        let current = GroupMembership::new(2, vec![member(2), member(3), member(4)], 0);

        assert_eq!(current.left_members(&previous), vec![member(1)]);
        assert_eq!(current.joined_members(&previous), vec![member(4)]);
        assert_eq!(current.coordinator(), &member(2));
        assert!(current.contains(&Address::new(4)));
        assert!(!current.contains(&Address::new(1)));
    }

    #[test]
    #[should_panic]
    fn empty_view_rejected() {
        GroupMembership::new(0, Vec::new(), 0);
    }

    #[test]
    #[should_panic]
    fn invalid_coordinator_rejected() {
        GroupMembership::new(0, vec![member(1)], 1);
    }
}
