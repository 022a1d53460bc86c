mod api;
mod member;
mod membership;
mod registration;

pub use api::Group;
pub use api::GroupListener;
pub use api::LocalGroup;
pub use member::Address;
pub use member::GroupMember;
pub use membership::GroupMembership;
pub use registration::Registration;
