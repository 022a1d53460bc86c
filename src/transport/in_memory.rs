use crate::group::{Address, Group, GroupListener, GroupMember, GroupMembership, Registration};
use crate::transport::api::{Channel, RequestHandler, TransportError};
use bytes::Bytes;
use itertools::Itertools;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

/// In-process group transport. Every joined member gets its own channel. Supports leaving,
/// partitioning and healing so view changes can be exercised without a network.
///
/// Members are ordered by join order and the oldest member of a partition coordinates it.
#[derive(Clone)]
pub struct InMemoryNetwork {
    inner: Arc<NetworkInner>,
}

struct NetworkInner {
    logger: slog::Logger,
    name: String,
    state: Mutex<NetworkState>,
    // Serializes listener delivery so every listener sees views in order.
    delivery: Mutex<()>,
}

struct NetworkState {
    next_view_id: u64,
    next_partition: u32,
    next_listener_id: u64,
    nodes: Vec<Node>,
}

struct Node {
    member: GroupMember,
    partition: u32,
    view: Arc<GroupMembership>,
    listeners: Vec<(u64, Arc<dyn GroupListener>)>,
    handlers: HashMap<String, Arc<dyn RequestHandler>>,
}

struct ViewChange {
    listeners: Vec<Arc<dyn GroupListener>>,
    previous: Arc<GroupMembership>,
    current: Arc<GroupMembership>,
    merged: bool,
}

impl InMemoryNetwork {
    pub fn new(logger: slog::Logger, name: impl Into<String>) -> Self {
        let name = name.into();
        InMemoryNetwork {
            inner: Arc::new(NetworkInner {
                logger: logger.new(slog::o!("Group" => name.clone())),
                name,
                state: Mutex::new(NetworkState {
                    next_view_id: 1,
                    next_partition: 1,
                    next_listener_id: 0,
                    nodes: Vec::new(),
                }),
                delivery: Mutex::new(()),
            }),
        }
    }

    /// Adds a member to the main partition.
    pub fn join(&self, name: impl Into<String>) -> InMemoryChannel {
        let member = GroupMember::new(Address::random(), name);
        let _delivery = self.inner.delivery.lock().expect("InMemoryNetwork delivery mutex guard poison");

        let changes = {
            let mut state = self.inner.lock_state();
            state.nodes.push(Node {
                member: member.clone(),
                partition: 0,
                view: Arc::new(GroupMembership::singleton(member.clone())),
                listeners: Vec::new(),
                handlers: HashMap::new(),
            });
            state.install_view(0, false)
        };
        slog::info!(self.inner.logger, "{} joined", member);
        self.inner.deliver(changes);

        InMemoryChannel {
            group: Arc::new(InMemoryGroup {
                network: Arc::downgrade(&self.inner),
                name: self.inner.name.clone(),
                member,
            }),
        }
    }

    pub fn leave(&self, address: &Address) {
        self.inner.leave(address);
    }

    /// Moves `members` into a new partition of their own.
    pub fn split(&self, members: &[Address]) {
        let _delivery = self.inner.delivery.lock().expect("InMemoryNetwork delivery mutex guard poison");

        let changes = {
            let mut state = self.inner.lock_state();
            let partition = state.next_partition;
            state.next_partition += 1;

            let mut affected = Vec::new();
            for node in state.nodes.iter_mut() {
                if members.contains(&node.member.address()) {
                    if !affected.contains(&node.partition) {
                        affected.push(node.partition);
                    }
                    node.partition = partition;
                }
            }
            affected.push(partition);

            affected
                .into_iter()
                .flat_map(|p| state.install_view(p, false))
                .collect::<Vec<_>>()
        };
        slog::info!(self.inner.logger, "Split off {:?}", members);
        self.inner.deliver(changes);
    }

    /// Merges every partition back into one. Listeners are told the view is a merge, unless there
    /// was only one partition to begin with.
    pub fn heal(&self) {
        let _delivery = self.inner.delivery.lock().expect("InMemoryNetwork delivery mutex guard poison");

        let (changes, partitions) = {
            let mut state = self.inner.lock_state();
            let partitions = state.nodes.iter().map(|n| n.partition).unique().count();
            for node in state.nodes.iter_mut() {
                node.partition = 0;
            }
            (state.install_view(0, partitions > 1), partitions)
        };
        slog::info!(self.inner.logger, "Healed {} partitions", partitions);
        self.inner.deliver(changes);
    }
}

impl NetworkInner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, NetworkState> {
        self.state.lock().expect("InMemoryNetwork state mutex guard poison")
    }

    fn leave(&self, address: &Address) {
        let _delivery = self.delivery.lock().expect("InMemoryNetwork delivery mutex guard poison");

        let changes = {
            let mut state = self.lock_state();
            let position = match state.nodes.iter().position(|n| n.member.address() == *address) {
                Some(position) => position,
                None => return,
            };
            let node = state.nodes.remove(position);
            slog::info!(self.logger, "{} left", node.member);

            if state.nodes.iter().any(|n| n.partition == node.partition) {
                state.install_view(node.partition, false)
            } else {
                Vec::new()
            }
        };
        self.deliver(changes);
    }

    fn deliver(&self, changes: Vec<ViewChange>) {
        for change in changes {
            for listener in change.listeners.iter() {
                listener.membership_changed(&change.previous, &change.current, change.merged);
            }
        }
    }
}

impl NetworkState {
    fn node(&self, address: &Address) -> Option<&Node> {
        self.nodes.iter().find(|n| n.member.address() == *address)
    }

    fn node_mut(&mut self, address: &Address) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.member.address() == *address)
    }

    /// Installs a fresh view on every node of `partition`, returning what listeners must hear.
    fn install_view(&mut self, partition: u32, merged: bool) -> Vec<ViewChange> {
        let members: Vec<GroupMember> = self
            .nodes
            .iter()
            .filter(|n| n.partition == partition)
            .map(|n| n.member.clone())
            .collect();
        if members.is_empty() {
            return Vec::new();
        }

        let current = Arc::new(GroupMembership::new(self.next_view_id, members, 0));
        self.next_view_id += 1;

        self.nodes
            .iter_mut()
            .filter(|n| n.partition == partition)
            .map(|node| {
                let previous = std::mem::replace(&mut node.view, current.clone());
                ViewChange {
                    listeners: node.listeners.iter().map(|(_, l)| l.clone()).collect(),
                    previous,
                    current: current.clone(),
                    merged,
                }
            })
            .collect()
    }
}

/// One member's view of an `InMemoryNetwork`.
pub struct InMemoryGroup {
    network: Weak<NetworkInner>,
    name: String,
    member: GroupMember,
}

impl Group for InMemoryGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn local_member(&self) -> &GroupMember {
        &self.member
    }

    fn membership(&self) -> Arc<GroupMembership> {
        let view = self.network.upgrade().and_then(|network| {
            let state = network.lock_state();
            let view = state.node(&self.member.address()).map(|node| node.view.clone());
            view
        });

        // A member that left only sees itself.
        view.unwrap_or_else(|| Arc::new(GroupMembership::singleton(self.member.clone())))
    }

    fn register(&self, listener: Arc<dyn GroupListener>) -> Registration {
        let network = match self.network.upgrade() {
            Some(network) => network,
            None => return Registration::empty(),
        };

        let id = {
            let mut state = network.lock_state();
            let id = state.next_listener_id;
            state.next_listener_id += 1;
            match state.node_mut(&self.member.address()) {
                Some(node) => node.listeners.push((id, listener)),
                None => return Registration::empty(),
            }
            id
        };

        let weak_network = Arc::downgrade(&network);
        let address = self.member.address();
        Registration::new(move || {
            if let Some(network) = weak_network.upgrade() {
                let mut state = network.lock_state();
                if let Some(node) = state.node_mut(&address) {
                    node.listeners.retain(|(listener_id, _)| *listener_id != id);
                }
            }
        })
    }
}

pub struct InMemoryChannel {
    group: Arc<InMemoryGroup>,
}

impl InMemoryChannel {
    pub fn local_address(&self) -> Address {
        self.group.member.address()
    }

    /// Leaves the group. Idempotent.
    pub fn close(&self) {
        if let Some(network) = self.group.network.upgrade() {
            network.leave(&self.local_address());
        }
    }

    fn network(&self) -> Result<Arc<NetworkInner>, TransportError> {
        self.group.network.upgrade().ok_or(TransportError::Closed)
    }
}

#[async_trait::async_trait]
impl Channel for InMemoryChannel {
    fn group(&self) -> Arc<dyn Group> {
        self.group.clone()
    }

    fn register_handler(
        &self,
        service: &str,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<Registration, TransportError> {
        let network = self.network()?;
        let address = self.local_address();
        {
            let mut state = network.lock_state();
            let node = state.node_mut(&address).ok_or(TransportError::Closed)?;
            if node.handlers.contains_key(service) {
                return Err(TransportError::DuplicateService(service.to_string()));
            }
            node.handlers.insert(service.to_string(), handler);
        }

        let weak_network = Arc::downgrade(&network);
        let service = service.to_string();
        Ok(Registration::new(move || {
            if let Some(network) = weak_network.upgrade() {
                let mut state = network.lock_state();
                if let Some(node) = state.node_mut(&address) {
                    node.handlers.remove(&service);
                }
            }
        }))
    }

    async fn send_request(&self, destination: Address, service: &str, payload: Bytes) -> Result<Bytes, TransportError> {
        let network = self.network()?;
        let sender = self.local_address();
        let handler = {
            let state = network.lock_state();
            let sender_node = state.node(&sender).ok_or(TransportError::Closed)?;
            if !sender_node.view.contains(&destination) {
                return Err(TransportError::MemberNotInView(destination));
            }
            let target = state
                .node(&destination)
                .ok_or(TransportError::MemberNotInView(destination))?;
            target
                .handlers
                .get(service)
                .cloned()
                .ok_or_else(|| TransportError::NoSuchService {
                    member: destination,
                    service: service.to_string(),
                })?
        };

        // Handlers run on the runtime's pool, like replies arriving from a real transport.
        tokio::spawn(async move { handler.handle(sender, payload).await })
            .await
            .map_err(|e| TransportError::Handler(e.to_string()))?
    }
}
