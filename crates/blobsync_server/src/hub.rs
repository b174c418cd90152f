//! Connection registry and push fan-out.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

/// Server-assigned id of one websocket connection.
pub type ConnectionId = u64;

/// The outbound half of a connection. The transport task on the other
/// end drains this channel and writes frames to the socket.
pub type Outbound = UnboundedSender<String>;

/// What [`ConnectionHub::unregister`] found when the connection left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    /// Account the connection was attached to, if it ever authenticated.
    pub account_id: Option<String>,
    /// True when this was the account's last connection.
    pub last_in_group: bool,
}

struct Connection {
    outbound: Outbound,
    account_id: Option<String>,
}

#[derive(Default)]
struct HubState {
    connections: HashMap<ConnectionId, Connection>,
    groups: HashMap<String, HashSet<ConnectionId>>,
}

/// Registry of live connections, grouped by account once authenticated.
///
/// A connection registers unauthenticated, joins its account group via
/// [`attach`](ConnectionHub::attach) after the auth handshake, and
/// leaves everything on [`unregister`](ConnectionHub::unregister).
/// Sends go through each connection's outbound channel; a send to a
/// closed channel is logged and skipped, never failing the broadcast
/// for the other connections.
#[derive(Default)]
pub struct ConnectionHub {
    next_id: AtomicU64,
    state: Mutex<HubState>,
}

impl ConnectionHub {
    /// Creates an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection and returns its id.
    pub fn register(&self, outbound: Outbound) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.state.lock().connections.insert(
            id,
            Connection {
                outbound,
                account_id: None,
            },
        );
        debug!(connection = id, "connection registered");
        id
    }

    /// Attaches a connection to its account group. Returns false when
    /// the connection is gone.
    pub fn attach(&self, id: ConnectionId, account_id: &str) -> bool {
        let mut state = self.state.lock();
        let Some(connection) = state.connections.get_mut(&id) else {
            return false;
        };
        connection.account_id = Some(account_id.to_owned());
        state
            .groups
            .entry(account_id.to_owned())
            .or_default()
            .insert(id);
        debug!(connection = id, account_id, "connection joined group");
        true
    }

    /// The account a connection is attached to.
    pub fn account_of(&self, id: ConnectionId) -> Option<String> {
        self.state
            .lock()
            .connections
            .get(&id)
            .and_then(|connection| connection.account_id.clone())
    }

    /// Removes a connection, reporting which group it left and whether
    /// the group is now empty.
    pub fn unregister(&self, id: ConnectionId) -> Option<Departure> {
        let mut state = self.state.lock();
        let connection = state.connections.remove(&id)?;
        let mut last_in_group = false;
        if let Some(account_id) = &connection.account_id {
            if let Some(group) = state.groups.get_mut(account_id) {
                group.remove(&id);
                if group.is_empty() {
                    state.groups.remove(account_id);
                    last_in_group = true;
                }
            }
        }
        debug!(connection = id, last_in_group, "connection unregistered");
        Some(Departure {
            account_id: connection.account_id,
            last_in_group,
        })
    }

    /// Sends a payload to one connection. Returns false when the
    /// connection or its transport is gone.
    pub fn send(&self, id: ConnectionId, payload: &str) -> bool {
        let state = self.state.lock();
        let Some(connection) = state.connections.get(&id) else {
            return false;
        };
        if connection.outbound.send(payload.to_owned()).is_err() {
            warn!(connection = id, "outbound channel closed, dropping frame");
            return false;
        }
        true
    }

    /// Sends the same payload to every connection in an account group.
    /// Returns how many sends succeeded.
    pub fn broadcast(&self, account_id: &str, payload: &str) -> usize {
        self.broadcast_with(account_id, |_| Some(payload.to_owned()))
    }

    /// Sends a per-connection payload to an account group; `produce`
    /// returns the payload for each connection, or `None` to skip it.
    /// Returns how many sends succeeded.
    pub fn broadcast_with<F>(&self, account_id: &str, mut produce: F) -> usize
    where
        F: FnMut(ConnectionId) -> Option<String>,
    {
        let members: Vec<ConnectionId> = {
            let state = self.state.lock();
            state
                .groups
                .get(account_id)
                .map(|group| group.iter().copied().collect())
                .unwrap_or_default()
        };

        let mut sent = 0;
        for id in members {
            let Some(payload) = produce(id) else {
                continue;
            };
            if self.send(id, &payload) {
                sent += 1;
            }
        }
        sent
    }

    /// Total live connections, authenticated or not.
    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Number of accounts with at least one attached connection.
    pub fn group_count(&self) -> usize {
        self.state.lock().groups.len()
    }

    /// Number of connections attached to `account_id`.
    pub fn group_size(&self, account_id: &str) -> usize {
        self.state
            .lock()
            .groups
            .get(account_id)
            .map(HashSet::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn connect(hub: &ConnectionHub) -> (ConnectionId, UnboundedReceiver<String>) {
        let (tx, rx) = unbounded_channel();
        (hub.register(tx), rx)
    }

    #[test]
    fn register_attach_unregister_lifecycle() {
        let hub = ConnectionHub::new();
        let (id, _rx) = connect(&hub);
        assert_eq!(hub.connection_count(), 1);
        assert!(hub.account_of(id).is_none());

        assert!(hub.attach(id, "alice"));
        assert_eq!(hub.account_of(id).as_deref(), Some("alice"));
        assert_eq!(hub.group_size("alice"), 1);

        let departure = hub.unregister(id).expect("departure");
        assert_eq!(departure.account_id.as_deref(), Some("alice"));
        assert!(departure.last_in_group);
        assert_eq!(hub.connection_count(), 0);
        assert_eq!(hub.group_count(), 0);
    }

    #[test]
    fn departure_reports_remaining_group_members() {
        let hub = ConnectionHub::new();
        let (first, _rx1) = connect(&hub);
        let (second, _rx2) = connect(&hub);
        hub.attach(first, "alice");
        hub.attach(second, "alice");

        let departure = hub.unregister(first).expect("departure");
        assert!(!departure.last_in_group);
        assert_eq!(hub.group_size("alice"), 1);
    }

    #[test]
    fn broadcast_reaches_only_the_group() {
        let hub = ConnectionHub::new();
        let (a1, mut rx_a1) = connect(&hub);
        let (a2, mut rx_a2) = connect(&hub);
        let (b, mut rx_b) = connect(&hub);
        hub.attach(a1, "alice");
        hub.attach(a2, "alice");
        hub.attach(b, "bob");

        assert_eq!(hub.broadcast("alice", "ping"), 2);
        assert_eq!(rx_a1.try_recv().ok().as_deref(), Some("ping"));
        assert_eq!(rx_a2.try_recv().ok().as_deref(), Some("ping"));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn broadcast_with_produces_per_connection_payloads() {
        let hub = ConnectionHub::new();
        let (a1, mut rx_a1) = connect(&hub);
        let (a2, mut rx_a2) = connect(&hub);
        hub.attach(a1, "alice");
        hub.attach(a2, "alice");

        let sent = hub.broadcast_with("alice", |id| {
            if id == a1 {
                Some(format!("for-{id}"))
            } else {
                None
            }
        });
        assert_eq!(sent, 1);
        assert_eq!(rx_a1.try_recv().ok(), Some(format!("for-{a1}")));
        assert!(rx_a2.try_recv().is_err());
    }

    #[test]
    fn closed_outbound_does_not_poison_broadcast() {
        let hub = ConnectionHub::new();
        let (dead, rx_dead) = connect(&hub);
        let (live, mut rx_live) = connect(&hub);
        hub.attach(dead, "alice");
        hub.attach(live, "alice");
        drop(rx_dead);

        assert_eq!(hub.broadcast("alice", "ping"), 1);
        assert_eq!(rx_live.try_recv().ok().as_deref(), Some("ping"));
    }

    #[test]
    fn send_to_unknown_connection_is_false() {
        let hub = ConnectionHub::new();
        assert!(!hub.send(99, "ping"));
    }
}
