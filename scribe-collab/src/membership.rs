//! Live set of authenticated connections for one document.
//!
//! Membership is what lets a connection send and receive updates and
//! awareness for a session. Every join and leave announces the new
//! count; the count is read under the same lock as the mutation, so the
//! announced numbers always match the set at that moment.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::sync::RwLock;

use crate::key::ConnectionId;
use crate::relay::{BroadcastRelay, Inbox, RelayStats};

/// What the session knows about a member.
#[derive(Debug, Clone)]
pub struct MemberInfo {
    pub connection: ConnectionId,
    pub peer_addr: Option<SocketAddr>,
    pub joined_at: Instant,
}

impl MemberInfo {
    pub fn new(connection: ConnectionId, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            connection,
            peer_addr,
            joined_at: Instant::now(),
        }
    }
}

/// Members of one session plus the channel that reaches them.
pub struct MembershipSet {
    members: RwLock<HashMap<ConnectionId, MemberInfo>>,
    relay: BroadcastRelay,
}

impl MembershipSet {
    pub fn new(broadcast_capacity: usize) -> Self {
        Self {
            members: RwLock::new(HashMap::new()),
            relay: BroadcastRelay::new(broadcast_capacity),
        }
    }

    /// Add a member and announce the new count.
    ///
    /// The returned inbox is subscribed before the announcement, so the
    /// new member sees its own `userCount`.
    pub async fn add(&self, info: MemberInfo) -> Inbox {
        let mut members = self.members.write().await;
        let inbox = self.relay.subscribe(info.connection);
        members.insert(info.connection, info);
        if let Err(e) = self.relay.announce_presence(members.len()) {
            log::error!("Failed to announce presence: {e}");
        }
        inbox
    }

    /// Remove a member. Announces the new count if it was present.
    pub async fn remove(&self, connection: &ConnectionId) -> Option<MemberInfo> {
        let mut members = self.members.write().await;
        let removed = members.remove(connection)?;
        if let Err(e) = self.relay.announce_presence(members.len()) {
            log::error!("Failed to announce presence: {e}");
        }
        Some(removed)
    }

    pub async fn count(&self) -> usize {
        self.members.read().await.len()
    }

    pub async fn contains(&self, connection: &ConnectionId) -> bool {
        self.members.read().await.contains_key(connection)
    }

    pub async fn members(&self) -> Vec<MemberInfo> {
        self.members.read().await.values().cloned().collect()
    }

    pub fn relay(&self) -> &BroadcastRelay {
        &self.relay
    }

    pub async fn stats(&self) -> RelayStats {
        let count = self.count().await;
        self.relay.stats(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ServerMessage;

    fn user_count(text: &str) -> usize {
        match ServerMessage::decode(text).unwrap() {
            ServerMessage::UserCount { count } => count,
            other => panic!("expected userCount, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_add_remove() {
        let set = MembershipSet::new(16);
        let id = ConnectionId::new();

        let _inbox = set.add(MemberInfo::new(id, None)).await;
        assert_eq!(set.count().await, 1);
        assert!(set.contains(&id).await);

        assert!(set.remove(&id).await.is_some());
        assert_eq!(set.count().await, 0);
        assert!(!set.contains(&id).await);
    }

    #[tokio::test]
    async fn test_counts_announced_on_join_and_leave() {
        let set = MembershipSet::new(16);
        let alice = ConnectionId::new();
        let bob = ConnectionId::new();

        let mut alice_inbox = set.add(MemberInfo::new(alice, None)).await;
        assert_eq!(user_count(&alice_inbox.recv().await.unwrap()), 1);

        let mut bob_inbox = set.add(MemberInfo::new(bob, None)).await;
        assert_eq!(user_count(&alice_inbox.recv().await.unwrap()), 2);
        assert_eq!(user_count(&bob_inbox.recv().await.unwrap()), 2);

        set.remove(&bob).await;
        drop(bob_inbox);
        assert_eq!(user_count(&alice_inbox.recv().await.unwrap()), 1);
    }

    #[tokio::test]
    async fn test_remove_unknown_is_silent() {
        let set = MembershipSet::new(16);
        let mut inbox = set.add(MemberInfo::new(ConnectionId::new(), None)).await;
        let _ = inbox.recv().await;

        assert!(set.remove(&ConnectionId::new()).await.is_none());
        assert!(inbox.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_joins_announce_exact_counts() {
        let set = std::sync::Arc::new(MembershipSet::new(64));
        let mut observer = set.add(MemberInfo::new(ConnectionId::new(), None)).await;
        let _ = observer.recv().await;

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let set = set.clone();
            tasks.push(tokio::spawn(async move {
                set.add(MemberInfo::new(ConnectionId::new(), None)).await
            }));
        }
        let mut inboxes = Vec::new();
        for task in tasks {
            inboxes.push(task.await.unwrap());
        }

        let mut seen = Vec::new();
        while let Some(text) = observer.try_recv() {
            seen.push(user_count(&text));
        }
        assert_eq!(seen, (2..=11).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_members_listing() {
        let set = MembershipSet::new(16);
        let id = ConnectionId::new();
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let _inbox = set.add(MemberInfo::new(id, Some(addr))).await;

        let members = set.members().await;
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].connection, id);
        assert_eq!(members[0].peer_addr, Some(addr));

        let stats = set.stats().await;
        assert_eq!(stats.active_members, 1);
        assert_eq!(stats.presence_sent, 1);
    }
}
