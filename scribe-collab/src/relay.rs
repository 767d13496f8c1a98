//! Fan-out of updates, awareness and presence to a session's members.
//!
//! Each session owns one tokio broadcast channel. A frame is encoded once
//! and shared by every receiver. Frames carry their origin so a member's
//! [`Inbox`] can skip its own traffic; presence frames have no origin and
//! reach everyone.
//!
//! A member that falls more than `capacity` frames behind loses the
//! overwritten frames instead of queueing them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::key::ConnectionId;
use crate::protocol::{ProtocolError, ServerMessage};

/// One encoded frame on a session's channel.
#[derive(Debug, Clone)]
pub struct RelayFrame {
    /// Connection that produced it; `None` for server-originated frames.
    pub origin: Option<ConnectionId>,
    pub text: Arc<str>,
}

/// Statistics for monitoring relay health.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelayStats {
    pub frames_sent: u64,
    pub presence_sent: u64,
    pub active_members: usize,
}

/// Per-session broadcast channel.
pub struct BroadcastRelay {
    sender: broadcast::Sender<RelayFrame>,
    capacity: usize,
    frames_sent: AtomicU64,
    presence_sent: AtomicU64,
}

impl BroadcastRelay {
    /// `capacity` is how many frames a member may fall behind before it
    /// starts skipping.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            capacity: capacity.max(1),
            frames_sent: AtomicU64::new(0),
            presence_sent: AtomicU64::new(0),
        }
    }

    /// Open an inbox for a newly admitted member.
    pub(crate) fn subscribe(&self, member: ConnectionId) -> Inbox {
        Inbox {
            member,
            receiver: self.sender.subscribe(),
        }
    }

    /// Deliver `payload` to every subscribed member except `sender`.
    ///
    /// Returns the number of receivers the frame was handed to (the
    /// sender's own inbox included; it filters the frame out itself).
    pub fn relay(
        &self,
        sender: ConnectionId,
        payload: &ServerMessage,
    ) -> Result<usize, ProtocolError> {
        let text: Arc<str> = payload.encode()?.into();
        let delivered = self.send(RelayFrame {
            origin: Some(sender),
            text,
        });
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        Ok(delivered)
    }

    /// Announce the member count to every member, no exclusion.
    pub fn announce_presence(&self, count: usize) -> Result<usize, ProtocolError> {
        let text: Arc<str> = ServerMessage::UserCount { count }.encode()?.into();
        let delivered = self.send(RelayFrame { origin: None, text });
        self.presence_sent.fetch_add(1, Ordering::Relaxed);
        Ok(delivered)
    }

    fn send(&self, frame: RelayFrame) -> usize {
        // No receivers is fine: nobody to deliver to
        self.sender.send(frame).unwrap_or(0)
    }

    /// Number of open inboxes.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn stats(&self, active_members: usize) -> RelayStats {
        RelayStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            presence_sent: self.presence_sent.load(Ordering::Relaxed),
            active_members,
        }
    }
}

/// A member's view of its session channel.
pub struct Inbox {
    member: ConnectionId,
    receiver: broadcast::Receiver<RelayFrame>,
}

impl Inbox {
    /// Next frame meant for this member, or `None` once the session
    /// channel is gone.
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        loop {
            match self.receiver.recv().await {
                Ok(frame) if frame.origin == Some(self.member) => continue,
                Ok(frame) => return Some(frame.text),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("Member {} lagged, skipped {skipped} frames", self.member);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Arc<str>> {
        loop {
            match self.receiver.try_recv() {
                Ok(frame) if frame.origin == Some(self.member) => continue,
                Ok(frame) => return Some(frame.text),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    log::warn!("Member {} lagged, skipped {skipped} frames", self.member);
                }
                Err(_) => return None,
            }
        }
    }

    pub fn member(&self) -> ConnectionId {
        self.member
    }
}
