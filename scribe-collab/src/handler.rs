//! Per-connection authentication gate and message dispatch.
//!
//! ```text
//!            join(key)
//!  Unjoined ───────────┬──────────────► AwaitingSetup ──setupPassword──┐
//!                      │   (no password yet)                            │
//!                      │                                                ▼
//!                      └──────────────► AwaitingVerification ──ok──► Authenticated
//!                          (password set)      │   ▲
//!                                              └───┘ wrong password
//! ```
//!
//! The session a connection may touch lives inside its gate state, and
//! only the `Authenticated` state carries a membership inbox. Updates and
//! awareness from any other state have nothing to write to and are
//! dropped without a reply.
//!
//! The handler is transport-agnostic: it turns one inbound frame into the
//! direct replies for that connection, and exposes the frames relayed to
//! it by other members through [`ConnectionHandler::next_relayed`].

use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::CollabError;
use crate::key::{ConnectionId, DocumentKey};
use crate::membership::MemberInfo;
use crate::protocol::{ClientMessage, ProtocolError, ServerMessage};
use crate::registry::{Session, SessionRegistry};
use crate::relay::Inbox;

const NO_DOCUMENT: &str = "No document joined";
const ALREADY_JOINED: &str = "Already joined";

/// Where a connection is in the password ritual.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Unjoined,
    AwaitingSetup,
    AwaitingVerification,
    Authenticated,
}

enum Gate {
    Unjoined,
    AwaitingSetup(Arc<Session>),
    AwaitingVerification(Arc<Session>),
    Authenticated { session: Arc<Session>, inbox: Inbox },
}

/// Drives one connection from open to close.
pub struct ConnectionHandler {
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    /// Key derived from the upgrade request path, used by a bare `join`.
    path_key: DocumentKey,
    registry: Arc<SessionRegistry>,
    gate: Gate,
}

impl ConnectionHandler {
    pub fn new(
        registry: Arc<SessionRegistry>,
        path_key: DocumentKey,
        peer_addr: Option<SocketAddr>,
    ) -> Self {
        Self {
            id: ConnectionId::new(),
            peer_addr,
            path_key,
            registry,
            gate: Gate::Unjoined,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn phase(&self) -> Phase {
        match self.gate {
            Gate::Unjoined => Phase::Unjoined,
            Gate::AwaitingSetup(_) => Phase::AwaitingSetup,
            Gate::AwaitingVerification(_) => Phase::AwaitingVerification,
            Gate::Authenticated { .. } => Phase::Authenticated,
        }
    }

    /// Session this connection has joined, authenticated or not.
    pub fn session(&self) -> Option<&Arc<Session>> {
        match &self.gate {
            Gate::Unjoined => None,
            Gate::AwaitingSetup(session) | Gate::AwaitingVerification(session) => Some(session),
            Gate::Authenticated { session, .. } => Some(session),
        }
    }

    /// Handle one raw inbound frame.
    ///
    /// Unparseable input gets a generic error and changes nothing.
    pub async fn handle_frame(&mut self, frame: &str) -> Vec<ServerMessage> {
        match ClientMessage::decode(frame) {
            Ok(msg) => self.handle(msg).await,
            Err(e) => self.reply_to_error(CollabError::from(e)),
        }
    }

    /// Answer a frame the transport could not turn into text.
    pub fn reject_frame(&self, error: ProtocolError) -> Vec<ServerMessage> {
        self.reply_to_error(CollabError::from(error))
    }

    /// Handle one parsed message and return the direct replies.
    pub async fn handle(&mut self, msg: ClientMessage) -> Vec<ServerMessage> {
        let kind = msg.kind();
        let result = match msg {
            ClientMessage::Join { key } => self.join(key),
            ClientMessage::SetupPassword { password } => self.setup_password(&password).await,
            ClientMessage::VerifyPassword { password } => self.verify_password(&password).await,
            ClientMessage::Update { update } => self.update(update),
            ClientMessage::Awareness { awareness } => self.awareness(awareness),
        };

        match result {
            Ok(replies) => replies,
            Err(CollabError::AuthenticationRequired) => {
                log::debug!("Dropped {kind} from unauthenticated connection {}", self.id);
                Vec::new()
            }
            Err(e) => self.reply_to_error(e),
        }
    }

    fn reply_to_error(&self, error: CollabError) -> Vec<ServerMessage> {
        match &error {
            CollabError::InvalidCredential | CollabError::MergeFailure(_) => {
                log::warn!("Connection {}: {error}", self.id)
            }
            CollabError::MalformedMessage(_) | CollabError::CredentialConflict => {
                log::debug!("Connection {}: {error}", self.id)
            }
            _ => log::error!("Connection {}: {error}", self.id),
        }
        error
            .client_message()
            .map(|message| vec![ServerMessage::error(message)])
            .unwrap_or_default()
    }

    fn join(&mut self, key: Option<String>) -> Result<Vec<ServerMessage>, CollabError> {
        if matches!(self.gate, Gate::Authenticated { .. }) {
            return Ok(vec![ServerMessage::error(ALREADY_JOINED)]);
        }

        let key = key
            .map(DocumentKey::new)
            .filter(|key| !key.is_empty())
            .unwrap_or_else(|| self.path_key.clone());
        let (session, _) = self.registry.ensure_session(&key);
        log::debug!("Connection {} joining '{key}'", self.id);

        if session.credentials().is_configured() {
            self.gate = Gate::AwaitingVerification(session);
            Ok(vec![ServerMessage::NeedsPassword])
        } else {
            self.gate = Gate::AwaitingSetup(session);
            Ok(vec![ServerMessage::NeedsPasswordSetup])
        }
    }

    async fn setup_password(&mut self, password: &str) -> Result<Vec<ServerMessage>, CollabError> {
        let session = match &self.gate {
            Gate::AwaitingSetup(session) => session.clone(),
            Gate::AwaitingVerification(_) => return Err(CollabError::CredentialConflict),
            Gate::Unjoined => return Ok(vec![ServerMessage::error(NO_DOCUMENT)]),
            Gate::Authenticated { .. } => {
                log::debug!("Ignoring setupPassword from authenticated connection {}", self.id);
                return Ok(Vec::new());
            }
        };

        // Suspends while hashing; the commit re-checks for a racing setup
        session.credentials().setup(password).await?;
        log::info!("Password set for document '{}'", session.key());

        self.admit(session).await
    }

    async fn verify_password(&mut self, password: &str) -> Result<Vec<ServerMessage>, CollabError> {
        let session = match &self.gate {
            Gate::AwaitingVerification(session) => session.clone(),
            // Lost a setup race: the winner's password is now the one to prove
            Gate::AwaitingSetup(session) if session.credentials().is_configured() => {
                session.clone()
            }
            Gate::AwaitingSetup(_) => {
                log::debug!("Ignoring verifyPassword before setup on connection {}", self.id);
                return Ok(Vec::new());
            }
            Gate::Unjoined => return Ok(vec![ServerMessage::error(NO_DOCUMENT)]),
            Gate::Authenticated { .. } => {
                log::debug!("Ignoring verifyPassword from authenticated connection {}", self.id);
                return Ok(Vec::new());
            }
        };

        if !session.credentials().verify(password).await? {
            return Err(CollabError::InvalidCredential);
        }

        self.admit(session).await
    }

    /// Become a member: subscribe, announce, and send the snapshot.
    async fn admit(&mut self, session: Arc<Session>) -> Result<Vec<ServerMessage>, CollabError> {
        // Subscribed before the snapshot is taken, so nothing falls between
        let inbox = session
            .members()
            .add(MemberInfo::new(self.id, self.peer_addr))
            .await;
        let snapshot = session.document().snapshot();
        log::info!("Connection {} authenticated for '{}'", self.id, session.key());

        self.gate = Gate::Authenticated { session, inbox };
        Ok(vec![
            ServerMessage::Authenticated,
            ServerMessage::Sync { update: snapshot },
        ])
    }

    fn update(&mut self, update: Vec<u8>) -> Result<Vec<ServerMessage>, CollabError> {
        let Gate::Authenticated { session, .. } = &self.gate else {
            return Err(CollabError::AuthenticationRequired);
        };

        session.document().apply_remote(&update)?;

        let relayed = ServerMessage::Update { update };
        if let Err(e) = session.members().relay().relay(self.id, &relayed) {
            log::error!("Failed to relay update for '{}': {e}", session.key());
        }
        Ok(Vec::new())
    }

    fn awareness(&mut self, awareness: Value) -> Result<Vec<ServerMessage>, CollabError> {
        let Gate::Authenticated { session, .. } = &self.gate else {
            return Err(CollabError::AuthenticationRequired);
        };

        let relayed = ServerMessage::Awareness { awareness };
        if let Err(e) = session.members().relay().relay(self.id, &relayed) {
            log::error!("Failed to relay awareness for '{}': {e}", session.key());
        }
        Ok(Vec::new())
    }

    /// Next frame relayed by another member.
    ///
    /// Pends forever before authentication, so it can sit in a `select!`
    /// from the moment the connection opens.
    pub async fn next_relayed(&mut self) -> Option<Arc<str>> {
        match &mut self.gate {
            Gate::Authenticated { inbox, .. } => inbox.recv().await,
            _ => std::future::pending().await,
        }
    }

    /// Release the connection. Members leave their session, which
    /// announces the new count; anything else just goes away.
    pub async fn close(&mut self) {
        let gate = std::mem::replace(&mut self.gate, Gate::Unjoined);
        if let Gate::Authenticated { session, .. } = gate {
            if let Some(member) = session.members().remove(&self.id).await {
                log::info!(
                    "Connection {} left '{}' after {:?}",
                    self.id,
                    session.key(),
                    member.joined_at.elapsed()
                );
            }
        }
    }
}
