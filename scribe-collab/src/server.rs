//! WebSocket server: accept loop and per-connection pump.
//!
//! Architecture:
//! ```text
//! Client A ──┐                         ┌── Session "doc1" ── YrsDocument
//!             ├── ConnectionHandler ───┤       │              CredentialStore
//! Client B ──┘      (one per socket)    │       └── MembershipSet ── BroadcastRelay
//!                                        │                               │
//!                                        └── Session "doc2" ...          ▼
//!                                                               Client A, Client B
//! ```
//!
//! Each connection gets two tasks: a reader that forwards inbound frames
//! and raises a close signal, and the pump that feeds frames to the
//! handler and writes replies and relayed frames back. Frames from one
//! socket are handled strictly in order.
//!
//! A password check still running when the socket closes is abandoned
//! before it can commit anything.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::config::ServerConfig;
use crate::error::CollabError;
use crate::handler::ConnectionHandler;
use crate::key::DocumentKey;
use crate::protocol::{ProtocolError, ServerMessage};
use crate::registry::SessionRegistry;

/// Inbound frames buffered between the reader task and the pump.
const INBOUND_BUFFER: usize = 64;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// An inbound frame as text, or why it could not be read as text.
type InboundFrame = Result<String, ProtocolError>;

/// Server statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub sessions: usize,
}

#[derive(Default)]
struct AtomicServerStats {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    total_messages: AtomicU64,
}

/// The collaboration server.
pub struct CollabServer {
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    stats: Arc<AtomicServerStats>,
}

impl CollabServer {
    /// In-memory sessions, Argon2 credentials, Yrs documents.
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(SessionRegistry::in_memory(config.broadcast_capacity));
        Self::with_registry(config, registry)
    }

    /// Use a pre-built registry (custom store, hasher or document type).
    pub fn with_registry(config: ServerConfig, registry: Arc<SessionRegistry>) -> Self {
        Self {
            config,
            registry,
            stats: Arc::new(AtomicServerStats::default()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), CollabError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Collaboration server listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), CollabError> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let registry = self.registry.clone();
            let stats = self.stats.clone();
            let default_key = self.config.default_document_key.clone();

            tokio::spawn(async move {
                if let Err(e) =
                    Self::handle_connection(stream, addr, registry, stats, default_key).await
                {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection from handshake to cleanup.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        registry: Arc<SessionRegistry>,
        stats: Arc<AtomicServerStats>,
        default_key: String,
    ) -> Result<(), CollabError> {
        let mut path = String::from("/");
        let ws_stream = tokio_tungstenite::accept_hdr_async(
            stream,
            |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                path = request.uri().path().to_owned();
                Ok(response)
            },
        )
        .await?;
        let (mut ws_sender, ws_receiver) = ws_stream.split();

        let path_key = DocumentKey::from_path(&path, &default_key);
        log::info!("WebSocket connection established from {addr} (path key '{path_key}')");

        stats.total_connections.fetch_add(1, Ordering::Relaxed);
        stats.active_connections.fetch_add(1, Ordering::Relaxed);

        let (frame_tx, frame_rx) = mpsc::channel(INBOUND_BUFFER);
        let (closed_tx, closed_rx) = watch::channel(false);
        let reader = tokio::spawn(Self::read_frames(ws_receiver, frame_tx, closed_tx, addr));

        let mut handler = ConnectionHandler::new(registry, path_key, Some(addr));
        let result = Self::pump(&mut handler, &mut ws_sender, frame_rx, closed_rx, &stats).await;

        // Same cleanup whether the socket closed cleanly or failed
        handler.close().await;
        reader.abort();
        stats.active_connections.fetch_sub(1, Ordering::Relaxed);
        log::info!("Connection closed from {addr}");

        result
    }

    /// Forward text and binary frames until the socket closes.
    async fn read_frames(
        mut ws_receiver: SplitStream<WebSocketStream<TcpStream>>,
        frames: mpsc::Sender<InboundFrame>,
        closed: watch::Sender<bool>,
        addr: SocketAddr,
    ) {
        while let Some(msg) = ws_receiver.next().await {
            let frame = match msg {
                Ok(Message::Text(text)) => Ok(text.as_str().to_owned()),
                Ok(Message::Binary(data)) => {
                    String::from_utf8(data.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    log::warn!("WebSocket error from {addr}: {e}");
                    break;
                }
            };
            if frames.send(frame).await.is_err() {
                break;
            }
        }
        let _ = closed.send(true);
    }

    async fn pump(
        handler: &mut ConnectionHandler,
        ws_sender: &mut WsSink,
        mut frames: mpsc::Receiver<InboundFrame>,
        mut closed: watch::Receiver<bool>,
        stats: &AtomicServerStats,
    ) -> Result<(), CollabError> {
        loop {
            tokio::select! {
                frame = frames.recv() => {
                    let Some(frame) = frame else { break };
                    stats.total_messages.fetch_add(1, Ordering::Relaxed);

                    let frame = match frame {
                        Ok(frame) => frame,
                        Err(e) => {
                            for reply in handler.reject_frame(e) {
                                Self::send(ws_sender, &reply).await?;
                            }
                            continue;
                        }
                    };

                    // Handler first: only a message that is still suspended
                    // (hashing) when the socket closes gets abandoned
                    let replies = tokio::select! {
                        biased;
                        replies = handler.handle_frame(&frame) => replies,
                        _ = closed.wait_for(|closed| *closed) => {
                            log::debug!(
                                "Connection {} closed mid-message, discarding",
                                handler.id()
                            );
                            break;
                        }
                    };
                    for reply in replies {
                        Self::send(ws_sender, &reply).await?;
                    }
                }

                relayed = handler.next_relayed() => {
                    match relayed {
                        Some(text) => ws_sender.send(Message::text(text.to_string())).await?,
                        None => break,
                    }
                }
            }
        }
        Ok(())
    }

    async fn send(ws_sender: &mut WsSink, msg: &ServerMessage) -> Result<(), CollabError> {
        match msg.encode() {
            Ok(text) => ws_sender.send(Message::text(text)).await?,
            Err(e) => log::error!("Failed to encode {msg:?}: {e}"),
        }
        Ok(())
    }

    /// Get server statistics.
    pub fn stats(&self) -> ServerStats {
        ServerStats {
            total_connections: self.stats.total_connections.load(Ordering::Relaxed),
            active_connections: self.stats.active_connections.load(Ordering::Relaxed),
            total_messages: self.stats.total_messages.load(Ordering::Relaxed),
            sessions: self.registry.session_count(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::Argon2Hasher;

    #[test]
    fn test_server_creation() {
        let server = CollabServer::with_defaults();
        assert_eq!(server.config().bind_addr, "127.0.0.1:3000");
        assert_eq!(server.registry().session_count(), 0);
    }

    #[test]
    fn test_server_stats_initial() {
        let server = CollabServer::with_defaults();
        assert_eq!(server.stats(), ServerStats::default());
    }

    #[test]
    fn test_server_with_registry() {
        let registry = Arc::new(SessionRegistry::with_hasher(
            Arc::new(Argon2Hasher::for_testing()),
            32,
        ));
        registry.ensure_session(&"doc1".into());

        let server = CollabServer::with_registry(ServerConfig::default(), registry);
        assert_eq!(server.stats().sessions, 1);
    }

    #[tokio::test]
    async fn test_run_reports_bind_failure() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ServerConfig {
            bind_addr: taken.local_addr().unwrap().to_string(),
            ..ServerConfig::default()
        };
        let server = CollabServer::new(config);
        assert!(matches!(server.run().await, Err(CollabError::Io(_))));
    }
}
