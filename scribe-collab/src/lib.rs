//! # scribe-collab: password-gated collaborative text editing server
//!
//! Clients edit a shared document over WebSocket. Merging is delegated to
//! a CRDT; this crate coordinates sessions, gates each document behind a
//! single shared password, and relays updates, awareness and presence.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐   JSON frames   ┌──────────────────────┐
//! │ Browser client   │ ◄─────────────► │ ConnectionHandler    │
//! │ (Yjs + editor)   │                 │ (auth gate per conn) │
//! └──────────────────┘                 └──────────┬───────────┘
//!                                                 │
//!                                                 ▼
//!                                      ┌──────────────────────┐
//!                                      │ SessionRegistry      │
//!                                      │ key → Session        │
//!                                      └──────────┬───────────┘
//!                                                 │
//!                        ┌────────────────────────┼──────────────────┐
//!                        ▼                        ▼                  ▼
//!                 ┌─────────────┐        ┌────────────────┐   ┌──────────────┐
//!                 │ YrsDocument │        │ CredentialStore│   │ MembershipSet│
//!                 │ (CRDT)      │        │ (Argon2)       │   │ + Relay      │
//!                 └─────────────┘        └────────────────┘   └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON wire messages
//! - [`key`]: document keys and connection ids
//! - [`credential`]: set-once password credential
//! - [`document`]: CRDT capability and its Yrs implementation
//! - [`membership`]: live members of a session
//! - [`relay`]: per-session fan-out
//! - [`registry`]: session lookup and creation
//! - [`handler`]: per-connection auth gate and dispatch
//! - [`server`]: WebSocket accept loop
//! - [`config`]: server configuration
//! - [`error`]: error kinds

pub mod config;
pub mod credential;
pub mod document;
pub mod error;
pub mod handler;
pub mod key;
pub mod membership;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod server;

// Re-exports for convenience
pub use config::ServerConfig;
pub use credential::{Argon2Hasher, CredentialHasher, CredentialStore};
pub use document::{DocumentState, MergeError, YrsDocument};
pub use error::CollabError;
pub use handler::{ConnectionHandler, Phase};
pub use key::{ConnectionId, DocumentKey};
pub use membership::{MemberInfo, MembershipSet};
pub use protocol::{ClientMessage, ProtocolError, ServerMessage};
pub use registry::{DocumentFactory, InMemorySessionStore, Session, SessionRegistry, SessionStore};
pub use relay::{BroadcastRelay, Inbox, RelayFrame, RelayStats};
pub use server::{CollabServer, ServerStats};
