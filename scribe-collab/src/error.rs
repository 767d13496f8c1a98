//! Error kinds for the collaboration server.
//!
//! Every failure is scoped to a single connection or message; none of
//! these is fatal to the process. [`CollabError::client_message`] maps a
//! kind to the text a client sees, if any.

use crate::document::MergeError;
use crate::protocol::ProtocolError;

/// Errors raised while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum CollabError {
    /// Inbound frame could not be parsed.
    #[error("Malformed message: {0}")]
    MalformedMessage(#[from] ProtocolError),

    /// Document traffic from a connection that has not authenticated.
    #[error("Authentication required")]
    AuthenticationRequired,

    /// The document already has a password.
    #[error("Document already exists")]
    CredentialConflict,

    /// Password did not match the document's credential.
    #[error("Invalid password")]
    InvalidCredential,

    /// The CRDT rejected an update.
    #[error("Merge failure: {0}")]
    MergeFailure(#[from] MergeError),

    /// The hashing primitive failed or its worker was lost.
    #[error("Password hashing failed: {0}")]
    Hashing(String),

    #[error("WebSocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CollabError {
    /// Text sent to the client in an `error` message.
    ///
    /// `None` means the failure stays server-side: unauthenticated probes
    /// learn nothing, and merge failures are only logged.
    pub fn client_message(&self) -> Option<&'static str> {
        match self {
            Self::MalformedMessage(_) => Some("Malformed message"),
            Self::CredentialConflict => Some("Document already exists"),
            Self::InvalidCredential => Some("Invalid password"),
            Self::Hashing(_) => Some("Server error"),
            Self::AuthenticationRequired
            | Self::MergeFailure(_)
            | Self::Transport(_)
            | Self::Io(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_visible_messages() {
        assert_eq!(
            CollabError::CredentialConflict.client_message(),
            Some("Document already exists")
        );
        assert_eq!(
            CollabError::InvalidCredential.client_message(),
            Some("Invalid password")
        );
        assert_eq!(
            CollabError::Hashing("worker panicked".into()).client_message(),
            Some("Server error")
        );
    }

    #[test]
    fn test_silent_kinds() {
        assert!(CollabError::AuthenticationRequired.client_message().is_none());
        let merge = CollabError::from(MergeError::Decode("truncated".into()));
        assert!(merge.client_message().is_none());
    }

    #[test]
    fn test_malformed_from_protocol_error() {
        let err = CollabError::from(ProtocolError::DeserializationError("eof".into()));
        assert_eq!(err.client_message(), Some("Malformed message"));
        assert!(err.to_string().contains("eof"));
    }
}
