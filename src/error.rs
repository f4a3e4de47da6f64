//! Error taxonomy for the connection-lifecycle and broadcast engine
//!
//! Nothing in this core treats a dropped broadcast as fatal; correctness of
//! final state is defined solely by the status store, never by whether an
//! event reached a subscriber.

use std::fmt;

use crate::storage::StorageError;

/// Result type alias for hub operations
pub type HubResult<T> = Result<T, HubError>;

/// Errors raised by the lifecycle manager and its collaborators
#[derive(Debug)]
pub enum HubError {
    /// Bad or missing credential. The connection is refused, not established.
    Authentication(String),

    /// Malformed inbound message. The message is dropped, the connection survives.
    Validation(String),

    /// Session supersession race. The superseded session is force-closed and
    /// the new session proceeds.
    Conflict(String),

    /// Persistence write failed after the retry. Surfaced as a delivery
    /// failure to the agent without closing the connection.
    TransientStore(StorageError),

    /// Event bus unreachable. The publish is dropped; the store commit stands.
    BusUnavailable(String),
}

impl fmt::Display for HubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HubError::Authentication(msg) => write!(f, "authentication failed: {}", msg),
            HubError::Validation(msg) => write!(f, "invalid message: {}", msg),
            HubError::Conflict(msg) => write!(f, "session conflict: {}", msg),
            HubError::TransientStore(err) => write!(f, "store write failed: {}", err),
            HubError::BusUnavailable(msg) => write!(f, "event bus unavailable: {}", msg),
        }
    }
}

impl std::error::Error for HubError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HubError::TransientStore(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for HubError {
    fn from(err: StorageError) -> Self {
        HubError::TransientStore(err)
    }
}
