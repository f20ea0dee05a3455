// src/error.rs
//! Error types for the real-time delivery core

use thiserror::Error;

/// Errors surfaced by the hub connection and event pipeline.
///
/// `Clone` so a single in-flight connect outcome can be handed to every
/// caller awaiting it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RealtimeError {
    /// No bearer credential available when one was required
    #[error("Authentication required: {0}")]
    Authentication(String),

    /// Initial handshake failed after the retry budget was spent
    #[error("Connection failed after {attempts} attempt(s): {reason}")]
    Connection { attempts: u32, reason: String },

    /// Operation needs a live connection
    #[error("Not connected to hub")]
    NotConnected,

    /// Socket or HTTP level failure inside the transport
    #[error("Transport error: {0}")]
    Transport(String),

    /// Server rejected or failed a hub invocation
    #[error("Hub invocation '{method}' failed: {reason}")]
    Invocation { method: String, reason: String },

    /// Frame did not follow the hub protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Inbound event could not be normalized
    #[error("Malformed event: {0}")]
    MalformedEvent(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for RealtimeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        RealtimeError::Transport(err.to_string())
    }
}

impl From<reqwest::Error> for RealtimeError {
    fn from(err: reqwest::Error) -> Self {
        RealtimeError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for RealtimeError {
    fn from(err: serde_json::Error) -> Self {
        RealtimeError::Protocol(err.to_string())
    }
}

/// Result type alias using RealtimeError.
pub type RealtimeResult<T> = Result<T, RealtimeError>;
