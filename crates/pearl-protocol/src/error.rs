//! Error types for PEARL sessions.

use thiserror::Error;

/// Failures of the connection transport.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("invalid websocket url: {0}")]
    InvalidUrl(String),
    #[error("transport not connected")]
    NotConnected,
    #[error("websocket error: {0}")]
    WebSocket(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("transport closed before it opened")]
    ClosedBeforeOpen,
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Failures reported by the REST collaborator.
#[derive(Debug, Clone, Error)]
pub enum RestError {
    #[error("request failed: {message}")]
    Request { message: String },
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("failed decoding response: {message}")]
    Decode { message: String },
}

/// Errors surfaced by session intent operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A user-correctable precondition was not met. Nothing was sent.
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error("no authenticated api client")]
    Unauthenticated,
    #[error("rest api error: {0}")]
    Rest(#[from] RestError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("invalid state: {0}")]
    InvalidState(String),
}

/// Convenience result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
