//! Error taxonomy for the SDK.

/// Errors surfaced by the client, codec, and HTTP collaborators.
///
/// Transport and protocol failures are recoverable: the client converts
/// them into events and (for transport failures) reconnection attempts
/// rather than returning them to the caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Connect or send failed at the socket level.
    #[error("transport failure: {0}")]
    Transport(String),

    /// An inbound frame could not be parsed into a known envelope.
    #[error("protocol error: {0}")]
    Protocol(#[from] serde_json::Error),

    /// The server rejected the credential.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// An operation that requires an authenticated connection was called
    /// without one. No network activity occurred.
    #[error("not connected")]
    NotConnected,

    /// A collaborator HTTP request (history, presence snapshot) failed.
    #[error("api request failed: {0}")]
    Api(#[from] reqwest::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
