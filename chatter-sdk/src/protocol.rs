//! Wire codec: one JSON object per WebSocket text frame, discriminated by
//! a required `type` field.
//!
//! The same `"chat_message"` tag carries different fields per direction
//! (outbound sends hold the credential token, inbound pushes hold the
//! server-assigned id and sender), so the codec models each direction as
//! its own closed enum. Decoding never panics: a malformed frame or an
//! unknown discriminant comes back as an error for the caller to log and
//! drop.

use serde::{Deserialize, Serialize};

/// Frames the client writes to the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    /// Credential handshake. Always the first frame on a new connection.
    Auth { token: String },
    /// Outbound chat message. The server echoes it back as an inbound
    /// `chat_message` with an assigned id; the client does not insert
    /// optimistically.
    ChatMessage { token: String, content: String },
}

/// Frames the server pushes to the client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEnvelope {
    ChatMessage {
        #[serde(default)]
        id: Option<i64>,
        #[serde(default)]
        sender_id: Option<i64>,
        #[serde(default)]
        sender_username: Option<String>,
        content: String,
        /// Epoch milliseconds.
        timestamp: i64,
        #[serde(default)]
        filtered: bool,
    },
    UserJoined {
        username: String,
        online_count: u32,
    },
    UserLeft {
        username: String,
        online_count: u32,
    },
    MessageDeleted {
        message_id: i64,
        deleted_by: String,
    },
    System {
        message: String,
    },
    AuthSuccess {
        username: String,
    },
    AuthError {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Serialize an outbound envelope to wire text.
pub fn encode(envelope: &ClientEnvelope) -> Result<String, serde_json::Error> {
    serde_json::to_string(envelope)
}

/// Parse wire text into a typed inbound envelope.
pub fn decode(text: &str) -> Result<ServerEnvelope, serde_json::Error> {
    serde_json::from_str(text)
}
