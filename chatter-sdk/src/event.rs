//! Events emitted by the client for the UI layer to consume.

use crate::store::ChatEntry;

/// Events the SDK emits to the consumer (TUI, GUI, bot, etc.)
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The physical connection opened (authentication not yet confirmed).
    Connected,

    /// The connection closed. Whether reconnection follows depends on the
    /// supervisor state; after the attempt budget is exhausted the client
    /// stays disconnected until `reconnect()` is called.
    Disconnected {
        reason: String,
    },

    /// The server accepted the credential.
    AuthSuccess {
        username: String,
    },

    /// The server rejected the credential. The connection stays attached;
    /// the server decides whether to close it.
    AuthError {
        message: String,
    },

    /// A chat message was appended to the log.
    Message {
        entry: ChatEntry,
    },

    /// A user joined. `online_count` is the server's authoritative count.
    UserJoined {
        username: String,
        online_count: u32,
    },

    /// A user left.
    UserLeft {
        username: String,
        online_count: u32,
    },

    /// A message in the retention window was deleted and tombstoned.
    MessageDeleted {
        message_id: i64,
        deleted_by: String,
    },

    /// A server-issued system notice.
    SystemNotice {
        message: String,
    },

    /// A transport or protocol failure that did not terminate the client
    /// (malformed frame, send failure, connect error).
    TransportError {
        message: String,
    },
}
