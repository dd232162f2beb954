//! Routing of decoded inbound envelopes.
//!
//! One frame in, one routed effect out: store/presence mutations are
//! applied through the [`ChatLog::apply`] reducer, consumer-facing events
//! are collected for the session loop to emit, and auth outcomes surface
//! as a signal for the supervisor's state machine. No I/O, no awaiting,
//! no state — the match is exhaustive, so a new server envelope variant
//! fails compilation until it is routed here.

use crate::event::ClientEvent;
use crate::presence::Presence;
use crate::protocol::ServerEnvelope;
use crate::store::{ChatEntry, ChatLog, EntryKind, LogAction};

/// Authentication outcome extracted from an inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AuthSignal {
    Success { username: String },
    Failure { message: String },
}

/// What one inbound frame produced.
#[derive(Debug, Default)]
pub(crate) struct Dispatch {
    /// Events to deliver to the consumer, in order.
    pub events: Vec<ClientEvent>,
    /// State transition for the supervisor, if the frame was auth-related.
    pub auth: Option<AuthSignal>,
}

impl Dispatch {
    fn event(mut self, event: ClientEvent) -> Self {
        self.events.push(event);
        self
    }

    fn auth(mut self, signal: AuthSignal) -> Self {
        self.auth = Some(signal);
        self
    }
}

/// Route one decoded envelope into log/presence mutations and events.
pub(crate) fn dispatch(
    frame: ServerEnvelope,
    log: &mut ChatLog,
    presence: &mut Presence,
) -> Dispatch {
    let out = Dispatch::default();
    match frame {
        ServerEnvelope::ChatMessage {
            id,
            sender_id,
            sender_username,
            content,
            timestamp,
            filtered,
        } => {
            if let Some(id) = id
                && log.contains_id(id)
            {
                // Backlog re-delivery after a reconnect; already held.
                return out;
            }
            let entry = ChatEntry {
                id,
                sender_id,
                sender_username,
                content,
                timestamp,
                kind: EntryKind::Chat,
                filtered,
            };
            log.apply(LogAction::Append(entry.clone()));
            out.event(ClientEvent::Message { entry })
        }
        ServerEnvelope::UserJoined {
            username,
            online_count,
        } => {
            presence.apply_join(&username, online_count);
            log.apply(LogAction::Append(ChatEntry::notification(format!(
                "{username} joined the chat"
            ))));
            out.event(ClientEvent::UserJoined {
                username,
                online_count,
            })
        }
        ServerEnvelope::UserLeft {
            username,
            online_count,
        } => {
            presence.apply_leave(&username, online_count);
            log.apply(LogAction::Append(ChatEntry::notification(format!(
                "{username} left the chat"
            ))));
            out.event(ClientEvent::UserLeft {
                username,
                online_count,
            })
        }
        ServerEnvelope::MessageDeleted {
            message_id,
            deleted_by,
        } => {
            log.apply(LogAction::MarkDeleted {
                message_id,
                deleted_by: deleted_by.clone(),
            });
            out.event(ClientEvent::MessageDeleted {
                message_id,
                deleted_by,
            })
        }
        ServerEnvelope::System { message } => {
            log.apply(LogAction::Append(ChatEntry::system(message.clone())));
            out.event(ClientEvent::SystemNotice { message })
        }
        ServerEnvelope::AuthSuccess { username } => out
            .event(ClientEvent::AuthSuccess {
                username: username.clone(),
            })
            .auth(AuthSignal::Success { username }),
        ServerEnvelope::AuthError { message } => {
            log.apply(LogAction::Append(ChatEntry::system(format!(
                "Authentication failed: {message}"
            ))));
            out.event(ClientEvent::AuthError {
                message: message.clone(),
            })
            .auth(AuthSignal::Failure { message })
        }
        ServerEnvelope::Error { message } => {
            log.apply(LogAction::Append(ChatEntry::system(format!(
                "Connection error: {message}"
            ))));
            out.event(ClientEvent::TransportError { message })
        }
    }
}
