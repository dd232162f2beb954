//! HTTP collaborators: history retrieval and the presence snapshot.
//!
//! These run concurrently with the connection's event stream; their
//! completions interleave with inbound frames and the caller must not
//! assume fetch-then-event ordering.

use serde::Deserialize;

use crate::error::Result;
use crate::store::{ChatEntry, EntryKind};

/// Response of `GET users/online`.
#[derive(Debug, Clone, Deserialize)]
pub struct OnlineUsers {
    pub count: u32,
    #[serde(default)]
    pub users: Vec<String>,
}

/// One message as the history endpoint returns it.
#[derive(Debug, Deserialize)]
struct HistoryMessage {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    sender_id: Option<i64>,
    #[serde(default)]
    sender_username: Option<String>,
    content: String,
    timestamp: i64,
    #[serde(default)]
    filtered: bool,
}

impl From<HistoryMessage> for ChatEntry {
    fn from(msg: HistoryMessage) -> Self {
        ChatEntry {
            id: msg.id,
            sender_id: msg.sender_id,
            sender_username: msg.sender_username,
            content: msg.content,
            timestamp: msg.timestamp,
            kind: EntryKind::Chat,
            filtered: msg.filtered,
        }
    }
}

/// Bearer-authenticated client for the chat server's REST surface.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl ApiClient {
    /// `base_url` is the API root, e.g. `http://127.0.0.1:8080/api`.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            http: reqwest::Client::new(),
            base_url,
            token: token.into(),
        }
    }

    /// Most recent messages, oldest first, bounded by `limit`. Used to
    /// seed the chat log at authenticated session start.
    pub async fn history(&self, limit: usize) -> Result<Vec<ChatEntry>> {
        let url = format!("{}/messages?limit={limit}", self.base_url);
        let messages: Vec<HistoryMessage> = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(messages.into_iter().map(Into::into).collect())
    }

    /// Full presence snapshot for [`crate::presence::Presence::resync`].
    pub async fn online_users(&self) -> Result<OnlineUsers> {
        let url = format!("{}/users/online", self.base_url);
        let snapshot = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(snapshot)
    }
}
