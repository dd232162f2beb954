//! The local message log: an append-only ordered list with targeted
//! soft-deletes and bulk head eviction.
//!
//! All mutations go through [`ChatLog::apply`] so that every call path
//! (inbound frames, HTTP history seeding, local notices) funnels into one
//! reducer. Entries are kept in connection arrival order; no timestamp
//! sorting is performed anywhere.

use chrono::Utc;

/// Hard cap on retained entries. Exceeding it triggers bulk eviction.
pub const MAX_ENTRIES: usize = 500;

/// Number of oldest entries removed per eviction.
pub const EVICTION_BATCH: usize = 100;

/// Content installed in place of a deleted message.
pub const TOMBSTONE_TEXT: &str = "This message was deleted";

/// What kind of line an entry renders as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A user-authored chat message.
    Chat,
    /// A server or client status notice (errors, maintenance, …).
    System,
    /// A locally-synthesized activity note (joins, leaves, deletions).
    Notification,
}

/// One line in the chat log.
///
/// `id` is present only for server-confirmed chat messages; synthesized
/// notices never carry one. `timestamp` is epoch milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatEntry {
    pub id: Option<i64>,
    pub sender_id: Option<i64>,
    pub sender_username: Option<String>,
    pub content: String,
    pub timestamp: i64,
    pub kind: EntryKind,
    pub filtered: bool,
}

impl ChatEntry {
    /// A system notice stamped with the current time.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            id: None,
            sender_id: None,
            sender_username: None,
            content: content.into(),
            timestamp: now_ms(),
            kind: EntryKind::System,
            filtered: false,
        }
    }

    /// An activity notification stamped with the current time.
    pub fn notification(content: impl Into<String>) -> Self {
        Self {
            kind: EntryKind::Notification,
            ..Self::system(content)
        }
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// A mutation of the log. Produced by the dispatcher and by the client
/// task, consumed by [`ChatLog::apply`].
#[derive(Debug, Clone)]
pub enum LogAction {
    /// Insert at the tail. Rejected (not duplicated) if the entry carries
    /// an id already present in the log.
    Append(ChatEntry),
    /// Tombstone the entry with this id and record who deleted it.
    /// A no-op if the id is absent (already evicted or never received).
    MarkDeleted { message_id: i64, deleted_by: String },
    /// Install a history snapshot as the new log contents.
    Seed(Vec<ChatEntry>),
    /// Drop everything (used on intentional disconnect).
    Clear,
}

/// The ordered message log.
#[derive(Debug)]
pub struct ChatLog {
    entries: Vec<ChatEntry>,
    cap: usize,
    batch: usize,
}

impl Default for ChatLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatLog {
    pub fn new() -> Self {
        Self::with_limits(MAX_ENTRIES, EVICTION_BATCH)
    }

    /// Log with custom retention limits. `cap` is the size that triggers
    /// eviction, `batch` how many head entries one eviction removes.
    pub fn with_limits(cap: usize, batch: usize) -> Self {
        Self {
            entries: Vec::new(),
            cap,
            batch,
        }
    }

    /// Apply one mutation. The only write path into the log.
    pub fn apply(&mut self, action: LogAction) {
        match action {
            LogAction::Append(entry) => {
                self.append(entry);
            }
            LogAction::MarkDeleted {
                message_id,
                deleted_by,
            } => self.mark_deleted(message_id, &deleted_by),
            LogAction::Seed(history) => {
                self.entries = history;
            }
            LogAction::Clear => self.entries.clear(),
        }
    }

    /// Read-only view of the retained entries, oldest first.
    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    /// Owned copy of the retained entries for consumers outside the lock.
    pub fn snapshot(&self) -> Vec<ChatEntry> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether a server-assigned id is present in the retention window.
    pub fn contains_id(&self, id: i64) -> bool {
        self.entries.iter().any(|e| e.id == Some(id))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn append(&mut self, entry: ChatEntry) -> bool {
        if let Some(id) = entry.id
            && self.entries.iter().any(|e| e.id == Some(id))
        {
            // Server re-delivered a message we already hold (reconnect
            // backlog replay). Idempotent: keep the first copy.
            tracing::debug!(id, "dropping duplicate message");
            return false;
        }
        self.entries.push(entry);
        if self.entries.len() > self.cap {
            self.evict();
        }
        true
    }

    fn mark_deleted(&mut self, message_id: i64, deleted_by: &str) {
        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.id == Some(message_id))
        else {
            // Outside our retention window; the server's history is longer
            // than ours.
            return;
        };
        entry.content = TOMBSTONE_TEXT.to_string();
        entry.filtered = false;
        self.entries
            .push(ChatEntry::notification(format!("{deleted_by} recalled a message")));
    }

    /// Remove a batch of oldest entries. The most recent entry always
    /// survives, even with a cap configured below the batch size.
    fn evict(&mut self) {
        let removable = self.batch.min(self.entries.len().saturating_sub(1));
        self.entries.drain(..removable);
        tracing::debug!(removed = removable, retained = self.entries.len(), "evicted log head");
    }
}
