//! Online-user tracking.
//!
//! The server's `online_count` is authoritative and applied unconditionally
//! from join/leave payloads; the username set is only a heuristic between
//! snapshot resyncs, so count and set may briefly disagree. That window is
//! expected and closed by the next [`Presence::resync`].

use std::collections::HashSet;

/// The current online-user set and count.
#[derive(Debug, Default)]
pub struct Presence {
    users: HashSet<String>,
    count: u32,
}

impl Presence {
    pub fn new() -> Self {
        Self::default()
    }

    /// A user joined: take the server's count, add the name heuristically.
    pub fn apply_join(&mut self, username: &str, online_count: u32) {
        self.count = online_count;
        self.users.insert(username.to_string());
    }

    /// A user left: take the server's count, drop the name heuristically.
    pub fn apply_leave(&mut self, username: &str, online_count: u32) {
        self.count = online_count;
        self.users.remove(username);
    }

    /// Replace set and count atomically from a full snapshot.
    pub fn resync(&mut self, users: Vec<String>, count: u32) {
        self.users = users.into_iter().collect();
        self.count = count;
    }

    /// Drop all presence state (used on intentional disconnect).
    pub fn clear(&mut self) {
        self.users.clear();
        self.count = 0;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn contains(&self, username: &str) -> bool {
        self.users.contains(username)
    }

    /// Owned copy of the user set for consumers outside the lock.
    pub fn users(&self) -> Vec<String> {
        self.users.iter().cloned().collect()
    }
}
