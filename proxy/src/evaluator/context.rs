// SPDX-License-Identifier: MIT
//! Per-(user, session) history of classified requests.
//!
//! The store is the only cross-request mutable state in the proxy. Entries
//! are created lazily on the first append and never evicted; each session
//! keeps at most the [`MAX_HISTORY`] most recent summaries.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::models::{RequestSummary, UserContext};

/// Per-session window of retained request summaries.
const MAX_HISTORY: usize = 10;

#[derive(Debug, Default)]
pub struct ContextStore {
    contexts: RwLock<HashMap<String, UserContext>>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(user_id: &str, session_id: &str) -> String {
        format!("{user_id}_{session_id}")
    }

    /// Snapshot of a session's context. A miss yields an empty transient
    /// context without inserting anything.
    pub fn get(&self, user_id: &str, session_id: &str) -> UserContext {
        let contexts = self.contexts.read().expect("context store lock poisoned");
        match contexts.get(&Self::key(user_id, session_id)) {
            Some(context) => context.clone(),
            None => UserContext {
                user_id: user_id.to_string(),
                session_id: session_id.to_string(),
                request_history: Vec::new(),
            },
        }
    }

    /// Append a summary, creating the session entry on first use and
    /// trimming the history to the most recent [`MAX_HISTORY`].
    pub fn append(&self, user_id: &str, session_id: &str, summary: RequestSummary) {
        let mut contexts = self.contexts.write().expect("context store lock poisoned");
        let context = contexts
            .entry(Self::key(user_id, session_id))
            .or_insert_with(|| UserContext {
                user_id: user_id.to_string(),
                session_id: session_id.to_string(),
                request_history: Vec::new(),
            });

        context.request_history.push(summary);
        if context.request_history.len() > MAX_HISTORY {
            let excess = context.request_history.len() - MAX_HISTORY;
            context.request_history.drain(..excess);
        }
    }

    #[cfg(test)]
    fn session_count(&self) -> usize {
        self.contexts.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;

    fn summary(level: u8) -> RequestSummary {
        RequestSummary {
            timestamp: Utc::now(),
            model: "claude-3-5-sonnet".to_string(),
            message_count: 2,
            token_count: 0,
            difficulty_level: level,
            response_time: Duration::ZERO,
        }
    }

    #[test]
    fn miss_returns_empty_context_without_inserting() {
        let store = ContextStore::new();
        let context = store.get("u", "s");
        assert_eq!(context.user_id, "u");
        assert_eq!(context.session_id, "s");
        assert!(context.request_history.is_empty());
        assert_eq!(store.session_count(), 0);
    }

    #[test]
    fn append_creates_entry_lazily() {
        let store = ContextStore::new();
        store.append("u", "s", summary(3));
        assert_eq!(store.session_count(), 1);
        assert_eq!(store.get("u", "s").request_history.len(), 1);
    }

    #[test]
    fn history_is_trimmed_to_the_most_recent_ten() {
        let store = ContextStore::new();
        for level in 1..=12u8 {
            store.append("u", "s", summary(level % 5 + 1));
        }

        let history = store.get("u", "s").request_history;
        assert_eq!(history.len(), 10);
        // Oldest two were dropped; the survivors are appends 3..=12.
        assert_eq!(history[0].difficulty_level, 3 % 5 + 1);
        assert_eq!(history[9].difficulty_level, 12 % 5 + 1);
    }

    #[test]
    fn sessions_are_isolated() {
        let store = ContextStore::new();
        store.append("u", "s1", summary(1));
        store.append("u", "s2", summary(5));

        assert_eq!(store.get("u", "s1").request_history.len(), 1);
        assert_eq!(store.get("u", "s2").request_history.len(), 1);
        assert_eq!(store.get("u", "s1").request_history[0].difficulty_level, 1);
    }
}
