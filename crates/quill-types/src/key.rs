use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a single conversation: platform channel + thread.
///
/// The rendered form `"{channel_id}:{thread_id}"` is the key used by the
/// persistence layer, so `Display` is part of the contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadKey {
    pub channel_id: String,
    pub thread_id: String,
}

impl ThreadKey {
    pub fn new(channel_id: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            thread_id: thread_id.into(),
        }
    }
}

impl fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel_id, self.thread_id)
    }
}
