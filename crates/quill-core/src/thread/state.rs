use crate::message::LedgerMessage;
use chrono::{DateTime, Utc};
use quill_types::{ConfigOverrides, ThreadKey};
use serde::{Deserialize, Serialize};

/// In-memory state of one conversation thread.
///
/// Mutated only through its own methods, and only ever by the holder of the
/// thread's lock (the manager hands the state out inside the lock guard).
#[derive(Debug)]
pub struct ThreadState {
    pub key: ThreadKey,
    messages: Vec<LedgerMessage>,
    pub config_overrides: ConfigOverrides,
    system_prompt: Option<String>,
    pub current_model: String,
    /// Sticky once any message has been removed; drives the user-visible
    /// trimming disclosure.
    pub has_trimmed_messages: bool,
    pub last_activity: DateTime<Utc>,
    pub assets: AssetLedger,
    pub documents: DocumentLedger,
}

impl ThreadState {
    pub fn new(key: ThreadKey) -> Self {
        Self {
            key,
            messages: Vec::new(),
            config_overrides: ConfigOverrides::default(),
            system_prompt: None,
            current_model: String::new(),
            has_trimmed_messages: false,
            last_activity: Utc::now(),
            assets: AssetLedger::default(),
            documents: DocumentLedger::default(),
        }
    }

    pub fn messages(&self) -> &[LedgerMessage] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push(&mut self, message: LedgerMessage) {
        self.messages.push(message);
    }

    pub(crate) fn message_mut(&mut self, index: usize) -> &mut LedgerMessage {
        &mut self.messages[index]
    }

    pub(crate) fn remove_message(&mut self, index: usize) -> LedgerMessage {
        self.messages.remove(index)
    }

    pub fn mark_trimmed(&mut self) {
        self.has_trimmed_messages = true;
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.current_model = model.into();
    }

    /// Resolve the system prompt once per thread; later calls reuse the
    /// cached value even if config changes mid-thread.
    pub fn resolved_system_prompt<F>(&mut self, resolve: F) -> &str
    where
        F: FnOnce() -> String,
    {
        if self.system_prompt.is_none() {
            self.system_prompt = Some(resolve());
        }
        self.system_prompt.as_deref().unwrap_or_default()
    }

    /// Drop the ledger, keeping overrides and side ledgers. Used when a
    /// rebuild from platform history replaces stale contents.
    pub fn clear_messages(&mut self) {
        self.messages.clear();
    }
}

/// Record of one generated or uploaded image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetEntry {
    /// Raw base64 payload when we still have the bytes, or a platform URL
    /// when only the reference survived (e.g. after a restart)
    pub base64_or_url: String,
    pub prompt: String,
    pub created_at: DateTime<Utc>,
}

impl AssetEntry {
    pub fn new(base64_or_url: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            base64_or_url: base64_or_url.into(),
            prompt: prompt.into(),
            created_at: Utc::now(),
        }
    }

    /// Whether this entry still carries image bytes (vs. only a reference).
    /// Raw base64 never contains a scheme separator, so any ':' marks a URL
    /// or placeholder reference.
    pub fn has_bytes(&self) -> bool {
        !self.base64_or_url.contains(':')
    }
}

/// Per-thread side table of images, independent of the message ledger.
#[derive(Debug, Clone, Default)]
pub struct AssetLedger {
    entries: Vec<AssetEntry>,
}

impl AssetLedger {
    pub fn push(&mut self, entry: AssetEntry) {
        self.entries.push(entry);
    }

    pub fn most_recent(&self) -> Option<&AssetEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Record of one ingested document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentEntry {
    pub content: String,
    pub filename: String,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_structure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl DocumentEntry {
    pub fn new(
        filename: impl Into<String>,
        mime_type: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            filename: filename.into(),
            mime_type: mime_type.into(),
            page_structure: None,
            total_pages: None,
            summary: None,
            metadata: None,
        }
    }
}

/// Per-thread side table of ingested documents.
#[derive(Debug, Clone, Default)]
pub struct DocumentLedger {
    entries: Vec<DocumentEntry>,
}

impl DocumentLedger {
    pub fn push(&mut self, entry: DocumentEntry) {
        self.entries.push(entry);
    }

    pub fn find(&self, filename: &str) -> Option<&DocumentEntry> {
        self.entries.iter().find(|e| e.filename == filename)
    }

    pub fn find_mut(&mut self, filename: &str) -> Option<&mut DocumentEntry> {
        self.entries.iter_mut().find(|e| e.filename == filename)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ThreadKey {
        ThreadKey::new("C1", "T1")
    }

    #[test]
    fn test_new_state_is_empty() {
        let state = ThreadState::new(key());
        assert!(state.is_empty());
        assert!(!state.has_trimmed_messages);
        assert!(state.assets.is_empty());
    }

    #[test]
    fn test_system_prompt_resolved_once() {
        let mut state = ThreadState::new(key());
        let first = state.resolved_system_prompt(|| "prompt A".to_string()).to_string();
        let second = state.resolved_system_prompt(|| "prompt B".to_string()).to_string();
        assert_eq!(first, "prompt A");
        assert_eq!(second, "prompt A");
    }

    #[test]
    fn test_asset_ledger_most_recent() {
        let mut ledger = AssetLedger::default();
        assert!(ledger.most_recent().is_none());

        ledger.push(AssetEntry::new("b64-one", "a cat"));
        ledger.push(AssetEntry::new("b64-two", "a dog"));
        assert_eq!(ledger.most_recent().unwrap().prompt, "a dog");
    }

    #[test]
    fn test_asset_entry_has_bytes() {
        assert!(AssetEntry::new("iVBORw0KGgo", "p").has_bytes());
        assert!(!AssetEntry::new("https://example.com/a.png", "p").has_bytes());
        assert!(!AssetEntry::new("generated:1718000000.000100", "p").has_bytes());
    }

    #[test]
    fn test_document_ledger_find() {
        let mut ledger = DocumentLedger::default();
        ledger.push(DocumentEntry::new("a.txt", "text/plain", "body"));

        assert!(ledger.find("a.txt").is_some());
        assert!(ledger.find("b.txt").is_none());
    }
}
