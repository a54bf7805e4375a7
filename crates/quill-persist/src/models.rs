use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One ledger message as cached for restart recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedMessage {
    pub role: String,
    pub content: String,
    /// Serialized message metadata (kind, url, prompt, summarized, ...)
    pub metadata_json: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CachedMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            metadata_json: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata_json(mut self, metadata: impl Into<String>) -> Self {
        self.metadata_json = Some(metadata.into());
        self
    }
}

/// Metadata row for a generated or uploaded image in a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub url: String,
    /// generation | edit | upload
    pub image_type: String,
    pub prompt: Option<String>,
    pub analysis: Option<String>,
    pub metadata: Option<serde_json::Value>,
    /// Platform-native timestamp of the message carrying the image
    pub message_ts: Option<String>,
}

impl ImageRecord {
    pub fn new(url: impl Into<String>, image_type: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            image_type: image_type.into(),
            prompt: None,
            analysis: None,
            metadata: None,
            message_ts: None,
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_analysis(mut self, analysis: impl Into<String>) -> Self {
        self.analysis = Some(analysis.into());
        self
    }

    pub fn with_message_ts(mut self, ts: impl Into<String>) -> Self {
        self.message_ts = Some(ts.into());
        self
    }
}
