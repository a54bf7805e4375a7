use serde::{Deserialize, Serialize};

/// A platform-agnostic inbound chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub channel_id: String,
    pub thread_id: String,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Image URLs pasted inline rather than attached
    #[serde(default)]
    pub url_images: Vec<String>,
    /// Platform-native timestamp of this message
    pub ts: String,
    pub username: Option<String>,
    #[serde(default)]
    pub is_bot: bool,
}

impl IncomingMessage {
    pub fn new(
        channel_id: impl Into<String>,
        thread_id: impl Into<String>,
        text: impl Into<String>,
        ts: impl Into<String>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            thread_id: thread_id.into(),
            text: text.into(),
            attachments: Vec::new(),
            url_images: Vec::new(),
            ts: ts.into(),
            username: None,
            is_bot: false,
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn has_image_attachments(&self) -> bool {
        !self.url_images.is_empty()
            || self
                .attachments
                .iter()
                .any(|a| a.mime_type.starts_with("image/"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub file_id: String,
    pub filename: String,
    pub mime_type: String,
    pub url: String,
}

impl Attachment {
    pub fn new(
        file_id: impl Into<String>,
        filename: impl Into<String>,
        mime_type: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            file_id: file_id.into(),
            filename: filename.into(),
            mime_type: mime_type.into(),
            url: url.into(),
        }
    }
}

/// A message as the platform reports it in thread history,
/// used to rebuild thread state after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub ts: String,
    pub text: String,
    pub is_bot: bool,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}
