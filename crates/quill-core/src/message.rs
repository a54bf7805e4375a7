use quill_llm::{Content, Message};
use serde::{Deserialize, Serialize};

/// Role of a ledger message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Developer,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Developer => "developer",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Self::System),
            "developer" => Some(Self::Developer),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// What kind of non-text event a ledger message records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    ImageGeneration,
    ImageEdit,
    ImageUpload,
    VisionAnalysis,
    ImageAnalysis,
    DocumentUpload,
}

impl MessageKind {
    /// Kinds whose messages can never be reconstructed from text and are
    /// therefore exempt from trimming.
    pub fn is_preserved(&self) -> bool {
        matches!(
            self,
            Self::ImageGeneration
                | Self::ImageEdit
                | Self::ImageUpload
                | Self::VisionAnalysis
                | Self::ImageAnalysis
        )
    }
}

/// Explicit-field message metadata. The structured `kind` tag is the primary
/// signal; content marker scans exist only for history rebuilt from platforms
/// where no metadata survives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<MessageKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default)]
    pub summarized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summarized_length: Option<usize>,
}

/// One entry in a thread's message ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerMessage {
    pub role: Role,
    pub content: Content,
    #[serde(default)]
    pub metadata: MessageMetadata,
}

impl LedgerMessage {
    pub fn new(role: Role, content: impl Into<Content>) -> Self {
        Self {
            role,
            content: content.into(),
            metadata: MessageMetadata::default(),
        }
    }

    pub fn system(content: impl Into<Content>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn developer(content: impl Into<Content>) -> Self {
        Self::new(Role::Developer, content)
    }

    pub fn user(content: impl Into<Content>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn user_with_content(content: Content) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<Content>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.metadata.kind = Some(kind);
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.metadata.prompt = Some(prompt.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.metadata.url = Some(url.into());
        self
    }

    /// All text content, joined (image parts skipped).
    pub fn text(&self) -> String {
        self.content.text_parts()
    }

    /// Convert to the wire message the LLM backend expects.
    pub fn to_chat_message(&self) -> Message {
        match self.role {
            Role::System => Message::System {
                content: self.content.clone(),
                name: None,
            },
            Role::Developer => Message::Developer {
                content: self.content.clone(),
                name: None,
            },
            Role::User => Message::Human {
                content: self.content.clone(),
                name: None,
            },
            Role::Assistant => Message::AI {
                content: self.content.clone(),
                name: None,
            },
        }
    }
}

// ============================================================================
// CONTENT MARKERS
// ============================================================================
// Document blocks and breadcrumbs use fixed markers so state can be
// reconstructed from externally-sourced history with no metadata attached.

pub const DOCUMENT_START_PREFIX: &str = "=== DOCUMENT:";
pub const DOCUMENT_END_MARKER: &str = "=== END DOCUMENT ===";
pub const SUMMARIZED_MARKER: &str = "[SUMMARIZED";
pub const IMAGE_ANALYSIS_MARKER: &str = "[Image Analysis:";
pub const VISION_CONTEXT_MARKER: &str = "[Vision Context:";
pub const GENERATED_IMAGE_PREFIX: &str = "Generated image:";
pub const EDITED_IMAGE_PREFIX: &str = "Edited image:";

const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".webp", ".svg"];

/// Vendor hosts that serve generated images; URLs on these hosts mark a
/// message as image-bearing even without a file extension.
const GENERATED_IMAGE_URL_MARKERS: &[&str] = &[
    "oaidalleapiprodscus.blob.core.windows.net",
    "files.oaiusercontent.com",
];

/// Wrap raw document text in the ledger's document block format.
pub fn format_document_block(filename: &str, content: &str) -> String {
    format!(
        "{} {} ===\n{}\n{}",
        DOCUMENT_START_PREFIX, filename, content, DOCUMENT_END_MARKER
    )
}

/// Wrap a summary in the summarized-document block format, keeping the
/// original's filename, page count and mime type visible.
pub fn format_summarized_block(
    filename: &str,
    total_pages: Option<u32>,
    mime_type: &str,
    summary: &str,
    original_length: usize,
    summarized_length: usize,
) -> String {
    let pages = total_pages
        .map(|p| format!("{} pages, ", p))
        .unwrap_or_default();
    format!(
        "{} {} ({}{}) ===\n{} - {} chars -> {} chars]\n{}\n{}",
        DOCUMENT_START_PREFIX,
        filename,
        pages,
        mime_type,
        SUMMARIZED_MARKER,
        original_length,
        summarized_length,
        summary,
        DOCUMENT_END_MARKER
    )
}

/// A document block that has not yet been summarized: the one message
/// category whose content may be rewritten before eviction.
pub fn is_unsummarized_document(message: &LedgerMessage) -> bool {
    if message.metadata.summarized {
        return false;
    }
    let text = message.text();
    text.contains(DOCUMENT_START_PREFIX) && !text.contains(SUMMARIZED_MARKER)
}

/// Filename from a document block header line, if present.
pub fn document_filename(text: &str) -> Option<String> {
    let start = text.find(DOCUMENT_START_PREFIX)?;
    let rest = &text[start + DOCUMENT_START_PREFIX.len()..];
    let end = rest.find("===")?;
    let header = rest[..end].trim();
    // Strip a trailing "(...)" annotation from summarized headers
    let name = match header.rfind('(') {
        Some(paren) => header[..paren].trim(),
        None => header,
    };
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Content scan for image-bearing text: image file extensions or known
/// generated-image hosts.
pub fn contains_image_url(text: &str) -> bool {
    let lower = text.to_lowercase();
    if GENERATED_IMAGE_URL_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
    {
        return true;
    }
    IMAGE_EXTENSIONS.iter().any(|ext| {
        lower
            .split_whitespace()
            .any(|word| word.contains("http") && word.contains(ext))
    })
}
