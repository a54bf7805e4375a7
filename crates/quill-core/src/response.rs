use quill_llm::ImageData;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    Text,
    Image,
    Busy,
    Error,
    Status,
}

/// What the processor hands back to the platform adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub kind: ResponseKind,
    pub text: String,
    pub image: Option<ImageData>,
}

impl Response {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: ResponseKind::Text,
            text: text.into(),
            image: None,
        }
    }

    pub fn image(image: ImageData, caption: impl Into<String>) -> Self {
        Self {
            kind: ResponseKind::Image,
            text: caption.into(),
            image: Some(image),
        }
    }

    pub fn busy() -> Self {
        Self {
            kind: ResponseKind::Busy,
            text: crate::prompts::BUSY_MESSAGE.to_string(),
            image: None,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: ResponseKind::Error,
            text: text.into(),
            image: None,
        }
    }

    pub fn status(text: impl Into<String>) -> Self {
        Self {
            kind: ResponseKind::Status,
            text: text.into(),
            image: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind == ResponseKind::Error
    }
}
