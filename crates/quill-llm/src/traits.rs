use crate::error::Result;
use crate::streaming::StreamEvent;
use crate::types::{ImageSource, Message};
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;

/// Trait for chat-based LLM interactions
///
/// Provides both streaming and non-streaming completions for conversational use cases.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Non-streaming chat completion
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// Streaming chat completion
    async fn chat_stream(
        &self,
        request: ChatRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>>;
}

/// Trait for image generation and editing
#[async_trait]
pub trait ImageClient: Send + Sync {
    /// Generate a fresh image from a prompt
    async fn generate_image(&self, request: ImageRequest) -> Result<ImageData>;

    /// Edit existing image bytes under a prompt
    async fn edit_image(&self, request: ImageEditRequest) -> Result<ImageData>;
}

/// Trait for vision analysis of images
#[async_trait]
pub trait VisionClient: Send + Sync {
    /// Answer a question about the given images, returning plain text
    async fn analyze_images(&self, request: VisionRequest) -> Result<String>;
}

/// Convenience trait for clients that support the full surface
pub trait LlmClient: ChatClient + ImageClient + VisionClient {}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub options: ChatOptions,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            options: ChatOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub reasoning_effort: Option<String>,
    pub verbosity: Option<String>,
    /// Per-call deadline; `None` uses the client's default for this call class.
    pub timeout: Option<Duration>,
}

impl ChatOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    pub fn reasoning_effort(mut self, effort: impl Into<String>) -> Self {
        self.reasoning_effort = Some(effort.into());
        self
    }

    pub fn verbosity(mut self, verbosity: impl Into<String>) -> Self {
        self.verbosity = Some(verbosity.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: Option<String>,
    pub usage: Option<TokenUsage>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

/// A generated or edited image as returned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageData {
    pub base64_data: String,
    pub format: String,
    /// The prompt that produced this image (post-enhancement)
    pub prompt: String,
}

#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub prompt: String,
    pub size: String,
    pub quality: String,
    /// Recent conversation, for backends that condition generation on it
    pub conversation_history: Vec<Message>,
    pub timeout: Option<Duration>,
}

impl ImageRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            size: "1024x1024".to_string(),
            quality: "standard".to_string(),
            conversation_history: Vec::new(),
            timeout: None,
        }
    }

    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = size.into();
        self
    }

    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = quality.into();
        self
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.conversation_history = history;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ImageEditRequest {
    /// Original image bytes, base64-encoded, oldest first
    pub input_images: Vec<ImageSource>,
    pub prompt: String,
    /// Vision description of the inputs, when available
    pub image_description: Option<String>,
    pub size: String,
    pub quality: String,
    pub timeout: Option<Duration>,
}

impl ImageEditRequest {
    pub fn new(input_images: Vec<ImageSource>, prompt: impl Into<String>) -> Self {
        Self {
            input_images,
            prompt: prompt.into(),
            image_description: None,
            size: "1024x1024".to_string(),
            quality: "standard".to_string(),
            timeout: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.image_description = Some(description.into());
        self
    }

    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = size.into();
        self
    }
}

#[derive(Debug, Clone)]
pub struct VisionRequest {
    pub images: Vec<ImageSource>,
    pub question: String,
    pub conversation_history: Vec<Message>,
    pub timeout: Option<Duration>,
}

impl VisionRequest {
    pub fn new(images: Vec<ImageSource>, question: impl Into<String>) -> Self {
        Self {
            images,
            question: question.into(),
            conversation_history: Vec::new(),
            timeout: None,
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.conversation_history = history;
        self
    }
}
