//! Shared fakes for core tests: a scriptable LLM client and a recording
//! channel.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::Stream;
use quill_channels::{ChannelClient, HistoryMessage};
use quill_llm::{
    ChatClient, ChatRequest, ChatResponse, ImageClient, ImageData, ImageEditRequest, ImageRequest,
    LlmClient, LlmError, StreamEvent, VisionClient, VisionRequest,
};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

/// Scriptable LLM backend.
///
/// `chat` pops scripted results in order and falls back to `default_chat`
/// once the script is exhausted. All requests are recorded for assertions.
pub struct MockLlm {
    pub chat_script: Mutex<VecDeque<Result<String, LlmError>>>,
    pub default_chat: String,
    pub chat_requests: Mutex<Vec<ChatRequest>>,
    pub image_requests: Mutex<Vec<ImageRequest>>,
    pub edit_requests: Mutex<Vec<ImageEditRequest>>,
    pub vision_requests: Mutex<Vec<VisionRequest>>,
    pub vision_result: Mutex<Result<String, ()>>,
    pub image_should_fail: Mutex<bool>,
    /// Artificial latency on chat calls, for lock-contention tests
    pub chat_delay: Option<Duration>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self {
            chat_script: Mutex::new(VecDeque::new()),
            default_chat: "ok".to_string(),
            chat_requests: Mutex::new(Vec::new()),
            image_requests: Mutex::new(Vec::new()),
            edit_requests: Mutex::new(Vec::new()),
            vision_requests: Mutex::new(Vec::new()),
            vision_result: Mutex::new(Ok("an image of a landscape".to_string())),
            image_should_fail: Mutex::new(false),
            chat_delay: None,
        }
    }

    pub fn with_chat_script(self, script: Vec<Result<String, LlmError>>) -> Self {
        *self.chat_script.lock().unwrap() = script.into();
        self
    }

    /// Shorthand for the common shape: a scripted client behind an Arc.
    pub fn scripted(script: Vec<Result<String, LlmError>>) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::new().with_chat_script(script))
    }

    pub fn with_chat_delay(mut self, delay: Duration) -> Self {
        self.chat_delay = Some(delay);
        self
    }

    pub fn with_failing_images(self) -> Self {
        *self.image_should_fail.lock().unwrap() = true;
        self
    }

    pub fn chat_call_count(&self) -> usize {
        self.chat_requests.lock().unwrap().len()
    }

    pub fn image_call_count(&self) -> usize {
        self.image_requests.lock().unwrap().len()
    }

    pub fn edit_call_count(&self) -> usize {
        self.edit_requests.lock().unwrap().len()
    }

    fn next_chat(&self) -> Result<String, LlmError> {
        self.chat_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(self.default_chat.clone()))
    }
}

#[async_trait]
impl ChatClient for MockLlm {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        self.chat_requests.lock().unwrap().push(request);
        if let Some(delay) = self.chat_delay {
            tokio::time::sleep(delay).await;
        }
        let content = self.next_chat()?;
        Ok(ChatResponse {
            content: Some(content),
            usage: None,
            finish_reason: Some("stop".to_string()),
        })
    }

    /// Serves the same script as `chat`, delivered as a chunked stream so
    /// callers that accumulate streamed replies are genuinely exercised.
    async fn chat_stream(
        &self,
        request: ChatRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send>>, LlmError> {
        self.chat_requests.lock().unwrap().push(request);
        if let Some(delay) = self.chat_delay {
            tokio::time::sleep(delay).await;
        }
        let content = self.next_chat()?;

        let split = content
            .char_indices()
            .map(|(i, _)| i)
            .find(|&i| i >= content.len() / 2)
            .unwrap_or(0);
        let (head, tail) = content.split_at(split);

        let mut events = Vec::new();
        if !head.is_empty() {
            events.push(Ok(StreamEvent::Message {
                content: head.to_string(),
            }));
        }
        if !tail.is_empty() {
            events.push(Ok(StreamEvent::Message {
                content: tail.to_string(),
            }));
        }
        events.push(Ok(StreamEvent::Done {
            finish_reason: Some("stop".to_string()),
        }));

        Ok(Box::pin(futures::stream::iter(events)))
    }
}

#[async_trait]
impl ImageClient for MockLlm {
    async fn generate_image(&self, request: ImageRequest) -> Result<ImageData, LlmError> {
        let prompt = request.prompt.clone();
        self.image_requests.lock().unwrap().push(request);
        if *self.image_should_fail.lock().unwrap() {
            return Err(LlmError::Api {
                status: 500,
                message: "image backend down".to_string(),
            });
        }
        Ok(ImageData {
            base64_data: "aW1hZ2UtYnl0ZXM=".to_string(),
            format: "png".to_string(),
            prompt,
        })
    }

    async fn edit_image(&self, request: ImageEditRequest) -> Result<ImageData, LlmError> {
        let prompt = request.prompt.clone();
        self.edit_requests.lock().unwrap().push(request);
        if *self.image_should_fail.lock().unwrap() {
            return Err(LlmError::Api {
                status: 500,
                message: "image backend down".to_string(),
            });
        }
        Ok(ImageData {
            base64_data: "ZWRpdGVkLWJ5dGVz".to_string(),
            format: "png".to_string(),
            prompt,
        })
    }
}

#[async_trait]
impl VisionClient for MockLlm {
    async fn analyze_images(&self, request: VisionRequest) -> Result<String, LlmError> {
        self.vision_requests.lock().unwrap().push(request);
        match &*self.vision_result.lock().unwrap() {
            Ok(text) => Ok(text.clone()),
            Err(()) => Err(LlmError::Api {
                status: 500,
                message: "vision backend down".to_string(),
            }),
        }
    }
}

impl LlmClient for MockLlm {}

/// Records outbound platform calls; serves canned history and file bytes.
pub struct MockChannel {
    pub sent: Mutex<Vec<String>>,
    pub history: Mutex<Vec<HistoryMessage>>,
    pub files: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
            files: Mutex::new(Vec::new()),
        }
    }

    pub fn with_history(self, history: Vec<HistoryMessage>) -> Self {
        *self.history.lock().unwrap() = history;
        self
    }

    pub fn with_file(self, url: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.files.lock().unwrap().push((url.into(), bytes));
        self
    }
}

#[async_trait]
impl ChannelClient for MockChannel {
    fn name(&self) -> &str {
        "test"
    }

    async fn send_message(
        &self,
        _channel_id: &str,
        _thread_id: &str,
        text: &str,
    ) -> Result<String, quill_channels::ChannelError> {
        self.sent.lock().unwrap().push(text.to_string());
        Ok("ts".to_string())
    }

    async fn send_image(
        &self,
        _channel_id: &str,
        _thread_id: &str,
        _base64_data: &str,
        caption: &str,
    ) -> Result<String, quill_channels::ChannelError> {
        self.sent.lock().unwrap().push(caption.to_string());
        Ok("ts".to_string())
    }

    async fn update_message(
        &self,
        _channel_id: &str,
        _ts: &str,
        _text: &str,
    ) -> Result<(), quill_channels::ChannelError> {
        Ok(())
    }

    async fn delete_message(
        &self,
        _channel_id: &str,
        _ts: &str,
    ) -> Result<(), quill_channels::ChannelError> {
        Ok(())
    }

    async fn send_thinking_indicator(
        &self,
        _channel_id: &str,
        _thread_id: &str,
    ) -> Result<String, quill_channels::ChannelError> {
        Ok("ts".to_string())
    }

    async fn download_file(
        &self,
        url: &str,
        file_id: &str,
    ) -> Result<Vec<u8>, quill_channels::ChannelError> {
        self.files
            .lock()
            .unwrap()
            .iter()
            .find(|(u, _)| u == url)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| quill_channels::ChannelError::Download {
                file_id: file_id.to_string(),
                reason: "no such file in fixture".to_string(),
            })
    }

    async fn get_thread_history(
        &self,
        _channel_id: &str,
        _thread_id: &str,
    ) -> Result<Vec<HistoryMessage>, quill_channels::ChannelError> {
        Ok(self.history.lock().unwrap().clone())
    }
}
