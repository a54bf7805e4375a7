// OpenAI-compatible client implementation (HTTP direct, no SDK)

use crate::error::{LlmError, Result};
use crate::streaming::{parse_chat_events, with_chunk_timeout, StreamEvent};
use crate::timeout::{with_timeout, CallTimeouts};
use crate::traits::{
    ChatClient, ChatOptions, ChatRequest, ChatResponse, ImageClient, ImageData, ImageEditRequest,
    ImageRequest, LlmClient, TokenUsage, VisionClient, VisionRequest,
};
use crate::types::{Content, ContentPart, ImageSource, Message};
use async_trait::async_trait;
use base64::Engine;
use futures::Stream;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_IMAGE_MODEL: &str = "gpt-image-1";

pub struct OpenAiClient {
    http_client: reqwest::Client,
    base_url: String,
    image_model: String,
    timeouts: CallTimeouts,
}

impl OpenAiClient {
    /// Create new client with API key
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|_| LlmError::InvalidResponse("invalid API key format".to_string()))?,
        );

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http_client,
            base_url: OPENAI_API_BASE.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            timeouts: CallTimeouts::default(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_image_model(mut self, model: impl Into<String>) -> Self {
        self.image_model = model.into();
        self
    }

    pub fn with_timeouts(mut self, timeouts: CallTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Build chat completion request payload
    fn build_chat_request(
        &self,
        model: &str,
        messages: Vec<Message>,
        options: &ChatOptions,
        stream: bool,
    ) -> Result<Value> {
        let openai_messages: Vec<Value> = messages
            .into_iter()
            .map(|msg| self.convert_message(msg))
            .collect::<Result<Vec<_>>>()?;

        let mut request = serde_json::json!({
            "model": model,
            "messages": openai_messages,
            "stream": stream,
        });

        let obj = request.as_object_mut().unwrap();

        // o1 and gpt-5 families reject temperature and rename max_tokens
        let is_reasoning_model = model.starts_with("o1") || model.starts_with("gpt-5");

        if let Some(temp) = options.temperature {
            if !is_reasoning_model {
                obj.insert("temperature".to_string(), serde_json::json!(temp));
            }
        }
        if let Some(max_tokens) = options.max_tokens {
            let token_field = if is_reasoning_model {
                "max_completion_tokens"
            } else {
                "max_tokens"
            };
            obj.insert(token_field.to_string(), serde_json::json!(max_tokens));
        }
        if let Some(ref reasoning_effort) = options.reasoning_effort {
            obj.insert(
                "reasoning_effort".to_string(),
                serde_json::json!(reasoning_effort),
            );
        }
        if let Some(ref verbosity) = options.verbosity {
            obj.insert("verbosity".to_string(), serde_json::json!(verbosity));
        }

        Ok(request)
    }

    /// Convert our Message type to OpenAI format
    fn convert_message(&self, message: Message) -> Result<Value> {
        let (role, content, name) = match message {
            Message::System { content, name } => ("system", content, name),
            Message::Developer { content, name } => ("developer", content, name),
            Message::Human { content, name } => ("user", content, name),
            Message::AI { content, name } => ("assistant", content, name),
        };

        let mut obj = serde_json::json!({
            "role": role,
            "content": self.convert_content(content)?,
        });
        if let Some(name) = name {
            obj.as_object_mut()
                .unwrap()
                .insert("name".to_string(), serde_json::json!(name));
        }
        Ok(obj)
    }

    /// Convert Content to OpenAI format (string or array)
    fn convert_content(&self, content: Content) -> Result<Value> {
        match content {
            Content::Text(s) => Ok(serde_json::json!(s)),
            Content::Parts(parts) => {
                let converted: Vec<Value> = parts
                    .into_iter()
                    .map(|part| match part {
                        ContentPart::Text { text } => {
                            serde_json::json!({
                                "type": "text",
                                "text": text,
                            })
                        }
                        ContentPart::ImageUrl { image_url } => {
                            serde_json::json!({
                                "type": "image_url",
                                "image_url": image_url,
                            })
                        }
                    })
                    .collect();
                Ok(serde_json::json!(converted))
            }
        }
    }

    async fn post_json(&self, path: &str, payload: &Value) -> Result<reqwest::Response> {
        let response = self
            .http_client
            .post(format!("{}{}", self.base_url, path))
            .json(payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, message });
        }

        Ok(response)
    }

    fn extract_image(&self, raw: ImagesResponse, prompt: String) -> Result<ImageData> {
        let first = raw
            .data
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("images response had no data".to_string()))?;

        let base64_data = first
            .b64_json
            .ok_or_else(|| LlmError::InvalidResponse("image entry had no b64_json".to_string()))?;

        Ok(ImageData {
            base64_data,
            format: "png".to_string(),
            prompt,
        })
    }
}

// ============================================================================
// TRAIT IMPLEMENTATIONS
// ============================================================================

#[async_trait]
impl ChatClient for OpenAiClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let deadline = request.options.timeout.unwrap_or(self.timeouts.chat);
        let payload =
            self.build_chat_request(&request.model, request.messages, &request.options, false)?;

        let raw: OpenAiChatResponse = with_timeout(deadline, async {
            let response = self.post_json("/chat/completions", &payload).await?;
            response
                .json()
                .await
                .map_err(|e| LlmError::InvalidResponse(format!("failed to parse response: {}", e)))
        })
        .await?;

        let choice = raw.choices.first();
        Ok(ChatResponse {
            content: choice.and_then(|c| c.message.content.clone()),
            usage: raw.usage.map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
            finish_reason: choice.and_then(|c| c.finish_reason.clone()),
        })
    }

    async fn chat_stream(
        &self,
        request: ChatRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>> {
        let deadline = request.options.timeout.unwrap_or(self.timeouts.chat);
        let payload =
            self.build_chat_request(&request.model, request.messages, &request.options, true)?;

        let response =
            with_timeout(deadline, self.post_json("/chat/completions", &payload)).await?;

        Ok(with_chunk_timeout(
            parse_chat_events(response),
            self.timeouts.stream_chunk,
        ))
    }
}

#[async_trait]
impl ImageClient for OpenAiClient {
    async fn generate_image(&self, request: ImageRequest) -> Result<ImageData> {
        let deadline = request.timeout.unwrap_or(self.timeouts.image);
        let prompt = request.prompt.clone();
        let payload = serde_json::json!({
            "model": self.image_model,
            "prompt": request.prompt,
            "size": request.size,
            "quality": request.quality,
            "n": 1,
        });

        let raw: ImagesResponse = with_timeout(deadline, async {
            let response = self.post_json("/images/generations", &payload).await?;
            response
                .json()
                .await
                .map_err(|e| LlmError::InvalidResponse(format!("failed to parse response: {}", e)))
        })
        .await?;

        self.extract_image(raw, prompt)
    }

    async fn edit_image(&self, request: ImageEditRequest) -> Result<ImageData> {
        let deadline = request.timeout.unwrap_or(self.timeouts.image);

        let mut form = reqwest::multipart::Form::new()
            .text("model", self.image_model.clone())
            .text("prompt", request.prompt.clone())
            .text("size", request.size.clone());

        for (idx, image) in request.input_images.iter().enumerate() {
            let (bytes, mime_type) = match image {
                ImageSource::Base64 { data, mime_type } => {
                    let decoded = base64::engine::general_purpose::STANDARD
                        .decode(data)
                        .map_err(|e| {
                            LlmError::InvalidResponse(format!("invalid base64 input image: {}", e))
                        })?;
                    (decoded, mime_type.clone())
                }
                ImageSource::Url { url } => {
                    let response = self.http_client.get(url).send().await?;
                    if !response.status().is_success() {
                        return Err(LlmError::Api {
                            status: response.status().as_u16(),
                            message: format!("failed to fetch input image {}", url),
                        });
                    }
                    (response.bytes().await?.to_vec(), "image/png".to_string())
                }
            };

            let part = reqwest::multipart::Part::bytes(bytes)
                .file_name(format!("image_{}.png", idx))
                .mime_str(&mime_type)
                .map_err(|e| LlmError::InvalidResponse(format!("invalid mime type: {}", e)))?;
            form = form.part("image[]", part);
        }

        let raw: ImagesResponse = with_timeout(deadline, async {
            let response = self
                .http_client
                .post(format!("{}/images/edits", self.base_url))
                .multipart(form)
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let message = response.text().await.unwrap_or_default();
                return Err(LlmError::Api { status, message });
            }

            response
                .json()
                .await
                .map_err(|e| LlmError::InvalidResponse(format!("failed to parse response: {}", e)))
        })
        .await?;

        self.extract_image(raw, request.prompt)
    }
}

#[async_trait]
impl VisionClient for OpenAiClient {
    async fn analyze_images(&self, request: VisionRequest) -> Result<String> {
        let deadline = request.timeout.unwrap_or(self.timeouts.vision);

        let mut messages = request.conversation_history;
        messages.push(Message::Human {
            content: Content::text_with_images(request.question, &request.images),
            name: None,
        });

        let chat_request = ChatRequest::new("gpt-4o", messages)
            .with_options(ChatOptions::new().timeout(deadline));

        let response = self.chat(chat_request).await?;
        response
            .content
            .ok_or_else(|| LlmError::InvalidResponse("vision call returned no content".to_string()))
    }
}

impl LlmClient for OpenAiClient {}

// ============================================================================
// OPENAI-SPECIFIC RESPONSE TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAiChatResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Choice {
    pub index: u32,
    pub message: ResponseMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ResponseMessage {
    pub role: String,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ImagesResponse {
    pub data: Vec<ImageEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ImageEntry {
    pub b64_json: Option<String>,
    pub url: Option<String>,
    pub revised_prompt: Option<String>,
}
