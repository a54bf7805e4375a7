use crate::prompts::{
    ATTACHMENT_FLAG, CLASSIFICATION_FINAL_INSTRUCTION, CLASSIFICATION_INSTRUCTION,
};
use crate::trim::fit_messages_within_limit;
use quill_llm::{Backoff, CallTimeouts, ChatClient, ChatOptions, ChatRequest, Message};
use quill_types::model_token_limit;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Classified purpose of the user's latest message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    NewImage,
    EditImage,
    Vision,
    AmbiguousImage,
    TextOnly,
    /// Classification itself failed (timeout after retries, or a hard client
    /// error). Distinct from `TextOnly` so callers surface the failure
    /// instead of mis-routing an image request into plain chat.
    Error,
}

/// Raw completions longer than this are treated as "the model got chatty"
/// and coerced to `none`.
const MAX_RAW_TOKEN_LEN: usize = 20;

pub struct IntentClassifier {
    chat_client: Arc<dyn ChatClient>,
    timeouts: CallTimeouts,
    backoff: Backoff,
    model: String,
}

impl IntentClassifier {
    pub fn new(chat_client: Arc<dyn ChatClient>, timeouts: CallTimeouts) -> Self {
        Self {
            chat_client,
            timeouts,
            backoff: Backoff::classification(),
            model: "gpt-4o-mini".to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Classify the latest message against recent context.
    ///
    /// Timeouts are retried with exponential backoff and a shortened
    /// per-retry deadline; everything else fails straight to
    /// `Intent::Error`.
    pub async fn classify(
        &self,
        recent_messages: &[Message],
        last_user_message: &str,
        has_attached_images: bool,
    ) -> Intent {
        let request_messages = self.build_conversation(
            recent_messages,
            last_user_message,
            has_attached_images,
        );

        let mut timeout = self.timeouts.classify;
        let max_attempts = self.backoff.max_attempts();

        for attempt in 0..=max_attempts {
            let request = ChatRequest::new(self.model.clone(), request_messages.clone())
                .with_options(
                    ChatOptions::new()
                        .temperature(0.0)
                        .max_tokens(10)
                        .timeout(timeout),
                );

            match self.chat_client.chat(request).await {
                Ok(response) => {
                    let raw = response.content.unwrap_or_default();
                    return Self::map_token(&Self::validate(&raw));
                }
                Err(e) if e.is_timeout() => {
                    if attempt >= max_attempts {
                        tracing::error!(
                            "Intent classification timed out after {} retries",
                            max_attempts
                        );
                        return Intent::Error;
                    }
                    tracing::warn!(
                        "Intent classification timeout (attempt {}), retrying",
                        attempt + 1
                    );
                    self.backoff.wait(attempt).await;
                    // Retries run on a tighter deadline
                    timeout = self.timeouts.classify / 2;
                }
                Err(e) => {
                    tracing::error!("Intent classification failed: {}", e);
                    return Intent::Error;
                }
            }
        }

        Intent::Error
    }

    fn build_conversation(
        &self,
        recent_messages: &[Message],
        last_user_message: &str,
        has_attached_images: bool,
    ) -> Vec<Message> {
        let user_text = if has_attached_images {
            format!("{}\n{}", last_user_message, ATTACHMENT_FLAG)
        } else {
            last_user_message.to_string()
        };

        let mut messages = Vec::with_capacity(recent_messages.len() + 3);
        messages.push(Message::system(CLASSIFICATION_INSTRUCTION));
        messages.extend_from_slice(recent_messages);
        messages.push(Message::human(user_text));
        messages.push(Message::system(CLASSIFICATION_FINAL_INSTRUCTION));

        // The classification call goes out like any other and must fit the
        // model's window; this list has no owning thread, so use the raw
        // fallback.
        let limit = model_token_limit(&self.model);
        fit_messages_within_limit(&mut messages, &self.model, limit);

        messages
    }

    /// Coerce verbose answers to `none`: a valid answer is one short token.
    fn validate(raw: &str) -> String {
        let trimmed = raw.trim();
        if trimmed.len() > MAX_RAW_TOKEN_LEN || trimmed.chars().any(char::is_whitespace) {
            tracing::warn!(
                "Classifier returned unparseable output ({} chars), coercing to none",
                trimmed.len()
            );
            return "none".to_string();
        }
        trimmed.to_lowercase()
    }

    fn map_token(token: &str) -> Intent {
        match token {
            "new" => Intent::NewImage,
            "edit" => Intent::EditImage,
            "vision" => Intent::Vision,
            "ambiguous" => Intent::AmbiguousImage,
            "none" => Intent::TextOnly,
            other => {
                tracing::warn!("Unrecognized intent token '{}', treating as text", other);
                Intent::TextOnly
            }
        }
    }

    /// Apply attachment coercion: an attachment always means the user is
    /// talking about those images, never a fresh generation.
    pub fn resolve_with_attachments(intent: Intent, has_attached_images: bool) -> Intent {
        if !has_attached_images {
            return intent;
        }
        match intent {
            Intent::NewImage | Intent::EditImage | Intent::AmbiguousImage => Intent::EditImage,
            Intent::TextOnly => Intent::Vision,
            Intent::Vision => Intent::Vision,
            Intent::Error => Intent::Error,
        }
    }
}
