use crate::message::LedgerMessage;
use quill_llm::{Content, ContentPart, Message};
use std::sync::OnceLock;
use tiktoken_rs::CoreBPE;

/// Flat token charge per image part. Vision pricing depends on detail level;
/// low-detail is the floor and the counter only needs to be conservative
/// enough that trimming triggers before the API rejects the request.
const IMAGE_TOKEN_COST: usize = 85;

/// Per-message framing overhead (role tag and separators).
const MESSAGE_OVERHEAD: usize = 4;

/// Stateless token estimator.
///
/// Encoders are heavyweight to construct, so they are built once per process
/// and shared; the counting itself holds no state.
pub struct TokenCounter;

impl TokenCounter {
    fn cl100k() -> &'static CoreBPE {
        static BPE: OnceLock<CoreBPE> = OnceLock::new();
        BPE.get_or_init(|| tiktoken_rs::cl100k_base().expect("cl100k tokenizer"))
    }

    fn o200k() -> &'static CoreBPE {
        static BPE: OnceLock<CoreBPE> = OnceLock::new();
        BPE.get_or_init(|| tiktoken_rs::o200k_base().expect("o200k tokenizer"))
    }

    fn encoder_for(model: &str) -> &'static CoreBPE {
        if model.starts_with("gpt-4o")
            || model.starts_with("gpt-4.1")
            || model.starts_with("gpt-5")
            || model.starts_with("o1")
            || model.starts_with("o3")
        {
            Self::o200k()
        } else {
            Self::cl100k()
        }
    }

    pub fn count_text(model: &str, text: &str) -> usize {
        Self::encoder_for(model).encode_with_special_tokens(text).len()
    }

    fn count_content(model: &str, content: &Content) -> usize {
        match content {
            Content::Text(text) => Self::count_text(model, text),
            Content::Parts(parts) => parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => Self::count_text(model, text),
                    ContentPart::ImageUrl { .. } => IMAGE_TOKEN_COST,
                })
                .sum(),
        }
    }

    pub fn count_message(model: &str, message: &LedgerMessage) -> usize {
        MESSAGE_OVERHEAD + Self::count_content(model, &message.content)
    }

    pub fn count_thread(model: &str, messages: &[LedgerMessage]) -> usize {
        messages
            .iter()
            .map(|m| Self::count_message(model, m))
            .sum()
    }

    /// Count a wire-format chat message (used by pre-call checks on raw
    /// message lists that have no owning thread).
    pub fn count_chat_message(model: &str, message: &Message) -> usize {
        MESSAGE_OVERHEAD + Self::count_content(model, message.content())
    }

    pub fn count_chat_messages(model: &str, messages: &[Message]) -> usize {
        messages
            .iter()
            .map(|m| Self::count_chat_message(model, m))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::LedgerMessage;

    #[test]
    fn test_count_text_scales_with_length() {
        let short = TokenCounter::count_text("gpt-4o", "hi");
        let long = TokenCounter::count_text("gpt-4o", &"word ".repeat(200));
        assert!(short < long);
        assert!(long >= 200);
    }

    #[test]
    fn test_count_message_includes_overhead() {
        let msg = LedgerMessage::user("hello");
        let content_only = TokenCounter::count_text("gpt-4o", "hello");
        assert_eq!(
            TokenCounter::count_message("gpt-4o", &msg),
            content_only + MESSAGE_OVERHEAD
        );
    }

    #[test]
    fn test_count_thread_sums_messages() {
        let messages = vec![
            LedgerMessage::user("one"),
            LedgerMessage::assistant("two"),
            LedgerMessage::user("three"),
        ];
        let total: usize = messages
            .iter()
            .map(|m| TokenCounter::count_message("gpt-4o", m))
            .sum();
        assert_eq!(TokenCounter::count_thread("gpt-4o", &messages), total);
    }

    #[test]
    fn test_image_parts_have_flat_cost() {
        let images = vec![quill_llm::ImageSource::Url {
            url: "https://example.com/a.png".to_string(),
        }];
        let msg = LedgerMessage::user_with_content(Content::text_with_images("look", &images));
        let text_tokens = TokenCounter::count_text("gpt-4o", "look");
        assert_eq!(
            TokenCounter::count_message("gpt-4o", &msg),
            MESSAGE_OVERHEAD + text_tokens + IMAGE_TOKEN_COST
        );
    }

    #[test]
    fn test_counting_is_deterministic() {
        let msg = LedgerMessage::user("same input, same count");
        assert_eq!(
            TokenCounter::count_message("gpt-4o", &msg),
            TokenCounter::count_message("gpt-4o", &msg)
        );
    }
}
