use crate::message::{
    self, LedgerMessage, Role, IMAGE_ANALYSIS_MARKER, SUMMARIZED_MARKER, VISION_CONTEXT_MARKER,
};
use crate::prompts::SUMMARIZATION_INSTRUCTION;
use crate::thread::ThreadState;
use crate::tokens::TokenCounter;
use anyhow::Result;
use quill_llm::{CallTimeouts, ChatClient, ChatOptions, ChatRequest, Message};
use std::sync::Arc;

/// Model used for document summarization; cheaper than the conversation
/// model and good enough for compression.
const SUMMARY_MODEL: &str = "gpt-4o-mini";

/// Messages that must survive trimming.
///
/// Images and vision results cannot be rebuilt from text after the fact, so
/// they are kept outright; already-summarized documents are kept because they
/// are the compressed form. The content-marker scans cover history rebuilt
/// from platforms where no structured metadata survives.
pub fn should_preserve(message: &LedgerMessage) -> bool {
    if matches!(message.role, Role::System | Role::Developer) {
        return true;
    }

    if let Some(kind) = message.metadata.kind {
        if kind.is_preserved() {
            return true;
        }
    }

    if message.metadata.summarized {
        return true;
    }

    let text = message.text();
    if message::contains_image_url(&text) {
        return true;
    }
    if text.contains(SUMMARIZED_MARKER)
        || text.contains(IMAGE_ANALYSIS_MARKER)
        || text.contains(VISION_CONTEXT_MARKER)
    {
        return true;
    }

    false
}

/// Result of one trim pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrimOutcome {
    pub summarized: usize,
    pub removed: usize,
}

impl TrimOutcome {
    pub fn changed(&self) -> bool {
        self.summarized > 0 || self.removed > 0
    }
}

/// Context-window trimming with in-place document summarization.
#[derive(Clone)]
pub struct TrimEngine {
    chat_client: Arc<dyn ChatClient>,
    timeouts: CallTimeouts,
}

impl TrimEngine {
    pub fn new(chat_client: Arc<dyn ChatClient>, timeouts: CallTimeouts) -> Self {
        Self {
            chat_client,
            timeouts,
        }
    }

    /// One smart-trim pass over the oldest `trim_batch` non-preserved
    /// messages.
    ///
    /// Documents are summarized in place first; if any were, the pass stops
    /// there so the caller re-measures before anything is evicted (the fresh
    /// summaries are preserved and must not be touched again). Only a pass
    /// that found no documents to summarize removes messages.
    pub async fn smart_trim_pass(
        &self,
        state: &mut ThreadState,
        trim_batch: usize,
    ) -> Result<TrimOutcome> {
        let window: Vec<usize> = state
            .messages()
            .iter()
            .enumerate()
            .filter(|(_, m)| !should_preserve(m))
            .map(|(i, _)| i)
            .take(trim_batch)
            .collect();

        if window.is_empty() {
            return Ok(TrimOutcome::default());
        }

        // First pass: summarize unsummarized documents in place.
        let mut summarized = 0;
        for &idx in &window {
            if !message::is_unsummarized_document(&state.messages()[idx]) {
                continue;
            }

            let original = state.messages()[idx].text();
            let filename = message::document_filename(&original)
                .unwrap_or_else(|| "document".to_string());
            let (mime_type, total_pages) = match state.documents.find(&filename) {
                Some(entry) => (entry.mime_type.clone(), entry.total_pages),
                None => ("text/plain".to_string(), None),
            };

            let summary = self.summarize_document(&original).await?;
            let block = message::format_summarized_block(
                &filename,
                total_pages,
                &mime_type,
                &summary,
                original.len(),
                summary.len(),
            );

            let msg = state.message_mut(idx);
            let summarized_length = block.len();
            msg.content = block.into();
            msg.metadata.summarized = true;
            msg.metadata.original_length = Some(original.len());
            msg.metadata.summarized_length = Some(summarized_length);

            if let Some(entry) = state.documents.find_mut(&filename) {
                entry.summary = Some(summary);
            }

            summarized += 1;
            tracing::info!(
                "Summarized document '{}' in thread {} ({} -> {} chars)",
                filename,
                state.key,
                original.len(),
                summarized_length
            );
        }

        if summarized > 0 {
            return Ok(TrimOutcome {
                summarized,
                removed: 0,
            });
        }

        // Second pass: evict what is still not preserved, newest index first
        // so earlier removals don't shift later ones.
        let mut removed = 0;
        for &idx in window.iter().rev() {
            if should_preserve(&state.messages()[idx]) {
                continue;
            }
            state.remove_message(idx);
            removed += 1;
        }

        if removed > 0 {
            state.mark_trimmed();
        }

        Ok(TrimOutcome {
            summarized: 0,
            removed,
        })
    }

    /// Trim until the thread fits `budget` tokens for `model`, or until a
    /// pass changes nothing (then warn and proceed over budget; a degraded
    /// request beats no request).
    pub async fn trim_to_budget(
        &self,
        state: &mut ThreadState,
        model: &str,
        budget: usize,
        trim_batch: usize,
    ) -> Result<()> {
        loop {
            let current = TokenCounter::count_thread(model, state.messages());
            if current <= budget {
                return Ok(());
            }

            let outcome = self.smart_trim_pass(state, trim_batch).await?;
            if !outcome.changed() {
                tracing::warn!(
                    "Thread {} still at {} tokens (budget {}), nothing left to trim",
                    state.key,
                    current,
                    budget
                );
                return Ok(());
            }
        }
    }

    /// Pre-request check: make room so existing messages plus the new one fit
    /// the model's limit. Runs before every outbound text/vision/classify
    /// call that uses thread state.
    pub async fn ensure_request_fits(
        &self,
        state: &mut ThreadState,
        new_message: &LedgerMessage,
        model: &str,
        limit: usize,
        trim_batch: usize,
    ) -> Result<()> {
        let new_tokens = TokenCounter::count_message(model, new_message);
        let budget = limit.saturating_sub(new_tokens);
        self.trim_to_budget(state, model, budget, trim_batch).await
    }

    async fn summarize_document(&self, document_text: &str) -> Result<String> {
        let request = ChatRequest::new(
            SUMMARY_MODEL,
            vec![
                Message::system(SUMMARIZATION_INSTRUCTION),
                Message::human(document_text),
            ],
        )
        .with_options(
            ChatOptions::new()
                .temperature(0.3)
                .timeout(self.timeouts.chat),
        );

        let response = self.chat_client.chat(request).await?;
        response
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("summarization returned no content"))
    }
}

/// Fallback for raw message lists with no owning thread (e.g. the
/// classification conversation): pop oldest non-system messages until the
/// list fits the limit.
pub fn fit_messages_within_limit(messages: &mut Vec<Message>, model: &str, limit: usize) {
    while TokenCounter::count_chat_messages(model, messages) > limit {
        let victim = messages
            .iter()
            .position(|m| !matches!(m, Message::System { .. } | Message::Developer { .. }));
        match victim {
            Some(idx) => {
                messages.remove(idx);
            }
            None => {
                tracing::warn!("Message list over {} tokens with only system messages left", limit);
                break;
            }
        }
    }
}
