use crate::intent::{Intent, IntentClassifier};
use crate::message::{self, LedgerMessage, MessageKind, Role};
use crate::prompts;
use crate::response::Response;
use crate::thread::{AssetEntry, DocumentEntry, ThreadGuard, ThreadState, ThreadStateManager};
use crate::tokens::TokenCounter;
use crate::trim::{fit_messages_within_limit, TrimEngine};
use anyhow::{anyhow, Result};
use base64::Engine as _;
use futures::StreamExt;
use quill_channels::{ChannelClient, IncomingMessage};
use quill_llm::{
    CallTimeouts, ChatClient, ChatOptions, ChatRequest, ImageEditRequest, ImageRequest,
    ImageSource, LlmClient, Message, StreamEvent, VisionRequest,
};
use quill_persist::{CachedMessage, ImageRecord, PersistenceClient};
use quill_types::{model_token_limit, ThreadConfig, ThreadKey};
use std::sync::Arc;
use std::time::Duration;

/// How many ledger messages feed classification and prompt enhancement.
const RECENT_CONTEXT: usize = 10;

/// Mime types we can ingest as documents without an extraction service.
const TEXT_DOCUMENT_MIMES: &[&str] = &[
    "text/",
    "application/json",
    "application/xml",
    "application/x-yaml",
];

/// Orchestrates one inbound message end to end: lock, state, attachments,
/// intent, dispatch, ledger updates. The thread lock is an RAII guard, so it
/// is released on every exit path including panics.
pub struct MessageProcessor {
    llm: Arc<dyn LlmClient>,
    persist: Arc<dyn PersistenceClient>,
    manager: Arc<ThreadStateManager>,
    trim: TrimEngine,
    classifier: IntentClassifier,
    defaults: ThreadConfig,
    timeouts: CallTimeouts,
}

/// What attachment extraction produced for the current message.
#[derive(Default)]
struct Extraction {
    images: Vec<ImageSource>,
    uploaded_images: usize,
    uploaded_documents: usize,
}

impl MessageProcessor {
    pub fn new<C>(
        llm: Arc<C>,
        persist: Arc<dyn PersistenceClient>,
        manager: Arc<ThreadStateManager>,
        defaults: ThreadConfig,
    ) -> Self
    where
        C: LlmClient + 'static,
    {
        Self::with_timeouts(llm, persist, manager, defaults, CallTimeouts::default())
    }

    pub fn with_timeouts<C>(
        llm: Arc<C>,
        persist: Arc<dyn PersistenceClient>,
        manager: Arc<ThreadStateManager>,
        defaults: ThreadConfig,
        timeouts: CallTimeouts,
    ) -> Self
    where
        C: LlmClient + 'static,
    {
        let chat: Arc<dyn ChatClient> = llm.clone();
        Self {
            trim: TrimEngine::new(Arc::clone(&chat), timeouts.clone()),
            classifier: IntentClassifier::new(chat, timeouts.clone()),
            llm,
            persist,
            manager,
            defaults,
            timeouts,
        }
    }

    pub fn manager(&self) -> &Arc<ThreadStateManager> {
        &self.manager
    }

    /// Process one inbound message. Never panics the caller and never leaves
    /// the thread locked: Busy is returned immediately on contention, every
    /// other path runs under the guard and releases it by dropping it.
    pub async fn process(
        &self,
        message: IncomingMessage,
        channel: Arc<dyn ChannelClient>,
    ) -> Response {
        let key = ThreadKey::new(&message.channel_id, &message.thread_id);

        let Some(mut state) = self.manager.try_acquire(&key, Duration::ZERO).await else {
            tracing::info!("Thread {} is busy, rejecting concurrent request", key);
            return Response::busy();
        };

        let thinking_ts = match channel
            .send_thinking_indicator(&message.channel_id, &message.thread_id)
            .await
        {
            Ok(ts) => Some(ts),
            Err(e) => {
                tracing::warn!("Failed to send thinking indicator: {}", e);
                None
            }
        };

        let response = self
            .process_locked(&mut state, &message, channel.as_ref())
            .await;
        state.touch();

        if let Some(ts) = thinking_ts {
            if let Err(e) = channel.delete_message(&message.channel_id, &ts).await {
                tracing::debug!("Failed to clear thinking indicator: {}", e);
            }
        }

        let cleanup = self.cleanup_plan(&state);
        drop(state);

        if let Some((model, budget, trim_batch)) = cleanup {
            self.spawn_background_trim(key, model, budget, trim_batch);
        }

        response
    }

    async fn process_locked(
        &self,
        state: &mut ThreadGuard,
        message: &IncomingMessage,
        channel: &dyn ChannelClient,
    ) -> Response {
        // Per-thread overrides; losing them is not worth failing the request
        match self.persist.get_config_overrides(&state.key).await {
            Ok(overrides) => state.config_overrides = overrides,
            Err(e) => {
                tracing::warn!("Failed to load config overrides for {}: {}", state.key, e)
            }
        }
        let config = self.defaults.merged(&state.config_overrides);
        if state.current_model != config.model {
            // Model can change mid-thread via overrides
            state.set_model(&config.model);
        }

        self.maybe_rebuild(state, message, channel).await;

        let extraction = self.extract_attachments(state, message, channel).await;
        if extraction.uploaded_images > 0 || extraction.uploaded_documents > 0 {
            tracing::debug!(
                "Extracted {} image(s) and {} document(s) for {}",
                extraction.uploaded_images,
                extraction.uploaded_documents,
                state.key
            );
        }
        let has_images = !extraction.images.is_empty();

        let recent = recent_context(state, RECENT_CONTEXT);
        let intent = self
            .classifier
            .classify(&recent, &message.text, has_images)
            .await;
        let intent = IntentClassifier::resolve_with_attachments(intent, has_images);
        tracing::info!("Thread {} intent: {:?}", state.key, intent);

        let newly_trimmed_before = state.has_trimmed_messages;

        let response = match intent {
            Intent::Error => Response::error(
                "I couldn't work out what you were asking for just now - please try again.",
            ),
            Intent::AmbiguousImage => self.handle_ambiguous(state, message),
            Intent::NewImage => self.handle_new_image(state, &config, message).await,
            Intent::EditImage => {
                self.handle_edit_image(state, &config, message, &extraction, channel)
                    .await
            }
            Intent::Vision => {
                self.handle_vision(state, &config, message, &extraction, channel)
                    .await
            }
            Intent::TextOnly => self.handle_text(state, &config, message, channel).await,
        };

        // Disclose trimming the first time it happens
        if !newly_trimmed_before
            && state.has_trimmed_messages
            && response.kind == crate::response::ResponseKind::Text
        {
            let mut disclosed = response;
            disclosed.text = format!("{}\n\n{}", disclosed.text, prompts::TRIMMED_DISCLOSURE);
            return disclosed;
        }

        response
    }

    // ------------------------------------------------------------------
    // Dispatch branches. Each converts its own failures into an error
    // Response; nothing propagates out of a branch.
    // ------------------------------------------------------------------

    fn handle_ambiguous(&self, state: &mut ThreadState, message: &IncomingMessage) -> Response {
        let user_msg = LedgerMessage::user(message.text.clone());
        let reply = LedgerMessage::assistant(prompts::AMBIGUOUS_CLARIFICATION);
        self.append(state, user_msg);
        self.append(state, reply);
        Response::text(prompts::AMBIGUOUS_CLARIFICATION)
    }

    async fn handle_text(
        &self,
        state: &mut ThreadState,
        config: &ThreadConfig,
        message: &IncomingMessage,
        channel: &dyn ChannelClient,
    ) -> Response {
        match self.text_completion(state, config, message, channel).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Text completion failed for {}: {}", state.key, e);
                Response::error(format!("Sorry, I couldn't respond: {}", e))
            }
        }
    }

    async fn text_completion(
        &self,
        state: &mut ThreadState,
        config: &ThreadConfig,
        message: &IncomingMessage,
        channel: &dyn ChannelClient,
    ) -> Result<Response> {
        let model = state.current_model.clone();
        let limit = model_token_limit(&model);
        let user_msg = LedgerMessage::user(message.text.clone());

        // Trim failures degrade to an over-budget request, never a failed one
        if let Err(e) = self
            .trim
            .ensure_request_fits(state, &user_msg, &model, limit, config.trim_batch_size)
            .await
        {
            tracing::warn!("Pre-request trim failed for {}: {}", state.key, e);
        }

        let platform = channel.name().to_string();
        let prompt_override = config.system_prompt.clone();
        let system_prompt = state
            .resolved_system_prompt(|| {
                prompt_override
                    .unwrap_or_else(|| prompts::default_system_prompt(&platform).to_string())
            })
            .to_string();

        self.append(state, user_msg);

        let mut chat_messages = vec![Message::system(system_prompt)];
        chat_messages.extend(state.messages().iter().map(|m| m.to_chat_message()));

        let request = ChatRequest::new(model, chat_messages).with_options(
            ChatOptions::new()
                .temperature(config.temperature)
                .max_tokens(config.max_response_tokens)
                .timeout(self.timeouts.chat),
        );

        // The user-facing reply is streamed; the client enforces a per-chunk
        // gap deadline, so a stalled stream errors instead of holding the
        // thread lock indefinitely.
        let mut stream = self.llm.chat_stream(request).await?;
        let mut text = String::new();
        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::Message { content } => text.push_str(&content),
                StreamEvent::Done { .. } => break,
            }
        }

        if text.is_empty() {
            return Err(anyhow!("model returned no content"));
        }

        self.append(state, LedgerMessage::assistant(text.clone()));
        Ok(Response::text(text))
    }

    async fn handle_new_image(
        &self,
        state: &mut ThreadState,
        config: &ThreadConfig,
        message: &IncomingMessage,
    ) -> Response {
        match self.generate_new_image(state, config, message).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Image generation failed for {}: {}", state.key, e);
                Response::error(format!("Sorry, I couldn't generate that image: {}", e))
            }
        }
    }

    async fn generate_new_image(
        &self,
        state: &mut ThreadState,
        config: &ThreadConfig,
        message: &IncomingMessage,
    ) -> Result<Response> {
        let enhanced = self
            .enhance_image_prompt(state, &message.text)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("Prompt enhancement failed, using raw text: {}", e);
                message.text.clone()
            });

        let request = ImageRequest::new(enhanced.clone())
            .with_size(config.image_size.clone())
            .with_quality(config.image_quality.clone())
            .with_history(recent_context(state, RECENT_CONTEXT));

        let image = self.llm.generate_image(request).await?;

        self.append(state, LedgerMessage::user(message.text.clone()));
        self.append(
            state,
            LedgerMessage::assistant(format!("{} {}", message::GENERATED_IMAGE_PREFIX, enhanced))
                .with_kind(MessageKind::ImageGeneration)
                .with_prompt(enhanced.clone()),
        );
        state
            .assets
            .push(AssetEntry::new(image.base64_data.clone(), enhanced.clone()));
        self.record_image(
            &state.key,
            ImageRecord::new(format!("generated:{}", message.ts), "generation")
                .with_prompt(enhanced.clone())
                .with_message_ts(message.ts.clone()),
        );

        let caption = format!("{} {}", message::GENERATED_IMAGE_PREFIX, enhanced);
        Ok(Response::image(image, caption))
    }

    async fn handle_edit_image(
        &self,
        state: &mut ThreadState,
        config: &ThreadConfig,
        message: &IncomingMessage,
        extraction: &Extraction,
        channel: &dyn ChannelClient,
    ) -> Response {
        let result = if extraction.images.is_empty() {
            self.edit_prior_image(state, config, message, channel).await
        } else {
            self.edit_attached_images(state, config, message, &extraction.images)
                .await
        };

        match result {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Image edit failed for {}: {}", state.key, e);
                Response::error(format!("Sorry, I couldn't edit that image: {}", e))
            }
        }
    }

    /// Edit path with uploaded images: describe them first so the edit model
    /// knows what it is changing; if vision fails, edit with the raw request.
    async fn edit_attached_images(
        &self,
        state: &mut ThreadState,
        config: &ThreadConfig,
        message: &IncomingMessage,
        images: &[ImageSource],
    ) -> Result<Response> {
        let description = match self
            .llm
            .analyze_images(
                VisionRequest::new(images.to_vec(), prompts::VISION_DEFAULT_QUESTION)
                    .with_history(recent_context(state, RECENT_CONTEXT)),
            )
            .await
        {
            Ok(d) => Some(d),
            Err(e) => {
                tracing::warn!("Vision analysis failed before edit, using raw request: {}", e);
                None
            }
        };

        let prompt = match &description {
            Some(d) => self
                .enhance_edit_prompt(state, d, &message.text)
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!("Edit prompt enhancement failed: {}", e);
                    message.text.clone()
                }),
            None => message.text.clone(),
        };

        let mut request = ImageEditRequest::new(images.to_vec(), prompt.clone())
            .with_size(config.image_size.clone());
        if let Some(d) = description {
            request = request.with_description(d);
        }

        let image = self.llm.edit_image(request).await?;
        self.finish_edit(state, message, prompt, image)
    }

    /// Edit path with no upload: find the most recent image this thread
    /// produced. With bytes we do a true edit; with only a textual record
    /// (post-restart) we regenerate from the combined prompt instead.
    async fn edit_prior_image(
        &self,
        state: &mut ThreadState,
        config: &ThreadConfig,
        message: &IncomingMessage,
        channel: &dyn ChannelClient,
    ) -> Result<Response> {
        let prior = state.assets.most_recent().cloned();

        match prior {
            Some(entry) if entry.has_bytes() => {
                let source = ImageSource::Base64 {
                    data: entry.base64_or_url.clone(),
                    mime_type: "image/png".to_string(),
                };
                let prompt = self
                    .enhance_edit_prompt(state, &entry.prompt, &message.text)
                    .await
                    .unwrap_or_else(|_| format!("{} - {}", entry.prompt, message.text));

                let request = ImageEditRequest::new(vec![source], prompt.clone())
                    .with_size(config.image_size.clone())
                    .with_description(entry.prompt.clone());
                let image = self.llm.edit_image(request).await?;
                self.finish_edit(state, message, prompt, image)
            }
            Some(entry) => {
                // URL-only record: try to refetch the bytes for a true edit
                match channel.download_file(&entry.base64_or_url, "prior-image").await {
                    Ok(bytes) => {
                        let source = ImageSource::Base64 {
                            data: base64::engine::general_purpose::STANDARD.encode(bytes),
                            mime_type: "image/png".to_string(),
                        };
                        let prompt = self
                            .enhance_edit_prompt(state, &entry.prompt, &message.text)
                            .await
                            .unwrap_or_else(|_| format!("{} - {}", entry.prompt, message.text));
                        let request = ImageEditRequest::new(vec![source], prompt.clone())
                            .with_size(config.image_size.clone());
                        let image = self.llm.edit_image(request).await?;
                        self.finish_edit(state, message, prompt, image)
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Could not refetch prior image, regenerating from text: {}",
                            e
                        );
                        self.regenerate_from_record(state, config, message, &entry.prompt)
                            .await
                    }
                }
            }
            None => match last_image_breadcrumb(state) {
                Some(prior_prompt) => {
                    self.regenerate_from_record(state, config, message, &prior_prompt)
                        .await
                }
                None => {
                    // Nothing known about a prior image; generate fresh
                    self.generate_new_image(state, config, message).await
                }
            },
        }
    }

    /// Post-restart approximation: no pixels survive, so re-express the edit
    /// as a generation conditioned on the prior image's textual record.
    async fn regenerate_from_record(
        &self,
        state: &mut ThreadState,
        config: &ThreadConfig,
        message: &IncomingMessage,
        prior_prompt: &str,
    ) -> Result<Response> {
        let combined = format!(
            "Previous image: {}. Requested change: {}",
            prior_prompt, message.text
        );
        let prompt = self
            .enhance_image_prompt(state, &combined)
            .await
            .unwrap_or(combined);

        let request = ImageRequest::new(prompt.clone())
            .with_size(config.image_size.clone())
            .with_quality(config.image_quality.clone());
        let image = self.llm.generate_image(request).await?;

        self.append(state, LedgerMessage::user(message.text.clone()));
        self.append(
            state,
            LedgerMessage::assistant(format!("{} {}", message::GENERATED_IMAGE_PREFIX, prompt))
                .with_kind(MessageKind::ImageGeneration)
                .with_prompt(prompt.clone()),
        );
        state
            .assets
            .push(AssetEntry::new(image.base64_data.clone(), prompt.clone()));
        self.record_image(
            &state.key,
            ImageRecord::new(format!("generated:{}", message.ts), "generation")
                .with_prompt(prompt.clone())
                .with_message_ts(message.ts.clone()),
        );

        let caption = format!("{} {}", message::GENERATED_IMAGE_PREFIX, prompt);
        Ok(Response::image(image, caption))
    }

    fn finish_edit(
        &self,
        state: &mut ThreadState,
        message: &IncomingMessage,
        prompt: String,
        image: quill_llm::ImageData,
    ) -> Result<Response> {
        self.append(state, LedgerMessage::user(message.text.clone()));
        self.append(
            state,
            LedgerMessage::assistant(format!("{} {}", message::EDITED_IMAGE_PREFIX, prompt))
                .with_kind(MessageKind::ImageEdit)
                .with_prompt(prompt.clone()),
        );
        state
            .assets
            .push(AssetEntry::new(image.base64_data.clone(), prompt.clone()));
        self.record_image(
            &state.key,
            ImageRecord::new(format!("edited:{}", message.ts), "edit")
                .with_prompt(prompt.clone())
                .with_message_ts(message.ts.clone()),
        );

        let caption = format!("{} {}", message::EDITED_IMAGE_PREFIX, prompt);
        Ok(Response::image(image, caption))
    }

    async fn handle_vision(
        &self,
        state: &mut ThreadState,
        config: &ThreadConfig,
        message: &IncomingMessage,
        extraction: &Extraction,
        channel: &dyn ChannelClient,
    ) -> Response {
        if extraction.images.is_empty() {
            // Vision with nothing attached degrades to plain text
            return self.handle_text(state, config, message, channel).await;
        }

        match self
            .vision_analysis(state, config, message, &extraction.images)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Vision analysis failed for {}: {}", state.key, e);
                Response::error(format!("Sorry, I couldn't analyze that image: {}", e))
            }
        }
    }

    async fn vision_analysis(
        &self,
        state: &mut ThreadState,
        config: &ThreadConfig,
        message: &IncomingMessage,
        images: &[ImageSource],
    ) -> Result<Response> {
        let question = if message.text.trim().is_empty() {
            prompts::VISION_DEFAULT_QUESTION.to_string()
        } else {
            message.text.clone()
        };

        // Vision rides the chat endpoint; keep the request inside the window
        let model = state.current_model.clone();
        let limit = model_token_limit(&model);
        let probe = LedgerMessage::user(question.clone());
        if let Err(e) = self
            .trim
            .ensure_request_fits(state, &probe, &model, limit, config.trim_batch_size)
            .await
        {
            tracing::warn!("Pre-request trim failed for {}: {}", state.key, e);
        }

        let analysis = self
            .llm
            .analyze_images(
                VisionRequest::new(images.to_vec(), question.clone())
                    .with_history(recent_context(state, RECENT_CONTEXT)),
            )
            .await?;

        self.append(state, LedgerMessage::user(message.text.clone()));
        self.append(
            state,
            LedgerMessage::assistant(analysis.clone()).with_kind(MessageKind::VisionAnalysis),
        );

        Ok(Response::text(analysis))
    }

    // ------------------------------------------------------------------
    // Attachments
    // ------------------------------------------------------------------

    async fn extract_attachments(
        &self,
        state: &mut ThreadState,
        message: &IncomingMessage,
        channel: &dyn ChannelClient,
    ) -> Extraction {
        let mut extraction = Extraction::default();

        for url in &message.url_images {
            extraction.images.push(ImageSource::Url { url: url.clone() });
        }

        for attachment in &message.attachments {
            if attachment.mime_type.starts_with("image/") {
                match channel.download_file(&attachment.url, &attachment.file_id).await {
                    Ok(bytes) => {
                        let data = base64::engine::general_purpose::STANDARD.encode(bytes);
                        extraction.images.push(ImageSource::Base64 {
                            data: data.clone(),
                            mime_type: attachment.mime_type.clone(),
                        });
                        state.assets.push(AssetEntry::new(data, message.text.clone()));
                        self.record_image(
                            &state.key,
                            ImageRecord::new(attachment.url.clone(), "upload")
                                .with_message_ts(message.ts.clone()),
                        );
                        extraction.uploaded_images += 1;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to download {}: {}", attachment.filename, e);
                        self.send_status(
                            channel,
                            message,
                            &format!("Couldn't read attachment '{}', skipping it.", attachment.filename),
                        )
                        .await;
                    }
                }
            } else if is_text_document(&attachment.mime_type) {
                match self.ingest_document(state, message, channel, attachment).await {
                    Ok(()) => extraction.uploaded_documents += 1,
                    Err(e) => {
                        tracing::warn!("Failed to ingest {}: {}", attachment.filename, e);
                        self.send_status(
                            channel,
                            message,
                            &format!("Couldn't read document '{}', skipping it.", attachment.filename),
                        )
                        .await;
                    }
                }
            } else {
                tracing::info!(
                    "Unsupported attachment type {} ({})",
                    attachment.mime_type,
                    attachment.filename
                );
                self.send_status(
                    channel,
                    message,
                    &format!(
                        "Attachment '{}' has an unsupported type and was skipped.",
                        attachment.filename
                    ),
                )
                .await;
            }
        }

        if extraction.uploaded_images > 0 {
            self.append(
                state,
                LedgerMessage::user(format!("[Uploaded {} file(s)]", extraction.uploaded_images))
                    .with_kind(MessageKind::ImageUpload),
            );
        }

        extraction
    }

    async fn ingest_document(
        &self,
        state: &mut ThreadState,
        message: &IncomingMessage,
        channel: &dyn ChannelClient,
        attachment: &quill_channels::Attachment,
    ) -> Result<()> {
        let bytes = channel
            .download_file(&attachment.url, &attachment.file_id)
            .await?;
        let content = String::from_utf8(bytes)
            .map_err(|_| anyhow!("document is not valid UTF-8 text"))?;

        state.documents.push(DocumentEntry::new(
            &attachment.filename,
            &attachment.mime_type,
            content.clone(),
        ));
        self.append(
            state,
            LedgerMessage::user(message::format_document_block(&attachment.filename, &content))
                .with_kind(MessageKind::DocumentUpload),
        );

        tracing::info!(
            "Ingested document '{}' ({} chars) into thread {}",
            attachment.filename,
            content.len(),
            state.key
        );
        Ok(())
    }

    async fn send_status(
        &self,
        channel: &dyn ChannelClient,
        message: &IncomingMessage,
        text: &str,
    ) {
        if let Err(e) = channel
            .send_message(&message.channel_id, &message.thread_id, text)
            .await
        {
            tracing::warn!("Failed to send status update: {}", e);
        }
    }

    // ------------------------------------------------------------------
    // Rebuild after restart
    // ------------------------------------------------------------------

    async fn maybe_rebuild(
        &self,
        state: &mut ThreadState,
        message: &IncomingMessage,
        channel: &dyn ChannelClient,
    ) {
        let needs_rebuild = if state.is_empty() {
            true
        } else {
            // Ledger and persisted image records disagreeing means the
            // in-memory state is stale
            match self.persist.find_thread_images(&state.key).await {
                Ok(records) => records.len() > state.assets.len(),
                Err(_) => false,
            }
        };

        if !needs_rebuild {
            return;
        }

        state.clear_messages();
        if let Err(e) = self.rebuild_thread_state(state, message, channel).await {
            tracing::warn!(
                "History rebuild for {} failed, continuing with partial state: {}",
                state.key,
                e
            );
        }
    }

    async fn rebuild_thread_state(
        &self,
        state: &mut ThreadState,
        current: &IncomingMessage,
        channel: &dyn ChannelClient,
    ) -> Result<()> {
        let history = channel
            .get_thread_history(&current.channel_id, &current.thread_id)
            .await?;

        if history.is_empty() {
            // No platform history (CLI, or expired thread): restore the cache
            let cached = self.persist.get_cached_messages(&state.key).await?;
            for entry in cached {
                let Some(role) = Role::parse(&entry.role) else {
                    continue;
                };
                let mut msg = LedgerMessage::new(role, entry.content);
                if let Some(json) = &entry.metadata_json {
                    if let Ok(meta) = serde_json::from_str(json) {
                        msg.metadata = meta;
                    }
                }
                state.push(msg);
            }
        } else {
            // Uploads awaiting their follow-up analysis message
            let mut pending_images = 0usize;

            for entry in history {
                // The message being processed right now must not be duplicated
                if entry.ts == current.ts {
                    continue;
                }
                if !entry.is_bot && is_bot_command(&entry.text) {
                    continue;
                }
                if entry.is_bot && is_status_text(&entry.text) {
                    // A busy/error reply is not a vision analysis; drop the
                    // association rather than mis-attribute it
                    pending_images = 0;
                    continue;
                }

                if entry.is_bot {
                    let mut msg = LedgerMessage::assistant(entry.text.clone());
                    if pending_images > 0 {
                        msg = msg.with_kind(MessageKind::VisionAnalysis);
                        pending_images = 0;
                    }
                    state.push(msg);
                    continue;
                }

                let image_attachments: Vec<_> = entry
                    .attachments
                    .iter()
                    .filter(|a| a.mime_type.starts_with("image/"))
                    .collect();

                if image_attachments.is_empty() {
                    pending_images = 0;
                    state.push(LedgerMessage::user(entry.text.clone()));
                    continue;
                }

                for attachment in &image_attachments {
                    match channel
                        .download_file(&attachment.url, &attachment.file_id)
                        .await
                    {
                        Ok(bytes) => {
                            let data = base64::engine::general_purpose::STANDARD.encode(bytes);
                            state.assets.push(AssetEntry::new(data, entry.text.clone()));
                        }
                        Err(e) => {
                            tracing::warn!(
                                "Could not re-download {} during rebuild: {}",
                                attachment.filename,
                                e
                            );
                            state.assets.push(AssetEntry::new(
                                attachment.url.clone(),
                                entry.text.clone(),
                            ));
                        }
                    }
                }

                pending_images = image_attachments.len();
                state.push(
                    LedgerMessage::user(format!(
                        "[Uploaded {} file(s)]",
                        image_attachments.len()
                    ))
                    .with_kind(MessageKind::ImageUpload),
                );
                if !entry.text.trim().is_empty() {
                    state.push(LedgerMessage::user(entry.text.clone()));
                }
            }
        }

        // Re-seed the asset ledger from persisted records when the platform
        // gave us nothing to work with
        if state.assets.is_empty() {
            if let Ok(records) = self.persist.find_thread_images(&state.key).await {
                for record in records {
                    state
                        .assets
                        .push(AssetEntry::new(record.url, record.prompt.unwrap_or_default()));
                }
            }
        }

        tracing::info!(
            "Rebuilt thread {}: {} messages, {} images",
            state.key,
            state.messages().len(),
            state.assets.len()
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Prompt enhancement
    // ------------------------------------------------------------------

    async fn enhance_image_prompt(
        &self,
        state: &ThreadState,
        user_text: &str,
    ) -> Result<String> {
        self.enhance(state, prompts::IMAGE_PROMPT_INSTRUCTION, user_text.to_string())
            .await
    }

    async fn enhance_edit_prompt(
        &self,
        state: &ThreadState,
        image_description: &str,
        user_text: &str,
    ) -> Result<String> {
        let combined = format!(
            "Original image: {}\nRequested change: {}",
            image_description, user_text
        );
        self.enhance(state, prompts::EDIT_PROMPT_INSTRUCTION, combined).await
    }

    async fn enhance(
        &self,
        state: &ThreadState,
        instruction: &str,
        input: String,
    ) -> Result<String> {
        let model = if state.current_model.is_empty() {
            self.defaults.model.clone()
        } else {
            state.current_model.clone()
        };

        let mut messages = vec![Message::system(instruction)];
        messages.extend(recent_context(state, RECENT_CONTEXT));
        messages.push(Message::human(input.clone()));
        fit_messages_within_limit(&mut messages, &model, model_token_limit(&model));

        let request = ChatRequest::new(model, messages).with_options(
            ChatOptions::new()
                .temperature(0.7)
                .max_tokens(300)
                .timeout(self.timeouts.chat),
        );

        let response = self.llm.chat(request).await?;
        Ok(response
            .content
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(input))
    }

    // ------------------------------------------------------------------
    // Bookkeeping
    // ------------------------------------------------------------------

    /// Append to the ledger and cache the message in the background;
    /// persistence failures are logged and never fail the request.
    fn append(&self, state: &mut ThreadState, msg: LedgerMessage) {
        let persist = Arc::clone(&self.persist);
        let key = state.key.clone();
        let mut cached = CachedMessage::new(msg.role.as_str(), msg.text());
        if msg.metadata != crate::message::MessageMetadata::default() {
            if let Ok(json) = serde_json::to_string(&msg.metadata) {
                cached = cached.with_metadata_json(json);
            }
        }

        state.push(msg);

        tokio::spawn(async move {
            if let Err(e) = persist.cache_message(&key, cached).await {
                tracing::error!("Failed to cache message for {}: {}", key, e);
            }
        });
    }

    fn record_image(&self, key: &ThreadKey, record: ImageRecord) {
        let persist = Arc::clone(&self.persist);
        let key = key.clone();
        tokio::spawn(async move {
            if let Err(e) = persist.save_image_metadata(&key, record).await {
                tracing::error!("Failed to save image metadata for {}: {}", key, e);
            }
        });
    }

    /// Decide whether this thread needs a background trim so the next
    /// request starts under budget.
    fn cleanup_plan(&self, state: &ThreadState) -> Option<(String, usize, usize)> {
        let config = self.defaults.merged(&state.config_overrides);
        let model = if state.current_model.is_empty() {
            config.model.clone()
        } else {
            state.current_model.clone()
        };
        let limit = model_token_limit(&model);
        let used = TokenCounter::count_thread(&model, state.messages());
        let threshold = (config.cleanup_threshold * limit as f32) as usize;

        if used <= threshold {
            return None;
        }
        Some((model, threshold, config.trim_batch_size))
    }

    fn spawn_background_trim(
        &self,
        key: ThreadKey,
        model: String,
        budget: usize,
        trim_batch: usize,
    ) {
        let manager = Arc::clone(&self.manager);
        let trim = self.trim.clone();

        tokio::spawn(async move {
            // Fail fast on contention; the next request will trim instead
            let Some(mut state) = manager.try_acquire(&key, Duration::ZERO).await else {
                return;
            };
            if let Err(e) = trim
                .trim_to_budget(&mut state, &model, budget, trim_batch)
                .await
            {
                tracing::error!("Background trim for {} failed: {}", key, e);
            }
        });
    }
}

// ----------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------

fn recent_context(state: &ThreadState, n: usize) -> Vec<Message> {
    let messages = state.messages();
    let start = messages.len().saturating_sub(n);
    messages[start..].iter().map(|m| m.to_chat_message()).collect()
}

fn is_text_document(mime_type: &str) -> bool {
    TEXT_DOCUMENT_MIMES
        .iter()
        .any(|prefix| mime_type.starts_with(prefix))
}

fn is_bot_command(text: &str) -> bool {
    let trimmed = text.trim_start();
    trimmed.starts_with('/') || trimmed.starts_with('!')
}

/// Bot status/error texts that must not be replayed into the ledger.
fn is_status_text(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed == prompts::BUSY_MESSAGE
        || trimmed == "..."
        || trimmed.starts_with("Sorry, I couldn't")
        || trimmed.starts_with("Error:")
        || trimmed.starts_with("[image saved to")
}

/// Scan the ledger backwards for the last image-producing breadcrumb and
/// recover its prompt.
fn last_image_breadcrumb(state: &ThreadState) -> Option<String> {
    for msg in state.messages().iter().rev() {
        if let Some(prompt) = &msg.metadata.prompt {
            if matches!(
                msg.metadata.kind,
                Some(MessageKind::ImageGeneration) | Some(MessageKind::ImageEdit)
            ) {
                return Some(prompt.clone());
            }
        }

        let text = msg.text();
        for prefix in [message::GENERATED_IMAGE_PREFIX, message::EDITED_IMAGE_PREFIX] {
            if let Some(rest) = text.strip_prefix(prefix) {
                let rest = rest.trim();
                if !rest.is_empty() {
                    return Some(rest.to_string());
                }
            }
        }
    }
    None
}
