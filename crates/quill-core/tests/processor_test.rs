mod common;

use common::{MockChannel, MockLlm};
use quill_channels::{Attachment, ChannelClient, IncomingMessage};
use quill_core::{
    MessageKind, MessageProcessor, ResponseKind, Role, ThreadStateManager,
};
use quill_llm::LlmError;
use quill_persist::{PersistenceClient, SqliteStore};
use quill_types::{ThreadConfig, ThreadKey};
use std::sync::Arc;
use std::time::Duration;

fn setup(llm: Arc<MockLlm>) -> (MessageProcessor, Arc<ThreadStateManager>) {
    let manager = Arc::new(ThreadStateManager::new());
    let persist: Arc<dyn PersistenceClient> = Arc::new(SqliteStore::open_in_memory().unwrap());
    let processor = MessageProcessor::new(
        llm,
        persist,
        Arc::clone(&manager),
        ThreadConfig::default(),
    );
    (processor, manager)
}

fn message(text: &str, ts: &str) -> IncomingMessage {
    IncomingMessage::new("C1", "T1", text, ts)
}

fn key() -> ThreadKey {
    ThreadKey::new("C1", "T1")
}

#[tokio::test]
async fn test_new_image_appends_prompt_and_breadcrumb() {
    // classification -> "new", then prompt enhancement
    let llm = MockLlm::scripted(vec![
        Ok("new".to_string()),
        Ok("a fluffy cat sitting on a windowsill".to_string()),
    ]);
    let (processor, manager) = setup(Arc::clone(&llm));
    let channel: Arc<dyn ChannelClient> = Arc::new(MockChannel::new());

    let response = processor.process(message("draw a cat", "1.0"), channel).await;

    assert_eq!(response.kind, ResponseKind::Image);
    assert!(response.image.is_some());
    assert_eq!(llm.image_call_count(), 1);

    let guard = manager.try_acquire(&key(), Duration::ZERO).await.unwrap();
    assert_eq!(guard.messages().len(), 2);
    assert_eq!(guard.messages()[0].role, Role::User);
    assert_eq!(guard.messages()[0].text(), "draw a cat");
    assert_eq!(guard.messages()[1].role, Role::Assistant);
    assert!(guard.messages()[1].text().contains("Generated image:"));
    assert_eq!(
        guard.messages()[1].metadata.kind,
        Some(MessageKind::ImageGeneration)
    );
    assert_eq!(guard.assets.len(), 1);
}

#[tokio::test]
async fn test_attachment_coerces_new_to_edit() {
    // The classifier would say "new"; the attachment forces an edit
    let llm = MockLlm::scripted(vec![
        Ok("new".to_string()),
        Ok("make the sky red over the landscape".to_string()),
    ]);
    let (processor, _manager) = setup(Arc::clone(&llm));
    let channel: Arc<dyn ChannelClient> = Arc::new(
        MockChannel::new().with_file("https://files.example/sky.png", vec![137, 80, 78, 71]),
    );

    let msg = message("make the sky red", "1.0").with_attachment(Attachment::new(
        "F1",
        "sky.png",
        "image/png",
        "https://files.example/sky.png",
    ));

    let response = processor.process(msg, channel).await;

    assert_eq!(response.kind, ResponseKind::Image);
    assert_eq!(llm.edit_call_count(), 1);
    assert_eq!(llm.image_call_count(), 0);
}

#[tokio::test]
async fn test_text_with_attachment_coerces_to_vision() {
    let llm = MockLlm::scripted(vec![Ok("none".to_string())]);
    let (processor, manager) = setup(Arc::clone(&llm));
    let channel: Arc<dyn ChannelClient> = Arc::new(
        MockChannel::new().with_file("https://files.example/chart.png", vec![1, 2, 3]),
    );

    let msg = message("what does this show?", "1.0").with_attachment(Attachment::new(
        "F1",
        "chart.png",
        "image/png",
        "https://files.example/chart.png",
    ));

    let response = processor.process(msg, channel).await;

    assert_eq!(response.kind, ResponseKind::Text);
    assert_eq!(response.text, "an image of a landscape");
    assert_eq!(llm.vision_requests.lock().unwrap().len(), 1);

    let guard = manager.try_acquire(&key(), Duration::ZERO).await.unwrap();
    let kinds: Vec<_> = guard.messages().iter().map(|m| m.metadata.kind).collect();
    assert!(kinds.contains(&Some(MessageKind::ImageUpload)));
    assert!(kinds.contains(&Some(MessageKind::VisionAnalysis)));
}

#[tokio::test]
async fn test_busy_thread_rejects_without_mutation() {
    let llm = Arc::new(MockLlm::new());
    let (processor, manager) = setup(llm);
    let channel: Arc<dyn ChannelClient> = Arc::new(MockChannel::new());

    let held = manager.try_acquire(&key(), Duration::ZERO).await.unwrap();

    let response = processor.process(message("hello?", "2.0"), channel).await;
    assert_eq!(response.kind, ResponseKind::Busy);

    drop(held);
    let guard = manager.try_acquire(&key(), Duration::ZERO).await.unwrap();
    assert!(guard.messages().is_empty());
}

#[tokio::test]
async fn test_concurrent_requests_one_proceeds_one_busy() {
    // Slow classification keeps the first request holding the lock while
    // the second arrives
    let llm = Arc::new(
        MockLlm::new()
            .with_chat_script(vec![Ok("none".to_string()), Ok("the answer".to_string())])
            .with_chat_delay(Duration::from_millis(50)),
    );
    let (processor, manager) = setup(llm);
    let processor = Arc::new(processor);
    let channel: Arc<dyn ChannelClient> = Arc::new(MockChannel::new());

    let (a, b) = tokio::join!(
        processor.process(message("first", "1.0"), Arc::clone(&channel)),
        processor.process(message("second", "1.1"), Arc::clone(&channel)),
    );

    let busy_count = [&a, &b]
        .iter()
        .filter(|r| r.kind == ResponseKind::Busy)
        .count();
    assert_eq!(busy_count, 1);

    // Only the winning request touched the ledger
    let guard = manager.try_acquire(&key(), Duration::ZERO).await.unwrap();
    assert_eq!(guard.messages().len(), 2);
}

#[tokio::test]
async fn test_plain_text_conversation() {
    let llm = MockLlm::scripted(vec![
        Ok("none".to_string()),
        Ok("Rust is a systems language.".to_string()),
    ]);
    let (processor, manager) = setup(Arc::clone(&llm));
    let channel: Arc<dyn ChannelClient> = Arc::new(MockChannel::new());

    let response = processor
        .process(message("what is rust?", "1.0"), channel)
        .await;

    assert_eq!(response.kind, ResponseKind::Text);
    assert_eq!(response.text, "Rust is a systems language.");

    let guard = manager.try_acquire(&key(), Duration::ZERO).await.unwrap();
    assert_eq!(guard.messages().len(), 2);
    assert_eq!(guard.messages()[0].text(), "what is rust?");
    assert_eq!(guard.messages()[1].text(), "Rust is a systems language.");
}

#[tokio::test]
async fn test_classification_failure_surfaces_error_not_text() {
    let llm = MockLlm::scripted(vec![Err(LlmError::Api {
        status: 500,
        message: "classifier down".to_string(),
    })]);
    let (processor, manager) = setup(llm);
    let channel: Arc<dyn ChannelClient> = Arc::new(MockChannel::new());

    let response = processor.process(message("draw a cat", "1.0"), channel).await;

    // A failed classification is an explicit error, not silent text chat
    assert_eq!(response.kind, ResponseKind::Error);

    let guard = manager.try_acquire(&key(), Duration::ZERO).await.unwrap();
    assert!(guard.messages().is_empty());
}

#[tokio::test]
async fn test_generation_failure_becomes_error_response() {
    let llm = Arc::new(
        MockLlm::new()
            .with_chat_script(vec![
                Ok("new".to_string()),
                Ok("an enhanced prompt".to_string()),
            ])
            .with_failing_images(),
    );
    let (processor, _manager) = setup(llm);
    let channel: Arc<dyn ChannelClient> = Arc::new(MockChannel::new());

    let response = processor.process(message("draw a cat", "1.0"), channel).await;

    assert_eq!(response.kind, ResponseKind::Error);
    assert!(response.text.contains("couldn't generate"));
}

#[tokio::test]
async fn test_ambiguous_without_attachment_asks_for_clarification() {
    let llm = MockLlm::scripted(vec![Ok("ambiguous".to_string())]);
    let (processor, manager) = setup(llm);
    let channel: Arc<dyn ChannelClient> = Arc::new(MockChannel::new());

    let response = processor
        .process(message("can you do something with an image", "1.0"), channel)
        .await;

    assert_eq!(response.kind, ResponseKind::Text);
    assert!(response.text.contains("generate a new image or edit"));

    let guard = manager.try_acquire(&key(), Duration::ZERO).await.unwrap();
    assert_eq!(guard.messages().len(), 2);
}

#[tokio::test]
async fn test_document_upload_ingested_into_ledger() {
    let llm = MockLlm::scripted(vec![
        Ok("none".to_string()),
        Ok("I read your document.".to_string()),
    ]);
    let (processor, manager) = setup(llm);
    let channel: Arc<dyn ChannelClient> = Arc::new(
        MockChannel::new().with_file(
            "https://files.example/notes.txt",
            b"meeting notes body".to_vec(),
        ),
    );

    let msg = message("summarize my notes", "1.0").with_attachment(Attachment::new(
        "F1",
        "notes.txt",
        "text/plain",
        "https://files.example/notes.txt",
    ));

    let response = processor.process(msg, channel).await;
    assert_eq!(response.kind, ResponseKind::Text);

    let guard = manager.try_acquire(&key(), Duration::ZERO).await.unwrap();
    assert_eq!(guard.documents.len(), 1);
    let doc_msg = guard
        .messages()
        .iter()
        .find(|m| m.metadata.kind == Some(MessageKind::DocumentUpload))
        .expect("document message in ledger");
    assert!(doc_msg.text().starts_with("=== DOCUMENT: notes.txt ==="));
    assert!(doc_msg.text().contains("meeting notes body"));
}

#[tokio::test]
async fn test_unsupported_attachment_skipped_with_status() {
    let llm = MockLlm::scripted(vec![
        Ok("none".to_string()),
        Ok("answered anyway".to_string()),
    ]);
    let (processor, manager) = setup(llm);
    let channel = Arc::new(MockChannel::new());
    let channel_dyn: Arc<dyn ChannelClient> = Arc::clone(&channel) as Arc<dyn ChannelClient>;

    let msg = message("what's in this?", "1.0").with_attachment(Attachment::new(
        "F1",
        "slides.bin",
        "application/octet-stream",
        "https://files.example/slides.bin",
    ));

    let response = processor.process(msg, channel_dyn).await;

    // The message still gets answered; the attachment is reported and skipped
    assert_eq!(response.kind, ResponseKind::Text);
    let sent = channel.sent.lock().unwrap();
    assert!(sent.iter().any(|s| s.contains("unsupported")));

    let guard = manager.try_acquire(&key(), Duration::ZERO).await.unwrap();
    assert!(guard.documents.is_empty());
}

#[tokio::test]
async fn test_edit_without_prior_image_regenerates_from_breadcrumb() {
    let llm = MockLlm::scripted(vec![
        // first request: classification + enhancement
        Ok("new".to_string()),
        Ok("a mountain at dusk".to_string()),
        // second request: classification + enhancement of combined prompt
        Ok("edit".to_string()),
        Ok("a mountain at dusk with snow".to_string()),
    ]);
    let (processor, manager) = setup(Arc::clone(&llm));
    let channel: Arc<dyn ChannelClient> = Arc::new(MockChannel::new());

    let first = processor
        .process(message("draw a mountain", "1.0"), Arc::clone(&channel))
        .await;
    assert_eq!(first.kind, ResponseKind::Image);

    // Drop the asset bytes to simulate a restart that kept only breadcrumbs
    {
        let mut guard = manager.try_acquire(&key(), Duration::ZERO).await.unwrap();
        guard.assets = Default::default();
    }

    let second = processor
        .process(message("add snow to it", "2.0"), Arc::clone(&channel))
        .await;

    assert_eq!(second.kind, ResponseKind::Image);
    // No bytes survived, so the edit was re-expressed as a generation
    assert_eq!(llm.edit_call_count(), 0);
    assert_eq!(llm.image_call_count(), 2);
}

#[tokio::test]
async fn test_edit_with_prior_bytes_does_true_edit() {
    let llm = MockLlm::scripted(vec![
        Ok("new".to_string()),
        Ok("a mountain at dusk".to_string()),
        Ok("edit".to_string()),
        Ok("a mountain at dusk with snow".to_string()),
    ]);
    let (processor, _manager) = setup(Arc::clone(&llm));
    let channel: Arc<dyn ChannelClient> = Arc::new(MockChannel::new());

    processor
        .process(message("draw a mountain", "1.0"), Arc::clone(&channel))
        .await;
    let second = processor
        .process(message("add snow to it", "2.0"), Arc::clone(&channel))
        .await;

    assert_eq!(second.kind, ResponseKind::Image);
    // The generated image's bytes were still in the asset ledger
    assert_eq!(llm.edit_call_count(), 1);
    assert_eq!(llm.image_call_count(), 1);
}
