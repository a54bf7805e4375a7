mod common;

use common::MockLlm;
use quill_core::{Intent, IntentClassifier};
use quill_llm::{CallTimeouts, ChatClient, LlmError, Message};
use std::sync::Arc;

fn classifier(llm: Arc<MockLlm>) -> IntentClassifier {
    let chat: Arc<dyn ChatClient> = llm;
    IntentClassifier::new(chat, CallTimeouts::default())
}

fn timeout() -> LlmError {
    LlmError::Timeout { seconds: 10 }
}

#[tokio::test]
async fn test_valid_tokens_map_to_intents() {
    for (token, expected) in [
        ("new", Intent::NewImage),
        ("edit", Intent::EditImage),
        ("vision", Intent::Vision),
        ("ambiguous", Intent::AmbiguousImage),
        ("none", Intent::TextOnly),
    ] {
        let llm = MockLlm::scripted(vec![Ok(token.to_string())]);
        let classifier = classifier(Arc::clone(&llm));

        let intent = classifier.classify(&[], "draw me something", false).await;
        assert_eq!(intent, expected, "token {}", token);
    }
}

#[tokio::test]
async fn test_verbose_output_coerces_to_text_only() {
    // The model answered with a sentence instead of a single token
    let llm = MockLlm::scripted(vec![Ok(
        "The user appears to want a new image generated".to_string(),
    )]);
    let classifier = classifier(llm);

    let intent = classifier.classify(&[], "draw a cat", false).await;
    assert_eq!(intent, Intent::TextOnly);
}

#[tokio::test]
async fn test_overlong_single_token_coerces_to_text_only() {
    let llm = MockLlm::scripted(vec![Ok("image-generation-request-detected".to_string())]);
    let classifier = classifier(llm);

    let intent = classifier.classify(&[], "draw a cat", false).await;
    assert_eq!(intent, Intent::TextOnly);
}

#[tokio::test]
async fn test_unknown_token_falls_back_to_text_only() {
    let llm = MockLlm::scripted(vec![Ok("banana".to_string())]);
    let classifier = classifier(llm);

    let intent = classifier.classify(&[], "hello", false).await;
    assert_eq!(intent, Intent::TextOnly);
}

#[tokio::test]
async fn test_case_and_whitespace_normalized() {
    let llm = MockLlm::scripted(vec![Ok("  EDIT ".to_string())]);
    let classifier = classifier(llm);

    let intent = classifier.classify(&[], "make it blue", false).await;
    assert_eq!(intent, Intent::EditImage);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_retries_then_returns_error_intent() {
    // Every attempt times out: initial call plus three retries
    let llm = MockLlm::scripted(vec![
        Err(timeout()),
        Err(timeout()),
        Err(timeout()),
        Err(timeout()),
    ]);
    let classifier = classifier(Arc::clone(&llm));

    let intent = classifier.classify(&[], "draw a cat", false).await;

    // Exhausted retries surface as Error, never as a silent text fallback
    assert_eq!(intent, Intent::Error);
    assert_eq!(llm.chat_call_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_then_success_recovers() {
    let llm = MockLlm::scripted(vec![Err(timeout()), Ok("new".to_string())]);
    let classifier = classifier(Arc::clone(&llm));

    let intent = classifier.classify(&[], "draw a cat", false).await;
    assert_eq!(intent, Intent::NewImage);
    assert_eq!(llm.chat_call_count(), 2);
}

#[tokio::test]
async fn test_non_timeout_error_fails_immediately_without_retry() {
    let llm = MockLlm::scripted(vec![Err(LlmError::Api {
        status: 500,
        message: "server error".to_string(),
    })]);
    let classifier = classifier(Arc::clone(&llm));

    let intent = classifier.classify(&[], "draw a cat", false).await;
    assert_eq!(intent, Intent::Error);
    // No retries for hard failures
    assert_eq!(llm.chat_call_count(), 1);
}

#[tokio::test]
async fn test_classification_request_shape() {
    let llm = MockLlm::scripted(vec![Ok("none".to_string())]);
    let classifier = classifier(Arc::clone(&llm));

    let recent = vec![
        Message::human("earlier question"),
        Message::ai("earlier answer"),
    ];
    classifier.classify(&recent, "and another thing", true).await;

    let requests = llm.chat_requests.lock().unwrap();
    let request = &requests[0];

    // Deterministic settings, single-token budget
    assert_eq!(request.options.temperature, Some(0.0));
    assert_eq!(request.options.max_tokens, Some(10));
    assert!(request.options.timeout.is_some());

    // instruction + history + annotated user message + final instruction
    assert_eq!(request.messages.len(), 5);
    let user_turn = &request.messages[3];
    let text = user_turn.content().as_text().unwrap();
    assert!(text.contains("and another thing"));
    assert!(text.contains("attached image"));
}

#[tokio::test]
async fn test_attachment_annotation_absent_without_images() {
    let llm = MockLlm::scripted(vec![Ok("none".to_string())]);
    let classifier = classifier(Arc::clone(&llm));

    classifier.classify(&[], "plain question", false).await;

    let requests = llm.chat_requests.lock().unwrap();
    let user_turn = &requests[0].messages[1];
    assert_eq!(user_turn.content().as_text(), Some("plain question"));
}
