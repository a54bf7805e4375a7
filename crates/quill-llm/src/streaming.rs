use crate::error::LlmError;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::{Stream, StreamExt};
use reqwest::Response;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Message {
        content: String,
    },

    Done {
        #[serde(skip_serializing_if = "Option::is_none")]
        finish_reason: Option<String>,
    },
}

/// Payload of one `data:` line in a chat completion stream. Only the fields
/// the event mapping needs; everything else is ignored.
#[derive(Debug, Deserialize)]
struct ChunkPayload {
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

impl ChunkPayload {
    fn into_events(self) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if let Some(choice) = self.choices.into_iter().next() {
            if let Some(content) = choice.delta.content {
                if !content.is_empty() {
                    events.push(StreamEvent::Message { content });
                }
            }
            if let Some(finish_reason) = choice.finish_reason {
                events.push(StreamEvent::Done {
                    finish_reason: Some(finish_reason),
                });
            }
        }

        events
    }
}

/// Turn an SSE chat completion response into a stream of events.
///
/// SSE framing is handled by `eventsource-stream`; this layer only maps
/// `data:` payloads (`[DONE]` terminated) onto [`StreamEvent`]s.
pub fn parse_chat_events(
    response: Response,
) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send>> {
    let mut events = response.bytes_stream().eventsource();

    Box::pin(async_stream::stream! {
        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(EventStreamError::Transport(e)) => {
                    yield Err(LlmError::Http(e));
                    break;
                }
                Err(e) => {
                    yield Err(LlmError::InvalidResponse(format!("bad SSE event: {}", e)));
                    break;
                }
            };

            if event.data == "[DONE]" {
                yield Ok(StreamEvent::Done { finish_reason: None });
                break;
            }

            match serde_json::from_str::<ChunkPayload>(&event.data) {
                Ok(chunk) => {
                    for mapped in chunk.into_events() {
                        yield Ok(mapped);
                    }
                }
                Err(e) => {
                    yield Err(LlmError::InvalidResponse(format!(
                        "failed to parse chat chunk: {}",
                        e
                    )));
                }
            }
        }
    })
}

/// Enforce a maximum gap between consecutive stream events.
///
/// The deadline is re-armed on every event, so a slow but steady stream never
/// trips it; a stalled one yields `LlmError::Timeout` and ends.
pub fn with_chunk_timeout(
    inner: Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send>>,
    gap: Duration,
) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send>> {
    Box::pin(async_stream::stream! {
        let mut inner = inner;

        loop {
            match tokio::time::timeout(gap, inner.next()).await {
                Ok(Some(item)) => yield item,
                Ok(None) => break,
                Err(_) => {
                    yield Err(LlmError::Timeout { seconds: gap.as_secs() });
                    break;
                }
            }
        }
    })
}
