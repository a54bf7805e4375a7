use crate::error::LlmError;
use std::future::Future;
use std::time::Duration;

/// Deadlines per call class.
///
/// Classification expects a one-word answer and gets a short budget; content
/// generation gets a long one. `stream_chunk` is the allowed gap between
/// consecutive stream events, not an end-to-end limit.
#[derive(Debug, Clone)]
pub struct CallTimeouts {
    pub chat: Duration,
    pub classify: Duration,
    pub image: Duration,
    pub vision: Duration,
    pub stream_chunk: Duration,
}

impl Default for CallTimeouts {
    fn default() -> Self {
        Self {
            chat: Duration::from_secs(90),
            classify: Duration::from_secs(10),
            image: Duration::from_secs(120),
            vision: Duration::from_secs(60),
            stream_chunk: Duration::from_secs(30),
        }
    }
}

impl CallTimeouts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chat(mut self, timeout: Duration) -> Self {
        self.chat = timeout;
        self
    }

    pub fn with_classify(mut self, timeout: Duration) -> Self {
        self.classify = timeout;
        self
    }
}

/// Bound a call with a deadline, mapping elapsed time to `LlmError::Timeout`.
///
/// The underlying network call is abandoned, not cancelled: the connection may
/// keep running inside the HTTP stack until it completes or errors on its own.
pub async fn with_timeout<T, F>(duration: Duration, fut: F) -> Result<T, LlmError>
where
    F: Future<Output = Result<T, LlmError>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(LlmError::Timeout {
            seconds: duration.as_secs(),
        }),
    }
}
