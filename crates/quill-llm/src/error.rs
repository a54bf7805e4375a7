use thiserror::Error;

/// Errors surfaced by LLM backend calls.
///
/// `Timeout` is its own variant because callers route on it: the intent
/// classifier retries timeouts with backoff but fails immediately on anything
/// else.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM call timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;
