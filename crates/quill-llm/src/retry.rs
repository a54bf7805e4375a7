use std::time::Duration;

/// Exponential backoff schedule: base, 2x, 4x, ...
///
/// Waits go through `tokio::time::sleep`, so a retrying call suspends its task
/// instead of pinning a worker thread.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max_attempts: u32,
}

impl Backoff {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self { base, max_attempts }
    }

    /// Classifier default: 3 retries at 1s/2s/4s.
    pub fn classification() -> Self {
        Self::new(Duration::from_secs(1), 3)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base * 2u32.saturating_pow(attempt)
    }

    /// Suspend until retry `attempt` should run.
    pub async fn wait(&self, attempt: u32) {
        tokio::time::sleep(self.delay(attempt)).await;
    }
}
