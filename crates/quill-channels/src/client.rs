use crate::message::HistoryMessage;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Download failed for {file_id}: {reason}")]
    Download { file_id: String, reason: String },

    #[error("Platform error: {0}")]
    Platform(String),
}

pub type Result<T> = std::result::Result<T, ChannelError>;

/// Outbound side of a chat platform.
///
/// The processor talks to the platform only through this trait; Slack, Discord
/// and the CLI all sit behind it.
#[async_trait]
pub trait ChannelClient: Send + Sync {
    /// Platform identifier, used to select the system prompt
    fn name(&self) -> &str;

    async fn send_message(&self, channel_id: &str, thread_id: &str, text: &str) -> Result<String>;

    /// Post an image (base64 payload) with a caption; returns the platform url
    async fn send_image(
        &self,
        channel_id: &str,
        thread_id: &str,
        base64_data: &str,
        caption: &str,
    ) -> Result<String>;

    async fn update_message(&self, channel_id: &str, ts: &str, text: &str) -> Result<()>;

    async fn delete_message(&self, channel_id: &str, ts: &str) -> Result<()>;

    /// Transient "working on it" indicator; returns its ts so it can be
    /// deleted or updated once the real response lands
    async fn send_thinking_indicator(&self, channel_id: &str, thread_id: &str) -> Result<String>;

    async fn download_file(&self, url: &str, file_id: &str) -> Result<Vec<u8>>;

    /// Full thread history as the platform sees it, oldest first
    async fn get_thread_history(
        &self,
        channel_id: &str,
        thread_id: &str,
    ) -> Result<Vec<HistoryMessage>>;

    /// Apply platform-specific text formatting
    fn format_text(&self, text: &str) -> String {
        text.to_string()
    }
}
