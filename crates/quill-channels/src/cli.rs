use crate::client::{ChannelClient, ChannelError, Result};
use crate::message::HistoryMessage;
use async_trait::async_trait;
use base64::Engine;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

/// Terminal channel: responses go to stdout, generated images to disk.
///
/// `download_file` treats the url as a local filesystem path, which is how CLI
/// users attach files. History is always empty; a fresh process is a fresh
/// conversation.
pub struct CliChannel {
    image_dir: PathBuf,
    counter: AtomicU64,
}

impl CliChannel {
    pub fn new(image_dir: impl Into<PathBuf>) -> Self {
        Self {
            image_dir: image_dir.into(),
            counter: AtomicU64::new(0),
        }
    }

    fn next_ts(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("cli-{}", n)
    }
}

#[async_trait]
impl ChannelClient for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn send_message(&self, _channel_id: &str, _thread_id: &str, text: &str) -> Result<String> {
        println!("{}", text);
        Ok(self.next_ts())
    }

    async fn send_image(
        &self,
        _channel_id: &str,
        _thread_id: &str,
        base64_data: &str,
        caption: &str,
    ) -> Result<String> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(base64_data)
            .map_err(|e| ChannelError::Platform(format!("invalid image payload: {}", e)))?;

        tokio::fs::create_dir_all(&self.image_dir).await?;
        let ts = self.next_ts();
        let path = self.image_dir.join(format!("{}.png", ts));
        tokio::fs::write(&path, bytes).await?;

        println!("{}", caption);
        println!("[image saved to {}]", path.display());
        Ok(ts)
    }

    async fn update_message(&self, _channel_id: &str, _ts: &str, text: &str) -> Result<()> {
        println!("{}", text);
        Ok(())
    }

    async fn delete_message(&self, _channel_id: &str, _ts: &str) -> Result<()> {
        Ok(())
    }

    async fn send_thinking_indicator(&self, _channel_id: &str, _thread_id: &str) -> Result<String> {
        println!("...");
        Ok(self.next_ts())
    }

    async fn download_file(&self, url: &str, file_id: &str) -> Result<Vec<u8>> {
        tokio::fs::read(url).await.map_err(|e| ChannelError::Download {
            file_id: file_id.to_string(),
            reason: e.to_string(),
        })
    }

    async fn get_thread_history(
        &self,
        _channel_id: &str,
        _thread_id: &str,
    ) -> Result<Vec<HistoryMessage>> {
        Ok(Vec::new())
    }
}
