use crate::error::Result;
use crate::models::{CachedMessage, ImageRecord};
use async_trait::async_trait;
use quill_types::{ConfigOverrides, ThreadKey};

/// Trait for per-thread persistence operations
///
/// All operations are scoped by the rendered thread key and are called only
/// from that thread's single lock holder, so implementations need no
/// cross-thread ordering beyond their own internal consistency.
#[async_trait]
pub trait PersistenceClient: Send + Sync {
    /// Append a message to the thread's cache
    async fn cache_message(&self, key: &ThreadKey, message: CachedMessage) -> Result<()>;

    /// Get all cached messages for a thread, oldest first
    async fn get_cached_messages(&self, key: &ThreadKey) -> Result<Vec<CachedMessage>>;

    /// Drop the thread's cached messages
    async fn clear_thread_messages(&self, key: &ThreadKey) -> Result<()>;

    /// Image metadata rows for a thread, oldest first
    async fn find_thread_images(&self, key: &ThreadKey) -> Result<Vec<ImageRecord>>;

    /// Record a generated/uploaded image
    async fn save_image_metadata(&self, key: &ThreadKey, record: ImageRecord) -> Result<()>;

    /// Per-thread config overrides (empty when none stored)
    async fn get_config_overrides(&self, key: &ThreadKey) -> Result<ConfigOverrides>;

    /// Set one override option, keeping the others
    async fn set_config_override(&self, key: &ThreadKey, option: &str, value: &str) -> Result<()>;
}
