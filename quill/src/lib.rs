//! # Quill - chat-bot orchestrator for Rust
//!
//! Quill mediates between chat surfaces (Slack, Discord, CLI) and an LLM
//! backend, adding:
//! - **Conversational memory** (per-thread message ledgers that survive restarts)
//! - **Context-window management** (token accounting, summarize-before-evict trimming)
//! - **Intent classification** (text / new image / edit image / vision routing)
//! - **Image generation and editing** with conversation-aware prompts
//! - **One in-flight request per thread** (fail-fast busy signalling, no queues)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use quill::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let llm = Arc::new(OpenAiClient::new("sk-...")?);
//!     let persist: Arc<dyn PersistenceClient> = Arc::new(SqliteStore::open("quill.db")?);
//!     let manager = Arc::new(ThreadStateManager::new());
//!
//!     let processor = MessageProcessor::new(
//!         llm,
//!         persist,
//!         manager,
//!         ThreadConfig::default(),
//!     );
//!
//!     let channel: Arc<dyn ChannelClient> = Arc::new(CliChannel::new("images"));
//!     let message = IncomingMessage::new("cli", "session-0", "draw a cat", "1");
//!     let response = processor.process(message, channel).await;
//!     println!("{}", response.text);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! Quill consists of several composable crates:
//!
//! - **quill-types**: Shared value types (thread keys, immutable configs)
//! - **quill-llm**: LLM backend clients (chat, images, vision, timeouts)
//! - **quill-persist**: SQLite persistence (message cache, image metadata)
//! - **quill-channels**: Platform adapters (channel trait, CLI channel)
//! - **quill-core**: Thread state, trimming engine, intent classifier, processor

pub use quill_channels as channels;
pub use quill_core as core;
pub use quill_llm as llm;
pub use quill_persist as persist;
pub use quill_types as types;

/// Commonly used types, importable in one line.
pub mod prelude {
    pub use quill_channels::{Attachment, ChannelClient, CliChannel, IncomingMessage};
    pub use quill_core::{
        Intent, IntentClassifier, LedgerMessage, MessageProcessor, Response, ResponseKind,
        ThreadState, ThreadStateManager, TokenCounter, TrimEngine,
    };
    pub use quill_llm::{
        ChatClient, ChatOptions, ChatRequest, ImageClient, LlmClient, Message, OpenAiClient,
        VisionClient,
    };
    pub use quill_persist::{PersistenceClient, SqliteStore};
    pub use quill_types::{ConfigOverrides, ThreadConfig, ThreadKey};
}
