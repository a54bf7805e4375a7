pub mod intent;
pub mod message;
pub mod processor;
pub mod prompts;
pub mod response;
pub mod thread;
pub mod tokens;
pub mod trim;

pub use intent::{Intent, IntentClassifier};
pub use message::{LedgerMessage, MessageKind, MessageMetadata, Role};
pub use processor::MessageProcessor;
pub use response::{Response, ResponseKind};
pub use thread::{
    AssetEntry, AssetLedger, DocumentEntry, DocumentLedger, ManagerStats, ThreadGuard, ThreadState,
    ThreadStateManager,
};
pub use tokens::TokenCounter;
pub use trim::{should_preserve, TrimEngine, TrimOutcome};
