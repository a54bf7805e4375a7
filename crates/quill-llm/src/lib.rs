pub mod error;
pub mod openai;
pub mod retry;
pub mod streaming;
pub mod timeout;
pub mod traits;
pub mod types;

pub use error::LlmError;
pub use openai::OpenAiClient;
pub use retry::Backoff;
pub use streaming::{with_chunk_timeout, StreamEvent};
pub use timeout::{with_timeout, CallTimeouts};
pub use traits::{
    ChatClient, ChatOptions, ChatRequest, ChatResponse, ImageClient, ImageData, ImageEditRequest,
    ImageRequest, LlmClient, TokenUsage, VisionClient, VisionRequest,
};
pub use types::{Content, ContentPart, ImageDetail, ImageSource, ImageUrl, Message};
