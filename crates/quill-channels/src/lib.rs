pub mod cli;
pub mod client;
pub mod message;

pub use cli::CliChannel;
pub use client::{ChannelClient, ChannelError};
pub use message::{Attachment, HistoryMessage, IncomingMessage};
