pub mod client;

pub use client::OpenAiClient;
