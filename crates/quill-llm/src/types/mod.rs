pub mod content;
pub mod message;

pub use content::{Content, ContentPart, ImageDetail, ImageSource, ImageUrl};
pub use message::Message;
