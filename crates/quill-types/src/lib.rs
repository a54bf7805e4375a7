pub mod config;
pub mod key;
pub mod limits;

pub use config::{ConfigOverrides, ThreadConfig};
pub use key::ThreadKey;
pub use limits::model_token_limit;
