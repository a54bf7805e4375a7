pub mod error;
pub mod models;
pub mod sqlite;
pub mod trait_client;

pub use error::PersistError;
pub use models::{CachedMessage, ImageRecord};
pub use sqlite::SqliteStore;
pub use trait_client::PersistenceClient;
