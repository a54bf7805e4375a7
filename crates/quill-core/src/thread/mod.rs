pub mod manager;
pub mod state;

pub use manager::{ManagerStats, ThreadGuard, ThreadStateManager};
pub use state::{AssetEntry, AssetLedger, DocumentEntry, DocumentLedger, ThreadState};
