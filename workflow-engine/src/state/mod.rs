//! Per-task workflow state persistence

pub mod lock;
pub mod store;

pub use lock::FileLock;
pub use store::{
    StateDocument, StateStore, DEFAULT_LOCK_TIMEOUT, DEFAULT_STALE_LOCK_AFTER, PENDING_WORKFLOW_KEY,
};
