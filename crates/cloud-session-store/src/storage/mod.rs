//! Storage implementations.

pub mod memory;
pub mod snapshot;

pub use memory::SessionStore;
pub use snapshot::{RecoverySnapshot, SnapshotEntry, SnapshotError};
