//! Session storage for replicated sessions.
//!
//! Provides:
//! - `SessionStore` - Process-local session map with expiry
//! - `RecoverySnapshot` - Single-file persistence for development restarts
//! - `Sweeper` - Cancellable recurring expiry sweep

pub mod storage;
pub mod sweeper;

pub use storage::{RecoverySnapshot, SessionStore, SnapshotEntry, SnapshotError};
pub use sweeper::Sweeper;
