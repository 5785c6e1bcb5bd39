//! core::ops
//!
//! Locking for workspace operations.
//!
//! # Modules
//!
//! - [`work`] - In-process lock manager (scheduling rules, workspace lock)
//! - [`lock`] - Cross-process exclusive lock on the workspace directory

pub mod lock;
pub mod work;

pub use lock::{WorkspaceLock, WorkspaceLockError};
pub use work::{FrameExit, LockError, LockManager, OpId, OpPhase, Prepared};
