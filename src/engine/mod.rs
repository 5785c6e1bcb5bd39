//! engine
//!
//! The workspace and its mutation protocol.
//!
//! # Architecture
//!
//! [`Workspace`] owns the element trees, the lock manager and the
//! collaborators (filesystem adapter, stores, move/delete hook). Every
//! public mutation follows one template:
//!
//! 1. **Validate** arguments. Pure, no lock taken.
//! 2. **Rule**: compute the [`SchedulingRule`] covering every touched path.
//! 3. **Prepare**: acquire the rule and the workspace lock, then check
//!    structural preconditions against the working tree.
//! 4. **Begin**, then do the byte-level work inside an unprotected window,
//!    offering delete and move to the [`MoveDeleteHook`] first.
//! 5. **Bookkeeping**: link descriptions, aliases, phantoms.
//! 6. **End**: the outermost operation commits (or, when cancelled before
//!    any disk effect, discards) its scope and queues one notification.
//!
//! # Errors
//!
//! Every operation returns [`WorkspaceError`]. Validation and precondition
//! failures happen before any tree edit; partial failures carry a
//! multi-status listing exactly the targets that failed; cancellation is
//! reported on its own and never folded into a status.
//!
//! # Example
//!
//! ```
//! use canopy::core::flags::UpdateFlags;
//! use canopy::core::progress::Progress;
//! use canopy::core::resource::Resource;
//! use canopy::engine::Workspace;
//!
//! let ws = Workspace::in_memory().unwrap();
//! let progress = Progress::new();
//! let project = ws.create_project("p", None, &progress).unwrap();
//! let file = Resource::file("/p/a.txt").unwrap();
//! ws.create_file(&file, b"hello", &progress).unwrap();
//! assert!(ws.exists(&file));
//!
//! ws.delete(&[file.clone()], UpdateFlags::NONE, &progress).unwrap();
//! assert!(!ws.exists(&file));
//! assert!(ws.exists(&project));
//! ```
//!
//! [`SchedulingRule`]: crate::core::rule::SchedulingRule

pub mod alias;
pub mod attributes;
pub mod copy;
pub mod create;
pub mod delete;
pub mod delta;
pub mod hooks;
pub mod link;
pub mod move_cmd;
pub mod notify;
pub mod operation;
pub mod refresh;
pub mod sync;
pub mod touch;
pub mod validate;
pub mod workspace;

pub use alias::AliasManager;
pub use delta::{DeltaEntry, DeltaKind, ResourceDelta};
pub use hooks::{DefaultHook, HookOutcome, MoveDeleteHook, ResourceTree};
pub use notify::{ListenerId, ResourceChangeEvent, ResourceChangeListener};
pub use workspace::{Workspace, WorkspaceBuilder};

use thiserror::Error;

use crate::core::config::ConfigError;
use crate::core::ops::{LockError, WorkspaceLockError};
use crate::core::path::ResourcePath;
use crate::core::status::{Status, StatusCode};

/// Errors surfaced by workspace operations.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// Malformed request, rejected before any lock was taken.
    #[error("invalid request: {0}")]
    Validation(Status),

    /// The tree does not allow the request. Nothing was edited.
    #[error("precondition failed: {0}")]
    Precondition(Status),

    /// Some targets failed. The tree reflects exactly the others.
    #[error("operation failed: {0}")]
    Failed(Status),

    #[error("operation cancelled")]
    Cancelled,

    /// Fatal lock misuse, such as a nested rule widening scope.
    #[error(transparent)]
    Lock(LockError),

    /// A call that is never legal where it was made.
    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    WorkspaceLock(#[from] WorkspaceLockError),
}

impl WorkspaceError {
    pub(crate) fn validation(
        code: StatusCode,
        path: Option<&ResourcePath>,
        message: impl Into<String>,
    ) -> Self {
        WorkspaceError::Validation(Status::error(code, path.cloned(), message))
    }

    pub(crate) fn precondition(
        code: StatusCode,
        path: Option<&ResourcePath>,
        message: impl Into<String>,
    ) -> Self {
        WorkspaceError::Precondition(Status::error(code, path.cloned(), message))
    }

    /// The structured status behind this error.
    pub fn status(&self) -> Status {
        match self {
            WorkspaceError::Validation(s)
            | WorkspaceError::Precondition(s)
            | WorkspaceError::Failed(s) => s.clone(),
            WorkspaceError::Cancelled => Status::cancelled(),
            other => Status::error(StatusCode::OperationFailed, None, other.to_string()),
        }
    }

    /// Whether the status (or any child) carries `code`.
    pub fn has_code(&self, code: StatusCode) -> bool {
        self.status().has_code(code)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, WorkspaceError::Cancelled)
    }
}

impl From<LockError> for WorkspaceError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Cancelled(_) => WorkspaceError::Cancelled,
            LockError::IllegalState(message) => WorkspaceError::IllegalState(message),
            other => WorkspaceError::Lock(other),
        }
    }
}

/// Turn an accumulated multi-status into the operation's result.
pub(crate) fn into_result(status: Status) -> Result<(), WorkspaceError> {
    if status.is_ok() {
        Ok(())
    } else {
        Err(WorkspaceError::Failed(status))
    }
}
