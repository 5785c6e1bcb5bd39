//! engine::hooks
//!
//! The pluggable move/delete hook.
//!
//! # Architecture
//!
//! Delete and move offer each target to the workspace's [`MoveDeleteHook`]
//! inside an unprotected window. The hook either services the request
//! itself and answers [`HookOutcome::Handled`], or answers
//! [`HookOutcome::Fallback`] and the standard implementation runs.
//!
//! A hook that handles a request reports through the [`ResourceTree`] it is
//! given: `deleted` / `moved` record tree edits for disk work the hook did
//! itself, `standard_delete` / `standard_move` run the built-in algorithm
//! for part of the request, and `failed` adds a status. Everything lands in
//! one status accumulator per target.
//!
//! # Invariants
//!
//! - A `ResourceTree` borrows the dispatch that created it; every call
//!   made outside an operation fails with `IllegalState`
//! - The hook runs without the workspace lock, so it may call other
//!   workspace operations on subtrees the current rule covers

use std::sync::{Mutex, PoisonError};

use log::{debug, trace};

use super::{Workspace, WorkspaceError};
use crate::core::flags::{Depth, UpdateFlags};
use crate::core::progress::Progress;
use crate::core::resource::Resource;
use crate::core::status::{Status, StatusCode};

/// A hook's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    /// The hook serviced the request and reported through the tree.
    Handled,
    /// Run the standard implementation.
    Fallback,
}

/// Strategy offered every delete and move before the standard algorithm.
pub trait MoveDeleteHook: Send + Sync {
    fn delete(
        &self,
        tree: &ResourceTree<'_>,
        resource: &Resource,
        flags: UpdateFlags,
        progress: &Progress,
    ) -> HookOutcome {
        let _ = (tree, resource, flags, progress);
        HookOutcome::Fallback
    }

    fn move_resource(
        &self,
        tree: &ResourceTree<'_>,
        source: &Resource,
        destination: &Resource,
        flags: UpdateFlags,
        progress: &Progress,
    ) -> HookOutcome {
        let _ = (tree, source, destination, flags, progress);
        HookOutcome::Fallback
    }
}

/// The hook that always falls back.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHook;

impl MoveDeleteHook for DefaultHook {}

/// The view of the workspace a hook reports through.
pub struct ResourceTree<'a> {
    ws: &'a Workspace,
    status: Mutex<Status>,
}

impl<'a> ResourceTree<'a> {
    fn new(ws: &'a Workspace, status: Status) -> Self {
        Self {
            ws,
            status: Mutex::new(status),
        }
    }

    fn check(&self) -> Result<(), WorkspaceError> {
        if !self.ws.inner.locks.in_operation() {
            return Err(WorkspaceError::IllegalState(
                "resource tree used outside its operation".into(),
            ));
        }
        Ok(())
    }

    fn add(&self, status: Status) {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .merge(status);
    }

    /// Run the standard delete for `resource`.
    pub fn standard_delete(
        &self,
        resource: &Resource,
        flags: UpdateFlags,
        progress: &Progress,
    ) -> Result<(), WorkspaceError> {
        self.check()?;
        self.add(self.ws.standard_delete(resource, flags, progress));
        Ok(())
    }

    /// Run the standard move of `source` to `destination`.
    pub fn standard_move(
        &self,
        source: &Resource,
        destination: &Resource,
        flags: UpdateFlags,
        progress: &Progress,
    ) -> Result<(), WorkspaceError> {
        self.check()?;
        self.add(self.ws.standard_move(source, destination, flags, progress));
        Ok(())
    }

    /// Record that the hook removed `resource` from disk.
    pub fn deleted(&self, resource: &Resource) -> Result<(), WorkspaceError> {
        self.check()?;
        self.add(self.ws.forget_deleted(resource, UpdateFlags::NONE));
        Ok(())
    }

    /// Record that the hook moved `source` to `destination` on disk.
    pub fn moved(&self, source: &Resource, destination: &Resource) -> Result<(), WorkspaceError> {
        self.check()?;
        self.add(self.ws.record_move(source, destination));
        Ok(())
    }

    /// Add a failure to the request's status.
    pub fn failed(&self, status: Status) -> Result<(), WorkspaceError> {
        self.check()?;
        self.add(status);
        Ok(())
    }

    /// Whether `resource` and its members down to `depth` match the disk.
    pub fn is_synchronized(&self, resource: &Resource, depth: Depth) -> Result<bool, WorkspaceError> {
        self.check()?;
        let probes = self
            .ws
            .read_tree(|t| self.ws.sync_probes(t, resource.path(), depth));
        Ok(self.ws.unsynchronized(&probes).is_empty())
    }

    /// The workspace the request runs in.
    pub fn workspace(&self) -> &Workspace {
        self.ws
    }

    fn finish(self) -> Status {
        self.status
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Workspace {
    /// Offer a delete to the hook, falling back to the standard delete.
    ///
    /// Runs inside an unprotected window.
    pub(crate) fn dispatch_delete(&self, resource: &Resource, flags: UpdateFlags, progress: &Progress) -> Status {
        let tree = ResourceTree::new(
            self,
            Status::multi(StatusCode::FailedDeleteLocal, format!("problems deleting {resource}")),
        );
        match self.inner.hook.delete(&tree, resource, flags, progress) {
            HookOutcome::Handled => debug!("hook handled delete of {resource}"),
            HookOutcome::Fallback => {
                trace!("standard delete of {resource}");
                tree.add(self.standard_delete(resource, flags, progress));
            }
        }
        tree.finish()
    }

    /// Offer a move to the hook, falling back to the standard move.
    pub(crate) fn dispatch_move(
        &self,
        source: &Resource,
        destination: &Resource,
        flags: UpdateFlags,
        progress: &Progress,
    ) -> Status {
        let tree = ResourceTree::new(
            self,
            Status::multi(StatusCode::FailedWriteLocal, format!("problems moving {source}")),
        );
        match self
            .inner
            .hook
            .move_resource(&tree, source, destination, flags, progress)
        {
            HookOutcome::Handled => debug!("hook handled move of {source} to {destination}"),
            HookOutcome::Fallback => {
                trace!("standard move of {source} to {destination}");
                tree.add(self.standard_move(source, destination, flags, progress));
            }
        }
        tree.finish()
    }
}
