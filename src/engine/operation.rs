//! engine::operation
//!
//! The operation lifecycle every mutation runs through.
//!
//! # Lifecycle
//!
//! ```text
//! prepare(rule) -> begin -> body [unprotected windows] -> end(rule)
//! ```
//!
//! [`Workspace::execute`] drives one operation. Nested calls on the same
//! thread only adjust depth; the outermost `end` decides, while still
//! holding the workspace lock, whether the working tree's scope is
//! committed or discarded:
//!
//! - cancelled and nothing written to disk: discard (graft committed back
//!   into working), so the tree is exactly as before `prepare`
//! - otherwise: commit the scope, bump the generation, rebuild aliases and
//!   queue one notification for the whole operation
//!
//! # Invariants
//!
//! - `end` runs whenever `prepare` succeeded, whatever the body returned
//! - Cancellation wins over any other outcome when reported to the caller
//! - Filesystem calls happen only inside [`Workspace::unprotected`]

use log::{debug, trace, warn};

use super::delta::ResourceDelta;
use super::notify::ResourceChangeEvent;
use super::workspace::Trees;
use super::{Workspace, WorkspaceError};
use crate::core::ops::FrameExit;
use crate::core::progress::Progress;
use crate::core::rule::SchedulingRule;

impl Workspace {
    /// Run `body` as one operation under `rule`.
    pub(crate) fn execute<T>(
        &self,
        rule: &SchedulingRule,
        progress: &Progress,
        body: impl FnOnce() -> Result<T, WorkspaceError>,
    ) -> Result<T, WorkspaceError> {
        let locks = &self.inner.locks;
        let prepared = locks.prepare(rule, progress)?;
        trace!("operation {} depth {}", prepared.op_id, prepared.depth);

        let outcome = match locks.begin() {
            Ok(()) => body(),
            Err(e) => Err(e.into()),
        };
        if matches!(outcome, Err(WorkspaceError::Cancelled)) {
            locks.mark_cancelled();
        }

        let ended = locks.end_with(rule, |exit| {
            if exit.outermost {
                self.finish_outermost(rule, exit);
            }
        });

        match (outcome, ended) {
            (Err(WorkspaceError::Cancelled), _) => Err(WorkspaceError::Cancelled),
            (Err(e), _) => Err(e),
            (Ok(_), Err(e)) => Err(e.into()),
            (Ok(value), Ok(_)) => Ok(value),
        }
    }

    /// Run `action` as one batched operation.
    ///
    /// Operations `action` starts are nested: they neither commit nor
    /// notify on their own. The batch commits once, with one delta.
    pub fn run<T>(
        &self,
        rule: &SchedulingRule,
        progress: &Progress,
        action: impl FnOnce(&Workspace) -> Result<T, WorkspaceError>,
    ) -> Result<T, WorkspaceError> {
        self.execute(rule, progress, || action(self))
    }

    /// Drop the workspace lock around `f`.
    ///
    /// The rule stays held. Tree edits inside `f` go through
    /// [`Workspace::locked`], which re-takes the lock briefly.
    pub(crate) fn unprotected<T>(&self, f: impl FnOnce() -> T) -> Result<T, WorkspaceError> {
        let locks = &self.inner.locks;
        let depth = locks.begin_unprotected()?;
        let value = f();
        locks.end_unprotected(depth)?;
        Ok(value)
    }

    /// Cancellation point between major steps.
    pub(crate) fn checkpoint(&self, progress: &Progress) -> Result<(), WorkspaceError> {
        if progress.is_cancelled() {
            self.inner.locks.mark_cancelled();
            return Err(WorkspaceError::Cancelled);
        }
        Ok(())
    }

    /// Record a disk side effect so a later cancellation commits instead of
    /// discarding.
    pub(crate) fn touched_disk(&self) {
        self.inner.locks.mark_fs_touched();
    }

    fn finish_outermost(&self, rule: &SchedulingRule, exit: &FrameExit) {
        let op = exit
            .op_id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_default();
        let mut trees = self.inner.trees();
        let Trees { committed, working } = &mut *trees;

        if exit.cancelled && !exit.fs_touched {
            working.graft(committed, rule);
            debug!("operation {op} cancelled; discarded edits under {rule}");
            return;
        }

        let delta = ResourceDelta::compute(committed, working, rule);
        committed.graft(working, rule);
        let generation = committed.generation() + 1;
        committed.set_generation(generation);
        working.set_generation(generation);
        let snapshot = committed.clone();
        drop(trees);

        debug!(
            "operation {op} committed under {rule}: {} change(s), generation {generation}",
            delta.len()
        );
        if !delta.is_empty() {
            self.rebuild_aliases(&snapshot);
            self.inner.notifier.enqueue(ResourceChangeEvent {
                op_id: exit.op_id.clone(),
                generation,
                delta,
            });
        }
    }

    /// Block until every queued notification has been delivered.
    ///
    /// Illegal inside an operation: delivery needs the notify rule, which
    /// conflicts with the caller's own rule.
    pub fn wait_for_notifications(&self) -> Result<(), WorkspaceError> {
        if self.inner.locks.in_operation() {
            return Err(WorkspaceError::IllegalState(
                "waiting for notifications inside an operation".into(),
            ));
        }
        self.inner.notifier.wait_idle();
        Ok(())
    }

    /// Block until scheduled background refreshes have finished.
    pub fn wait_for_refresh(&self) -> Result<(), WorkspaceError> {
        if self.inner.locks.in_operation() {
            return Err(WorkspaceError::IllegalState(
                "waiting for background refresh inside an operation".into(),
            ));
        }
        for failure in self.inner.refresher.wait() {
            warn!("background refresh failed: {failure}");
        }
        Ok(())
    }
}
