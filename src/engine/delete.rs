//! engine::delete
//!
//! Deleting resources.
//!
//! The standard delete walks the target's subtree bottom-up on disk, one
//! filesystem call per resource, and keeps going past failures. A resource
//! that could not be deleted stays in the tree together with its
//! ancestors (silently: only the resource that failed is reported). Then,
//! in one tree edit, every deleted resource is removed, or turned into a
//! phantom when a synchronization partner still tracks it or a phantom
//! survives below it.
//!
//! Links and virtual folders are leaves here: their node and description
//! go, their target on disk is never touched. A closed project is removed
//! from the tree only.

use std::collections::HashSet;
use std::path::PathBuf;

use log::{debug, trace};

use super::refresh::discard_subtree;
use super::validate::require_existing;
use super::{into_result, Workspace, WorkspaceError};
use crate::core::flags::{Depth, UpdateFlags};
use crate::core::info::ResourceInfo;
use crate::core::path::ResourcePath;
use crate::core::progress::Progress;
use crate::core::resource::{Resource, ResourceKind};
use crate::core::rule::SchedulingRule;
use crate::core::status::{Status, StatusCode};
use crate::core::tree::{ElementTree, Visit};
use crate::fs::{remove_tree, FsError};

/// One resource the delete will remove, in pre-order.
#[derive(Debug, Clone)]
struct Doomed {
    path: ResourcePath,
    kind: ResourceKind,
    location: Option<PathBuf>,
    local_sync: i64,
    link: bool,
    tree_only: bool,
}

impl Workspace {
    /// Delete `resources` and everything below them.
    ///
    /// Per-resource failures are collected into one multi-status; the tree
    /// afterwards reflects exactly what was removed from disk.
    pub fn delete(
        &self,
        resources: &[Resource],
        flags: UpdateFlags,
        progress: &Progress,
    ) -> Result<(), WorkspaceError> {
        if resources.is_empty() {
            return Ok(());
        }
        if resources.iter().any(|r| r.path().is_root()) {
            return Err(WorkspaceError::validation(
                StatusCode::InvalidPath,
                Some(&ResourcePath::root()),
                "the workspace root cannot be deleted",
            ));
        }

        let rule = SchedulingRule::for_paths(resources.iter().map(Resource::path));
        self.execute(&rule, progress, || {
            self.checkpoint(progress)?;
            let (targets, locations) = self.read_tree(|t| self.delete_targets(t, resources))?;

            let mut status = Status::multi(StatusCode::FailedDeleteLocal, "problems deleting resources");
            for target in &targets {
                self.checkpoint(progress)?;
                let outcome = self.unprotected(|| self.dispatch_delete(target, flags, progress))?;
                self.touched_disk();
                status.merge(outcome);
                progress.worked(1, "delete");
            }

            let exclude: Vec<ResourcePath> = targets.iter().map(|r| r.path().clone()).collect();
            self.refresh_aliases(&locations, &exclude, &rule, progress)?;
            into_result(status)
        })
    }

    /// Check existence and drop targets nested under other targets.
    fn delete_targets(
        &self,
        tree: &ElementTree,
        resources: &[Resource],
    ) -> Result<(Vec<Resource>, Vec<PathBuf>), WorkspaceError> {
        for resource in resources {
            require_existing(tree, resource)?;
        }
        let mut sorted: Vec<&Resource> = resources.iter().collect();
        sorted.sort_by(|a, b| a.path().cmp(b.path()));

        let mut targets: Vec<Resource> = Vec::new();
        for resource in sorted {
            if !targets.iter().any(|t| t.path().is_prefix_of(resource.path())) {
                targets.push(resource.clone());
            }
        }
        // Deleting a link changes nothing on disk; no alias can notice.
        let locations = targets
            .iter()
            .filter(|r| !tree.get(r.path()).is_some_and(ResourceInfo::is_linked))
            .filter_map(|r| self.location_in(tree, r.path()))
            .collect();
        Ok((targets, locations))
    }

    fn plan_delete(&self, tree: &ElementTree, path: &ResourcePath) -> Vec<Doomed> {
        let closed_project = path.segment_count() == 1
            && tree.existing(path).is_some_and(|i| !i.is_open());
        let mut doomed = Vec::new();
        tree.visit(path, Depth::Infinite, |p, info| {
            if info.is_phantom() {
                return Visit::SkipChildren;
            }
            let link = info.is_linked();
            doomed.push(Doomed {
                path: p.clone(),
                kind: info.kind(),
                location: self.location_in(tree, p),
                local_sync: info.local_sync(),
                link,
                tree_only: closed_project,
            });
            if link {
                Visit::SkipChildren
            } else {
                Visit::Continue
            }
        });
        doomed
    }

    /// The built-in delete of one resource. Runs inside an unprotected
    /// window; returns the per-resource failures.
    pub(crate) fn standard_delete(&self, resource: &Resource, flags: UpdateFlags, progress: &Progress) -> Status {
        let path = resource.path();
        let mut status = Status::multi(StatusCode::FailedDeleteLocal, format!("problems deleting {path}"));
        let doomed = self.read_tree(|t| self.plan_delete(t, path));

        let mut kept: HashSet<ResourcePath> = HashSet::new();
        for entry in doomed.iter().rev() {
            if kept.contains(&entry.path) || entry.link || entry.tree_only {
                continue;
            }
            if let Err(failure) = self.delete_local(entry, flags, &mut status) {
                trace!("keeping {}: {}", entry.path, failure.message());
                status.add(failure);
                keep(&mut kept, Some(entry.path.clone()), path);
            }
            progress.worked(1, "delete");
        }

        let keep_history = flags.contains(UpdateFlags::KEEP_HISTORY);
        status.merge(self.forget(&doomed, &kept, keep_history));
        status
    }

    /// Tree and store bookkeeping for a delete a hook did on disk.
    pub(crate) fn forget_deleted(&self, resource: &Resource, flags: UpdateFlags) -> Status {
        let doomed = self.read_tree(|t| self.plan_delete(t, resource.path()));
        self.forget(&doomed, &HashSet::new(), flags.contains(UpdateFlags::KEEP_HISTORY))
    }

    /// Remove one resource's own disk entry.
    ///
    /// Containers are empty by now unless the disk holds entries the tree
    /// does not know; those count as out of sync unless forced.
    fn delete_local(&self, entry: &Doomed, flags: UpdateFlags, status: &mut Status) -> Result<(), Status> {
        let Some(location) = entry.location.as_deref() else {
            return Ok(());
        };
        let fs = self.inner.fs.as_ref();
        let force = flags.contains(UpdateFlags::FORCE);
        let failure = |code, message: String| Status::error(code, Some(entry.path.clone()), message);

        if entry.kind == ResourceKind::File {
            if !force {
                if let Some(stat) = fs.stat(location) {
                    if stat.is_directory || stat.modified != entry.local_sync {
                        return Err(failure(
                            StatusCode::OutOfSync,
                            format!("{} is out of sync with the filesystem", entry.path),
                        ));
                    }
                }
            }
            if flags.contains(UpdateFlags::KEEP_HISTORY) {
                match fs.read(location) {
                    Ok(contents) => {
                        if let Err(e) = self.inner.stores.history.add_state(&entry.path, contents) {
                            status.add(failure(StatusCode::StoreFailed, e.to_string()));
                        }
                    }
                    Err(FsError::NotFound(_)) => {}
                    Err(e) => return Err(failure(StatusCode::FailedReadLocal, e.to_string())),
                }
            }
        }

        let removed = match fs.delete(location) {
            Err(FsError::DirectoryNotEmpty(_)) if force => remove_tree(fs, location),
            Err(FsError::DirectoryNotEmpty(_)) => {
                return Err(failure(
                    StatusCode::OutOfSync,
                    format!("{} holds files unknown to the workspace", entry.path),
                ))
            }
            other => other,
        };
        match removed {
            Ok(()) => {
                self.touched_disk();
                Ok(())
            }
            Err(FsError::NotFound(_)) => Ok(()),
            Err(e) => Err(failure(StatusCode::FailedDeleteLocal, e.to_string())),
        }
    }

    /// Drop every doomed resource not kept, in one tree edit, then clear
    /// the stores for them.
    fn forget(&self, doomed: &[Doomed], kept: &HashSet<ResourcePath>, keep_history: bool) -> Status {
        let mut status = Status::multi(StatusCode::StoreFailed, "problems updating stores");
        let forgotten = self.locked(|tree| {
            let mut forgotten = Vec::new();
            for entry in doomed.iter().rev() {
                if kept.contains(&entry.path) || tree.get(&entry.path).is_none() {
                    continue;
                }
                if entry.link {
                    forget_link_description(tree, &entry.path);
                    discard_subtree(tree, &entry.path);
                } else {
                    let tracked = tree.get(&entry.path).is_some_and(ResourceInfo::has_sync_info);
                    if tracked || !tree.children(&entry.path).is_empty() {
                        if let Some(info) = tree.get_mut(&entry.path) {
                            info.make_phantom();
                        }
                    } else {
                        tree.remove_subtree(&entry.path);
                    }
                }
                forgotten.push((entry.path.clone(), entry.link));
            }
            forgotten
        });
        let forgotten = match forgotten {
            Ok(forgotten) => forgotten,
            Err(e) => {
                status.add(Status::error(StatusCode::OperationFailed, None, e.to_string()));
                return status;
            }
        };

        for (path, link) in &forgotten {
            let depth = if *link { Depth::Infinite } else { Depth::Zero };
            for e in self.inner.stores.delete_all(path, depth, keep_history) {
                status.add(Status::error(StatusCode::StoreFailed, Some(path.clone()), e.to_string()));
            }
        }
        debug!("deleted {} resource(s) from the tree", forgotten.len());
        status
    }
}

/// Mark `from` and its ancestors up to `top` as kept.
fn keep(kept: &mut HashSet<ResourcePath>, from: Option<ResourcePath>, top: &ResourcePath) {
    let mut current = from;
    while let Some(path) = current {
        if !top.is_prefix_of(&path) || !kept.insert(path.clone()) {
            break;
        }
        current = path.parent();
    }
}

/// Remove the description of the link at `path` from its project.
pub(crate) fn forget_link_description(tree: &mut ElementTree, path: &ResourcePath) {
    let project = path.truncate(1);
    let Some(relative) = path.strip_prefix(&project) else {
        return;
    };
    if let Some(description) = tree.get_mut(&project).and_then(ResourceInfo::project_description_mut) {
        description.remove_links_under(&relative);
    }
}
