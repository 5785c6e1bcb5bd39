//! engine::move_cmd
//!
//! Moving and renaming resources.
//!
//! The standard move renames on disk, falling back to copy-then-delete
//! when the rename fails (a move across devices, say), then moves the
//! subtree in the tree with node ids intact so the delta reports a move.
//! A linked resource moves in the tree only: its target stays where it
//! is and its description is rebased. Link descriptions under a moved
//! folder travel with it, across projects if need be.

use std::path::{Path, PathBuf};

use log::{debug, warn};

use super::validate::{
    require_absent, require_existing, require_open_parent, require_open_project, require_storage,
    validate_transfer,
};
use super::{into_result, Workspace, WorkspaceError};
use crate::core::flags::{Depth, UpdateFlags};
use crate::core::info::{LinkDescription, ProjectDescription, ResourceInfo};
use crate::core::path::ResourcePath;
use crate::core::progress::Progress;
use crate::core::resource::Resource;
use crate::core::rule::SchedulingRule;
use crate::core::status::{Status, StatusCode};
use crate::core::tree::ElementTree;
use crate::fs::{copy_tree, remove_tree};

impl Workspace {
    /// Move `source` to `destination`, which must not exist.
    pub fn move_resource(
        &self,
        source: &Resource,
        destination: &Resource,
        flags: UpdateFlags,
        progress: &Progress,
    ) -> Result<(), WorkspaceError> {
        validate_transfer(source, destination)?;
        let destination = self.read_tree(|t| self.resolve_resource(t, destination));
        validate_transfer(source, &destination)?;

        let rule = SchedulingRule::combine(
            SchedulingRule::resource(source.path().clone()),
            SchedulingRule::resource(destination.path().clone()),
        );
        self.execute(&rule, progress, || {
            self.checkpoint(progress)?;
            let (locations, probes) = self.read_tree(|t| {
                self.check_transfer(t, source, &destination)?;
                let probes = if flags.contains(UpdateFlags::FORCE) {
                    Vec::new()
                } else {
                    self.sync_probes(t, source.path(), Depth::Infinite)
                };
                let locations: Vec<PathBuf> = [source.path(), destination.path()]
                    .into_iter()
                    .filter_map(|p| self.location_in(t, p))
                    .collect();
                Ok::<_, WorkspaceError>((locations, probes))
            })?;

            let stale = self.unprotected(|| self.unsynchronized(&probes))?;
            if !stale.is_empty() {
                return Err(self.out_of_sync_error(&stale));
            }
            self.locked(|t| clear_phantoms(t, destination.path()))?;

            self.checkpoint(progress)?;
            let status = self.unprotected(|| self.dispatch_move(source, &destination, flags, progress))?;
            self.touched_disk();
            progress.worked(1, "move");

            self.refresh_aliases(
                &locations,
                &[source.path().clone(), destination.path().clone()],
                &rule,
                progress,
            )?;
            into_result(status)
        })
    }

    /// Preconditions shared by copy and move.
    pub(crate) fn check_transfer(
        &self,
        tree: &ElementTree,
        source: &Resource,
        destination: &Resource,
    ) -> Result<(), WorkspaceError> {
        let info = require_existing(tree, source)?;
        if source.depth() >= 2 {
            require_open_project(tree, source.path())?;
        }
        require_absent(tree, destination.path(), self.inner.case_sensitive)?;
        require_open_parent(tree, destination.path())?;
        if !info.is_linked() {
            require_storage(tree, destination.path())?;
        }
        Ok(())
    }

    /// The built-in move. Runs inside an unprotected window.
    pub(crate) fn standard_move(
        &self,
        source: &Resource,
        destination: &Resource,
        _flags: UpdateFlags,
        progress: &Progress,
    ) -> Status {
        let mut status = Status::multi(StatusCode::FailedWriteLocal, format!("problems moving {source}"));
        let (tree_only, from, to) = self.read_tree(|t| {
            let info = t.get(source.path());
            let linked = info.is_some_and(ResourceInfo::is_linked);
            let custom_project = source.depth() == 1
                && info
                    .and_then(ResourceInfo::project_description)
                    .is_some_and(|d| d.location.is_some());
            (
                linked || custom_project,
                self.location_in(t, source.path()),
                self.location_in(t, destination.path()),
            )
        });

        if !tree_only {
            let (Some(from), Some(to)) = (from, to) else {
                status.add(Status::error(
                    StatusCode::FailedWriteLocal,
                    Some(source.path().clone()),
                    "no filesystem location to move",
                ));
                return status;
            };
            if let Err(failure) = self.move_local(source, &from, &to) {
                status.add(failure);
                return status;
            }
        }

        status.merge(self.record_move(source, destination));
        self.resync_local(destination.path());
        progress.worked(1, "move");
        status
    }

    fn move_local(&self, source: &Resource, from: &Path, to: &Path) -> Result<(), Status> {
        let fs = self.inner.fs.as_ref();
        let failure = |code, message: String| Status::error(code, Some(source.path().clone()), message);
        match fs.rename(from, to) {
            Ok(()) => {
                self.touched_disk();
                return Ok(());
            }
            Err(e) => debug!("rename of {} failed ({e}); copying instead", from.display()),
        }
        if let Err(e) = copy_tree(fs, from, to) {
            if let Err(cleanup) = remove_tree(fs, to) {
                warn!("could not clean up {}: {cleanup}", to.display());
            }
            return Err(failure(StatusCode::FailedWriteLocal, e.to_string()));
        }
        self.touched_disk();
        remove_tree(fs, from).map_err(|e| failure(StatusCode::FailedDeleteLocal, e.to_string()))
    }

    /// Tree, link-description and store bookkeeping for a move done on disk.
    pub(crate) fn record_move(&self, source: &Resource, destination: &Resource) -> Status {
        let mut status = Status::multi(StatusCode::FailedWriteLocal, format!("problems moving {source}"));
        let from = source.path();
        let to = destination.path();
        let moved = self.locked(|tree| {
            clear_phantoms(tree, to);
            let links = if from.segment_count() >= 2 {
                take_links_under(tree, from)
            } else {
                Vec::new()
            };
            tree.move_subtree(from, to)?;
            for link in links {
                if let Some(rebased) = link.path.rebase(from, to) {
                    add_link(tree, rebased, link);
                }
            }
            Ok::<_, crate::core::tree::TreeError>(())
        });
        match moved {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                status.add(Status::error(StatusCode::FailedWriteLocal, Some(from.clone()), e.to_string()));
                return status;
            }
            Err(e) => {
                status.add(Status::error(StatusCode::OperationFailed, Some(from.clone()), e.to_string()));
                return status;
            }
        }
        for e in self.inner.stores.move_all(from, to) {
            status.add(Status::error(StatusCode::StoreFailed, Some(to.clone()), e.to_string()));
        }
        debug!("moved {from} to {to}");
        status
    }

    /// Record current disk timestamps for `path` and below.
    ///
    /// Touches the filesystem; call inside an unprotected window.
    pub(crate) fn resync_local(&self, path: &ResourcePath) {
        let probes = self.read_tree(|t| self.sync_probes(t, path, Depth::Infinite));
        let stamps: Vec<(ResourcePath, i64)> = probes
            .iter()
            .filter_map(|p| self.inner.fs.stat(&p.location).map(|s| (p.path.clone(), s.modified)))
            .collect();
        let applied = self.locked(|tree| {
            for (path, modified) in stamps {
                if let Some(info) = tree.get_mut(&path) {
                    info.set_local_sync(modified);
                }
            }
        });
        if let Err(e) = applied {
            warn!("could not record timestamps under {path}: {e}");
        }
    }
}

/// Remove phantoms occupying `path` so a resource can take their place.
fn clear_phantoms(tree: &mut ElementTree, path: &ResourcePath) {
    if tree.get(path).is_some_and(ResourceInfo::is_phantom) {
        tree.remove_subtree(path);
    }
}

/// Remove and return the link descriptions at or below `path`, with
/// workspace-absolute paths.
pub(crate) fn take_links_under(tree: &mut ElementTree, path: &ResourcePath) -> Vec<LinkDescription> {
    let project = path.truncate(1);
    let Some(relative) = path.strip_prefix(&project) else {
        return Vec::new();
    };
    let Some(description) = tree
        .get_mut(&project)
        .and_then(ResourceInfo::project_description_mut)
    else {
        return Vec::new();
    };
    description
        .remove_links_under(&relative)
        .into_iter()
        .map(|link| LinkDescription {
            path: project.join(&link.path),
            ..link
        })
        .collect()
}

/// Store `link` at the workspace-absolute `path` in its project's description.
pub(crate) fn add_link(tree: &mut ElementTree, path: ResourcePath, link: LinkDescription) {
    let project = path.truncate(1);
    let Some(relative) = path.strip_prefix(&project) else {
        return;
    };
    let Some(info) = tree.get_mut(&project) else {
        return;
    };
    if info.project_description().is_none() {
        info.set_project_description(ProjectDescription::default());
    }
    if let Some(description) = info.project_description_mut() {
        description.add_link(LinkDescription {
            path: relative,
            ..link
        });
    }
}
