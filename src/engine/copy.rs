//! engine::copy
//!
//! Copying resources.
//!
//! The copy walks the source subtree in pre-order, creating directories and
//! copying files one at a time, and keeps going past failures (skipping
//! only what sits below a container it could not create). Every copied
//! resource is a new resource: fresh node id and modification stamp, with
//! the derived, hidden and team-private flags carried over and nothing
//! else. Session properties and synchronization info stay behind.
//!
//! Links are copied as links: the new node points at the same target and
//! the disk is not touched. Persistent properties follow via the stores.

use std::collections::HashSet;
use std::path::PathBuf;

use log::{debug, trace};

use super::move_cmd::add_link;
use super::validate::{require_open_project, validate_transfer};
use super::{into_result, Workspace, WorkspaceError};
use crate::core::flags::{Depth, UpdateFlags};
use crate::core::info::{InfoFlags, LinkDescription, ProjectDescription, ResourceInfo};
use crate::core::path::ResourcePath;
use crate::core::progress::Progress;
use crate::core::resource::{Resource, ResourceKind};
use crate::core::rule::SchedulingRule;
use crate::core::status::{Status, StatusCode};
use crate::core::tree::{ElementTree, Visit};

/// Flags a copy inherits from its source.
const INHERITED: [InfoFlags; 3] = [InfoFlags::DERIVED, InfoFlags::HIDDEN, InfoFlags::TEAM_PRIVATE];

/// One resource to copy, in pre-order.
#[derive(Debug, Clone)]
struct Copied {
    from: ResourcePath,
    to: ResourcePath,
    kind: ResourceKind,
    flags: InfoFlags,
    source_location: Option<PathBuf>,
    target_location: Option<PathBuf>,
    link: Option<LinkDescription>,
}

impl Copied {
    fn on_disk(&self) -> bool {
        self.link.is_none()
    }
}

impl Workspace {
    /// Copy `source` to `destination`, which must not exist.
    pub fn copy(
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
            let (plan, probes) = self.read_tree(|t| {
                self.check_transfer(t, source, &destination)?;
                require_open_project(t, source.path())?;
                let probes = if flags.contains(UpdateFlags::FORCE) {
                    Vec::new()
                } else {
                    self.sync_probes(t, source.path(), Depth::Infinite)
                };
                Ok::<_, WorkspaceError>((self.plan_copy(t, source.path(), destination.path()), probes))
            })?;

            let stale = self.unprotected(|| self.unsynchronized(&probes))?;
            if !stale.is_empty() {
                return Err(self.out_of_sync_error(&stale));
            }

            let mut status = Status::multi(StatusCode::FailedWriteLocal, format!("problems copying {source}"));
            let copied = self.unprotected(|| self.copy_local(&plan, &mut status, progress))?;
            self.touched_disk();
            self.locked(|t| self.record_copy(t, &plan, &copied, &mut status))?;
            self.unprotected(|| self.resync_local(destination.path()))?;

            for e in self.inner.stores.copy_all(source.path(), destination.path()) {
                status.add(Status::error(
                    StatusCode::StoreFailed,
                    Some(destination.path().clone()),
                    e.to_string(),
                ));
            }
            // The tree now matches what reached the disk, so a cancelled
            // copy stops here and keeps it.
            self.checkpoint(progress)?;

            for entry in plan.iter().filter(|e| e.link.is_some() && copied.contains(&e.to)) {
                let link = Resource::container_at(entry.to.clone());
                self.refresh_local(&link, Depth::Infinite, progress)?;
            }

            let locations: Vec<PathBuf> = plan
                .first()
                .and_then(|root| root.target_location.clone())
                .into_iter()
                .collect();
            self.refresh_aliases(&locations, &[destination.path().clone()], &rule, progress)?;
            debug!("copied {source} to {destination}");
            into_result(status)
        })
    }

    fn plan_copy(&self, tree: &ElementTree, from: &ResourcePath, to: &ResourcePath) -> Vec<Copied> {
        let project = from.truncate(1);
        let description = tree
            .get(&project)
            .and_then(ResourceInfo::project_description);
        let mut plan = Vec::new();
        tree.visit(from, Depth::Infinite, |path, info| {
            if info.is_phantom() {
                return Visit::SkipChildren;
            }
            let Some(target) = path.rebase(from, to) else {
                return Visit::SkipChildren;
            };
            let link = if info.is_linked() && path.segment_count() >= 2 {
                path.strip_prefix(&project)
                    .and_then(|relative| description.and_then(|d| d.link(&relative)))
                    .cloned()
            } else {
                None
            };
            let leaf = link.is_some() && !info.is_virtual();
            plan.push(Copied {
                from: path.clone(),
                to: target.clone(),
                kind: info.kind(),
                flags: info.flags(),
                source_location: self.location_in(tree, path),
                target_location: self.location_in(tree, &target),
                link,
            });
            if leaf {
                Visit::SkipChildren
            } else {
                Visit::Continue
            }
        });
        plan
    }

    /// Do the disk half of a copy, returning the paths that made it.
    ///
    /// Stops early once `progress` is cancelled. Runs inside an
    /// unprotected window.
    fn copy_local(&self, plan: &[Copied], status: &mut Status, progress: &Progress) -> HashSet<ResourcePath> {
        let fs = self.inner.fs.as_ref();
        let mut copied: HashSet<ResourcePath> = HashSet::new();
        for entry in plan {
            if progress.is_cancelled() {
                break;
            }
            if let Some(parent) = entry.to.parent() {
                if entry.from.segment_count() > plan[0].from.segment_count() && !copied.contains(&parent) {
                    trace!("skipping {}: parent was not copied", entry.from);
                    continue;
                }
            }
            if !entry.on_disk() {
                copied.insert(entry.to.clone());
                continue;
            }
            let (Some(from), Some(to)) = (&entry.source_location, &entry.target_location) else {
                status.add(Status::error(
                    StatusCode::FailedWriteLocal,
                    Some(entry.from.clone()),
                    "no filesystem location to copy",
                ));
                continue;
            };
            let result = if entry.kind.is_container() {
                fs.mkdir(to)
            } else {
                fs.copy_file(from, to)
            };
            match result {
                Ok(()) => {
                    copied.insert(entry.to.clone());
                    progress.worked(1, "copy");
                }
                Err(e) => status.add(Status::error(
                    StatusCode::FailedWriteLocal,
                    Some(entry.from.clone()),
                    e.to_string(),
                )),
            }
        }
        copied
    }

    fn record_copy(
        &self,
        tree: &mut ElementTree,
        plan: &[Copied],
        copied: &HashSet<ResourcePath>,
        status: &mut Status,
    ) {
        if let Some(phantom) = plan
            .first()
            .filter(|root| tree.get(&root.to).is_some_and(ResourceInfo::is_phantom))
        {
            tree.remove_subtree(&phantom.to);
        }
        for entry in plan.iter().filter(|e| copied.contains(&e.to)) {
            let mut info = ResourceInfo::new(entry.kind, self.next_node_id(), self.next_stamp());
            for flag in INHERITED {
                info.set_flag(flag, entry.flags.contains(flag));
            }
            if entry.kind == ResourceKind::Project {
                info.set_flag(InfoFlags::OPEN, true);
                info.set_project_description(ProjectDescription::default());
            }
            match &entry.link {
                Some(_) => {
                    info.set_flag(InfoFlags::LINKED, true);
                    info.set_flag(InfoFlags::VIRTUAL, entry.flags.contains(InfoFlags::VIRTUAL));
                    info.set_flag(InfoFlags::LOCAL_EXISTS, entry.flags.contains(InfoFlags::LOCAL_EXISTS));
                }
                None => info.set_flag(InfoFlags::LOCAL_EXISTS, true),
            }
            if let Err(e) = tree.insert(entry.to.clone(), info) {
                status.add(Status::error(StatusCode::FailedWriteLocal, Some(entry.to.clone()), e.to_string()));
                continue;
            }
            if let Some(link) = &entry.link {
                add_link(tree, entry.to.clone(), link.clone());
            }
        }
    }
}
