//! engine::refresh
//!
//! Reconciling the tree with the disk.
//!
//! # Phases
//!
//! 1. **Plan** (workspace lock held): pick the scan targets, resolve their
//!    locations, and collect every link description under them. Links come
//!    from the project descriptions, not the tree, so a link dropped with a
//!    missing parent reappears once the parent does.
//! 2. **Scan** (unprotected window): stat and list locations. Links shadow
//!    same-named disk entries; the metadata directory and names that are
//!    not valid segments are skipped.
//! 3. **Reconcile** (workspace lock held): add or revive what was found,
//!    bump stamps of changed files, drop or phantomize what vanished, and
//!    purge phantoms that no partner tracks any more.
//!
//! Missing projects and missing link targets keep their own node with
//! `LOCAL_EXISTS` cleared; only their members go.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use log::{debug, trace, warn};

use super::{Workspace, WorkspaceError};
use crate::core::flags::Depth;
use crate::core::info::{InfoFlags, LinkLocation, ResourceInfo, NULL_STAMP};
use crate::core::path::{validate_segment, ResourcePath};
use crate::core::progress::Progress;
use crate::core::resource::{Resource, ResourceKind};
use crate::core::rule::SchedulingRule;
use crate::core::status::StatusCode;
use crate::core::tree::ElementTree;
use crate::fs::FileStat;

#[derive(Debug, Clone)]
struct LinkTarget {
    location: Option<PathBuf>,
    kind: ResourceKind,
    is_virtual: bool,
}

#[derive(Debug)]
struct ScanTarget {
    path: ResourcePath,
    location: Option<PathBuf>,
    link: Option<LinkTarget>,
    depth: Depth,
}

#[derive(Debug)]
struct ScanPlan {
    targets: Vec<ScanTarget>,
    links: BTreeMap<ResourcePath, LinkTarget>,
    metadata_dir: PathBuf,
}

#[derive(Debug)]
struct Observation {
    path: ResourcePath,
    stat: Option<FileStat>,
    /// Member names found, when the members were looked at.
    listed: Option<BTreeSet<String>>,
    link: Option<LinkTarget>,
}

fn child_depth(depth: Depth) -> Option<Depth> {
    match depth {
        Depth::Zero => None,
        Depth::One => Some(Depth::Zero),
        Depth::Infinite => Some(Depth::Infinite),
    }
}

impl Workspace {
    /// Bring the tree at and below `resource` in line with the disk.
    pub fn refresh_local(
        &self,
        resource: &Resource,
        depth: Depth,
        progress: &Progress,
    ) -> Result<(), WorkspaceError> {
        let rule = SchedulingRule::resource(resource.path().clone());
        self.execute(&rule, progress, || {
            self.checkpoint(progress)?;
            let plan = self.locked(|t| self.plan_refresh(t, resource, depth))??;
            if plan.targets.is_empty() {
                return Ok(());
            }
            let observations = self.unprotected(|| self.scan(&plan, progress))??;
            trace!(
                "refresh of {} observed {} location(s)",
                resource.path(),
                observations.len()
            );
            self.locked(|t| self.reconcile(t, &plan, &observations))?;
            Ok(())
        })
    }

    fn plan_refresh(
        &self,
        tree: &ElementTree,
        resource: &Resource,
        depth: Depth,
    ) -> Result<ScanPlan, WorkspaceError> {
        let path = resource.path();
        let mut targets = Vec::new();

        if path.is_root() {
            if let Some(project_depth) = child_depth(depth) {
                for project in tree.children(path) {
                    let open = tree
                        .existing(&project)
                        .is_some_and(ResourceInfo::is_open);
                    if open {
                        targets.push(ScanTarget {
                            location: self.location_in(tree, &project),
                            path: project,
                            link: None,
                            depth: project_depth,
                        });
                    }
                }
            }
        } else if path.segment_count() == 1 {
            let info = tree.existing(path).ok_or_else(|| {
                WorkspaceError::precondition(
                    StatusCode::ResourceNotFound,
                    Some(path),
                    "project does not exist",
                )
            })?;
            targets.push(ScanTarget {
                path: path.clone(),
                location: self.location_in(tree, path),
                link: None,
                depth: if info.is_open() { depth } else { Depth::Zero },
            });
        } else {
            let parent = path.parent().unwrap_or_else(ResourcePath::root);
            if tree.existing(&parent).is_none() {
                return Err(WorkspaceError::precondition(
                    StatusCode::ResourceNotFound,
                    Some(&parent),
                    "parent does not exist",
                ));
            }
            let project = path.truncate(1);
            if !tree.existing(&project).is_some_and(ResourceInfo::is_open) {
                return Err(WorkspaceError::precondition(
                    StatusCode::ProjectClosed,
                    Some(&project),
                    "project is closed",
                ));
            }
            targets.push(ScanTarget {
                path: path.clone(),
                location: self.location_in(tree, path),
                link: None,
                depth,
            });
        }

        let mut links = BTreeMap::new();
        for target in &targets {
            let project = target.path.truncate(1);
            let Some(description) = tree
                .get(&project)
                .and_then(ResourceInfo::project_description)
            else {
                continue;
            };
            for link in description.links.values() {
                let full = project.join(&link.path);
                if !target.path.is_prefix_of(&full) {
                    continue;
                }
                let location = self.inner.variables.resolve(&link.location).ok().flatten();
                links.insert(
                    full,
                    LinkTarget {
                        location,
                        kind: link.kind,
                        is_virtual: matches!(link.location, LinkLocation::Virtual),
                    },
                );
            }
        }
        for target in &mut targets {
            target.link = links.get(&target.path).cloned();
            if let Some(link) = &target.link {
                target.location = link.location.clone();
            }
        }

        Ok(ScanPlan {
            targets,
            links,
            metadata_dir: self.inner.paths.metadata_dir(),
        })
    }

    fn scan(&self, plan: &ScanPlan, progress: &Progress) -> Result<Vec<Observation>, WorkspaceError> {
        let mut out = Vec::new();
        for target in &plan.targets {
            self.checkpoint(progress)?;
            self.observe(
                plan,
                &target.path,
                target.location.as_deref(),
                target.link.clone(),
                target.depth,
                &mut out,
            );
            progress.worked(1, "refresh");
        }
        Ok(out)
    }

    fn observe(
        &self,
        plan: &ScanPlan,
        path: &ResourcePath,
        location: Option<&Path>,
        link: Option<LinkTarget>,
        depth: Depth,
        out: &mut Vec<Observation>,
    ) {
        let is_virtual = link.as_ref().is_some_and(|l| l.is_virtual);
        let stat = if is_virtual {
            None
        } else {
            location.and_then(|l| self.inner.fs.stat(l))
        };
        // A link whose target has the wrong type counts as missing.
        let stat = stat.filter(|s| match &link {
            Some(l) => (l.kind == ResourceKind::Folder) == s.is_directory,
            None => true,
        });
        let container = is_virtual || stat.is_some_and(|s| s.is_directory);
        let next = child_depth(depth).filter(|_| container);

        let mut disk_children: Vec<(ResourcePath, PathBuf)> = Vec::new();
        if let Some(child_depth) = next {
            let mut names = BTreeSet::new();
            if let (false, Some(dir)) = (is_virtual, location) {
                match self.inner.fs.list(dir) {
                    Ok(entries) => {
                        for name in entries {
                            let child_location = dir.join(&name);
                            if child_location == plan.metadata_dir || validate_segment(&name).is_err() {
                                continue;
                            }
                            let Ok(child) = path.append(&name) else {
                                continue;
                            };
                            names.insert(name);
                            if !plan.links.contains_key(&child) {
                                disk_children.push((child, child_location));
                            }
                        }
                    }
                    Err(e) => warn!("cannot list {}: {e}", dir.display()),
                }
            }
            let link_children: Vec<(&ResourcePath, &LinkTarget)> = plan
                .links
                .iter()
                .filter(|(p, _)| p.parent().as_ref() == Some(path))
                .collect();
            for (child, _) in &link_children {
                if let Some(name) = child.last_segment() {
                    names.insert(name.to_string());
                }
            }
            out.push(Observation {
                path: path.clone(),
                stat,
                listed: Some(names),
                link,
            });
            for (child, child_location) in disk_children {
                self.observe(plan, &child, Some(&child_location), None, child_depth, out);
            }
            for (child, target) in link_children {
                self.observe(
                    plan,
                    child,
                    target.location.as_deref(),
                    Some(target.clone()),
                    child_depth,
                    out,
                );
            }
            return;
        }

        out.push(Observation {
            path: path.clone(),
            stat,
            listed: None,
            link,
        });
    }

    fn reconcile(&self, tree: &mut ElementTree, plan: &ScanPlan, observations: &[Observation]) {
        for obs in observations {
            self.reconcile_one(tree, obs);
            if let Some(names) = &obs.listed {
                if tree.existing(&obs.path).is_none() {
                    continue;
                }
                for child in tree.children(&obs.path) {
                    let present = child.last_segment().is_some_and(|n| names.contains(n));
                    if present {
                        continue;
                    }
                    if tree.get(&child).is_some_and(ResourceInfo::is_phantom) {
                        purge_phantoms(tree, &child);
                    } else {
                        trace!("{child} vanished from disk");
                        discard_subtree(tree, &child);
                    }
                }
            }
        }
        for target in &plan.targets {
            purge_phantoms(tree, &target.path);
        }
    }

    fn reconcile_one(&self, tree: &mut ElementTree, obs: &Observation) {
        let path = &obs.path;
        let depth = path.segment_count();
        let is_virtual = obs.link.as_ref().is_some_and(|l| l.is_virtual);

        let found_kind = if is_virtual {
            Some(ResourceKind::Folder)
        } else {
            obs.stat.map(|stat| match (&obs.link, depth) {
                (_, 1) => ResourceKind::Project,
                (Some(link), _) => link.kind,
                (None, _) if stat.is_directory => ResourceKind::Folder,
                (None, _) => ResourceKind::File,
            })
        };

        let Some(kind) = found_kind else {
            // Missing on disk.
            let keeps_node = obs.link.is_some() || depth == 1;
            if keeps_node {
                if let Some(info) = tree.get_mut(path).filter(|i| !i.is_phantom()) {
                    info.set_flag(InfoFlags::LOCAL_EXISTS, false);
                    for child in tree.children(path) {
                        discard_subtree(tree, &child);
                    }
                } else if let Some(link) = &obs.link {
                    self.insert_link_node(tree, path, link, false);
                }
            } else if tree.existing(path).is_some() {
                debug!("{path} no longer exists on disk");
                discard_subtree(tree, path);
            }
            return;
        };

        let modified = obs.stat.map_or(NULL_STAMP, |s| s.modified);
        let existing = tree.get(path).map(|i| (i.kind(), i.is_phantom(), i.local_sync()));
        match existing {
            None => {
                if let Some(link) = &obs.link {
                    self.insert_link_node(tree, path, link, obs.stat.is_some());
                    if let Some(info) = tree.get_mut(path) {
                        info.set_local_sync(modified);
                    }
                    return;
                }
                let mut info = ResourceInfo::new(kind, self.next_node_id(), self.next_stamp());
                info.set_flag(InfoFlags::LOCAL_EXISTS, true);
                info.set_local_sync(modified);
                if tree.insert(path.clone(), info).is_ok() {
                    trace!("discovered {kind} {path}");
                }
            }
            Some((_, true, _)) => {
                let stamp = self.next_stamp();
                if let Some(info) = tree.get_mut(path) {
                    info.revive(kind, stamp);
                    info.set_flag(InfoFlags::LOCAL_EXISTS, !is_virtual);
                    info.set_local_sync(modified);
                    if let Some(link) = &obs.link {
                        info.set_flag(InfoFlags::LINKED, true);
                        info.set_flag(InfoFlags::VIRTUAL, link.is_virtual);
                    }
                }
            }
            Some((old_kind, false, _)) if old_kind != kind && depth >= 2 => {
                debug!("{path} changed from {old_kind} to {kind}");
                tree.remove_subtree(path);
                let mut info = ResourceInfo::new(kind, self.next_node_id(), self.next_stamp());
                info.set_flag(InfoFlags::LOCAL_EXISTS, true);
                info.set_local_sync(modified);
                if let Err(e) = tree.insert(path.clone(), info) {
                    warn!("could not record {kind} {path}: {e}");
                }
            }
            Some((_, false, local_sync)) => {
                let changed_file = kind == ResourceKind::File && local_sync != modified;
                let stamp = if changed_file { Some(self.next_stamp()) } else { None };
                if let Some(info) = tree.get_mut(path) {
                    if !is_virtual {
                        info.set_flag(InfoFlags::LOCAL_EXISTS, true);
                    }
                    info.set_local_sync(modified);
                    if let Some(stamp) = stamp {
                        trace!("{path} changed on disk");
                        info.set_modification_stamp(stamp);
                        info.bump_content_id();
                    }
                }
            }
        }
    }

    fn insert_link_node(&self, tree: &mut ElementTree, path: &ResourcePath, link: &LinkTarget, exists: bool) {
        let mut info = ResourceInfo::new(link.kind, self.next_node_id(), self.next_stamp());
        info.set_flag(InfoFlags::LINKED, true);
        info.set_flag(InfoFlags::VIRTUAL, link.is_virtual);
        info.set_flag(InfoFlags::LOCAL_EXISTS, exists && !link.is_virtual);
        if tree.insert(path.clone(), info).is_ok() {
            trace!("restored link {path}");
        }
    }
}

/// Remove a vanished subtree, keeping phantoms for tracked nodes.
///
/// Bottom-up: a node stays (as a phantom) when it has sync info or when a
/// phantom member survives under it.
pub(crate) fn discard_subtree(tree: &mut ElementTree, path: &ResourcePath) {
    for p in tree.subtree_paths(path).into_iter().rev() {
        let Some(info) = tree.get(&p) else {
            continue;
        };
        let tracked = info.has_sync_info();
        if tracked || !tree.children(&p).is_empty() {
            if let Some(info) = tree.get_mut(&p) {
                info.make_phantom();
            }
        } else {
            tree.remove_subtree(&p);
        }
    }
}

/// Remove phantoms nobody tracks any more, bottom-up.
pub(crate) fn purge_phantoms(tree: &mut ElementTree, path: &ResourcePath) {
    for p in tree.subtree_paths(path).into_iter().rev() {
        let purge = tree
            .get(&p)
            .is_some_and(|i| i.is_phantom() && !i.has_sync_info())
            && tree.children(&p).is_empty();
        if purge {
            tree.remove_subtree(&p);
        }
    }
}

/// Runs refreshes on worker threads.
#[derive(Default)]
pub(crate) struct RefreshManager {
    jobs: Mutex<Vec<JoinHandle<Result<(), WorkspaceError>>>>,
}

impl RefreshManager {
    fn jobs(&self) -> MutexGuard<'_, Vec<JoinHandle<Result<(), WorkspaceError>>>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refresh `resource` on a new thread; it starts once its rule is free.
    pub(crate) fn schedule(&self, workspace: Workspace, resource: Resource) {
        let name = format!("canopy-refresh {}", resource.path());
        let spawned = thread::Builder::new().name(name).spawn(move || {
            workspace.refresh_local(&resource, Depth::Infinite, &Progress::new())
        });
        match spawned {
            Ok(handle) => self.jobs().push(handle),
            Err(e) => warn!("background refresh failed to start: {e}"),
        }
    }

    /// Join every scheduled job, returning failure messages.
    pub(crate) fn wait(&self) -> Vec<String> {
        let mut failures = Vec::new();
        loop {
            let jobs: Vec<_> = self.jobs().drain(..).collect();
            if jobs.is_empty() {
                return failures;
            }
            for job in jobs {
                match job.join() {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => failures.push(e.to_string()),
                    Err(_) => failures.push("refresh worker panicked".to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::info::QualifiedName;
    use crate::fs::{FileSystem, MemoryFileSystem};
    use crate::engine::WorkspaceBuilder;
    use std::sync::Arc;

    fn p(s: &str) -> ResourcePath {
        ResourcePath::parse(s).unwrap()
    }

    fn setup() -> (Workspace, Arc<MemoryFileSystem>, Progress) {
        let fs = Arc::new(MemoryFileSystem::new());
        let ws = WorkspaceBuilder::new("/ws").fs(fs.clone()).build().unwrap();
        let progress = Progress::new();
        ws.create_project("p", None, &progress).unwrap();
        (ws, fs, progress)
    }

    fn project() -> Resource {
        Resource::project_named("p").unwrap()
    }

    mod discovery {
        use super::*;

        #[test]
        fn finds_new_files_and_folders() {
            let (ws, fs, progress) = setup();
            fs.mkdir(Path::new("/ws/p/src")).unwrap();
            fs.write(Path::new("/ws/p/src/main.rs"), b"fn main() {}").unwrap();

            ws.refresh_local(&project(), Depth::Infinite, &progress).unwrap();

            assert!(ws.exists(&Resource::folder("/p/src").unwrap()));
            assert!(ws.exists(&Resource::file("/p/src/main.rs").unwrap()));
        }

        #[test]
        fn depth_one_stops_at_members() {
            let (ws, fs, progress) = setup();
            fs.mkdir(Path::new("/ws/p/a/b")).unwrap();
            ws.refresh_local(&project(), Depth::One, &progress).unwrap();
            assert!(ws.exists(&Resource::folder("/p/a").unwrap()));
            assert!(!ws.exists(&Resource::folder("/p/a/b").unwrap()));
        }

        #[test]
        fn unknown_target_is_added() {
            let (ws, fs, progress) = setup();
            fs.write(Path::new("/ws/p/late.txt"), b"x").unwrap();
            let late = Resource::file("/p/late.txt").unwrap();
            ws.refresh_local(&late, Depth::Zero, &progress).unwrap();
            assert!(ws.exists(&late));
        }

        #[test]
        fn metadata_dir_is_never_a_resource() {
            let fs = Arc::new(MemoryFileSystem::new());
            let ws = WorkspaceBuilder::new("/ws").fs(fs.clone()).build().unwrap();
            let progress = Progress::new();
            ws.create_project("p", Some(PathBuf::from("/ws")), &progress).unwrap();
            fs.mkdir(Path::new("/ws/.canopy")).unwrap();
            ws.refresh_local(&project(), Depth::Infinite, &progress).unwrap();
            assert!(ws.members(&project()).is_empty());
        }
    }

    mod changes {
        use super::*;

        #[test]
        fn external_edit_bumps_stamp() {
            let (ws, fs, progress) = setup();
            let file = Resource::file("/p/f.txt").unwrap();
            ws.create_file(&file, b"1", &progress).unwrap();
            let before = ws.info(&file).unwrap();

            fs.touch_external(Path::new("/ws/p/f.txt")).unwrap();
            ws.refresh_local(&project(), Depth::Infinite, &progress).unwrap();

            let after = ws.info(&file).unwrap();
            assert!(after.modification_stamp() > before.modification_stamp());
            assert_ne!(after.content_id(), before.content_id());
        }

        #[test]
        fn vanished_file_removed_or_phantomized() {
            let (ws, fs, progress) = setup();
            let plain = Resource::file("/p/plain").unwrap();
            let tracked = Resource::file("/p/tracked").unwrap();
            ws.create_file(&plain, b"", &progress).unwrap();
            ws.create_file(&tracked, b"", &progress).unwrap();
            ws.set_sync_info(&tracked, QualifiedName::new("vcs", "rev"), Some(vec![3]), &progress)
                .unwrap();

            fs.delete(Path::new("/ws/p/plain")).unwrap();
            fs.delete(Path::new("/ws/p/tracked")).unwrap();
            ws.refresh_local(&project(), Depth::Infinite, &progress).unwrap();

            assert!(ws.info_with_phantoms(plain.path()).is_none());
            let phantom = ws.info_with_phantoms(tracked.path()).unwrap();
            assert!(phantom.is_phantom());
        }

        #[test]
        fn kind_change_replaces_node() {
            let (ws, fs, progress) = setup();
            let file = Resource::file("/p/x").unwrap();
            ws.create_file(&file, b"", &progress).unwrap();
            fs.delete(Path::new("/ws/p/x")).unwrap();
            fs.mkdir(Path::new("/ws/p/x")).unwrap();

            ws.refresh_local(&project(), Depth::Infinite, &progress).unwrap();
            let folder = Resource::folder("/p/x").unwrap();
            assert!(ws.exists(&folder));
            let info = ws.info(&folder).unwrap();
            assert_eq!(info.kind(), ResourceKind::Folder);
            assert!(info.has(InfoFlags::LOCAL_EXISTS));
            assert_eq!(info.local_sync(), fs.stat(Path::new("/ws/p/x")).unwrap().modified);
        }

        #[test]
        fn missing_project_keeps_its_node() {
            let (ws, fs, progress) = setup();
            ws.create_file(&Resource::file("/p/f").unwrap(), b"", &progress).unwrap();
            fs.delete(Path::new("/ws/p/f")).unwrap();
            fs.delete(Path::new("/ws/p")).unwrap();

            ws.refresh_local(&project(), Depth::Infinite, &progress).unwrap();
            let info = ws.info(&project()).unwrap();
            assert!(!info.has(InfoFlags::LOCAL_EXISTS));
            assert!(ws.members(&project()).is_empty());
        }
    }

    #[test]
    fn closed_project_refresh_is_shallow() {
        let (ws, fs, progress) = setup();
        ws.close_project(&project(), &progress).unwrap();
        fs.write(Path::new("/ws/p/f"), b"").unwrap();
        ws.refresh_local(&Resource::Root, Depth::Infinite, &progress).unwrap();
        ws.refresh_local(&project(), Depth::Infinite, &progress).unwrap();
        assert!(ws.members(&project()).is_empty());
    }

    #[test]
    fn refresh_under_missing_parent_fails() {
        let (ws, _, progress) = setup();
        let err = ws
            .refresh_local(&Resource::file("/p/none/f").unwrap(), Depth::Zero, &progress)
            .unwrap_err();
        assert!(err.has_code(StatusCode::ResourceNotFound));
    }

    #[test]
    fn discard_keeps_tracked_ancestors_as_phantoms() {
        let mut tree = ElementTree::new();
        let info = |kind| {
            let mut i = ResourceInfo::new(kind, 0, 1);
            i.set_flag(InfoFlags::LOCAL_EXISTS, true);
            i
        };
        tree.insert(p("/p"), info(ResourceKind::Project)).unwrap();
        tree.insert(p("/p/a"), info(ResourceKind::Folder)).unwrap();
        let mut tracked = info(ResourceKind::File);
        tracked.set_sync_info(QualifiedName::new("vcs", "r"), Some(vec![1]));
        tree.insert(p("/p/a/t"), tracked).unwrap();
        tree.insert(p("/p/a/u"), info(ResourceKind::File)).unwrap();

        discard_subtree(&mut tree, &p("/p/a"));
        assert!(tree.get(&p("/p/a")).unwrap().is_phantom());
        assert!(tree.get(&p("/p/a/t")).unwrap().is_phantom());
        assert!(tree.get(&p("/p/a/u")).is_none());

        tree.get_mut(&p("/p/a/t"))
            .unwrap()
            .set_sync_info(QualifiedName::new("vcs", "r"), None);
        purge_phantoms(&mut tree, &p("/p/a"));
        assert!(tree.get(&p("/p/a")).is_none());
    }
}
