//! engine::create
//!
//! Creating projects, folders and files, opening and closing projects, and
//! file contents.
//!
//! Creation writes to disk inside an unprotected window, then records the
//! new node. A phantom at the target path is revived in place, so a
//! synchronization partner tracking a deleted resource keeps tracking it
//! when it comes back. A target whose parent path differs from an existing
//! one only in case is created under the existing spelling.

use std::path::{Path, PathBuf};

use log::debug;

use super::validate::{
    require_absent, require_existing, require_open_parent, require_open_project, require_storage,
};
use super::{Workspace, WorkspaceError};
use crate::core::flags::{Depth, UpdateFlags};
use crate::core::info::{InfoFlags, ProjectDescription, ResourceInfo};
use crate::core::path::{validate_segment, ResourcePath};
use crate::core::paths::WorkspacePaths;
use crate::core::progress::Progress;
use crate::core::resource::{Resource, ResourceKind};
use crate::core::rule::SchedulingRule;
use crate::core::status::{Status, StatusCode};
use crate::core::tree::ElementTree;

impl Workspace {
    // =========================================================================
    // Projects
    // =========================================================================

    /// Create and open project `name`.
    ///
    /// `location` overrides the default `<root>/<name>`. Anything already
    /// on disk there becomes part of the project.
    pub fn create_project(
        &self,
        name: &str,
        location: Option<PathBuf>,
        progress: &Progress,
    ) -> Result<Resource, WorkspaceError> {
        let invalid = |message: String| {
            WorkspaceError::validation(StatusCode::InvalidName, None, message)
        };
        validate_segment(name).map_err(|e| invalid(e.to_string()))?;
        if WorkspacePaths::is_reserved_name(name) {
            return Err(invalid(format!("{name} is reserved")));
        }
        let project = Resource::project_named(name).map_err(|e| invalid(e.to_string()))?;
        let path = project.path().clone();

        self.execute(&SchedulingRule::resource(path.clone()), progress, || {
            self.checkpoint(progress)?;
            let target = self.read_tree(|t| {
                require_absent(t, &path, self.inner.case_sensitive)?;
                let target = location
                    .clone()
                    .unwrap_or_else(|| self.inner.paths.default_project_location(name));
                self.check_project_location(t, &path, &target)?;
                Ok::<_, WorkspaceError>(target)
            })?;

            self.unprotected(|| self.inner.fs.mkdir(&target))?
                .map_err(|e| local_failure(StatusCode::FailedWriteLocal, &path, e))?;
            self.touched_disk();

            self.locked(|t| {
                let mut info = self.fresh_info(t, &path, ResourceKind::Project);
                info.set_flag(InfoFlags::OPEN, true);
                info.set_project_description(ProjectDescription {
                    location: location.clone(),
                    ..ProjectDescription::default()
                });
                t.insert(path.clone(), info)
            })?
            .map_err(|e| tree_failure(&path, e))?;
            debug!("created project {name} at {}", target.display());

            self.refresh_local(&project, Depth::Infinite, progress)
        })?;
        Ok(project)
    }

    /// A custom project location may not overlap another project's.
    fn check_project_location(
        &self,
        tree: &ElementTree,
        path: &ResourcePath,
        target: &Path,
    ) -> Result<(), WorkspaceError> {
        for other in tree.children(&ResourcePath::root()) {
            if tree.existing(&other).is_none() {
                continue;
            }
            let Some(existing) = self.location_in(tree, &other) else {
                continue;
            };
            if existing.starts_with(target) || target.starts_with(&existing) {
                return Err(WorkspaceError::precondition(
                    StatusCode::LocationOverlap,
                    Some(path),
                    format!("{} overlaps project {other}", target.display()),
                ));
            }
        }
        Ok(())
    }

    /// Open `project` and rediscover its members from disk.
    pub fn open_project(&self, project: &Resource, progress: &Progress) -> Result<(), WorkspaceError> {
        let rule = SchedulingRule::resource(project.path().clone());
        self.execute(&rule, progress, || {
            self.checkpoint(progress)?;
            let open = self.read_tree(|t| require_existing(t, project).map(ResourceInfo::is_open))?;
            if open {
                return Ok(());
            }
            self.locked(|t| {
                if let Some(info) = t.get_mut(project.path()) {
                    info.set_flag(InfoFlags::OPEN, true);
                }
            })?;
            self.refresh_local(project, Depth::Infinite, progress)
        })
    }

    /// Close `project`, forgetting everything below it.
    pub fn close_project(&self, project: &Resource, progress: &Progress) -> Result<(), WorkspaceError> {
        let rule = SchedulingRule::resource(project.path().clone());
        self.execute(&rule, progress, || {
            self.checkpoint(progress)?;
            self.read_tree(|t| require_existing(t, project).map(|_| ()))?;
            self.locked(|t| {
                for child in t.children(project.path()) {
                    t.remove_subtree(&child);
                }
                if let Some(info) = t.get_mut(project.path()) {
                    info.set_flag(InfoFlags::OPEN, false);
                }
            })?;
            debug!("closed {project}");
            Ok(())
        })
    }

    // =========================================================================
    // Folders and files
    // =========================================================================

    /// Create `folder`, adopting a directory already on disk.
    pub fn create_folder(&self, folder: &Resource, progress: &Progress) -> Result<(), WorkspaceError> {
        self.create_member(folder, None, progress)
    }

    /// Create `file` holding `contents`.
    pub fn create_file(
        &self,
        file: &Resource,
        contents: &[u8],
        progress: &Progress,
    ) -> Result<(), WorkspaceError> {
        self.create_member(file, Some(contents), progress)
    }

    fn create_member(
        &self,
        resource: &Resource,
        contents: Option<&[u8]>,
        progress: &Progress,
    ) -> Result<(), WorkspaceError> {
        if resource.depth() < 2 {
            return Err(WorkspaceError::validation(
                StatusCode::InvalidPath,
                Some(resource.path()),
                format!("{resource} is not a folder or file path"),
            ));
        }
        let resource = self.read_tree(|t| self.resolve_resource(t, resource));
        let path = resource.path().clone();

        self.execute(&SchedulingRule::resource(path.clone()), progress, || {
            self.checkpoint(progress)?;
            let location = self.read_tree(|t| {
                require_absent(t, &path, self.inner.case_sensitive)?;
                require_open_parent(t, &path)?;
                require_storage(t, &path)?;
                self.location_in(t, &path).ok_or_else(|| {
                    WorkspaceError::precondition(
                        StatusCode::NotFoundLocal,
                        Some(&path),
                        format!("{path} has no filesystem location"),
                    )
                })
            })?;

            let adopted = self.unprotected(|| {
                let fs = self.inner.fs.as_ref();
                let adopted = resource.is_container() && fs.is_directory(&location);
                match contents {
                    Some(bytes) => fs.write(&location, bytes),
                    None => fs.mkdir(&location),
                }
                .map(|()| adopted)
            })?
            .map_err(|e| local_failure(StatusCode::FailedWriteLocal, &path, e))?;
            self.touched_disk();

            self.locked(|t| {
                let info = self.fresh_info(t, &path, resource.kind());
                // Phantom members survive under a container; a file has none.
                if !resource.is_container() {
                    for member in t.children(&path) {
                        t.remove_subtree(&member);
                    }
                }
                t.insert(path.clone(), info)
            })?
            .map_err(|e| tree_failure(&path, e))?;
            self.unprotected(|| self.resync_local(&path))?;

            if adopted {
                self.refresh_local(&resource, Depth::Infinite, progress)?;
            }
            progress.worked(1, "create");
            Ok(())
        })
    }

    /// A new info for `path`, reviving the phantom there if any.
    fn fresh_info(&self, tree: &ElementTree, path: &ResourcePath, kind: ResourceKind) -> ResourceInfo {
        let stamp = self.next_stamp();
        let mut info = match tree.get(path) {
            Some(phantom) if phantom.is_phantom() => {
                let mut revived = phantom.clone();
                revived.revive(kind, stamp);
                revived
            }
            _ => ResourceInfo::new(kind, self.next_node_id(), stamp),
        };
        info.set_flag(InfoFlags::LOCAL_EXISTS, true);
        info
    }

    /// Replace the bytes of `file`.
    ///
    /// Refuses a file changed on disk since it was last seen unless
    /// `FORCE` is given; `KEEP_HISTORY` records the old bytes first.
    pub fn set_contents(
        &self,
        file: &Resource,
        contents: &[u8],
        flags: UpdateFlags,
        progress: &Progress,
    ) -> Result<(), WorkspaceError> {
        let path = file.path().clone();
        self.execute(&SchedulingRule::resource(path.clone()), progress, || {
            self.checkpoint(progress)?;
            let (location, probes) = self.read_tree(|t| {
                require_existing(t, file)?;
                require_open_project(t, &path)?;
                let location = self.location_in(t, &path).ok_or_else(|| {
                    WorkspaceError::precondition(
                        StatusCode::NotFoundLocal,
                        Some(&path),
                        format!("{path} has no filesystem location"),
                    )
                })?;
                let probes = if flags.contains(UpdateFlags::FORCE) {
                    Vec::new()
                } else {
                    self.sync_probes(t, &path, Depth::Zero)
                };
                Ok::<_, WorkspaceError>((location, probes))
            })?;

            let stale = self.unprotected(|| self.unsynchronized(&probes))?;
            if !stale.is_empty() {
                return Err(self.out_of_sync_error(&stale));
            }

            self.unprotected(|| {
                let fs = self.inner.fs.as_ref();
                if flags.contains(UpdateFlags::KEEP_HISTORY) {
                    let old = fs
                        .read(&location)
                        .map_err(|e| local_failure(StatusCode::FailedReadLocal, &path, e))?;
                    self.inner
                        .stores
                        .history
                        .add_state(&path, old)
                        .map_err(|e| {
                            WorkspaceError::Failed(Status::error(
                                StatusCode::StoreFailed,
                                Some(path.clone()),
                                e.to_string(),
                            ))
                        })?;
                }
                fs.write(&location, contents)
                    .map_err(|e| local_failure(StatusCode::FailedWriteLocal, &path, e))
            })??;
            self.touched_disk();

            let stamp = self.next_stamp();
            self.locked(|t| {
                if let Some(info) = t.get_mut(&path) {
                    info.set_modification_stamp(stamp);
                    info.bump_content_id();
                    info.set_flag(InfoFlags::LOCAL_EXISTS, true);
                }
            })?;
            self.unprotected(|| self.resync_local(&path))?;
            progress.worked(1, "write");
            Ok(())
        })
    }

    /// The bytes of `file` on disk.
    pub fn read_contents(&self, file: &Resource) -> Result<Vec<u8>, WorkspaceError> {
        let path = file.path();
        let location = self.read_tree(|t| {
            require_existing(t, file)?;
            self.location_in(t, path).ok_or_else(|| {
                WorkspaceError::precondition(
                    StatusCode::NotFoundLocal,
                    Some(path),
                    format!("{path} has no filesystem location"),
                )
            })
        })?;
        self.inner
            .fs
            .read(&location)
            .map_err(|e| local_failure(StatusCode::FailedReadLocal, path, e))
    }
}

fn local_failure(code: StatusCode, path: &ResourcePath, err: impl std::fmt::Display) -> WorkspaceError {
    WorkspaceError::Failed(Status::error(code, Some(path.clone()), err.to_string()))
}

fn tree_failure(path: &ResourcePath, err: impl std::fmt::Display) -> WorkspaceError {
    WorkspaceError::Failed(Status::error(
        StatusCode::OperationFailed,
        Some(path.clone()),
        err.to_string(),
    ))
}
