//! engine::link
//!
//! Linked resources and virtual folders.
//!
//! A link is a folder or file whose bytes live at a location outside its
//! project's directory. Its description (project-relative path, location,
//! kind) sits in the owning project's description; the tree node carries
//! `LINKED`. A virtual folder is a link with no location at all: it has no
//! storage and can only hold other links.
//!
//! # Invariants
//!
//! - Only folders and files below a project can be links
//! - A link never sits inside another (non-virtual) link
//! - A link target never contains its own project or the workspace metadata

use std::path::Path;

use log::debug;

use super::delete::forget_link_description;
use super::move_cmd::add_link;
use super::refresh::discard_subtree;
use super::validate::{require_absent, require_open_parent};
use super::{into_result, Workspace, WorkspaceError};
use crate::core::config::RefreshMode;
use crate::core::flags::{Depth, UpdateFlags};
use crate::core::info::{InfoFlags, LinkDescription, LinkLocation, ResourceInfo};
use crate::core::path::ResourcePath;
use crate::core::progress::Progress;
use crate::core::resource::{Resource, ResourceKind};
use crate::core::rule::SchedulingRule;
use crate::core::status::{Status, StatusCode};
use crate::core::tree::ElementTree;
use crate::fs::FileStat;

impl Workspace {
    /// Make `resource` a link to `location`.
    ///
    /// `ALLOW_MISSING_LOCAL` accepts a missing target or an undefined
    /// variable. `REPLACE` first drops whatever resource is at `resource`
    /// from the tree, leaving the disk alone. `BACKGROUND_REFRESH`
    /// discovers the target's members on a worker thread once this
    /// operation has ended.
    pub fn create_link(
        &self,
        resource: &Resource,
        location: LinkLocation,
        flags: UpdateFlags,
        progress: &Progress,
    ) -> Result<(), WorkspaceError> {
        validate_link(resource, &location)?;
        let resource = self.read_tree(|t| self.resolve_resource(t, resource));
        let path = resource.path().clone();
        let is_virtual = matches!(location, LinkLocation::Virtual);

        self.execute(&SchedulingRule::resource(path.clone()), progress, || {
            self.checkpoint(progress)?;
            let (replacing, target, project_location) = self.read_tree(|t| {
                let replacing = self.check_link_site(t, &resource, flags)?;
                let target = match self.inner.variables.resolve(&location) {
                    Ok(target) => target,
                    Err(name) if flags.contains(UpdateFlags::ALLOW_MISSING_LOCAL) => {
                        debug!("link {path} uses undefined variable {name}");
                        None
                    }
                    Err(name) => {
                        return Err(WorkspaceError::precondition(
                            StatusCode::VariableUndefined,
                            Some(&path),
                            format!("path variable {name} is not defined"),
                        ))
                    }
                };
                Ok::<_, WorkspaceError>((replacing, target, self.location_in(t, &path.truncate(1))))
            })?;

            if let Some(target) = &target {
                self.check_overlap(&path, target, project_location.as_deref())?;
            }
            let stat = match &target {
                Some(target) => self.unprotected(|| self.inner.fs.stat(target))?,
                None => None,
            };
            check_target(&resource, &location, target.as_deref(), stat, flags)?;

            let link = LinkDescription {
                path: path.clone(),
                location: location.clone(),
                kind: resource.kind(),
            };
            self.locked(|t| {
                if replacing {
                    forget_link_description(t, &path);
                    discard_subtree(t, &path);
                }
                let info = self.link_info(t, &path, resource.kind(), is_virtual, stat.is_some());
                add_link(t, path.clone(), link);
                t.insert(path.clone(), info)
            })?
            .map_err(|e| WorkspaceError::precondition(StatusCode::ResourceNotFound, Some(&path), e.to_string()))?;
            debug!("linked {path} to {location}");

            let mut status = Status::multi(StatusCode::StoreFailed, format!("problems replacing {path}"));
            if replacing {
                for e in self.inner.stores.delete_all(&path, Depth::Infinite, false) {
                    status.add(Status::error(StatusCode::StoreFailed, Some(path.clone()), e.to_string()));
                }
            }

            if !is_virtual && stat.is_some() {
                let background = flags.contains(UpdateFlags::BACKGROUND_REFRESH)
                    || self.inner.config.link_refresh_mode() == RefreshMode::Background;
                if background {
                    self.inner.refresher.schedule(self.clone(), resource.clone());
                } else {
                    self.refresh_local(&resource, Depth::Infinite, progress)?;
                }
            }
            into_result(status)
        })
    }

    /// Create a virtual folder, a folder that can only hold links.
    pub fn create_virtual_folder(&self, folder: &Resource, progress: &Progress) -> Result<(), WorkspaceError> {
        self.create_link(folder, LinkLocation::Virtual, UpdateFlags::NONE, progress)
    }

    /// The info for a new link at `path`, reviving the phantom there if any.
    ///
    /// A file link drops the phantom members a folder left behind.
    fn link_info(
        &self,
        tree: &mut ElementTree,
        path: &ResourcePath,
        kind: ResourceKind,
        is_virtual: bool,
        exists: bool,
    ) -> ResourceInfo {
        let stamp = self.next_stamp();
        let mut info = match tree.get(path) {
            Some(phantom) if phantom.is_phantom() => {
                let mut revived = phantom.clone();
                revived.revive(kind, stamp);
                revived
            }
            _ => ResourceInfo::new(kind, self.next_node_id(), stamp),
        };
        if !kind.is_container() {
            for member in tree.children(path) {
                tree.remove_subtree(&member);
            }
        }
        info.set_flag(InfoFlags::LINKED, true);
        info.set_flag(InfoFlags::VIRTUAL, is_virtual);
        info.set_flag(InfoFlags::LOCAL_EXISTS, exists);
        info
    }

    /// Whether a link may go at `resource`; `true` when `REPLACE` drops
    /// an existing resource first.
    fn check_link_site(
        &self,
        tree: &ElementTree,
        resource: &Resource,
        flags: UpdateFlags,
    ) -> Result<bool, WorkspaceError> {
        let path = resource.path();
        require_open_parent(tree, path)?;
        for depth in 2..path.segment_count() {
            let ancestor = path.truncate(depth);
            if tree
                .existing(&ancestor)
                .is_some_and(|i| i.is_linked() && !i.is_virtual())
            {
                return Err(WorkspaceError::precondition(
                    StatusCode::LinkNotAllowed,
                    Some(path),
                    format!("{ancestor} is already a link"),
                ));
            }
        }
        match tree.existing(path) {
            Some(_) if flags.contains(UpdateFlags::REPLACE) => Ok(true),
            Some(_) => Err(WorkspaceError::precondition(
                StatusCode::ResourceExists,
                Some(path),
                format!("{path} already exists"),
            )),
            None => {
                require_absent(tree, path, self.inner.case_sensitive)?;
                Ok(false)
            }
        }
    }

    fn check_overlap(
        &self,
        path: &ResourcePath,
        target: &Path,
        project_location: Option<&Path>,
    ) -> Result<(), WorkspaceError> {
        let metadata = self.inner.paths.metadata_dir();
        let overlaps_project = project_location.is_some_and(|p| p.starts_with(target));
        if overlaps_project || target.starts_with(&metadata) || metadata.starts_with(target) {
            return Err(WorkspaceError::precondition(
                StatusCode::LocationOverlap,
                Some(path),
                format!("{} overlaps its project or the workspace metadata", target.display()),
            ));
        }
        Ok(())
    }
}

fn validate_link(resource: &Resource, location: &LinkLocation) -> Result<(), WorkspaceError> {
    if resource.depth() < 2 {
        return Err(WorkspaceError::validation(
            StatusCode::LinkNotAllowed,
            Some(resource.path()),
            format!("{resource} cannot be a link"),
        ));
    }
    if matches!(location, LinkLocation::Virtual) && resource.kind() != ResourceKind::Folder {
        return Err(WorkspaceError::validation(
            StatusCode::WrongLinkType,
            Some(resource.path()),
            "only folders can be virtual",
        ));
    }
    Ok(())
}

fn check_target(
    resource: &Resource,
    location: &LinkLocation,
    target: Option<&Path>,
    stat: Option<FileStat>,
    flags: UpdateFlags,
) -> Result<(), WorkspaceError> {
    let path = resource.path();
    match (target, stat) {
        (Some(_), Some(stat)) if stat.is_directory != resource.is_container() => {
            Err(WorkspaceError::precondition(
                StatusCode::WrongLinkType,
                Some(path),
                format!("{location} is not a {}", resource.kind()),
            ))
        }
        (Some(target), None) if !flags.contains(UpdateFlags::ALLOW_MISSING_LOCAL) => {
            Err(WorkspaceError::precondition(
                StatusCode::NotFoundLocal,
                Some(path),
                format!("{} does not exist", target.display()),
            ))
        }
        _ => Ok(()),
    }
}
