//! engine::validate
//!
//! Argument validation and structural preconditions shared by the
//! mutation commands.
//!
//! Validation functions are pure and run before any rule is taken.
//! Precondition functions read the tree the operation sees (the working
//! tree) and return the first violation.
//!
//! # Case variants
//!
//! On a case-insensitive workspace an "absent" check also looks for a
//! sibling whose name differs only by case and reports
//! [`StatusCode::CaseVariantExists`] instead of treating the names as
//! distinct. Destinations are first rewritten onto existing ancestors
//! (`/p/FOO/bar` becomes `/p/Foo/bar` when `/p/Foo` exists).

use std::path::PathBuf;

use super::{Workspace, WorkspaceError};
use crate::core::flags::Depth;
use crate::core::info::{InfoFlags, ResourceInfo};
use crate::core::path::{segment_eq_ignore_case, ResourcePath};
use crate::core::resource::{Resource, ResourceKind};
use crate::core::status::{Status, StatusCode};
use crate::core::tree::{ElementTree, Visit};

// =============================================================================
// Validation
// =============================================================================

/// Copy and move arguments: no root, no moving into oneself, same kinds.
pub(crate) fn validate_transfer(source: &Resource, destination: &Resource) -> Result<(), WorkspaceError> {
    if source.path().is_root() {
        return Err(WorkspaceError::validation(
            StatusCode::InvalidPath,
            Some(source.path()),
            "the workspace root cannot be copied or moved",
        ));
    }
    if destination.path().is_root() {
        return Err(WorkspaceError::validation(
            StatusCode::InvalidDestination,
            Some(destination.path()),
            "the workspace root is not a valid destination",
        ));
    }
    if source.path().is_prefix_of(destination.path()) {
        return Err(WorkspaceError::validation(
            StatusCode::DestinationUnderSource,
            Some(destination.path()),
            format!("{} is {} or lies under it", destination.path(), source.path()),
        ));
    }
    if source.kind() != destination.kind() {
        return Err(WorkspaceError::validation(
            StatusCode::TypeMismatch,
            Some(destination.path()),
            format!("cannot turn a {} into a {}", source.kind(), destination.kind()),
        ));
    }
    Ok(())
}

// =============================================================================
// Preconditions
// =============================================================================

/// The existing info of `resource`, whose kind must match.
pub(crate) fn require_existing<'t>(
    tree: &'t ElementTree,
    resource: &Resource,
) -> Result<&'t ResourceInfo, WorkspaceError> {
    match tree.existing(resource.path()) {
        Some(info) if info.kind() == resource.kind() => Ok(info),
        Some(info) => Err(WorkspaceError::precondition(
            StatusCode::ResourceNotFound,
            Some(resource.path()),
            format!("{} is a {}, not a {}", resource.path(), info.kind(), resource.kind()),
        )),
        None => Err(WorkspaceError::precondition(
            StatusCode::ResourceNotFound,
            Some(resource.path()),
            format!("{} does not exist", resource.path()),
        )),
    }
}

/// Nothing exists at `path`, nor (case-insensitively) a case variant of it.
///
/// Phantoms do not count.
pub(crate) fn require_absent(
    tree: &ElementTree,
    path: &ResourcePath,
    case_sensitive: bool,
) -> Result<(), WorkspaceError> {
    if tree.existing(path).is_some() {
        return Err(WorkspaceError::precondition(
            StatusCode::ResourceExists,
            Some(path),
            format!("{path} already exists"),
        ));
    }
    if !case_sensitive {
        if let Some(variant) = case_variant(tree, path) {
            return Err(WorkspaceError::precondition(
                StatusCode::CaseVariantExists,
                Some(path),
                format!("{variant} already exists with different case"),
            ));
        }
    }
    Ok(())
}

/// An existing sibling of `path` whose name matches ignoring case.
fn case_variant(tree: &ElementTree, path: &ResourcePath) -> Option<ResourcePath> {
    let parent = path.parent()?;
    let name = path.last_segment()?;
    tree.children(&parent)
        .into_iter()
        .filter(|c| c != path && tree.existing(c).is_some())
        .find(|c| c.last_segment().is_some_and(|n| segment_eq_ignore_case(n, name)))
}

/// The parent of `path` exists, is a container and sits in an open project.
pub(crate) fn require_open_parent(tree: &ElementTree, path: &ResourcePath) -> Result<(), WorkspaceError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    let info = tree.existing(&parent).ok_or_else(|| {
        WorkspaceError::precondition(
            StatusCode::ResourceNotFound,
            Some(&parent),
            format!("parent {parent} does not exist"),
        )
    })?;
    if !info.kind().is_container() {
        return Err(WorkspaceError::precondition(
            StatusCode::TypeMismatch,
            Some(&parent),
            format!("parent {parent} is a file"),
        ));
    }
    if path.segment_count() >= 2 {
        require_open_project(tree, path)?;
    }
    Ok(())
}

/// The project owning `path` is open.
pub(crate) fn require_open_project(tree: &ElementTree, path: &ResourcePath) -> Result<(), WorkspaceError> {
    let project = path.truncate(1);
    match tree.existing(&project) {
        Some(info) if info.is_open() => Ok(()),
        Some(_) => Err(WorkspaceError::precondition(
            StatusCode::ProjectClosed,
            Some(&project),
            format!("project {project} is closed"),
        )),
        None => Err(WorkspaceError::precondition(
            StatusCode::ResourceNotFound,
            Some(&project),
            format!("project {project} does not exist"),
        )),
    }
}

/// Virtual folders have no storage: only links may be placed in them.
pub(crate) fn require_storage(tree: &ElementTree, path: &ResourcePath) -> Result<(), WorkspaceError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if tree.existing(&parent).is_some_and(ResourceInfo::is_virtual) {
        return Err(WorkspaceError::precondition(
            StatusCode::InvalidDestination,
            Some(path),
            format!("virtual folder {parent} can only hold links"),
        ));
    }
    Ok(())
}

// =============================================================================
// Case-variant resolution
// =============================================================================

impl Workspace {
    /// Rewrite `path`'s ancestors onto existing case variants.
    ///
    /// The last segment is kept as given; callers check it with
    /// [`require_absent`]. Case-sensitive workspaces get `path` back.
    pub(crate) fn resolve_destination(&self, tree: &ElementTree, path: &ResourcePath) -> ResourcePath {
        if self.inner.case_sensitive {
            return path.clone();
        }
        let (Some(parent), Some(name)) = (path.parent(), path.last_segment()) else {
            return path.clone();
        };
        tree.resolve_ignoring_case(&parent)
            .and_then(|resolved| resolved.append(name).ok())
            .unwrap_or_else(|| path.clone())
    }

    /// `resource` with its ancestors resolved by [`Self::resolve_destination`].
    pub(crate) fn resolve_resource(&self, tree: &ElementTree, resource: &Resource) -> Resource {
        let resolved = self.resolve_destination(tree, resource.path());
        resource.with_path(resolved).unwrap_or_else(|_| resource.clone())
    }
}

// =============================================================================
// Out-of-sync detection
// =============================================================================

/// What the tree remembers about one resource's disk state.
#[derive(Debug, Clone)]
pub(crate) struct SyncProbe {
    pub(crate) path: ResourcePath,
    pub(crate) location: PathBuf,
    pub(crate) kind: ResourceKind,
    pub(crate) local_sync: i64,
}

impl Workspace {
    /// Probes for every resource at and below `path` that claims to exist
    /// locally. Virtual folders and missing link targets are skipped.
    pub(crate) fn sync_probes(&self, tree: &ElementTree, path: &ResourcePath, depth: Depth) -> Vec<SyncProbe> {
        let mut probes = Vec::new();
        tree.visit(path, depth, |p, info| {
            if info.is_phantom() {
                return Visit::SkipChildren;
            }
            if info.has(InfoFlags::LOCAL_EXISTS) && !p.is_root() {
                if let Some(location) = self.location_in(tree, p) {
                    probes.push(SyncProbe {
                        path: p.clone(),
                        location,
                        kind: info.kind(),
                        local_sync: info.local_sync(),
                    });
                }
            }
            Visit::Continue
        });
        probes
    }

    /// Paths whose disk state no longer matches the probe.
    ///
    /// Touches the filesystem; call inside an unprotected window.
    pub(crate) fn unsynchronized(&self, probes: &[SyncProbe]) -> Vec<ResourcePath> {
        probes
            .iter()
            .filter(|probe| match self.inner.fs.stat(&probe.location) {
                None => true,
                Some(stat) if probe.kind == ResourceKind::File => {
                    stat.is_directory || stat.modified != probe.local_sync
                }
                Some(stat) => !stat.is_directory,
            })
            .map(|probe| probe.path.clone())
            .collect()
    }

    /// An out-of-sync precondition failure listing every offending path.
    pub(crate) fn out_of_sync_error(&self, paths: &[ResourcePath]) -> WorkspaceError {
        let mut status = Status::multi(
            StatusCode::OutOfSync,
            "resources are not in sync with the filesystem",
        );
        for path in paths {
            status.add(Status::error(
                StatusCode::OutOfSync,
                Some(path.clone()),
                format!("{path} is out of sync with the filesystem"),
            ));
        }
        WorkspaceError::Precondition(status)
    }
}
