//! core::resource
//!
//! Resource handles: the stateless view objects callers pass around.
//!
//! # Variants
//!
//! A [`Resource`] is a tagged variant over the four kinds of workspace
//! entity. Each non-root variant wraps the same [`Handle`], so behavior that
//! is identical across kinds reads through [`Resource::path`] and behavior
//! that differs (parent kind at shallow depth, which kinds may nest where)
//! is a `match` on the variant.
//!
//! Handles carry no state. Two handles with the same path and kind are the
//! same resource; a handle can always be rebuilt from path + kind.
//!
//! # Depth Rules
//!
//! | Kind    | Segments |
//! |---------|----------|
//! | Root    | 0        |
//! | Project | 1        |
//! | Folder  | >= 2     |
//! | File    | >= 2     |

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::path::{ResourcePath, ROOT_PATH};

/// Errors from building a resource handle.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("a {kind} cannot live at '{path}' (depth {depth})")]
    WrongDepth {
        kind: ResourceKind,
        path: String,
        depth: usize,
    },
}

/// The kind of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Root,
    Project,
    Folder,
    File,
}

impl ResourceKind {
    /// Whether resources of this kind can have members.
    pub fn is_container(self) -> bool {
        !matches!(self, ResourceKind::File)
    }

    /// Whether a resource of this kind may sit at `depth` segments.
    pub fn allowed_at(self, depth: usize) -> bool {
        match self {
            ResourceKind::Root => depth == 0,
            ResourceKind::Project => depth == 1,
            ResourceKind::Folder | ResourceKind::File => depth >= 2,
        }
    }

    /// Stable single-byte code used in tree fingerprints.
    pub(crate) fn code(self) -> u8 {
        match self {
            ResourceKind::Root => 0,
            ResourceKind::Project => 1,
            ResourceKind::Folder => 2,
            ResourceKind::File => 3,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Root => "root",
            ResourceKind::Project => "project",
            ResourceKind::Folder => "folder",
            ResourceKind::File => "file",
        };
        write!(f, "{name}")
    }
}

/// Fields shared by every non-root resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle {
    path: ResourcePath,
}

impl Handle {
    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    pub fn name(&self) -> &str {
        self.path.last_segment().unwrap_or("")
    }
}

/// A path-addressed workspace entity.
///
/// # Example
///
/// ```
/// use canopy::core::resource::{Resource, ResourceKind};
///
/// let file = Resource::file("/proj/src/lib.rs").unwrap();
/// assert_eq!(file.kind(), ResourceKind::File);
/// assert_eq!(file.parent().unwrap().kind(), ResourceKind::Folder);
/// assert_eq!(file.project().unwrap().name(), "proj");
///
/// // A file directly under the root is not representable.
/// assert!(Resource::file("/lonely.txt").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
    Root,
    Project(Handle),
    Folder(Handle),
    File(Handle),
}

impl Resource {
    /// Build a handle of `kind` at `path`, enforcing the depth rules.
    pub fn new(kind: ResourceKind, path: ResourcePath) -> Result<Self, ResourceError> {
        let depth = path.segment_count();
        if !kind.allowed_at(depth) {
            return Err(ResourceError::WrongDepth {
                kind,
                path: path.to_string(),
                depth,
            });
        }
        Ok(match kind {
            ResourceKind::Root => Resource::Root,
            ResourceKind::Project => Resource::Project(Handle { path }),
            ResourceKind::Folder => Resource::Folder(Handle { path }),
            ResourceKind::File => Resource::File(Handle { path }),
        })
    }

    pub fn root() -> Self {
        Resource::Root
    }

    /// Build a project handle from its name.
    pub fn project_named(name: &str) -> Result<Self, crate::core::path::PathError> {
        let path = ResourcePath::root().append(name)?;
        Ok(Resource::Project(Handle { path }))
    }

    /// Convenience constructor for a folder from a path string.
    pub fn folder(path: &str) -> Result<Self, ParseResourceError> {
        Self::parse(ResourceKind::Folder, path)
    }

    /// Convenience constructor for a file from a path string.
    pub fn file(path: &str) -> Result<Self, ParseResourceError> {
        Self::parse(ResourceKind::File, path)
    }

    /// Parse `path` and build a handle of `kind`.
    pub fn parse(kind: ResourceKind, path: &str) -> Result<Self, ParseResourceError> {
        let path = ResourcePath::parse(path)?;
        Ok(Self::new(kind, path)?)
    }

    /// Build the handle implied by depth for containers: root, project or folder.
    pub fn container_at(path: ResourcePath) -> Self {
        match path.segment_count() {
            0 => Resource::Root,
            1 => Resource::Project(Handle { path }),
            _ => Resource::Folder(Handle { path }),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Root => ResourceKind::Root,
            Resource::Project(_) => ResourceKind::Project,
            Resource::Folder(_) => ResourceKind::Folder,
            Resource::File(_) => ResourceKind::File,
        }
    }

    pub fn path(&self) -> &ResourcePath {
        match self {
            Resource::Root => &ROOT_PATH,
            Resource::Project(h) | Resource::Folder(h) | Resource::File(h) => h.path(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Resource::Root => "",
            Resource::Project(h) | Resource::Folder(h) | Resource::File(h) => h.name(),
        }
    }

    /// Depth below the root (segment count).
    pub fn depth(&self) -> usize {
        self.path().segment_count()
    }

    /// The parent container.
    ///
    /// Projects answer the root, resources two segments deep answer their
    /// project, everything deeper answers a folder.
    pub fn parent(&self) -> Option<Resource> {
        match self {
            Resource::Root => None,
            Resource::Project(_) => Some(Resource::Root),
            Resource::Folder(h) | Resource::File(h) => {
                h.path().parent().map(Resource::container_at)
            }
        }
    }

    /// The owning project, or `None` for the root.
    pub fn project(&self) -> Option<Resource> {
        match self {
            Resource::Root => None,
            Resource::Project(_) => Some(self.clone()),
            Resource::Folder(h) | Resource::File(h) => {
                Some(Resource::Project(Handle {
                    path: h.path().truncate(1),
                }))
            }
        }
    }

    pub fn is_container(&self) -> bool {
        self.kind().is_container()
    }

    /// The same kind of resource at another path.
    pub fn with_path(&self, path: ResourcePath) -> Result<Resource, ResourceError> {
        Resource::new(self.kind(), path)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.path())
    }
}

/// Errors from [`Resource::parse`] and the string constructors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseResourceError {
    #[error(transparent)]
    Path(#[from] crate::core::path::PathError),

    #[error(transparent)]
    Resource(#[from] ResourceError),
}
