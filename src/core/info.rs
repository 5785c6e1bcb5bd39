//! core::info
//!
//! The mutable metadata bound to a path in the element tree.
//!
//! # Types
//!
//! - [`InfoFlags`] - per-resource flag bitset
//! - [`ResourceInfo`] - the record itself
//! - [`LinkLocation`] / [`LinkDescription`] - where a linked resource points
//! - [`ProjectDescription`] - per-project satellite data (links, location)
//!
//! # Invariants
//!
//! - `LINKED` is only set on infos at depth >= 2
//! - A phantom info has `PHANTOM` set, `LOCAL_EXISTS` cleared, no
//!   modification stamp and no markers
//! - `modification_stamp == NULL_STAMP` iff the info is a phantom

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::path::ResourcePath;
use super::resource::ResourceKind;

/// Stamp value meaning "no stamp".
pub const NULL_STAMP: i64 = -1;

/// Flag bitset stored on each info.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct InfoFlags(u32);

impl InfoFlags {
    pub const EMPTY: InfoFlags = InfoFlags(0);
    pub const PHANTOM: InfoFlags = InfoFlags(1 << 0);
    pub const LINKED: InfoFlags = InfoFlags(1 << 1);
    pub const DERIVED: InfoFlags = InfoFlags(1 << 2);
    pub const HIDDEN: InfoFlags = InfoFlags(1 << 3);
    pub const TEAM_PRIVATE: InfoFlags = InfoFlags(1 << 4);
    pub const LOCAL_EXISTS: InfoFlags = InfoFlags(1 << 5);
    /// Project is open. Only meaningful on project infos.
    pub const OPEN: InfoFlags = InfoFlags(1 << 6);
    /// Folder with no backing location; its members must be links.
    pub const VIRTUAL: InfoFlags = InfoFlags(1 << 7);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: InfoFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn set(&mut self, other: InfoFlags, on: bool) {
        if on {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }

    pub const fn union(self, other: InfoFlags) -> InfoFlags {
        InfoFlags(self.0 | other.0)
    }
}

impl std::ops::BitOr for InfoFlags {
    type Output = InfoFlags;

    fn bitor(self, rhs: InfoFlags) -> InfoFlags {
        self.union(rhs)
    }
}

/// A namespaced property key, e.g. `("org.team", "revision")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QualifiedName {
    pub qualifier: String,
    pub local: String,
}

impl QualifiedName {
    pub fn new(qualifier: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            qualifier: qualifier.into(),
            local: local.into(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.qualifier, self.local)
    }
}

/// Identifier of a marker owned by the marker store.
pub type MarkerId = u64;

/// The metadata record bound to one path in a tree snapshot.
///
/// Infos are plain values. Callers outside an operation only ever see
/// clones; the element tree owns the live copies.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceInfo {
    kind: ResourceKind,
    flags: InfoFlags,
    /// Stable across moves; used to pair removals with additions in deltas.
    node_id: u64,
    modification_stamp: i64,
    /// Filesystem timestamp (ms) observed at the last sync with the disk.
    local_sync: i64,
    content_id: u64,
    markers: Vec<MarkerId>,
    session_properties: Option<Arc<HashMap<QualifiedName, String>>>,
    sync_info: Option<Arc<BTreeMap<QualifiedName, Vec<u8>>>>,
    project: Option<Arc<ProjectDescription>>,
}

impl ResourceInfo {
    /// A fresh, existing info of `kind`.
    pub fn new(kind: ResourceKind, node_id: u64, stamp: i64) -> Self {
        Self {
            kind,
            flags: InfoFlags::EMPTY,
            node_id,
            modification_stamp: stamp,
            local_sync: NULL_STAMP,
            content_id: 0,
            markers: Vec::new(),
            session_properties: None,
            sync_info: None,
            project: None,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn flags(&self) -> InfoFlags {
        self.flags
    }

    pub fn has(&self, flag: InfoFlags) -> bool {
        self.flags.contains(flag)
    }

    pub fn set_flag(&mut self, flag: InfoFlags, on: bool) {
        self.flags.set(flag, on);
    }

    pub fn node_id(&self) -> u64 {
        self.node_id
    }

    pub fn is_phantom(&self) -> bool {
        self.has(InfoFlags::PHANTOM)
    }

    pub fn is_linked(&self) -> bool {
        self.has(InfoFlags::LINKED)
    }

    pub fn is_virtual(&self) -> bool {
        self.has(InfoFlags::VIRTUAL)
    }

    pub fn is_open(&self) -> bool {
        self.has(InfoFlags::OPEN)
    }

    pub fn modification_stamp(&self) -> i64 {
        self.modification_stamp
    }

    pub fn set_modification_stamp(&mut self, stamp: i64) {
        self.modification_stamp = stamp;
    }

    pub fn local_sync(&self) -> i64 {
        self.local_sync
    }

    pub fn set_local_sync(&mut self, timestamp: i64) {
        self.local_sync = timestamp;
    }

    pub fn content_id(&self) -> u64 {
        self.content_id
    }

    /// Invalidate cached content identity.
    pub fn bump_content_id(&mut self) {
        self.content_id = self.content_id.wrapping_add(1);
    }

    pub fn markers(&self) -> &[MarkerId] {
        &self.markers
    }

    pub fn add_marker(&mut self, id: MarkerId) {
        self.markers.push(id);
    }

    pub fn session_property(&self, key: &QualifiedName) -> Option<&str> {
        self.session_properties
            .as_ref()
            .and_then(|m| m.get(key))
            .map(String::as_str)
    }

    pub fn set_session_property(&mut self, key: QualifiedName, value: Option<String>) {
        let map = Arc::make_mut(self.session_properties.get_or_insert_with(Default::default));
        match value {
            Some(v) => {
                map.insert(key, v);
            }
            None => {
                map.remove(&key);
            }
        }
        if map.is_empty() {
            self.session_properties = None;
        }
    }

    /// Whether any synchronization partner tracks this resource.
    pub fn has_sync_info(&self) -> bool {
        self.sync_info.as_ref().is_some_and(|m| !m.is_empty())
    }

    pub fn sync_info(&self, partner: &QualifiedName) -> Option<&[u8]> {
        self.sync_info
            .as_ref()
            .and_then(|m| m.get(partner))
            .map(Vec::as_slice)
    }

    pub fn set_sync_info(&mut self, partner: QualifiedName, bytes: Option<Vec<u8>>) {
        let map = Arc::make_mut(self.sync_info.get_or_insert_with(Default::default));
        match bytes {
            Some(b) => {
                map.insert(partner, b);
            }
            None => {
                map.remove(&partner);
            }
        }
        if map.is_empty() {
            self.sync_info = None;
        }
    }

    pub fn project_description(&self) -> Option<&ProjectDescription> {
        self.project.as_deref()
    }

    pub fn set_project_description(&mut self, description: ProjectDescription) {
        self.project = Some(Arc::new(description));
    }

    /// Edit the project description in place (copy-on-write).
    pub fn project_description_mut(&mut self) -> Option<&mut ProjectDescription> {
        self.project.as_mut().map(Arc::make_mut)
    }

    /// Convert into a phantom placeholder.
    ///
    /// Keeps sync info and node id; drops everything describing local state.
    pub fn make_phantom(&mut self) {
        self.flags = InfoFlags::PHANTOM;
        self.modification_stamp = NULL_STAMP;
        self.local_sync = NULL_STAMP;
        self.markers.clear();
        self.session_properties = None;
        self.project = None;
    }

    /// Bring a phantom back to life with a fresh stamp.
    pub fn revive(&mut self, kind: ResourceKind, stamp: i64) {
        self.kind = kind;
        self.flags.set(InfoFlags::PHANTOM, false);
        self.modification_stamp = stamp;
        self.bump_content_id();
    }
}

/// Where a linked resource points.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LinkLocation {
    /// A concrete filesystem location.
    Path { path: PathBuf },
    /// A location relative to a path variable, e.g. `${SDK}/include`.
    Variable { name: String, rest: PathBuf },
    /// No backing location (virtual folder).
    Virtual,
}

impl LinkLocation {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        LinkLocation::Path { path: path.into() }
    }

    pub fn variable(name: impl Into<String>, rest: impl Into<PathBuf>) -> Self {
        LinkLocation::Variable {
            name: name.into(),
            rest: rest.into(),
        }
    }

    /// Parse `${NAME}/rest`, `virtual:` or a plain path.
    pub fn parse(raw: &str) -> Self {
        if raw == "virtual:" {
            return LinkLocation::Virtual;
        }
        if let Some(stripped) = raw.strip_prefix("${") {
            if let Some((name, rest)) = stripped.split_once('}') {
                return LinkLocation::Variable {
                    name: name.to_string(),
                    rest: PathBuf::from(rest.trim_start_matches('/')),
                };
            }
        }
        LinkLocation::Path {
            path: PathBuf::from(raw),
        }
    }
}

impl fmt::Display for LinkLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkLocation::Path { path } => write!(f, "{}", path.display()),
            LinkLocation::Variable { name, rest } => {
                write!(f, "${{{}}}/{}", name, rest.display())
            }
            LinkLocation::Virtual => write!(f, "virtual:"),
        }
    }
}

/// A link entry held in the owning project's description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkDescription {
    /// Project-relative path of the linked resource.
    pub path: ResourcePath,
    pub location: LinkLocation,
    pub kind: ResourceKind,
}

/// Satellite data stored on a project's info.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectDescription {
    /// Location override; `None` means `<workspace root>/<project name>`.
    pub location: Option<PathBuf>,
    /// Links keyed by project-relative path.
    pub links: BTreeMap<ResourcePath, LinkDescription>,
}

impl ProjectDescription {
    pub fn link(&self, relative: &ResourcePath) -> Option<&LinkDescription> {
        self.links.get(relative)
    }

    pub fn add_link(&mut self, link: LinkDescription) {
        self.links.insert(link.path.clone(), link);
    }

    /// Remove every link at or below `relative`, returning them.
    pub fn remove_links_under(&mut self, relative: &ResourcePath) -> Vec<LinkDescription> {
        let keys: Vec<ResourcePath> = self
            .links
            .keys()
            .filter(|k| relative.is_prefix_of(k))
            .cloned()
            .collect();
        keys.into_iter()
            .filter_map(|k| self.links.remove(&k))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qn(local: &str) -> QualifiedName {
        QualifiedName::new("test", local)
    }

    #[test]
    fn flag_set_and_clear() {
        let mut flags = InfoFlags::EMPTY;
        flags.set(InfoFlags::DERIVED | InfoFlags::HIDDEN, true);
        assert!(flags.contains(InfoFlags::DERIVED));
        flags.set(InfoFlags::DERIVED, false);
        assert!(!flags.contains(InfoFlags::DERIVED));
        assert!(flags.contains(InfoFlags::HIDDEN));
    }

    #[test]
    fn phantom_conversion_clears_local_state() {
        let mut info = ResourceInfo::new(ResourceKind::File, 7, 3);
        info.set_flag(InfoFlags::LOCAL_EXISTS | InfoFlags::DERIVED, true);
        info.add_marker(11);
        info.set_sync_info(qn("vcs"), Some(vec![1, 2]));
        info.make_phantom();

        assert!(info.is_phantom());
        assert!(!info.has(InfoFlags::LOCAL_EXISTS));
        assert_eq!(info.modification_stamp(), NULL_STAMP);
        assert!(info.markers().is_empty());
        assert_eq!(info.sync_info(&qn("vcs")), Some(&[1u8, 2][..]));
        assert_eq!(info.node_id(), 7);
    }

    #[test]
    fn revive_restores_stamp() {
        let mut info = ResourceInfo::new(ResourceKind::File, 1, 0);
        info.make_phantom();
        info.revive(ResourceKind::File, 42);
        assert!(!info.is_phantom());
        assert_eq!(info.modification_stamp(), 42);
    }

    #[test]
    fn empty_maps_collapse() {
        let mut info = ResourceInfo::new(ResourceKind::File, 1, 0);
        info.set_sync_info(qn("a"), Some(vec![0]));
        assert!(info.has_sync_info());
        info.set_sync_info(qn("a"), None);
        assert!(!info.has_sync_info());

        info.set_session_property(qn("k"), Some("v".into()));
        assert_eq!(info.session_property(&qn("k")), Some("v"));
        info.set_session_property(qn("k"), None);
        assert_eq!(info.session_property(&qn("k")), None);
    }

    #[test]
    fn link_location_parse() {
        assert_eq!(LinkLocation::parse("virtual:"), LinkLocation::Virtual);
        assert_eq!(
            LinkLocation::parse("${SDK}/include/x"),
            LinkLocation::variable("SDK", "include/x")
        );
        assert_eq!(
            LinkLocation::parse("/opt/data"),
            LinkLocation::path("/opt/data")
        );
        assert_eq!(
            LinkLocation::variable("SDK", "inc").to_string(),
            "${SDK}/inc"
        );
    }

    #[test]
    fn remove_links_under_prefix() {
        let mut desc = ProjectDescription::default();
        for path in ["/a", "/a/b", "/c"] {
            desc.add_link(LinkDescription {
                path: ResourcePath::parse(path).unwrap(),
                location: LinkLocation::Virtual,
                kind: ResourceKind::Folder,
            });
        }
        let removed = desc.remove_links_under(&ResourcePath::parse("/a").unwrap());
        assert_eq!(removed.len(), 2);
        assert_eq!(desc.links.len(), 1);
    }
}
