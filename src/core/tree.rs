//! core::tree
//!
//! The element tree: a copy-on-write map from path to [`ResourceInfo`].
//!
//! # Architecture
//!
//! The tree is a single ordered map behind an `Arc`. Cloning a tree is a
//! pointer copy; the first edit through a clone copies the map
//! (`Arc::make_mut`). That gives snapshots for free: the workspace keeps a
//! committed tree and a working tree, and an operation that ends either
//! grafts its scope from working into committed (commit) or from committed
//! back into working (discard).
//!
//! Every tree carries a generation id. A handle whose generation no longer
//! matches the workspace's committed generation is stale.
//!
//! # Invariants
//!
//! - The root path always has an info
//! - Every non-root path's parent has an info (no orphans)
//! - Subtrees are contiguous in key order (see [`ResourcePath`])

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use super::flags::Depth;
use super::info::{InfoFlags, LinkDescription, ProjectDescription, ResourceInfo};
use super::path::{segment_eq_ignore_case, ResourcePath};
use super::resource::ResourceKind;
use super::rule::SchedulingRule;

/// What a visitor wants next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// Descend into members.
    Continue,
    /// Do not visit this node's members.
    SkipChildren,
    /// End the traversal.
    Stop,
}

/// Hierarchical, versioned snapshot of resource infos.
#[derive(Debug, Clone)]
pub struct ElementTree {
    nodes: Arc<BTreeMap<ResourcePath, ResourceInfo>>,
    generation: u64,
}

impl ElementTree {
    /// A tree holding only the root.
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        let mut root = ResourceInfo::new(ResourceKind::Root, 0, 0);
        root.set_flag(InfoFlags::LOCAL_EXISTS, true);
        nodes.insert(ResourcePath::root(), root);
        Self {
            nodes: Arc::new(nodes),
            generation: 0,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether two trees share the same underlying map (no edits since clone).
    pub fn shares_storage_with(&self, other: &ElementTree) -> bool {
        Arc::ptr_eq(&self.nodes, &other.nodes)
    }

    pub fn get(&self, path: &ResourcePath) -> Option<&ResourceInfo> {
        self.nodes.get(path)
    }

    /// Mutable access; copies the map on first write after a snapshot.
    pub fn get_mut(&mut self, path: &ResourcePath) -> Option<&mut ResourceInfo> {
        if !self.nodes.contains_key(path) {
            return None;
        }
        Arc::make_mut(&mut self.nodes).get_mut(path)
    }

    pub fn contains(&self, path: &ResourcePath) -> bool {
        self.nodes.contains_key(path)
    }

    /// Info for an existing (non-phantom) resource.
    pub fn existing(&self, path: &ResourcePath) -> Option<&ResourceInfo> {
        self.get(path).filter(|i| !i.is_phantom())
    }

    /// Insert or replace the info at `path`.
    ///
    /// The parent must already be present.
    pub fn insert(&mut self, path: ResourcePath, info: ResourceInfo) -> Result<(), TreeError> {
        if let Some(parent) = path.parent() {
            if !self.nodes.contains_key(&parent) {
                return Err(TreeError::MissingParent(path.to_string()));
            }
        }
        Arc::make_mut(&mut self.nodes).insert(path, info);
        Ok(())
    }

    /// Every path at or below `path`, in order.
    pub fn subtree_paths(&self, path: &ResourcePath) -> Vec<ResourcePath> {
        self.subtree(path).map(|(p, _)| p.clone()).collect()
    }

    /// Iterate `path` and its descendants in key order.
    pub fn subtree<'a>(
        &'a self,
        path: &'a ResourcePath,
    ) -> impl Iterator<Item = (&'a ResourcePath, &'a ResourceInfo)> + 'a {
        self.nodes
            .range((Bound::Included(path), Bound::Unbounded))
            .take_while(move |(p, _)| path.is_prefix_of(p))
    }

    /// Direct members of `path`, including phantoms.
    pub fn children(&self, path: &ResourcePath) -> Vec<ResourcePath> {
        let depth = path.segment_count() + 1;
        self.subtree(path)
            .filter(|(p, _)| p.segment_count() == depth)
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// Remove `path` and everything below it, returning the removed entries.
    pub fn remove_subtree(&mut self, path: &ResourcePath) -> Vec<(ResourcePath, ResourceInfo)> {
        let keys = self.subtree_paths(path);
        if keys.is_empty() {
            return Vec::new();
        }
        let nodes = Arc::make_mut(&mut self.nodes);
        keys.into_iter()
            .filter_map(|k| nodes.remove(&k).map(|info| (k, info)))
            .collect()
    }

    /// Move a subtree to a new location, preserving infos (and node ids).
    pub fn move_subtree(&mut self, from: &ResourcePath, to: &ResourcePath) -> Result<(), TreeError> {
        if from.is_prefix_of(to) {
            return Err(TreeError::MoveIntoSelf {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        if let Some(parent) = to.parent() {
            if !self.nodes.contains_key(&parent) {
                return Err(TreeError::MissingParent(to.to_string()));
            }
        }
        let removed = self.remove_subtree(from);
        let nodes = Arc::make_mut(&mut self.nodes);
        for (path, info) in removed {
            if let Some(target) = path.rebase(from, to) {
                nodes.insert(target, info);
            }
        }
        Ok(())
    }

    /// Depth-first, pre-order traversal starting at `path`.
    ///
    /// Returns `true` if the visitor stopped the traversal early.
    pub fn visit<F>(&self, path: &ResourcePath, depth: Depth, mut visitor: F) -> bool
    where
        F: FnMut(&ResourcePath, &ResourceInfo) -> Visit,
    {
        let base = path.segment_count();
        let mut skip_under: Option<ResourcePath> = None;
        for (p, info) in self.subtree(path) {
            if !depth.reaches(p.segment_count() - base) {
                continue;
            }
            if let Some(skip) = &skip_under {
                if skip.is_ancestor_of(p) {
                    continue;
                }
                skip_under = None;
            }
            match visitor(p, info) {
                Visit::Continue => {}
                Visit::SkipChildren => skip_under = Some(p.clone()),
                Visit::Stop => return true,
            }
        }
        false
    }

    /// Replace, in `self`, every subtree covered by `rule` with the same
    /// subtrees from `source`.
    pub fn graft(&mut self, source: &ElementTree, rule: &SchedulingRule) {
        let mut scopes: Vec<&ResourcePath> = rule.paths();
        scopes.sort();
        for scope in scopes {
            if scope.is_root() {
                self.nodes = Arc::clone(&source.nodes);
                return;
            }
            self.remove_subtree(scope);
            let incoming: Vec<(ResourcePath, ResourceInfo)> = source
                .subtree(scope)
                .map(|(p, i)| (p.clone(), i.clone()))
                .collect();
            if incoming.is_empty() {
                continue;
            }
            let nodes = Arc::make_mut(&mut self.nodes);
            for (p, i) in incoming {
                nodes.insert(p, i);
            }
        }
        for scope in rule.paths() {
            if scope.segment_count() >= 2 {
                self.graft_links(source, scope);
            }
        }
    }

    /// Link descriptions live on the project info, outside a nested scope.
    /// Carry the ones under `scope` along with the subtree.
    fn graft_links(&mut self, source: &ElementTree, scope: &ResourcePath) {
        let project = scope.truncate(1);
        let Some(relative) = scope.strip_prefix(&project) else {
            return;
        };
        let incoming: Vec<LinkDescription> = source
            .get(&project)
            .and_then(ResourceInfo::project_description)
            .map(|d| {
                d.links
                    .values()
                    .filter(|l| relative.is_prefix_of(&l.path))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        let Some(info) = self.get_mut(&project) else {
            return;
        };
        if info.project_description().is_none() {
            if incoming.is_empty() {
                return;
            }
            info.set_project_description(ProjectDescription::default());
        }
        if let Some(desc) = info.project_description_mut() {
            desc.remove_links_under(&relative);
            for link in incoming {
                desc.add_link(link);
            }
        }
    }

    /// Resolve `path` against existing names ignoring case.
    ///
    /// Each segment prefers an exact match and falls back to a
    /// case-insensitive sibling. Returns `None` if some segment has no
    /// match at all.
    pub fn resolve_ignoring_case(&self, path: &ResourcePath) -> Option<ResourcePath> {
        let mut current = ResourcePath::root();
        for segment in path.segments() {
            let exact = current.append(segment).ok()?;
            if self.existing(&exact).is_some() {
                current = exact;
                continue;
            }
            let variant = self
                .children(&current)
                .into_iter()
                .filter(|c| self.existing(c).is_some())
                .find(|c| c.last_segment().is_some_and(|n| segment_eq_ignore_case(n, segment)))?;
            current = variant;
        }
        Some(current)
    }

    /// An existing resource whose path differs from `path` only by case.
    pub fn find_case_variant(&self, path: &ResourcePath) -> Option<ResourcePath> {
        self.resolve_ignoring_case(path).filter(|found| found != path)
    }

    /// SHA-256 over every node's path, kind, flags and stamps.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (path, info) in self.nodes.iter() {
            hasher.update(path.to_string().as_bytes());
            hasher.update([0u8, info.kind().code()]);
            hasher.update(info.flags().bits().to_le_bytes());
            hasher.update(info.modification_stamp().to_le_bytes());
            hasher.update(info.local_sync().to_le_bytes());
            hasher.update(info.content_id().to_le_bytes());
            if let Some(desc) = info.project_description() {
                for link in desc.links.values() {
                    hasher.update(link.path.to_string().as_bytes());
                    hasher.update(link.location.to_string().as_bytes());
                }
            }
        }
        hex::encode(hasher.finalize())
    }
}

impl Default for ElementTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Structural errors from tree edits. These indicate caller bugs.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("parent of '{0}' is not in the tree")]
    MissingParent(String),

    #[error("cannot move '{from}' into its own subtree '{to}'")]
    MoveIntoSelf { from: String, to: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> ResourcePath {
        ResourcePath::parse(s).unwrap()
    }

    fn info(kind: ResourceKind) -> ResourceInfo {
        let mut i = ResourceInfo::new(kind, 0, 0);
        i.set_flag(InfoFlags::LOCAL_EXISTS, true);
        i
    }

    fn sample() -> ElementTree {
        let mut tree = ElementTree::new();
        tree.insert(p("/p"), info(ResourceKind::Project)).unwrap();
        tree.insert(p("/p/a"), info(ResourceKind::Folder)).unwrap();
        tree.insert(p("/p/a/x.txt"), info(ResourceKind::File)).unwrap();
        tree.insert(p("/p/b.txt"), info(ResourceKind::File)).unwrap();
        tree.insert(p("/q"), info(ResourceKind::Project)).unwrap();
        tree
    }

    #[test]
    fn insert_requires_parent() {
        let mut tree = ElementTree::new();
        let err = tree.insert(p("/p/a"), info(ResourceKind::Folder)).unwrap_err();
        assert!(matches!(err, TreeError::MissingParent(_)));
    }

    #[test]
    fn children_are_direct_members() {
        let tree = sample();
        assert_eq!(tree.children(&p("/p")), vec![p("/p/a"), p("/p/b.txt")]);
        assert_eq!(tree.children(&ResourcePath::root()), vec![p("/p"), p("/q")]);
    }

    #[test]
    fn snapshot_is_isolated_from_edits() {
        let mut tree = sample();
        let snapshot = tree.clone();
        assert!(tree.shares_storage_with(&snapshot));

        tree.remove_subtree(&p("/p/a"));
        assert!(!tree.contains(&p("/p/a/x.txt")));
        assert!(snapshot.contains(&p("/p/a/x.txt")));
        assert!(!tree.shares_storage_with(&snapshot));
    }

    #[test]
    fn move_subtree_rebases_paths() {
        let mut tree = sample();
        tree.move_subtree(&p("/p/a"), &p("/q/a2")).unwrap();
        assert!(tree.contains(&p("/q/a2/x.txt")));
        assert!(!tree.contains(&p("/p/a")));
    }

    #[test]
    fn move_into_self_rejected() {
        let mut tree = sample();
        let err = tree.move_subtree(&p("/p/a"), &p("/p/a/inner")).unwrap_err();
        assert!(matches!(err, TreeError::MoveIntoSelf { .. }));
    }

    #[test]
    fn visit_stop_ends_early() {
        let tree = sample();
        let mut seen = Vec::new();
        let stopped = tree.visit(&p("/p"), Depth::Infinite, |path, _| {
            seen.push(path.clone());
            if path == &p("/p/a") {
                Visit::Stop
            } else {
                Visit::Continue
            }
        });
        assert!(stopped);
        assert_eq!(seen, vec![p("/p"), p("/p/a")]);
    }

    #[test]
    fn visit_skip_children() {
        let tree = sample();
        let mut seen = Vec::new();
        tree.visit(&p("/p"), Depth::Infinite, |path, _| {
            seen.push(path.clone());
            if path == &p("/p/a") {
                Visit::SkipChildren
            } else {
                Visit::Continue
            }
        });
        assert_eq!(seen, vec![p("/p"), p("/p/a"), p("/p/b.txt")]);
    }

    #[test]
    fn visit_respects_depth() {
        let tree = sample();
        let mut seen = 0;
        tree.visit(&p("/p"), Depth::One, |_, _| {
            seen += 1;
            Visit::Continue
        });
        assert_eq!(seen, 3);
    }

    #[test]
    fn graft_replaces_only_scope() {
        let committed = sample();
        let mut working = committed.clone();
        working.remove_subtree(&p("/p/a"));
        working.remove_subtree(&p("/q"));

        // Restore /p from committed; /q edit stays.
        working.graft(&committed, &SchedulingRule::resource(p("/p")));
        assert!(working.contains(&p("/p/a/x.txt")));
        assert!(!working.contains(&p("/q")));
    }

    #[test]
    fn graft_carries_link_descriptions_of_nested_scope() {
        use crate::core::info::LinkLocation;

        let mut committed = sample();
        committed
            .get_mut(&p("/p"))
            .unwrap()
            .set_project_description(ProjectDescription::default());
        let mut working = committed.clone();
        let desc = working
            .get_mut(&p("/p"))
            .unwrap()
            .project_description_mut()
            .unwrap();
        desc.add_link(LinkDescription {
            path: p("/a/lnk"),
            location: LinkLocation::Virtual,
            kind: ResourceKind::Folder,
        });
        desc.add_link(LinkDescription {
            path: p("/other"),
            location: LinkLocation::Virtual,
            kind: ResourceKind::Folder,
        });

        committed.graft(&working, &SchedulingRule::resource(p("/p/a")));
        let links = &committed.get(&p("/p")).unwrap().project_description().unwrap().links;
        assert!(links.contains_key(&p("/a/lnk")));
        assert!(!links.contains_key(&p("/other")));
    }

    #[test]
    fn case_variant_lookup() {
        let mut tree = sample();
        tree.insert(p("/p/Foo"), info(ResourceKind::Folder)).unwrap();
        tree.insert(p("/p/Foo/bar"), info(ResourceKind::File)).unwrap();

        assert_eq!(tree.find_case_variant(&p("/p/foo")), Some(p("/p/Foo")));
        assert_eq!(tree.find_case_variant(&p("/p/FOO/bar")), Some(p("/p/Foo/bar")));
        assert_eq!(tree.find_case_variant(&p("/p/Foo")), None);
        assert_eq!(tree.find_case_variant(&p("/p/zzz")), None);
    }

    #[test]
    fn fingerprint_tracks_content() {
        let tree = sample();
        let same = tree.clone();
        assert_eq!(tree.fingerprint(), same.fingerprint());

        let mut edited = tree.clone();
        edited.get_mut(&p("/p/b.txt")).unwrap().set_modification_stamp(9);
        assert_ne!(tree.fingerprint(), edited.fingerprint());
    }
}
