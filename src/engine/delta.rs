//! engine::delta
//!
//! The net tree change an operation committed.
//!
//! A delta compares the committed tree before and after an operation over
//! the operation's rule scope only. Phantoms count as absent, so phantom
//! conversions show up as removals and revivals as additions, while edits
//! to a phantom's sync state do not show up at all. A removal and an
//! addition of the same node id are paired as a move.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::core::info::{InfoFlags, ResourceInfo};
use crate::core::path::ResourcePath;
use crate::core::resource::ResourceKind;
use crate::core::rule::SchedulingRule;
use crate::core::tree::ElementTree;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaKind {
    Added,
    Removed,
    Changed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeltaEntry {
    pub path: ResourcePath,
    pub kind: DeltaKind,
    pub resource_kind: ResourceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moved_from: Option<ResourcePath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moved_to: Option<ResourcePath>,
}

/// Entries sorted by path, at most one per path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResourceDelta {
    entries: Vec<DeltaEntry>,
}

impl ResourceDelta {
    /// Compare `old` and `new` within the subtrees `rule` names.
    pub fn compute(old: &ElementTree, new: &ElementTree, rule: &SchedulingRule) -> Self {
        let mut scopes: Vec<&ResourcePath> = rule.paths();
        scopes.sort();
        let mut roots: Vec<&ResourcePath> = Vec::new();
        for scope in scopes {
            if !roots.iter().any(|r| r.is_prefix_of(scope)) {
                roots.push(scope);
            }
        }

        let mut entries = Vec::new();
        for scope in roots {
            let before = existing_under(old, scope);
            let after = existing_under(new, scope);
            for (path, info) in &before {
                match after.get(path) {
                    None => entries.push(entry(path, DeltaKind::Removed, info)),
                    Some(now) if differs(info, now) => {
                        entries.push(entry(path, DeltaKind::Changed, now))
                    }
                    Some(_) => {}
                }
            }
            for (path, info) in &after {
                if !before.contains_key(path) {
                    entries.push(entry(path, DeltaKind::Added, info));
                }
            }
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        let mut delta = ResourceDelta { entries };
        delta.pair_moves(old, new);
        delta
    }

    fn pair_moves(&mut self, old: &ElementTree, new: &ElementTree) {
        let removed: HashMap<u64, ResourcePath> = self
            .entries
            .iter()
            .filter(|e| e.kind == DeltaKind::Removed)
            .filter_map(|e| old.get(&e.path).map(|i| (i.node_id(), e.path.clone())))
            .collect();
        let added: HashMap<u64, ResourcePath> = self
            .entries
            .iter()
            .filter(|e| e.kind == DeltaKind::Added)
            .filter_map(|e| new.get(&e.path).map(|i| (i.node_id(), e.path.clone())))
            .collect();
        for e in &mut self.entries {
            match e.kind {
                DeltaKind::Removed => {
                    let id = old.get(&e.path).map(ResourceInfo::node_id);
                    e.moved_to = id.and_then(|id| added.get(&id)).cloned();
                }
                DeltaKind::Added => {
                    let id = new.get(&e.path).map(ResourceInfo::node_id);
                    e.moved_from = id.and_then(|id| removed.get(&id)).cloned();
                }
                DeltaKind::Changed => {}
            }
        }
    }

    pub fn entries(&self) -> &[DeltaEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn find(&self, path: &ResourcePath) -> Option<&DeltaEntry> {
        self.entries.iter().find(|e| &e.path == path)
    }

    pub fn paths_of(&self, kind: DeltaKind) -> Vec<&ResourcePath> {
        self.entries
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| &e.path)
            .collect()
    }

    /// Fold a later delta into this one.
    ///
    /// Added then removed cancels out; removed then added is a change.
    pub fn absorb(&mut self, later: ResourceDelta) {
        let mut merged: BTreeMap<ResourcePath, DeltaEntry> = self
            .entries
            .drain(..)
            .map(|e| (e.path.clone(), e))
            .collect();
        for next in later.entries {
            match merged.remove(&next.path) {
                None => {
                    merged.insert(next.path.clone(), next);
                }
                Some(prev) => match (prev.kind, next.kind) {
                    (DeltaKind::Added, DeltaKind::Removed) => {}
                    (DeltaKind::Added, _) => {
                        merged.insert(next.path.clone(), DeltaEntry { kind: DeltaKind::Added, ..next });
                    }
                    (DeltaKind::Removed, DeltaKind::Added) => {
                        merged.insert(
                            next.path.clone(),
                            DeltaEntry {
                                kind: DeltaKind::Changed,
                                moved_from: None,
                                moved_to: None,
                                ..next
                            },
                        );
                    }
                    _ => {
                        merged.insert(next.path.clone(), next);
                    }
                },
            }
        }
        self.entries = merged.into_values().collect();
    }
}

fn existing_under<'a>(
    tree: &'a ElementTree,
    scope: &'a ResourcePath,
) -> BTreeMap<&'a ResourcePath, &'a ResourceInfo> {
    tree.subtree(scope).filter(|(_, i)| !i.is_phantom()).collect()
}

fn entry(path: &ResourcePath, kind: DeltaKind, info: &ResourceInfo) -> DeltaEntry {
    DeltaEntry {
        path: path.clone(),
        kind,
        resource_kind: info.kind(),
        moved_from: None,
        moved_to: None,
    }
}

fn differs(a: &ResourceInfo, b: &ResourceInfo) -> bool {
    let mut flags_a = a.flags();
    let mut flags_b = b.flags();
    flags_a.set(InfoFlags::PHANTOM, false);
    flags_b.set(InfoFlags::PHANTOM, false);
    a.kind() != b.kind()
        || flags_a != flags_b
        || a.modification_stamp() != b.modification_stamp()
        || a.content_id() != b.content_id()
        || a.project_description() != b.project_description()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> ResourcePath {
        ResourcePath::parse(s).unwrap()
    }

    fn info(kind: ResourceKind, id: u64) -> ResourceInfo {
        let mut i = ResourceInfo::new(kind, id, 1);
        i.set_flag(InfoFlags::LOCAL_EXISTS, true);
        i
    }

    fn base() -> ElementTree {
        let mut tree = ElementTree::new();
        tree.insert(p("/p"), info(ResourceKind::Project, 1)).unwrap();
        tree.insert(p("/p/a"), info(ResourceKind::Folder, 2)).unwrap();
        tree.insert(p("/p/a/f"), info(ResourceKind::File, 3)).unwrap();
        tree
    }

    #[test]
    fn move_pairs_by_node_id() {
        let old = base();
        let mut new = old.clone();
        new.move_subtree(&p("/p/a"), &p("/p/b")).unwrap();
        let delta = ResourceDelta::compute(&old, &new, &SchedulingRule::resource(p("/p")));

        let removed = delta.find(&p("/p/a/f")).unwrap();
        assert_eq!(removed.kind, DeltaKind::Removed);
        assert_eq!(removed.moved_to, Some(p("/p/b/f")));
        let added = delta.find(&p("/p/b")).unwrap();
        assert_eq!(added.moved_from, Some(p("/p/a")));
    }

    #[test]
    fn phantom_sync_edits_are_invisible() {
        let mut old = base();
        old.get_mut(&p("/p/a/f")).unwrap().make_phantom();
        let mut new = old.clone();
        new.get_mut(&p("/p/a/f"))
            .unwrap()
            .set_sync_info(crate::core::info::QualifiedName::new("vcs", "r"), Some(vec![1]));
        let delta = ResourceDelta::compute(&old, &new, &SchedulingRule::root());
        assert!(delta.is_empty());
    }

    #[test]
    fn scope_limits_comparison() {
        let old = base();
        let mut new = old.clone();
        new.get_mut(&p("/p/a/f")).unwrap().set_modification_stamp(9);
        let delta = ResourceDelta::compute(&old, &new, &SchedulingRule::resource(p("/p/x")));
        assert!(delta.is_empty());
        let delta = ResourceDelta::compute(&old, &new, &SchedulingRule::resource(p("/p/a")));
        assert_eq!(delta.paths_of(DeltaKind::Changed), vec![&p("/p/a/f")]);
    }

    #[test]
    fn absorb_cancels_add_then_remove() {
        let add = ResourceDelta {
            entries: vec![entry(&p("/p/x"), DeltaKind::Added, &info(ResourceKind::File, 5))],
        };
        let remove = ResourceDelta {
            entries: vec![entry(&p("/p/x"), DeltaKind::Removed, &info(ResourceKind::File, 5))],
        };
        let mut merged = add.clone();
        merged.absorb(remove.clone());
        assert!(merged.is_empty());

        let mut back = remove;
        back.absorb(add);
        assert_eq!(back.entries()[0].kind, DeltaKind::Changed);
    }
}
