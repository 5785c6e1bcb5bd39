//! engine::alias
//!
//! Alias tracking: resources that share backing locations.
//!
//! Every project location and every resolvable link target is indexed by
//! location. Two resources are aliases when one's location is a prefix of
//! the other's: a link pointing into another project's folder, or two
//! links onto one directory. After a copy, move or delete changes the disk
//! at some location, every alias of that location is refreshed so its tree
//! reflects the change.
//!
//! The index is rebuilt from the committed tree at each commit. Refreshes
//! the held rule covers run inside the operation, before its commit; the
//! rest are handed to the background refresher.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use log::{debug, trace, warn};

use super::{Workspace, WorkspaceError};
use crate::core::flags::Depth;
use crate::core::info::ResourceInfo;
use crate::core::path::{PathError, ResourcePath};
use crate::core::progress::Progress;
use crate::core::resource::{Resource, ResourceKind};
use crate::core::rule::SchedulingRule;
use crate::core::tree::ElementTree;

/// Location-keyed index of resources with their own backing location.
#[derive(Debug, Clone, Default)]
pub struct AliasManager {
    by_location: BTreeMap<PathBuf, Vec<ResourcePath>>,
}

impl AliasManager {
    pub fn insert(&mut self, location: PathBuf, path: ResourcePath) {
        let paths = self.by_location.entry(location).or_default();
        if !paths.contains(&path) {
            paths.push(path);
        }
    }

    pub fn len(&self) -> usize {
        self.by_location.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_location.is_empty()
    }

    /// Resource paths whose backing storage overlaps `location`.
    ///
    /// An indexed location at or above `location` yields the resource path
    /// that maps onto `location` itself; one below yields the indexed
    /// resource.
    pub fn overlapping(&self, location: &Path) -> Vec<ResourcePath> {
        let mut out = Vec::new();
        for (indexed, paths) in &self.by_location {
            if let Ok(rest) = location.strip_prefix(indexed) {
                let Some(segments) = relative_segments(rest) else {
                    continue;
                };
                for path in paths {
                    if let Ok(mapped) = join_segments(path, &segments) {
                        out.push(mapped);
                    }
                }
            } else if indexed.starts_with(location) {
                out.extend(paths.iter().cloned());
            }
        }
        out.sort();
        out.dedup();
        out
    }
}

fn relative_segments(rest: &Path) -> Option<Vec<String>> {
    rest.components()
        .map(|c| match c {
            Component::Normal(s) => s.to_str().map(str::to_string),
            _ => None,
        })
        .collect()
}

fn join_segments(base: &ResourcePath, segments: &[String]) -> Result<ResourcePath, PathError> {
    segments.iter().try_fold(base.clone(), |acc, s| acc.append(s))
}

impl Workspace {
    pub(crate) fn rebuild_aliases(&self, tree: &ElementTree) {
        let mut aliases = AliasManager::default();
        aliases.insert(self.inner.paths.root().to_path_buf(), ResourcePath::root());
        for (path, info) in tree.subtree(&ResourcePath::root()) {
            let indexed = match info.kind() {
                ResourceKind::Project => true,
                _ => info.is_linked() && !info.is_virtual(),
            };
            if !indexed || info.is_phantom() {
                continue;
            }
            if let Some(location) = self.location_in(tree, path) {
                aliases.insert(location, path.clone());
            }
        }
        trace!("alias index rebuilt: {} entries", aliases.len());
        *self.inner.aliases() = aliases;
    }

    /// Refresh every alias of `locations`, skipping paths under `exclude`.
    ///
    /// Must run inside the operation holding `rule`.
    pub(crate) fn refresh_aliases(
        &self,
        locations: &[PathBuf],
        exclude: &[ResourcePath],
        rule: &SchedulingRule,
        progress: &Progress,
    ) -> Result<(), WorkspaceError> {
        let mut targets: Vec<ResourcePath> = {
            let aliases = self.inner.aliases();
            locations
                .iter()
                .flat_map(|l| aliases.overlapping(l))
                .filter(|p| !exclude.iter().any(|e| e.is_prefix_of(p)))
                .collect()
        };
        targets.sort();
        targets.dedup();
        // Refreshing an ancestor covers its descendants.
        let mut roots: Vec<ResourcePath> = Vec::new();
        for target in targets {
            if !roots.iter().any(|r| r.is_prefix_of(&target)) {
                roots.push(target);
            }
        }

        for path in roots {
            let resource = self.read_tree(|t| nearest_existing(t, &path));
            let Some(resource) = resource else {
                continue;
            };
            if rule.contains(&SchedulingRule::resource(resource.path().clone())) {
                debug!("refreshing alias {}", resource.path());
                self.refresh_local(&resource, Depth::Infinite, progress)?;
            } else {
                debug!("scheduling background refresh of alias {}", resource.path());
                self.inner.refresher.schedule(self.clone(), resource);
            }
        }
        Ok(())
    }
}

/// The resource at `path`, or its nearest existing ancestor below the root.
fn nearest_existing(tree: &ElementTree, path: &ResourcePath) -> Option<Resource> {
    let mut current = Some(path.clone());
    while let Some(candidate) = current {
        if candidate.is_root() {
            return None;
        }
        if let Some(info) = tree.existing(&candidate) {
            return resource_for(info, candidate);
        }
        current = candidate.parent();
    }
    None
}

fn resource_for(info: &ResourceInfo, path: ResourcePath) -> Option<Resource> {
    match Resource::new(info.kind(), path) {
        Ok(resource) => Some(resource),
        Err(e) => {
            warn!("alias with inconsistent kind: {e}");
            None
        }
    }
}
