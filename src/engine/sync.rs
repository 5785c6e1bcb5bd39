//! engine::sync
//!
//! Synchronization info: opaque bytes a synchronization partner (a version
//! control provider, say) keeps per resource.
//!
//! A resource carrying sync info is tracked. Deleting a tracked resource
//! leaves a phantom behind so the partner still sees it; the phantom goes
//! once every partner has flushed its info.

use log::debug;

use super::refresh::purge_phantoms;
use super::{Workspace, WorkspaceError};
use crate::core::flags::Depth;
use crate::core::info::{QualifiedName, ResourceInfo};
use crate::core::progress::Progress;
use crate::core::resource::Resource;
use crate::core::rule::SchedulingRule;
use crate::core::status::StatusCode;
use crate::core::tree::{TreeError, Visit};

impl Workspace {
    /// Set `partner`'s bytes on `resource`; `None` removes them.
    ///
    /// Phantoms accept sync info. Setting bytes on a path the tree does not
    /// know creates a phantom there, provided its parent is known.
    pub fn set_sync_info(
        &self,
        resource: &Resource,
        partner: QualifiedName,
        bytes: Option<Vec<u8>>,
        progress: &Progress,
    ) -> Result<(), WorkspaceError> {
        let path = resource.path().clone();
        self.execute(&SchedulingRule::resource(path.clone()), progress, || {
            self.checkpoint(progress)?;
            let known = self.read_tree(|t| {
                let parent_known = path.parent().map_or(true, |p| t.contains(&p));
                match t.get(&path) {
                    Some(info) if info.kind() != resource.kind() => Err(WorkspaceError::precondition(
                        StatusCode::TypeMismatch,
                        Some(&path),
                        format!("{path} is a {}", info.kind()),
                    )),
                    Some(_) => Ok(true),
                    None if parent_known => Ok(false),
                    None => Err(WorkspaceError::precondition(
                        StatusCode::ResourceNotFound,
                        Some(&path),
                        format!("{path} is unknown"),
                    )),
                }
            })?;
            if !known && bytes.is_none() {
                return Ok(());
            }
            let node_id = self.next_node_id();
            self.locked(|t| {
                if !known {
                    let mut phantom = ResourceInfo::new(resource.kind(), node_id, 0);
                    phantom.make_phantom();
                    t.insert(path.clone(), phantom)?;
                    debug!("phantom {path} created for {partner}");
                }
                if let Some(info) = t.get_mut(&path) {
                    info.set_sync_info(partner, bytes);
                }
                Ok::<_, TreeError>(())
            })?
            .map_err(|e| {
                WorkspaceError::precondition(StatusCode::ResourceNotFound, Some(&path), e.to_string())
            })
        })
    }

    /// `partner`'s bytes on `resource`, phantoms included.
    pub fn sync_info(&self, resource: &Resource, partner: &QualifiedName) -> Option<Vec<u8>> {
        self.read_tree(|t| {
            t.get(resource.path())
                .and_then(|i| i.sync_info(partner))
                .map(<[u8]>::to_vec)
        })
    }

    /// Drop `partner`'s bytes from `resource` and its members down to
    /// `depth`, then remove phantoms nobody tracks any more.
    pub fn flush_sync_info(
        &self,
        partner: &QualifiedName,
        resource: &Resource,
        depth: Depth,
        progress: &Progress,
    ) -> Result<(), WorkspaceError> {
        let path = resource.path().clone();
        self.execute(&SchedulingRule::resource(path.clone()), progress, || {
            self.checkpoint(progress)?;
            self.locked(|t| {
                let mut tracked = Vec::new();
                t.visit(&path, depth, |p, info| {
                    if info.sync_info(partner).is_some() {
                        tracked.push(p.clone());
                    }
                    Visit::Continue
                });
                for p in &tracked {
                    if let Some(info) = t.get_mut(p) {
                        info.set_sync_info(partner.clone(), None);
                    }
                }
                purge_phantoms(t, &path);
                debug!("flushed {} entries of {partner} under {path}", tracked.len());
            })
        })
    }
}
