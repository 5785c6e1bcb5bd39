//! engine::attributes
//!
//! Resource flags a client may set, and session properties.

use super::validate::require_existing;
use super::{Workspace, WorkspaceError};
use crate::core::info::{InfoFlags, QualifiedName, ResourceInfo};
use crate::core::progress::Progress;
use crate::core::resource::Resource;
use crate::core::rule::SchedulingRule;

impl Workspace {
    pub fn set_derived(&self, resource: &Resource, on: bool, progress: &Progress) -> Result<(), WorkspaceError> {
        self.set_attribute(resource, InfoFlags::DERIVED, on, progress)
    }

    pub fn set_hidden(&self, resource: &Resource, on: bool, progress: &Progress) -> Result<(), WorkspaceError> {
        self.set_attribute(resource, InfoFlags::HIDDEN, on, progress)
    }

    pub fn set_team_private(
        &self,
        resource: &Resource,
        on: bool,
        progress: &Progress,
    ) -> Result<(), WorkspaceError> {
        self.set_attribute(resource, InfoFlags::TEAM_PRIVATE, on, progress)
    }

    fn set_attribute(
        &self,
        resource: &Resource,
        flag: InfoFlags,
        on: bool,
        progress: &Progress,
    ) -> Result<(), WorkspaceError> {
        self.edit_info(resource, progress, |info| info.set_flag(flag, on))
    }

    /// Attach a transient value to `resource`; `None` removes it.
    ///
    /// Session properties live on the info: dropped on delete, carried on
    /// move, never copied and never persisted.
    pub fn set_session_property(
        &self,
        resource: &Resource,
        key: QualifiedName,
        value: Option<String>,
        progress: &Progress,
    ) -> Result<(), WorkspaceError> {
        self.edit_info(resource, progress, |info| info.set_session_property(key, value))
    }

    pub fn session_property(&self, resource: &Resource, key: &QualifiedName) -> Option<String> {
        self.read_tree(|t| {
            t.existing(resource.path())
                .and_then(|i| i.session_property(key))
                .map(str::to_string)
        })
    }

    /// Edit the info of an existing `resource` under a rule on it.
    fn edit_info(
        &self,
        resource: &Resource,
        progress: &Progress,
        edit: impl FnOnce(&mut ResourceInfo),
    ) -> Result<(), WorkspaceError> {
        let rule = SchedulingRule::resource(resource.path().clone());
        self.execute(&rule, progress, || {
            self.checkpoint(progress)?;
            self.read_tree(|t| require_existing(t, resource).map(|_| ()))?;
            self.locked(|t| {
                if let Some(info) = t.get_mut(resource.path()) {
                    edit(info);
                }
            })
        })
    }
}
