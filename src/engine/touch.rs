//! engine::touch
//!
//! Marking a resource as changed without touching its bytes.

use log::trace;

use super::validate::require_existing;
use super::{Workspace, WorkspaceError};
use crate::core::progress::Progress;
use crate::core::resource::Resource;
use crate::core::rule::SchedulingRule;

impl Workspace {
    /// Give `resource` a new modification stamp and invalidate its content id.
    ///
    /// The disk is not consulted, so a touch cancelled before the operation
    /// ends leaves no trace.
    pub fn touch(&self, resource: &Resource, progress: &Progress) -> Result<(), WorkspaceError> {
        let rule = SchedulingRule::resource(resource.path().clone());
        self.execute(&rule, progress, || {
            self.checkpoint(progress)?;
            self.read_tree(|t| require_existing(t, resource).map(|_| ()))?;
            let stamp = self.next_stamp();
            self.locked(|t| {
                if let Some(info) = t.get_mut(resource.path()) {
                    info.set_modification_stamp(stamp);
                    info.bump_content_id();
                }
            })?;
            trace!("touched {resource} (stamp {stamp})");
            progress.worked(1, "touch");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::status::StatusCode;

    #[test]
    fn touch_changes_stamp_and_content_id() {
        let ws = Workspace::in_memory().unwrap();
        let progress = Progress::new();
        ws.create_project("p", None, &progress).unwrap();
        let file = Resource::file("/p/f").unwrap();
        ws.create_file(&file, b"", &progress).unwrap();
        let before = ws.info(&file).unwrap();

        ws.touch(&file, &progress).unwrap();

        let after = ws.info(&file).unwrap();
        assert!(after.modification_stamp() > before.modification_stamp());
        assert_ne!(after.content_id(), before.content_id());
        assert_eq!(after.node_id(), before.node_id());
    }

    #[test]
    fn root_can_be_touched() {
        let ws = Workspace::in_memory().unwrap();
        ws.touch(&Resource::root(), &Progress::new()).unwrap();
    }

    #[test]
    fn missing_resource_is_not_found() {
        let ws = Workspace::in_memory().unwrap();
        let err = ws
            .touch(&Resource::folder("/p/none").unwrap(), &Progress::new())
            .unwrap_err();
        assert!(err.has_code(StatusCode::ResourceNotFound));
    }
}
