//! rm command - Delete resources

use std::process::ExitCode;

use anyhow::Result;

use super::finish;
use crate::cli::Session;
use crate::core::flags::UpdateFlags;

pub fn delete(session: &Session, paths: &[String], force: bool, keep_history: bool) -> Result<ExitCode> {
    let resources = paths
        .iter()
        .map(|raw| session.resource(raw))
        .collect::<Result<Vec<_>>>()?;
    let mut flags = UpdateFlags::NONE;
    if force {
        flags = flags | UpdateFlags::FORCE;
    }
    if keep_history {
        flags = flags | UpdateFlags::KEEP_HISTORY;
    }
    finish(session, session.ws.delete(&resources, flags, &session.progress))
}
