//! refresh command - Reconcile the tree with the disk

use std::process::ExitCode;

use anyhow::Result;

use super::finish;
use crate::cli::Session;
use crate::core::flags::Depth;
use crate::core::resource::Resource;

pub fn refresh(session: &Session, path: Option<&str>) -> Result<ExitCode> {
    let target = match path {
        Some(raw) => session.resource(raw)?,
        None => Resource::root(),
    };
    finish(
        session,
        session
            .ws
            .refresh_local(&target, Depth::Infinite, &session.progress),
    )
}
