//! mv command - Move or rename a resource

use std::process::ExitCode;

use anyhow::Result;

use super::{destination, finish};
use crate::cli::Session;
use crate::core::flags::UpdateFlags;

pub fn move_resource(session: &Session, source: &str, target: &str, force: bool) -> Result<ExitCode> {
    let source = session.resource(source)?;
    let target = destination(&source, target)?;
    let flags = if force { UpdateFlags::FORCE } else { UpdateFlags::NONE };
    finish(
        session,
        session
            .ws
            .move_resource(&source, &target, flags, &session.progress),
    )
}
