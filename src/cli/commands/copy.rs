//! copy command - Copy a resource to a new path

use std::process::ExitCode;

use anyhow::Result;

use super::{destination, finish};
use crate::cli::Session;
use crate::core::flags::UpdateFlags;

pub fn copy(session: &Session, source: &str, target: &str, force: bool) -> Result<ExitCode> {
    let source = session.resource(source)?;
    let target = destination(&source, target)?;
    let flags = if force { UpdateFlags::FORCE } else { UpdateFlags::NONE };
    finish(session, session.ws.copy(&source, &target, flags, &session.progress))
}
