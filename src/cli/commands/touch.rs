//! touch command - Give a resource a new modification stamp

use std::process::ExitCode;

use anyhow::Result;

use super::finish;
use crate::cli::Session;

pub fn touch(session: &Session, path: &str) -> Result<ExitCode> {
    let resource = session.resource(path)?;
    finish(session, session.ws.touch(&resource, &session.progress))
}
