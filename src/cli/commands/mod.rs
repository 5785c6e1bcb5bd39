//! cli::commands
//!
//! Command dispatch and handlers.
//!
//! # Architecture
//!
//! Each command handler:
//! 1. Resolves its path arguments against the session tree
//! 2. Calls the engine to execute the command
//! 3. Prints the resulting tree, or the failure status
//!
//! Handlers do NOT touch the disk directly.

mod copy;
mod delete;
mod link;
mod move_cmd;
mod refresh;
mod touch;
mod tree;

pub use copy::copy;
pub use delete::delete;
pub use link::link;
pub use move_cmd::move_resource;
pub use refresh::refresh;
pub use touch::touch;
pub use tree::tree;

use std::process::ExitCode;

use anyhow::Result;

use crate::cli::args::Command;
use crate::cli::Session;
use crate::core::path::ResourcePath;
use crate::core::resource::Resource;
use crate::engine::WorkspaceError;

/// Dispatch a command to its handler.
pub fn dispatch(command: Command, session: &Session) -> Result<ExitCode> {
    match command {
        Command::Tree { path } => tree(session, path.as_deref()),
        Command::Refresh { path } => refresh(session, path.as_deref()),
        Command::Copy {
            source,
            destination,
            force,
        } => copy(session, &source, &destination, force),
        Command::Move {
            source,
            destination,
            force,
        } => move_resource(session, &source, &destination, force),
        Command::Remove {
            paths,
            force,
            keep_history,
        } => delete(session, &paths, force, keep_history),
        Command::Link {
            path,
            target,
            allow_missing,
            replace,
        } => link(session, &path, &target, allow_missing, replace),
        Command::Touch { path } => touch(session, &path),
    }
}

/// Print the outcome of a mutation: the whole tree, or the failure.
fn finish(session: &Session, outcome: Result<(), WorkspaceError>) -> Result<ExitCode> {
    match outcome {
        Ok(()) => {
            session.settle()?;
            tree::print(session, &Resource::root())?;
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            session.report(&e)?;
            Ok(ExitCode::from(1))
        }
    }
}

/// `raw` as a resource of the same kind as `source`.
fn destination(source: &Resource, raw: &str) -> Result<Resource> {
    Ok(source.with_path(ResourcePath::parse(raw)?)?)
}
