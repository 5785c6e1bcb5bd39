//! cli
//!
//! Command-line interface over a session workspace.
//!
//! # Responsibilities
//!
//! - Parse command-line arguments and global flags
//! - Open a workspace on `--root` and register its projects
//! - Delegate to command handlers and print the outcome
//!
//! # Architecture
//!
//! The CLI keeps no state between invocations. Each run opens the
//! workspace (taking the on-disk lock), registers every top-level
//! directory as an open project, which refreshes it from disk, then runs
//! one command through the engine. Failures print their status and exit
//! with code 1.

pub mod args;
pub mod commands;

pub use args::{Cli, Command};

use std::process::ExitCode;

use anyhow::{Context as _, Result};
use log::{debug, warn};

use crate::core::path::{validate_segment, ResourcePath};
use crate::core::paths::WorkspacePaths;
use crate::core::progress::Progress;
use crate::core::resource::Resource;
use crate::engine::{Workspace, WorkspaceError};

/// One CLI invocation's workspace.
pub struct Session {
    pub ws: Workspace,
    pub json: bool,
    pub progress: Progress,
}

impl Session {
    /// Open the workspace at `root` and register its projects.
    pub fn open(root: &std::path::Path, json: bool) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("workspace root {} not found", root.display()))?;
        let ws = Workspace::open(&root)?;
        let progress = Progress::new();

        let mut names = ws
            .fs()
            .list(&root)
            .with_context(|| format!("cannot list {}", root.display()))?;
        names.retain(|name| {
            !WorkspacePaths::is_reserved_name(name) && ws.fs().is_directory(&root.join(name))
        });
        for name in names {
            if let Err(e) = validate_segment(&name) {
                warn!("skipping directory {name}: {e}");
                continue;
            }
            ws.create_project(&name, None, &progress)?;
            debug!("registered project {name}");
        }
        Ok(Self { ws, json, progress })
    }

    /// The existing resource at the workspace path `raw`.
    pub fn resource(&self, raw: &str) -> Result<Resource> {
        let path = ResourcePath::parse(raw)?;
        self.ws
            .resource_at(&path)
            .with_context(|| format!("no resource at {path}"))
    }

    /// Print a failed operation's status.
    pub fn report(&self, err: &WorkspaceError) -> Result<()> {
        let status = err.status().simplify();
        if self.json {
            eprintln!("{}", serde_json::to_string_pretty(&status)?);
        } else {
            eprintln!("error: {status}");
        }
        Ok(())
    }

    /// Let background work settle before printing.
    pub fn settle(&self) -> Result<()> {
        self.ws.wait_for_refresh()?;
        self.ws.wait_for_notifications()?;
        Ok(())
    }
}

/// Run the CLI application.
///
/// This is the main entry point called from `main.rs`.
pub fn run(cli: Cli) -> Result<ExitCode> {
    let session = Session::open(&cli.root, cli.json)?;
    commands::dispatch(cli.command, &session)
}
