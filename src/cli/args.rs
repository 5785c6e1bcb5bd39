//! cli::args
//!
//! Command-line argument definitions using clap derive.
//!
//! # Global Flags
//!
//! These flags are available on all commands:
//! - `--root <dir>`: Workspace root (defaults to the current directory)
//! - `--debug`: Enable debug logging
//! - `--json`: Print trees and failures as JSON

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// canopy - a versioned resource tree over a directory
#[derive(Parser, Debug)]
#[command(name = "canopy")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Workspace root; every top-level directory is a project
    #[arg(long, global = true, default_value = ".")]
    pub root: PathBuf,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Machine-readable output
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Parser::parse()
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the resource tree
    #[command(
        name = "tree",
        after_help = "\
EXAMPLES:
    # The whole workspace
    canopy tree

    # One project, as JSON
    canopy --json tree /app"
    )]
    Tree {
        /// Workspace path to start from (e.g. /project/src)
        path: Option<String>,
    },

    /// Reconcile the tree with the disk
    Refresh {
        /// Workspace path to refresh
        path: Option<String>,
    },

    /// Copy a resource
    Copy {
        /// Source path
        source: String,
        /// Destination path (must not exist)
        destination: String,
        /// Copy even if the source changed on disk behind our back
        #[arg(long)]
        force: bool,
    },

    /// Move or rename a resource
    #[command(name = "mv")]
    Move {
        /// Source path
        source: String,
        /// Destination path (must not exist)
        destination: String,
        /// Move even if the source changed on disk behind our back
        #[arg(long)]
        force: bool,
    },

    /// Delete a resource and everything below it
    #[command(name = "rm")]
    Remove {
        /// Paths to delete
        #[arg(required = true)]
        paths: Vec<String>,
        /// Delete even files changed on disk or not yet known
        #[arg(long)]
        force: bool,
        /// Record file contents in the history store first
        #[arg(long)]
        keep_history: bool,
    },

    /// Link a folder or file to a location outside its project
    #[command(
        name = "link",
        after_help = "\
TARGETS:
    /abs/path       a concrete location
    ${VAR}/rest     relative to a path variable
    virtual:        a virtual folder, which can only hold links"
    )]
    Link {
        /// Workspace path of the new link
        path: String,
        /// Where the link points
        target: String,
        /// Accept a target that does not exist (yet)
        #[arg(long)]
        allow_missing: bool,
        /// Drop whatever resource is already at the path first
        #[arg(long)]
        replace: bool,
    },

    /// Give a resource a new modification stamp
    Touch {
        /// Workspace path
        path: String,
    },
}
