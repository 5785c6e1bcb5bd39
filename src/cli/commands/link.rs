//! link command - Link a folder or file to an outside location
//!
//! The link's kind follows its target: a directory (or a missing or
//! virtual target) makes a folder link, anything else a file link.

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;

use super::finish;
use crate::cli::Session;
use crate::core::flags::UpdateFlags;
use crate::core::info::LinkLocation;
use crate::core::path::ResourcePath;
use crate::core::resource::{Resource, ResourceKind};

pub fn link(
    session: &Session,
    path: &str,
    target: &str,
    allow_missing: bool,
    replace: bool,
) -> Result<ExitCode> {
    let location = LinkLocation::parse(target);
    let kind = match &location {
        LinkLocation::Path { path } if is_file(session, path) => ResourceKind::File,
        _ => ResourceKind::Folder,
    };
    let resource = Resource::new(kind, ResourcePath::parse(path)?)?;

    let mut flags = UpdateFlags::NONE;
    if allow_missing {
        flags = flags | UpdateFlags::ALLOW_MISSING_LOCAL;
    }
    if replace {
        flags = flags | UpdateFlags::REPLACE;
    }
    finish(
        session,
        session
            .ws
            .create_link(&resource, location, flags, &session.progress),
    )
}

fn is_file(session: &Session, location: &Path) -> bool {
    session
        .ws
        .fs()
        .stat(location)
        .is_some_and(|s| !s.is_directory)
}
