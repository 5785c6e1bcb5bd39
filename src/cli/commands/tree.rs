//! tree command - Print the resource tree
//!
//! Text output indents one level per segment and tags resources with their
//! notable flags; `--json` prints one entry per resource.

use std::process::ExitCode;

use anyhow::Result;
use serde::Serialize;

use crate::cli::Session;
use crate::core::flags::Depth;
use crate::core::info::{InfoFlags, ResourceInfo};
use crate::core::resource::{Resource, ResourceKind};
use crate::core::tree::Visit;

#[derive(Debug, Serialize)]
struct Entry {
    path: String,
    kind: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    flags: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<String>,
}

/// Print the tree at `path` (the root by default).
pub fn tree(session: &Session, path: Option<&str>) -> Result<ExitCode> {
    let start = match path {
        Some(raw) => session.resource(raw)?,
        None => Resource::root(),
    };
    print(session, &start)?;
    Ok(ExitCode::SUCCESS)
}

pub(super) fn print(session: &Session, start: &Resource) -> Result<()> {
    let ws = &session.ws;
    let base = start.depth();
    let mut entries = Vec::new();
    let mut lines = Vec::new();
    ws.visit(start.path(), Depth::Infinite, |resource, info| {
        let flags = tags(info);
        let location = info
            .is_linked()
            .then(|| ws.location(resource))
            .flatten()
            .map(|l| l.display().to_string());
        if session.json {
            entries.push(Entry {
                path: resource.path().to_string(),
                kind: resource.kind().to_string(),
                flags,
                location,
            });
        } else {
            lines.push(line(resource, base, &flags, location.as_deref()));
        }
        Visit::Continue
    });

    if session.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for line in lines {
            println!("{line}");
        }
    }
    Ok(())
}

fn tags(info: &ResourceInfo) -> Vec<&'static str> {
    let mut tags = Vec::new();
    if info.is_virtual() {
        tags.push("virtual");
    } else if info.is_linked() {
        tags.push("linked");
    }
    if info.has(InfoFlags::DERIVED) {
        tags.push("derived");
    }
    if info.has(InfoFlags::HIDDEN) {
        tags.push("hidden");
    }
    if info.has(InfoFlags::TEAM_PRIVATE) {
        tags.push("team-private");
    }
    if info.kind() == ResourceKind::Project && !info.is_open() {
        tags.push("closed");
    }
    if !info.has(InfoFlags::LOCAL_EXISTS) && !info.is_virtual() {
        tags.push("missing");
    }
    tags
}

fn line(resource: &Resource, base: usize, tags: &[&str], location: Option<&str>) -> String {
    let indent = "  ".repeat(resource.depth().saturating_sub(base));
    let mut line = match resource {
        Resource::Root => "/".to_string(),
        r if r.is_container() => format!("{indent}{}/", r.name()),
        r => format!("{indent}{}", r.name()),
    };
    if let Some(location) = location {
        line.push_str(&format!(" -> {location}"));
    }
    if !tags.is_empty() {
        line.push_str(&format!(" [{}]", tags.join(", ")));
    }
    line
}
