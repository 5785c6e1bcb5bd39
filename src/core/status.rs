//! core::status
//!
//! Structured operation outcomes.
//!
//! # Architecture
//!
//! Every failure the mutation protocol reports is a [`Status`]: a severity,
//! a machine-readable [`StatusCode`], the resource it concerns, a message and
//! optional children. A multi-status is simply a status with children; its
//! severity is the worst of its own and its children's.
//!
//! Multi-resource operations (deleting a subtree, moving a folder) push one
//! child per failed target and keep going, so callers see exactly which
//! targets failed and why.
//!
//! # Example
//!
//! ```
//! use canopy::core::path::ResourcePath;
//! use canopy::core::status::{Status, StatusCode};
//!
//! let mut status = Status::multi(StatusCode::FailedDeleteLocal, "problems deleting /p");
//! assert!(status.is_ok());
//!
//! status.add(Status::error(
//!     StatusCode::FailedDeleteLocal,
//!     Some(ResourcePath::parse("/p/b.txt").unwrap()),
//!     "permission denied",
//! ));
//! assert!(!status.is_ok());
//! assert_eq!(status.children().len(), 1);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use super::path::ResourcePath;

/// How bad a status is, in increasing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Ok,
    Info,
    Warning,
    Error,
    Cancel,
}

/// Machine-readable failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Ok,
    // Validation
    InvalidPath,
    InvalidName,
    DestinationUnderSource,
    InvalidDestination,
    TypeMismatch,
    // Preconditions
    ResourceNotFound,
    ResourceNotLocal,
    ResourceExists,
    CaseVariantExists,
    ProjectClosed,
    OutOfSync,
    LinkNotAllowed,
    VariableUndefined,
    WrongLinkType,
    LocationOverlap,
    NotFoundLocal,
    // Local filesystem failures
    FailedReadLocal,
    FailedWriteLocal,
    FailedDeleteLocal,
    // Collaborators
    StoreFailed,
    HookFailed,
    // Lifecycle
    OperationFailed,
    Cancelled,
}

/// An outcome, possibly aggregating children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    severity: Severity,
    code: StatusCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<ResourcePath>,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    children: Vec<Status>,
}

impl Status {
    pub fn ok() -> Self {
        Self {
            severity: Severity::Ok,
            code: StatusCode::Ok,
            path: None,
            message: "ok".into(),
            children: Vec::new(),
        }
    }

    pub fn error(code: StatusCode, path: Option<ResourcePath>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            code,
            path,
            message: message.into(),
            children: Vec::new(),
        }
    }

    pub fn warning(code: StatusCode, path: Option<ResourcePath>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            code,
            path,
            message: message.into(),
            children: Vec::new(),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            severity: Severity::Cancel,
            code: StatusCode::Cancelled,
            path: None,
            message: "operation cancelled".into(),
            children: Vec::new(),
        }
    }

    /// An empty aggregate; OK until a non-OK child is added.
    pub fn multi(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Ok,
            code,
            path: None,
            message: message.into(),
            children: Vec::new(),
        }
    }

    /// Add a child, raising this status's severity if needed.
    ///
    /// OK children are dropped. A non-OK multi-status child is flattened so
    /// callers see per-target details at one level.
    pub fn add(&mut self, child: Status) {
        if child.is_ok() {
            return;
        }
        self.severity = self.severity.max(child.severity);
        if child.children.is_empty() {
            self.children.push(child);
        } else {
            self.children.extend(child.children);
        }
    }

    /// Add every child of `other`.
    pub fn merge(&mut self, other: Status) {
        if other.children.is_empty() {
            self.add(other);
        } else {
            for child in other.children {
                self.add(child);
            }
        }
    }

    pub fn is_ok(&self) -> bool {
        self.severity <= Severity::Info
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn code(&self) -> StatusCode {
        self.code
    }

    pub fn path(&self) -> Option<&ResourcePath> {
        self.path.as_ref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn children(&self) -> &[Status] {
        &self.children
    }

    /// Whether this status or any child carries `code`.
    pub fn has_code(&self, code: StatusCode) -> bool {
        (self.code == code && !self.is_ok()) || self.children.iter().any(|c| c.has_code(code))
    }

    /// Collapse a one-child aggregate into that child.
    pub fn simplify(mut self) -> Status {
        if self.children.len() == 1 && self.path.is_none() {
            return self.children.remove(0);
        }
        self
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::ok()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}: {}", path, self.message)?,
            None => write!(f, "{}", self.message)?,
        }
        for child in &self.children {
            write!(f, "\n  - {child}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> Option<ResourcePath> {
        Some(ResourcePath::parse(s).unwrap())
    }

    #[test]
    fn ok_children_dropped() {
        let mut multi = Status::multi(StatusCode::OperationFailed, "x");
        multi.add(Status::ok());
        assert!(multi.is_ok());
        assert!(multi.children().is_empty());
    }

    #[test]
    fn severity_raised_by_worst_child() {
        let mut multi = Status::multi(StatusCode::OperationFailed, "x");
        multi.add(Status::warning(StatusCode::OutOfSync, path("/p/a"), "w"));
        assert_eq!(multi.severity(), Severity::Warning);
        multi.add(Status::error(StatusCode::FailedDeleteLocal, path("/p/b"), "e"));
        assert_eq!(multi.severity(), Severity::Error);
        assert_eq!(multi.children().len(), 2);
    }

    #[test]
    fn nested_multi_flattened() {
        let mut inner = Status::multi(StatusCode::OperationFailed, "inner");
        inner.add(Status::error(StatusCode::FailedDeleteLocal, path("/p/x"), "e"));
        let mut outer = Status::multi(StatusCode::OperationFailed, "outer");
        outer.add(inner);
        assert_eq!(outer.children().len(), 1);
        assert_eq!(outer.children()[0].path(), path("/p/x").as_ref());
    }

    #[test]
    fn has_code_searches_children() {
        let mut multi = Status::multi(StatusCode::OperationFailed, "x");
        multi.add(Status::error(StatusCode::CaseVariantExists, path("/p/A"), "e"));
        assert!(multi.has_code(StatusCode::CaseVariantExists));
        assert!(!multi.has_code(StatusCode::ResourceExists));
    }

    #[test]
    fn display_includes_children() {
        let mut multi = Status::multi(StatusCode::OperationFailed, "problems");
        multi.add(Status::error(StatusCode::FailedDeleteLocal, path("/p/x"), "denied"));
        let text = multi.to_string();
        assert!(text.contains("problems"));
        assert!(text.contains("/p/x: denied"));
    }

    #[test]
    fn serializes_without_empty_fields() {
        let status = Status::error(StatusCode::ResourceNotFound, path("/p"), "missing");
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["code"], "resource_not_found");
        assert_eq!(json["path"], "/p");
        assert!(json.get("children").is_none());
    }
}
