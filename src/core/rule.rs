//! core::rule
//!
//! Scheduling rules: path-derived lock tokens.
//!
//! # Relations
//!
//! - `a.contains(b)`: holding `a` is enough to also run work that needs `b`.
//!   A resource rule contains every rule on its subtree; a multi rule
//!   contains `b` when one of its parts does (for a multi `b`, when every
//!   part of `b` is contained); every rule contains the notify rule.
//! - `a.is_conflicting(b)`: `a` and `b` may not be held by two threads at
//!   once. Resource rules conflict when their paths are prefix-comparable in
//!   either direction; the notify rule conflicts with everything.
//!
//! # Nesting
//!
//! A thread already holding `h` may only acquire `r` when `h.contains(r)`.
//! Nested acquisition therefore only ever narrows scope, which rules out
//! lock-order inversion without any global ordering convention.
//!
//! # Example
//!
//! ```
//! use canopy::core::path::ResourcePath;
//! use canopy::core::rule::SchedulingRule;
//!
//! let project = SchedulingRule::resource(ResourcePath::parse("/p").unwrap());
//! let file = SchedulingRule::resource(ResourcePath::parse("/p/a.txt").unwrap());
//! let other = SchedulingRule::resource(ResourcePath::parse("/q").unwrap());
//!
//! assert!(project.contains(&file));
//! assert!(!file.contains(&project));
//! assert!(project.is_conflicting(&file));
//! assert!(!project.is_conflicting(&other));
//! assert!(other.contains(&SchedulingRule::Notify));
//! ```

use std::fmt;

use super::path::ResourcePath;

/// A lock token computed per operation from the paths it touches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SchedulingRule {
    /// The subtree rooted at a path.
    Resource(ResourcePath),
    /// Several rules held together.
    Multi(Vec<SchedulingRule>),
    /// The cross-cutting notification rule.
    Notify,
}

impl SchedulingRule {
    pub fn resource(path: ResourcePath) -> Self {
        SchedulingRule::Resource(path)
    }

    /// The rule covering the whole workspace.
    pub fn root() -> Self {
        SchedulingRule::Resource(ResourcePath::root())
    }

    /// Combine two rules into the narrowest rule containing both.
    pub fn combine(a: SchedulingRule, b: SchedulingRule) -> SchedulingRule {
        if a.contains(&b) {
            return a;
        }
        if b.contains(&a) {
            return b;
        }
        let mut parts = Vec::new();
        a.flatten_into(&mut parts);
        b.flatten_into(&mut parts);
        Self::from_parts(parts)
    }

    /// Build the narrowest rule covering every path.
    pub fn for_paths<'a, I>(paths: I) -> SchedulingRule
    where
        I: IntoIterator<Item = &'a ResourcePath>,
    {
        let parts = paths
            .into_iter()
            .map(|p| SchedulingRule::Resource(p.clone()))
            .collect();
        Self::from_parts(parts)
    }

    /// Deduplicate and drop parts already covered by another part.
    fn from_parts(mut parts: Vec<SchedulingRule>) -> SchedulingRule {
        parts.dedup();
        let mut kept: Vec<SchedulingRule> = Vec::new();
        for part in parts {
            if kept.iter().any(|k| k.contains(&part)) {
                continue;
            }
            kept.retain(|k| !part.contains(k));
            kept.push(part);
        }
        if kept.len() == 1 {
            kept.remove(0)
        } else {
            SchedulingRule::Multi(kept)
        }
    }

    fn flatten_into(self, out: &mut Vec<SchedulingRule>) {
        match self {
            SchedulingRule::Multi(parts) => {
                for part in parts {
                    part.flatten_into(out);
                }
            }
            other => out.push(other),
        }
    }

    /// Whether holding `self` covers work requiring `other`.
    pub fn contains(&self, other: &SchedulingRule) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (_, SchedulingRule::Notify) => true,
            (_, SchedulingRule::Multi(parts)) => parts.iter().all(|p| self.contains(p)),
            (SchedulingRule::Multi(parts), _) => parts.iter().any(|p| p.contains(other)),
            (SchedulingRule::Resource(a), SchedulingRule::Resource(b)) => a.is_prefix_of(b),
            (SchedulingRule::Notify, SchedulingRule::Resource(_)) => false,
        }
    }

    /// Whether `self` and `other` may not be held by different threads at once.
    pub fn is_conflicting(&self, other: &SchedulingRule) -> bool {
        match (self, other) {
            (SchedulingRule::Notify, _) | (_, SchedulingRule::Notify) => true,
            (SchedulingRule::Multi(parts), _) => parts.iter().any(|p| p.is_conflicting(other)),
            (_, SchedulingRule::Multi(parts)) => parts.iter().any(|p| self.is_conflicting(p)),
            (SchedulingRule::Resource(a), SchedulingRule::Resource(b)) => {
                a.is_prefix_of(b) || b.is_prefix_of(a)
            }
        }
    }

    /// Every resource path named by this rule.
    pub fn paths(&self) -> Vec<&ResourcePath> {
        match self {
            SchedulingRule::Resource(p) => vec![p],
            SchedulingRule::Multi(parts) => parts.iter().flat_map(|p| p.paths()).collect(),
            SchedulingRule::Notify => Vec::new(),
        }
    }

    /// Whether `path` falls inside the subtrees this rule names.
    pub fn covers_path(&self, path: &ResourcePath) -> bool {
        self.paths().iter().any(|p| p.is_prefix_of(path))
    }
}

impl fmt::Display for SchedulingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulingRule::Resource(p) => write!(f, "{p}"),
            SchedulingRule::Multi(parts) => {
                let names: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
                write!(f, "[{}]", names.join(", "))
            }
            SchedulingRule::Notify => write!(f, "<notify>"),
        }
    }
}
