//! core::flags
//!
//! Caller-supplied operation options.
//!
//! - [`UpdateFlags`] - bitmask recognized by the mutation protocol
//! - [`Depth`] - how far below a resource an operation reaches

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// Options for mutating operations.
///
/// # Example
///
/// ```
/// use canopy::core::flags::UpdateFlags;
///
/// let flags = UpdateFlags::FORCE | UpdateFlags::KEEP_HISTORY;
/// assert!(flags.contains(UpdateFlags::FORCE));
/// assert!(!flags.contains(UpdateFlags::REPLACE));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct UpdateFlags(u32);

impl UpdateFlags {
    pub const NONE: UpdateFlags = UpdateFlags(0);
    /// Skip out-of-sync checks.
    pub const FORCE: UpdateFlags = UpdateFlags(1 << 0);
    /// Record file content in the history store before deleting.
    pub const KEEP_HISTORY: UpdateFlags = UpdateFlags(1 << 1);
    /// Tolerate a link target that does not resolve or does not exist.
    pub const ALLOW_MISSING_LOCAL: UpdateFlags = UpdateFlags(1 << 2);
    /// Replace an existing resource when creating a link over it.
    pub const REPLACE: UpdateFlags = UpdateFlags(1 << 3);
    /// Discover link contents on a background worker.
    pub const BACKGROUND_REFRESH: UpdateFlags = UpdateFlags(1 << 4);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: UpdateFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: UpdateFlags) -> UpdateFlags {
        UpdateFlags(self.0 | other.0)
    }

    pub const fn without(self, other: UpdateFlags) -> UpdateFlags {
        UpdateFlags(self.0 & !other.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for UpdateFlags {
    type Output = UpdateFlags;

    fn bitor(self, rhs: UpdateFlags) -> UpdateFlags {
        self.union(rhs)
    }
}

impl BitOrAssign for UpdateFlags {
    fn bitor_assign(&mut self, rhs: UpdateFlags) {
        *self = self.union(rhs);
    }
}

impl fmt::Display for UpdateFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(UpdateFlags, &str); 5] = [
            (UpdateFlags::FORCE, "force"),
            (UpdateFlags::KEEP_HISTORY, "keep_history"),
            (UpdateFlags::ALLOW_MISSING_LOCAL, "allow_missing_local"),
            (UpdateFlags::REPLACE, "replace"),
            (UpdateFlags::BACKGROUND_REFRESH, "background_refresh"),
        ];
        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// Traversal depth below a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Depth {
    /// The resource only.
    Zero,
    /// The resource and its direct members.
    One,
    /// The whole subtree.
    Infinite,
}

impl Depth {
    /// Whether a node `levels` below the starting point is within range.
    pub fn reaches(self, levels: usize) -> bool {
        match self {
            Depth::Zero => levels == 0,
            Depth::One => levels <= 1,
            Depth::Infinite => true,
        }
    }
}
