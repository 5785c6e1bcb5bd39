//! core
//!
//! Core domain types for canopy.
//!
//! # Modules
//!
//! - [`path`] - Workspace paths and segment validation
//! - [`resource`] - Typed resource handles (root, project, folder, file)
//! - [`info`] - Per-resource state, link descriptions, project descriptions
//! - [`tree`] - The versioned element tree
//! - [`rule`] - Scheduling rules and their containment/conflict relation
//! - [`status`] - Structured multi-status outcomes
//! - [`flags`] - Update flags and traversal depth
//! - [`progress`] - Progress reporting and cancellation
//! - [`ops`] - Lock manager and the cross-process workspace lock
//! - [`config`] - Configuration schema and loading
//! - [`paths`] - Centralized path routing for canopy storage
//!
//! # Design Principles
//!
//! - Strong typing prevents invalid states at compile time
//! - Schemas are strict and self-describing
//! - Nothing here touches the disk except configuration and the lock file

pub mod config;
pub mod flags;
pub mod info;
pub mod ops;
pub mod path;
pub mod paths;
pub mod progress;
pub mod resource;
pub mod rule;
pub mod status;
pub mod tree;
