//! canopy - a hierarchical, versioned workspace of resources
//!
//! A workspace is a tree of projects, folders and files mirroring a
//! directory on disk. Every mutation (create, copy, move, delete, link,
//! refresh, touch) runs as an operation under a scheduling rule, so
//! operations on disjoint subtrees proceed concurrently while overlapping
//! ones serialize. Each operation stages its tree edits and commits them,
//! with one change notification, when the outermost operation ends.
//!
//! # Architecture
//!
//! The codebase follows a strict layered architecture:
//!
//! - [`cli`] - Command-line interface layer (parses args, delegates to engine)
//! - [`engine`] - The workspace and its mutation protocol
//! - [`core`] - Domain types: paths, resources, infos, rules, the element tree
//! - [`fs`] - Filesystem adapter collaborator (local disk, in-memory)
//! - [`store`] - Property, marker and history store collaborators
//!
//! # Correctness Invariants
//!
//! canopy maintains the following invariants:
//!
//! 1. Conflicting rules are never held by two threads at once
//! 2. Readers see committed trees only; staged edits are invisible
//! 3. After a partial failure, the tree reflects exactly what happened on disk
//! 4. An operation cancelled before touching the disk leaves no trace

pub mod cli;
pub mod core;
pub mod engine;
pub mod fs;
pub mod store;
