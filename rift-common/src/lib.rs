//! Shared primitives used by all `rift` crates.
//!
//! Everything here is deliberately small: errors, process tunables, id aliases, and the
//! lock-free hand-off channel the connection processor builds on. Keeping those at the root
//! of the dependency graph lets every other crate reach them without cycles.

pub mod config;
pub mod error;
pub mod ids;
pub mod spsc;
