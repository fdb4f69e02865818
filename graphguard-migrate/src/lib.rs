//! Graphguard Migration Library
//!
//! This library provides the changelog loader and command handlers for the
//! `graphguard-migrate` CLI tool (main.rs).

pub mod changelog_loader;
pub mod commands;
pub mod overrides;

pub use changelog_loader::{LoadError, TomlChangelogSource};
pub use overrides::ConfigOverrides;
