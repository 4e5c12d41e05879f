//! Command implementations for the CLI.
//!
//! Each command is implemented in its own module.

pub mod config;
pub mod run;
pub mod sync;
pub mod watchers;
