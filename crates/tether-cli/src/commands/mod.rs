//! Subcommand implementations

pub mod classes;
pub mod serve;
