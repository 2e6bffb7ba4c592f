//! Subcommand implementations.

pub mod convert;
pub mod info;
pub mod repair;
pub mod validate;
