//! profilescope CLI: profile pages, tabs and media resolution as JSON on stdout.

pub mod commands;
pub mod config;

pub use config::{resolve_config, FlagOverrides};
