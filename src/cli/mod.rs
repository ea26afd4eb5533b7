//! Command-line interface for promptforge.
//!
//! Provides commands to compile, validate, prepare and run pipelines, and to
//! serve execution tools over the remote protocol.

mod commands;

pub use commands::{parse_cli, parse_input, run, run_with_cli, Cli, Commands};
