//! CLI module for apiary
//!
//! Provides command-line interface for:
//! - serve: Load schema and seed data, then serve JSON:API over HTTP
//! - check: Validate configuration, schema and seed data

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{boot, check, run, run_command, serve, Boot, Config};
pub use errors::{CliError, CliErrorCode, CliResult};
