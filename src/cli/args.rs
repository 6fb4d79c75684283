//! CLI argument definitions using clap
//!
//! Commands:
//! - apiary serve --config <path>
//! - apiary check --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// apiary - JSON:API over typed entity collections
#[derive(Parser, Debug)]
#[command(name = "apiary")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load the schema and serve it over HTTP
    Serve {
        /// Path to configuration file
        #[arg(long, default_value = "./apiary.json")]
        config: PathBuf,

        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Validate configuration, schema and seed data, then exit
    Check {
        /// Path to configuration file
        #[arg(long, default_value = "./apiary.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
