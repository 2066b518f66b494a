//! command line interface for tailgrant

mod config;
mod serve;

use clap::{Parser, Subcommand};

pub use config::ConfigCommand;
pub use serve::ServeCommand;

/// tailgrant - just-in-time access control for your tailnet
#[derive(Parser, Debug)]
#[command(name = "tailgrant", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// top-level commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// run the tailgrant server
    Serve(ServeCommand),
    /// inspect and validate configuration
    Config(ConfigCommand),
}
