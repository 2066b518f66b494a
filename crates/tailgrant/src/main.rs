//! tailgrant - just-in-time access control for a tailnet.
//!
//! users request temporary device tags, role elevations, or user restores;
//! a policy gate (optionally a human approval) admits the request; a
//! durable orchestration engine applies the effect, holds it for a bounded
//! duration, and reliably reverts it.

use clap::Parser;
use color_eyre::eyre::Result;
use tailgrant::cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    match cli.command {
        Command::Serve(cmd) => cmd.run().await,
        Command::Config(cmd) => cmd.run(),
    }
}
