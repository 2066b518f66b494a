//! the `config` subcommand - validate a configuration document

use std::path::PathBuf;

use clap::{Args, Subcommand};
use color_eyre::eyre::{Context, Result};

use tailgrant_types::{Config, GrantTypeStore};

/// inspect and validate configuration
#[derive(Args, Debug)]
pub struct ConfigCommand {
    #[command(subcommand)]
    action: ConfigAction,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// parse the config and validate every grant type
    Validate {
        /// path to the config file
        #[arg(short, long, env = "TAILGRANT_CONFIG")]
        config: PathBuf,
    },
}

impl ConfigCommand {
    /// run the config command
    pub fn run(self) -> Result<()> {
        match self.action {
            ConfigAction::Validate { config } => {
                let config = Config::load(&config).context("config rejected")?;
                let store =
                    GrantTypeStore::new(config.grants).context("grant types rejected")?;

                println!("config ok: {} grant types", store.list().len());
                for gt in store.list() {
                    println!(
                        "  {} ({}, {}, max {})",
                        gt.name,
                        gt.action_summary(),
                        gt.risk_level,
                        humantime::format_duration(gt.max_duration),
                    );
                }
                Ok(())
            }
        }
    }
}
