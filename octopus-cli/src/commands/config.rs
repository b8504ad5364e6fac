use anyhow::{Context, Result};
use clap::Subcommand;
use std::path::PathBuf;

use octopus_realtime::config::{Config, ENV_PREFIX};

use super::serve::load_config;
use crate::utils;

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show {
        /// Load configuration from this file instead of the search path
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

pub fn execute(command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show { config } => show(load_config(config)?),
    }
}

fn show(config: Config) -> Result<()> {
    utils::section("Effective configuration");
    println!(
        "(files merged with {}* environment overrides, nested keys split on `__`)\n",
        ENV_PREFIX
    );
    println!("{}", render(&config)?);
    Ok(())
}

fn render(config: &Config) -> Result<String> {
    toml::to_string_pretty(config).context("Failed to render configuration")
}
