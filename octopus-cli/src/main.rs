use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

mod commands;
mod utils;

use commands::config::ConfigCommands;

/// octopus - run and inspect real-time WebSocket services
#[derive(Parser)]
#[command(name = "octopus")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the WebSocket server
    Serve {
        /// Load configuration from this file instead of the search path
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Override the listen port
        #[arg(short, long, env = "OCTOPUS_SERVICE__PORT")]
        port: Option<u16>,
    },
    /// Check the health and readiness endpoints of a running server
    Health {
        /// Base URL of the server
        #[arg(long, default_value = "http://localhost:8080")]
        url: String,

        /// Show response details
        #[arg(short, long)]
        verbose: bool,
    },
    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve { config, port } => commands::serve::execute(config, port).await,
        Commands::Health { url, verbose } => commands::health::execute(verbose, url).await,
        Commands::Config { command } => commands::config::execute(command),
    };

    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);

            if let Some(source) = e.source() {
                eprintln!("\n{} {}", "Caused by:".yellow(), source);
            }

            std::process::exit(1);
        }
    }
}
