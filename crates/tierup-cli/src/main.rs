use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::filter::EnvFilter;

mod commands;
mod config;

use commands::config::ConfigCommand;
use commands::simulate::SimulateCommand;

#[derive(Parser)]
#[command(name = "tierup", version, about = "Budget-driven tiered execution driver")]
struct Cli {
    /// Path to tierup.toml (searched upward from the current directory by default)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive a synthetic module until its hot functions tier up
    Simulate(SimulateCommand),
    /// Print the effective configuration
    Config(ConfigCommand),
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Simulate(cmd) => cmd.run(&config)?,
        Commands::Config(cmd) => cmd.run(&config)?,
    }

    Ok(())
}
