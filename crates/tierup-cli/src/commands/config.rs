//! Config command - print the effective configuration.

use anyhow::Result;
use clap::Args;

use crate::config::Config;

#[derive(Args)]
pub struct ConfigCommand {
    /// Print as JSON instead of TOML
    #[arg(long)]
    pub json: bool,
}

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<()> {
        let rendered = if self.json {
            serde_json::to_string_pretty(config)?
        } else {
            toml::to_string_pretty(config)?
        };
        println!("{rendered}");
        Ok(())
    }
}
