//! Configuration file parsing for tierup.toml.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tierup::TierConfig;

/// Config file names searched for, in order.
const CONFIG_NAMES: &[&str] = &["tierup.toml", ".tierup.toml"];

/// Main configuration structure.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    /// Controller budgets and compile mode
    #[serde(default)]
    pub tiering: TierConfig,

    /// Defaults for the `simulate` command
    #[serde(default)]
    pub simulate: SimulateConfig,
}

/// Simulation defaults, overridable from the command line.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SimulateConfig {
    /// Functions in the simulated module
    pub functions: u32,

    /// How many of them are driven hot
    pub hot: u32,

    /// Calls issued per hot function
    pub calls: u64,

    /// Caller threads per hot function
    pub threads: u32,

    /// Simulated optimized-compile latency
    pub compile_ms: u64,
}

impl Default for SimulateConfig {
    fn default() -> Self {
        Self {
            functions: 2,
            hot: 1,
            calls: 5_000,
            threads: 1,
            compile_ms: 5,
        }
    }
}

/// Load configuration from a file or search for a default config file.
/// Environment overrides are applied on top.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config_path = path.map(PathBuf::from).or_else(find_config_file);

    let mut config = match config_path {
        Some(path) if path.exists() => {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)
                .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
            tracing::debug!("loaded config from {}", path.display());
            config
        }
        Some(path) => anyhow::bail!("config file {} does not exist", path.display()),
        None => Config::default(),
    };

    config.tiering = config.tiering.with_env_overrides();
    config.tiering.validate()?;
    Ok(config)
}

/// Search for a config file in the current directory and parent directories.
fn find_config_file() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    find_config_in_ancestors(&cwd)
}

fn find_config_in_ancestors(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(current) = dir {
        for name in CONFIG_NAMES {
            let path = current.join(name);
            if path.exists() {
                return Some(path);
            }
        }
        dir = current.parent();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tierup::CompileMode;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.tiering, TierConfig::default());
        assert_eq!(config.simulate.functions, 2);
        assert_eq!(config.simulate.hot, 1);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[tiering]
initial_budget = 10
backoff_budget = 40
compile_mode = "manual"

[simulate]
functions = 4
calls = 200
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.tiering.initial_budget, 10);
        assert_eq!(config.tiering.backoff_budget, 40);
        assert_eq!(config.tiering.compile_mode, CompileMode::Manual);
        assert_eq!(config.simulate.functions, 4);
        assert_eq!(config.simulate.calls, 200);
        assert_eq!(config.simulate.hot, 1);
    }

    #[test]
    fn test_partial_tiering_table_keeps_defaults() {
        let config: Config = toml::from_str("[tiering]\ninitial_budget = 7\n").unwrap();
        assert_eq!(config.tiering.initial_budget, 7);
        assert_eq!(
            config.tiering.backoff_budget,
            TierConfig::default().backoff_budget
        );
        assert_eq!(config.tiering.compile_mode, CompileMode::Background);
    }

    #[test]
    fn test_find_config_in_parent_dir() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(root.path().join("tierup.toml"), "[tiering]\n").unwrap();

        let found = find_config_in_ancestors(&nested).expect("config should be found");
        assert_eq!(found, root.path().join("tierup.toml"));
    }

    #[test]
    fn test_explicit_missing_path_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("nope.toml");
        assert!(load_config(Some(&missing)).is_err());
    }

    #[test]
    fn test_invalid_budgets_are_rejected() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("tierup.toml");
        std::fs::write(&path, "[tiering]\ninitial_budget = 10\nbackoff_budget = 1\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }
}
