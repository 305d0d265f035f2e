//! Command-line surface: `turnstream [serve]` and `turnstream config ...`.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};

use ts_domain::config::{Config, ConfigSeverity};

#[derive(Debug, Parser)]
#[command(name = "turnstream", version, about = "LLM turn streaming gateway")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP gateway (default when no subcommand is given).
    Serve,
    /// Inspect or validate the resolved configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the resolved configuration as TOML.
    Show,
    /// Validate the resolved configuration and exit non-zero on error.
    Validate,
}

const DEFAULT_CONFIG_PATH: &str = "turnstream.toml";

/// Load configuration from `TURNSTREAM_CONFIG` (or `./turnstream.toml` if
/// present), falling back to defaults, then apply environment overrides.
pub fn load_config() -> anyhow::Result<(Config, PathBuf)> {
    let path = std::env::var("TURNSTREAM_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut config = if path.exists() {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))?
    } else {
        Config::default()
    };

    apply_env_overrides(&mut config);
    Ok((config, path))
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(port) = std::env::var("TURNSTREAM_PORT") {
        if let Ok(port) = port.parse() {
            config.server.port = port;
        }
    }
    if let Ok(host) = std::env::var("TURNSTREAM_HOST") {
        config.server.host = host;
    }
    if let Ok(db_path) = std::env::var("TURNSTREAM_DATABASE_PATH") {
        config.store.database_path = db_path;
    }
}

pub fn validate(config: &Config, path: &Path) -> bool {
    let issues = config.validate();
    if issues.is_empty() {
        println!("{}: configuration OK", path.display());
        return true;
    }
    for issue in &issues {
        println!("{issue}");
    }
    !issues.iter().any(|i| i.severity == ConfigSeverity::Error)
}

pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("failed to serialize config: {e}"),
    }
}
