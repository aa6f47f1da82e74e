//! CLI argument definitions for the askgate binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use std::path::PathBuf;

use clap::Parser;

use askgate_core::config::AskgateConfig;

/// askgate - routes student questions to department knowledge stores.
#[derive(Parser, Debug)]
#[command(name = "askgate", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// API server port.
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Data directory for sessions, provider logs and account records.
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,
}

impl CliArgs {
    /// Priority: --config > ASKGATE_CONFIG > ~/.askgate/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(p) = &self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("ASKGATE_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Priority: --port > ASKGATE_PORT > config file value.
    pub fn resolve_port(&self, config_port: u16) -> u16 {
        if let Some(p) = self.port {
            return p;
        }
        std::env::var("ASKGATE_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(config_port)
    }

    /// Fold CLI and env overrides into a loaded config.
    pub fn apply(&self, config: &mut AskgateConfig) {
        config.server.port = self.resolve_port(config.server.port);
        if let Some(dir) = &self.data_dir {
            config.general.data_dir = dir.to_string_lossy().to_string();
        }
        if let Some(level) = &self.log_level {
            config.general.log_level = level.clone();
        }
    }
}

fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".askgate").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".askgate").join("config.toml");
    }
    PathBuf::from("config.toml")
}

/// Expand a leading `~` to the home directory.
pub fn resolve_data_dir(data_dir: &str) -> PathBuf {
    match data_dir
        .strip_prefix("~/")
        .or_else(|| data_dir.strip_prefix("~\\"))
    {
        Some(rest) => {
            #[cfg(target_os = "windows")]
            let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
            #[cfg(not(target_os = "windows"))]
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(rest)
        }
        None => PathBuf::from(data_dir),
    }
}
