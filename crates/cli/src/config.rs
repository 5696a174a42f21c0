//! CLI configuration
//!
//! Values resolve in order: command-line flag, environment variable
//! (handled by clap), then `~/.portside/config.toml`.

use std::path::PathBuf;

use anyhow::Context;
use serde::Deserialize;

const DEFAULT_URL: &str = "ws://localhost:8787/ws";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    pub url: Option<String>,
    pub token: Option<String>,
}

pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".portside").join("config.toml"))
}

/// Load `~/.portside/config.toml`; a missing file is not an error.
pub fn load_file_config() -> anyhow::Result<FileConfig> {
    let Some(path) = config_path() else {
        return Ok(FileConfig::default());
    };
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

/// Merge flag/env values over the config file, with a local default URL.
pub fn resolve(
    flag_url: Option<String>,
    flag_token: Option<String>,
) -> anyhow::Result<(String, Option<String>)> {
    let file = load_file_config()?;
    let url = flag_url
        .or(file.url)
        .unwrap_or_else(|| DEFAULT_URL.to_string());
    let token = flag_token.or(file.token);
    Ok((url, token))
}
