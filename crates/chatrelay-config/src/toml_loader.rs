//! TOML config file loading and creation.

use crate::schema::ChatRelayConfig;
use crate::validation;
use chatrelay_common::ConfigError;
use std::path::{Path, PathBuf};
use tracing::info;

/// Load config from a specific TOML file path.
///
/// Missing fields take serde defaults. Unlike the default-path loader, an
/// explicit file that fails validation is an error: the operator asked for
/// exactly this file.
pub fn load_from_path(path: &Path) -> Result<ChatRelayConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::ParseError(format!("failed to read {}: {e}", path.display()))
    })?;

    let config = parse_str(&content)?;
    validation::validate(&config)?;

    info!("loaded config from {}", path.display());
    Ok(config)
}

/// Parse TOML text into a config without validating it.
pub fn parse_str(content: &str) -> Result<ChatRelayConfig, ConfigError> {
    toml::from_str(content)
        .map_err(|e| ConfigError::ParseError(format!("failed to parse TOML: {e}")))
}

/// Load config from the platform-specific default path.
///
/// On macOS: `~/Library/Application Support/chatrelay/config.toml`
/// On Linux: `~/.config/chatrelay/config.toml`
///
/// If the file does not exist, writes a commented default and returns defaults.
pub fn load_default() -> Result<ChatRelayConfig, ConfigError> {
    let path = default_config_path()?;

    if !path.exists() {
        info!("no config found at {}, creating default", path.display());
        create_default_config(&path)?;
        return Ok(ChatRelayConfig::default());
    }

    load_from_path(&path)
}

/// Get the platform-specific default config file path.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let config_dir = dirs::config_dir().ok_or_else(|| {
        ConfigError::ParseError("could not determine config directory".into())
    })?;
    Ok(config_dir.join("chatrelay").join("config.toml"))
}

/// Create a default TOML config file with documentation comments.
pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            ConfigError::ParseError(format!(
                "failed to create config directory {}: {e}",
                parent.display()
            ))
        })?;
    }

    std::fs::write(path, default_config_toml()).map_err(|e| {
        ConfigError::ParseError(format!(
            "failed to write default config to {}: {e}",
            path.display()
        ))
    })?;

    info!("created default config at {}", path.display());
    Ok(())
}

/// Default TOML config content. Every value is commented out so the
/// compiled-in defaults stay authoritative until the user opts in.
fn default_config_toml() -> &'static str {
    r##"# chatrelay configuration
# Schema version 1
# Only override what you want to change -- missing fields use defaults.

[server]
# host = "127.0.0.1"
# port = 3000
# cors_origin = "http://localhost:5173"

[database]
# url = "sqlite://chatrelay.db"

[generator]
# program = "claude"
# working_dir = "/path/to/project"
# strip_env = ["CLAUDECODE"]
# print = true
# output_format = "stream-json"
# verbose = true
# include_partial_messages = true
# dangerously_skip_permissions = true
# model = "haiku"
# effort = "medium"        # low, medium, high
# max_budget_usd = 1.0
# system_prompt = "You are a helpful assistant."
# no_session_persistence = false

[logging]
# level = "chatrelay=info"
"##
}

#[cfg(test)]
mod tests;
