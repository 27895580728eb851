//! Tests for TOML config loading, creation, and path resolution.

use super::*;
use std::path::Path;

#[test]
fn load_from_nonexistent_returns_file_not_found() {
    let result = load_from_path(Path::new("/tmp/nonexistent_chatrelay_config.toml"));
    let err = result.unwrap_err();
    assert!(matches!(err, ConfigError::FileNotFound(_)));
}

#[test]
fn load_valid_partial_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[server]
port = 8088
cors_origin = "http://localhost:5173"

[generator]
model = "sonnet"
effort = "low"
"#,
    )
    .unwrap();

    let config = load_from_path(&path).unwrap();
    assert_eq!(config.server.port, 8088);
    assert_eq!(config.server.cors_origin.as_deref(), Some("http://localhost:5173"));
    assert_eq!(config.generator.model.as_deref(), Some("sonnet"));
    assert_eq!(config.generator.effort.as_deref(), Some("low"));
    // Defaults preserved
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.generator.program, "claude");
    assert_eq!(config.generator.output_format, "stream-json");
    assert_eq!(config.database.url, "sqlite://chatrelay.db");
}

#[test]
fn load_invalid_toml_returns_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "this is not valid toml {{{").unwrap();

    let err = load_from_path(&path).unwrap_err();
    assert!(matches!(err, ConfigError::ParseError(_)));
}

#[test]
fn load_invalid_values_returns_validation_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[generator]
effort = "maximum"
"#,
    )
    .unwrap();

    let err = load_from_path(&path).unwrap_err();
    assert!(matches!(err, ConfigError::ValidationError(_)));
}

#[test]
fn empty_file_gives_defaults() {
    let config = parse_str("").unwrap();
    assert_eq!(config.server.port, 3000);
    assert_eq!(config.logging.level, "chatrelay=info");
    assert_eq!(config.generator.strip_env, vec!["CLAUDECODE".to_string()]);
}

#[test]
fn create_default_config_writes_parseable_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    create_default_config(&path).unwrap();
    assert!(path.exists());

    let config = load_from_path(&path).unwrap();
    assert_eq!(config.server.port, 3000);
    assert_eq!(config.generator.model.as_deref(), Some("haiku"));
}

#[test]
fn default_config_path_ends_with_chatrelay_config() {
    if let Ok(path) = default_config_path() {
        assert!(path.ends_with("chatrelay/config.toml"));
    }
}
