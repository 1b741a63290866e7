//! Integration tests for loading the config file from disk

use std::time::Duration;

use s3ns_daemon::{Config, ConfigError};
use tempfile::TempDir;

const CONFIG: &str = r#"
log_level = "warn"
up_interval_secs = 15
shutdown_grace_secs = 5

[[exports]]
name = "media"
host = "minio.local:9000"
bucket_name = "media"
access_key_id = "AKIAEXAMPLE"
secret_access_key = "secret"
region = "us-east-1"
list_max_keys = 1000
"#;

#[test]
fn test_load_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, CONFIG).unwrap();

    let config = Config::load(Some(path)).unwrap();

    assert_eq!(config.level().unwrap(), tracing::Level::WARN);
    assert_eq!(config.up_interval(), Duration::from_secs(15));
    assert_eq!(config.shutdown_grace(), Duration::from_secs(5));

    let media = config.export("media").unwrap();
    assert_eq!(media.region.as_deref(), Some("us-east-1"));
    assert_eq!(media.list_max_keys, 1000);
    media.validate().unwrap();
}

#[test]
fn test_missing_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.toml");

    let err = Config::load(Some(path.clone())).unwrap_err();

    assert!(matches!(err, ConfigError::NotFound(p) if p == path));
}

#[test]
fn test_malformed_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "up_interval_secs = \"soon\"").unwrap();

    let err = Config::load_from(&path).unwrap_err();

    assert!(matches!(err, ConfigError::TomlDe(_)));
}
