//! Integration test: configuration files on disk.

use std::io::Write;
use std::path::Path;

use ems_common::config::ConfigError;
use ems_core::config::{WatchdogConfig, load_config};
use ems_core::state::StartStopConfig;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn shipped_config_is_valid() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../config/ems.toml");
    let config = load_config(&path).unwrap();
    assert_eq!(config.shared.service_name, "ems-edge-01");
    assert_eq!(config.watchdog, WatchdogConfig::Systemd);
    assert_eq!(config.batteries.len(), 2);
    assert_eq!(config.batteries[0].start_stop, StartStopConfig::Start);
    assert_eq!(config.batteries[1].start_stop, StartStopConfig::Auto);
}

#[test]
fn loads_from_file() {
    let file = write_config(
        r#"
[shared]
service_name = "ems-file"

[cycle]
period_ms = 500

[[battery]]
id = "battery0"
"#,
    );
    let config = load_config(file.path()).unwrap();
    assert_eq!(config.cycle.period_ms, 500);
    assert_eq!(config.batteries[0].id, "battery0");
}

#[test]
fn missing_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_config(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::FileNotFound(_)));
}

#[test]
fn malformed_and_invalid_files_are_rejected() {
    let malformed = write_config("[shared\nservice_name = ");
    assert!(matches!(
        load_config(malformed.path()),
        Err(ConfigError::ParseError(_))
    ));

    let duplicate = write_config(
        r#"
[shared]
service_name = "ems-file"

[[battery]]
id = "battery0"

[[battery]]
id = "battery0"
"#,
    );
    assert!(matches!(
        load_config(duplicate.path()),
        Err(ConfigError::ValidationError(_))
    ));
}
