//! Configuration loading and validation tests
//!
//! Tests focus on observable outcomes: what loads, what is rejected, and what
//! each device resolves to.

use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;
use zenamqp::config::{CollectorConfig, ConfigError};

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
[collector]
name = "collector-a"
cycle_interval_secs = 60

[[devices]]
id = "rabbit-01"
manage_ip = "10.1.0.4"
queue = "zenoss.events"
username = "monitor"
password = "secret"
"#,
    );

    let config = CollectorConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.collector.name, "collector-a");
    assert_eq!(config.collector.consumer_tag, "zenoss");
    assert_eq!(config.devices.len(), 1);

    let targets = config.device_targets().unwrap();
    let target = &targets[0];
    assert_eq!(target.device_id, "rabbit-01");
    assert_eq!(target.queue, "zenoss.events");
    assert_eq!(target.virtual_host, "/");
    assert_eq!(target.port, 5672);
    assert_eq!(target.password, "secret");
    assert_eq!(target.interval, Duration::from_secs(60));
}

#[test]
fn test_config_defaults_without_collector_section() {
    let temp_file = write_config(
        r#"
[[devices]]
id = "broker01"
manage_ip = "127.0.0.1"
queue = "events"
username = "guest"
"#,
    );

    let config = CollectorConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.collector.name, "zenamqp");
    assert_eq!(config.collector.cycle_interval_secs, 300);
    assert_eq!(config.connect_timeout(), Duration::from_secs(30));
    assert_eq!(config.device_targets().unwrap()[0].password, "");
}

#[test]
fn test_password_resolved_from_environment() {
    std::env::set_var("ZENAMQP_TEST_BROKER_PASSWORD", "from-env");
    let temp_file = write_config(
        r#"
[[devices]]
id = "broker01"
manage_ip = "127.0.0.1"
queue = "events"
username = "guest"
password = "ignored"
password_env = "ZENAMQP_TEST_BROKER_PASSWORD"
"#,
    );

    let config = CollectorConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.device_targets().unwrap()[0].password, "from-env");
}

#[test]
fn test_missing_password_variable_is_an_error() {
    let temp_file = write_config(
        r#"
[[devices]]
id = "broker01"
manage_ip = "127.0.0.1"
queue = "events"
username = "guest"
password_env = "ZENAMQP_TEST_UNSET_PASSWORD_VAR"
"#,
    );

    let config = CollectorConfig::load_from_file(temp_file.path()).unwrap();

    assert!(matches!(
        config.device_targets(),
        Err(ConfigError::EnvVarNotFound(name)) if name == "ZENAMQP_TEST_UNSET_PASSWORD_VAR"
    ));
}

#[test]
fn test_missing_file_is_a_read_error() {
    let result = CollectorConfig::load_from_file(std::path::Path::new(
        "/nonexistent/zenamqp/config.toml",
    ));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_is_a_parse_error() {
    let temp_file = write_config("[[devices]\nid = ");
    let result = CollectorConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_device_missing_queue_is_rejected() {
    let temp_file = write_config(
        r#"
[[devices]]
id = "broker01"
manage_ip = "127.0.0.1"
username = "guest"
"#,
    );

    assert!(matches!(
        CollectorConfig::load_from_file(temp_file.path()),
        Err(ConfigError::TomlParse(_))
    ));
}

#[test]
fn test_invalid_device_id_is_rejected() {
    let temp_file = write_config(
        r#"
[[devices]]
id = "broker 01"
manage_ip = "127.0.0.1"
queue = "events"
username = "guest"
"#,
    );

    assert!(matches!(
        CollectorConfig::load_from_file(temp_file.path()),
        Err(ConfigError::InvalidDeviceId(_))
    ));
}

#[test]
fn test_duplicate_device_ids_are_rejected() {
    let temp_file = write_config(
        r#"
[[devices]]
id = "broker01"
manage_ip = "10.0.0.1"
queue = "events"
username = "guest"

[[devices]]
id = "broker01"
manage_ip = "10.0.0.2"
queue = "events"
username = "guest"
"#,
    );

    let err = CollectorConfig::load_from_file(temp_file.path()).unwrap_err();
    assert!(err.to_string().contains("Duplicate device ID 'broker01'"));
}

#[test]
fn test_zero_interval_is_rejected() {
    let temp_file = write_config(
        r#"
[collector]
cycle_interval_secs = 0
"#,
    );

    assert!(matches!(
        CollectorConfig::load_from_file(temp_file.path()),
        Err(ConfigError::InvalidConfig(_))
    ));
}
