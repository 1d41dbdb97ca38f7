//! Configuration loading and validation tests
//!
//! Tests focus on BEHAVIOR of configuration loading, validation, and error handling.

use dewpoint_controller::config::{AppEnv, ConfigError, ControllerConfig};
use dewpoint_controller::sensors::Location;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
[mqtt]
broker_url = "mqtts://broker.example.com:8883"
client_id = "ahu-1"
username_env = "AHU_MQTT_USER"
clean_session = true
keep_alive_secs = 30
connect_timeout_secs = 5

[reconnect]
backoff_pattern_ms = [100, 200]
sustained_delay_ms = 1000
retry_initial_connect = false

[sensors]
topic_prefix = "building/ahu1"
altitude_feet = 1200.0
locations = ["mixed_air", "supply"]

[service]
shutdown_timeout_secs = 2
grace_period_secs = 8
"#,
    );

    let config = ControllerConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.mqtt.client_id, "ahu-1");
    assert_eq!(config.mqtt.username_env, Some("AHU_MQTT_USER".to_string()));
    assert!(config.mqtt.clean_session);
    assert_eq!(config.mqtt.connect_timeout(), Duration::from_secs(5));
    assert!(!config.reconnect.retry_initial_connect);
    assert_eq!(config.sensors.topic_prefix, "building/ahu1");
    assert_eq!(config.sensors.altitude_feet, 1200.0);
    assert_eq!(
        config.sensors.locations,
        vec![Location::MixedAir, Location::Supply]
    );
    assert_eq!(config.service.shutdown_timeout(), Duration::from_secs(2));
    assert_eq!(config.service.grace_period(), Duration::from_secs(8));

    let reconnect = config.reconnect.to_reconnect_config();
    assert_eq!(reconnect.calculate_backoff_delay(1), 100);
    assert_eq!(reconnect.calculate_backoff_delay(2), 200);
    assert_eq!(reconnect.calculate_backoff_delay(9), 1000);
}

#[test]
fn test_partial_config_keeps_defaults_for_missing_sections() {
    let temp_file = write_config(
        r#"
[sensors]
locations = ["return"]
"#,
    );

    let config = ControllerConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.sensors.locations, vec![Location::Return]);
    assert_eq!(config.sensors.topic_prefix, "frankensystem");
    assert_eq!(config.mqtt, ControllerConfig::default().mqtt);
    assert_eq!(config.app_env, AppEnv::Development);
}

#[test]
fn test_missing_file_is_a_read_error() {
    let result = ControllerConfig::load_from_file(std::path::Path::new(
        "/nonexistent/dewpoint-controller/config.toml",
    ));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_is_a_parse_error() {
    let temp_file = write_config("[mqtt\nbroker_url = ");
    let result = ControllerConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_unknown_location_is_rejected() {
    let temp_file = write_config(
        r#"
[sensors]
locations = ["attic"]
"#,
    );
    let result = ControllerConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_http_broker_url_is_rejected() {
    let temp_file = write_config(
        r#"
[mqtt]
broker_url = "http://localhost:1883"
"#,
    );
    let result = ControllerConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidBrokerUrl(_))));
}

#[test]
fn test_validation_failures_are_reported() {
    let cases = [
        "[sensors]\nlocations = []",
        "[sensors]\nlocations = [\"supply\", \"supply\"]",
        "[mqtt]\nclient_id = \"  \"",
        "[mqtt]\nconnect_timeout_secs = 0",
        "[reconnect]\nsustained_delay_ms = 0",
    ];

    for content in cases {
        let temp_file = write_config(content);
        let result = ControllerConfig::load_from_file(temp_file.path());
        assert!(
            matches!(result, Err(ConfigError::InvalidConfig(_))),
            "expected validation failure for {content:?}, got {result:?}"
        );
    }
}

#[test]
fn test_config_round_trips_through_toml() {
    let config = ControllerConfig::default();
    let rendered = toml::to_string_pretty(&config).unwrap();

    let temp_file = write_config(&rendered);
    let reloaded = ControllerConfig::load_from_file(temp_file.path()).unwrap();
    assert_eq!(reloaded.sensors, config.sensors);
    assert_eq!(reloaded.service, config.service);
}
