//! Integration tests for configuration validation

#![allow(clippy::expect_used, clippy::unwrap_used)]

use mqtt_transport::config::{
    ListenerConfig, NetworkConfig, TransportKind, DEFAULT_PROXY_HEADER_TIMEOUT,
    DEFAULT_TCP_ADDRESS,
};
use mqtt_transport::core::packet::MAX_PACKET_SIZE;
use std::collections::HashMap;
use std::time::Duration;
use tracing::Level;

#[test]
fn test_default_config_validates() {
    let config = NetworkConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
    assert_eq!(
        config.server.listeners,
        vec![ListenerConfig::tcp(DEFAULT_TCP_ADDRESS)]
    );
    assert_eq!(config.server.max_packet_size, MAX_PACKET_SIZE);
}

#[test]
fn test_invalid_listener_address() {
    let config = NetworkConfig::default_with_overrides(|c| {
        c.server.listeners = vec![ListenerConfig::websocket("invalid_address")];
    });

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Invalid ws listener address format")));
}

#[test]
fn test_empty_listener_address() {
    let config = NetworkConfig::default_with_overrides(|c| {
        c.server.listeners = vec![ListenerConfig::tcp("")];
    });

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("cannot be empty")));
}

#[test]
fn test_duplicate_listener_address() {
    let config = NetworkConfig::default_with_overrides(|c| {
        c.server.listeners = vec![
            ListenerConfig::tcp("127.0.0.1:1883"),
            ListenerConfig::websocket("127.0.0.1:1883"),
        ];
    });

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Duplicate listener address")));
}

#[test]
fn test_no_listeners_is_valid() {
    let config = NetworkConfig::default_with_overrides(|c| c.server.listeners.clear());
    assert!(config.validate().is_empty());
}

#[test]
fn test_max_packet_size_bounds() {
    let tiny = NetworkConfig::default_with_overrides(|c| c.server.max_packet_size = 1);
    assert!(tiny
        .validate()
        .iter()
        .any(|e| e.contains("Max packet size too small")));

    let huge = NetworkConfig::default_with_overrides(|c| {
        c.server.max_packet_size = MAX_PACKET_SIZE + 1
    });
    assert!(huge
        .validate()
        .iter()
        .any(|e| e.contains("Max packet size too large")));
}

#[test]
fn test_proxy_timeout_only_checked_when_enabled() {
    let disabled = NetworkConfig::default_with_overrides(|c| {
        c.server.proxy_header_timeout = Duration::from_millis(1);
    });
    assert!(disabled.validate().is_empty());

    let short = NetworkConfig::default_with_overrides(|c| {
        c.server.proxy_protocol = true;
        c.server.proxy_header_timeout = Duration::from_millis(1);
    });
    assert!(short
        .validate()
        .iter()
        .any(|e| e.contains("PROXY header timeout too short")));

    let long = NetworkConfig::default_with_overrides(|c| {
        c.server.proxy_protocol = true;
        c.server.proxy_header_timeout = Duration::from_secs(120);
    });
    assert!(long
        .validate()
        .iter()
        .any(|e| e.contains("PROXY header timeout too long")));
}

#[test]
fn test_empty_app_name() {
    let config = NetworkConfig::default_with_overrides(|c| c.logging.app_name.clear());
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Application name cannot be empty")));
}

#[test]
fn test_long_app_name() {
    let config = NetworkConfig::default_with_overrides(|c| c.logging.app_name = "a".repeat(65));
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Application name too long")));
}

#[test]
fn test_no_logging_outputs() {
    let config = NetworkConfig::default_with_overrides(|c| c.logging.log_to_console = false);
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("At least one logging output")));
}

#[test]
fn test_validate_strict_with_valid_config() {
    assert!(NetworkConfig::default().validate_strict().is_ok());
}

#[test]
fn test_validate_strict_with_invalid_config() {
    let config = NetworkConfig::default_with_overrides(|c| {
        c.server.max_packet_size = 0;
        c.logging.app_name.clear();
    });

    let err = config.validate_strict().unwrap_err();
    let error_str = err.to_string();
    assert!(error_str.contains("Configuration validation failed"));
    assert!(error_str.contains("Max packet size too small"));
    assert!(error_str.contains("Application name cannot be empty"));
}

#[test]
fn test_parse_toml_with_multiple_listeners() {
    let config = NetworkConfig::from_toml(
        r#"
        [server]
        proxy_protocol = true
        proxy_header_timeout = 250
        max_packet_size = 65536

        [[server.listeners]]
        protocol = "tcp"
        address = "127.0.0.1:1883"

        [[server.listeners]]
        protocol = "websocket"
        address = "127.0.0.1:8080"

        [logging]
        app_name = "edge-gateway"
        log_level = "debug"
        log_to_console = true
        json_format = true
        "#,
    )
    .expect("valid TOML");

    assert!(config.server.proxy_protocol);
    assert_eq!(config.server.proxy_header_timeout, Duration::from_millis(250));
    assert_eq!(config.server.max_packet_size, 65536);
    assert_eq!(config.server.listeners.len(), 2);
    assert_eq!(config.server.listeners[1].protocol, TransportKind::WebSocket);
    assert_eq!(config.logging.log_level, Level::DEBUG);
    assert!(config.logging.json_format);
    assert!(config.validate().is_empty());
}

#[test]
fn test_parse_toml_defaults_missing_fields() {
    let config = NetworkConfig::from_toml(
        r#"
        [[server.listeners]]
        protocol = "ws"
        address = "0.0.0.0:8080"
        "#,
    )
    .expect("valid TOML");

    assert!(!config.server.proxy_protocol);
    assert_eq!(config.server.proxy_header_timeout, DEFAULT_PROXY_HEADER_TIMEOUT);
    assert_eq!(
        config.server.listeners,
        vec![ListenerConfig::websocket("0.0.0.0:8080")]
    );
}

#[test]
fn test_parse_toml_rejects_unknown_protocol() {
    let result = NetworkConfig::from_toml(
        r#"
        [[server.listeners]]
        protocol = "quic"
        address = "0.0.0.0:1883"
        "#,
    );
    assert!(result.is_err());
}

#[test]
fn test_example_config_roundtrips() {
    let example = NetworkConfig::example_config();
    let parsed = NetworkConfig::from_toml(&example).expect("example must parse");
    assert_eq!(parsed.server.listeners, NetworkConfig::default().server.listeners);
    assert!(parsed.validate().is_empty());
}

#[test]
fn test_save_and_load_file() {
    let path = std::env::temp_dir().join(format!(
        "mqtt-transport-config-{}.toml",
        std::process::id()
    ));
    let config = NetworkConfig::default_with_overrides(|c| {
        c.server.listeners.push(ListenerConfig::websocket("127.0.0.1:9001"));
    });

    config.save_to_file(&path).unwrap();
    let loaded = NetworkConfig::from_file(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(loaded.server.listeners, config.server.listeners);
}

#[test]
fn test_missing_file_is_config_error() {
    let err = NetworkConfig::from_file("/nonexistent/mqtt-transport.toml").unwrap_err();
    assert!(err.to_string().contains("Failed to open config file"));
}

#[test]
fn test_env_overrides() {
    let vars: HashMap<&str, &str> = [
        ("MQTT_TRANSPORT_TCP_ADDRESS", "127.0.0.1:11883"),
        ("MQTT_TRANSPORT_WS_ADDRESS", "127.0.0.1:18080"),
        ("MQTT_TRANSPORT_PROXY_PROTOCOL", "yes"),
        ("MQTT_TRANSPORT_MAX_PACKET_SIZE", "4096"),
        ("MQTT_TRANSPORT_LOG_LEVEL", "warn"),
    ]
    .into_iter()
    .collect();

    let config =
        NetworkConfig::from_vars(|key| vars.get(key).map(|v| v.to_string())).unwrap();

    assert_eq!(
        config.server.listeners,
        vec![
            ListenerConfig::tcp("127.0.0.1:11883"),
            ListenerConfig::websocket("127.0.0.1:18080"),
        ]
    );
    assert!(config.server.proxy_protocol);
    assert_eq!(config.server.max_packet_size, 4096);
    assert_eq!(config.logging.log_level, Level::WARN);
}

#[test]
fn test_env_rejects_bad_values() {
    let result = NetworkConfig::from_vars(|key| {
        (key == "MQTT_TRANSPORT_MAX_PACKET_SIZE").then(|| "lots".to_string())
    });
    assert!(result.is_err());

    let result = NetworkConfig::from_vars(|key| {
        (key == "MQTT_TRANSPORT_PROXY_PROTOCOL").then(|| "maybe".to_string())
    });
    assert!(result.is_err());
}

#[test]
fn test_env_without_addresses_keeps_default_listener() {
    let config = NetworkConfig::from_vars(|_| None).unwrap();
    assert_eq!(
        config.server.listeners,
        vec![ListenerConfig::tcp(DEFAULT_TCP_ADDRESS)]
    );
}
