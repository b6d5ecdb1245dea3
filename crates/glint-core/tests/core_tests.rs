use glint_core::{ConfigError, GlintConfig, IpcConfig, Message, PluginsConfig};
use serde_json::json;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_load_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
        label = "dock"
        scripts_dir = "/opt/glint"

        [ipc]
        port = 4100
        request_timeout_ms = 250

        [plugins]
        dir = "/opt/glint/plugins"
        disabled = ["legacy-*", "clock"]
        max_memory_mb = 16
        "#,
    )
    .unwrap();

    let config = GlintConfig::load(&path).unwrap();
    assert_eq!(config.label, "dock");
    assert_eq!(config.ipc.port, 4100);
    assert_eq!(config.ipc.request_timeout_ms, 250);
    assert_eq!(config.ipc.max_frame_len, IpcConfig::default().max_frame_len);
    assert_eq!(config.plugins.disabled.len(), 2);
    assert_eq!(config.plugins.max_memory_mb, 16);
    assert_eq!(
        config.plugins.max_instructions,
        PluginsConfig::default().max_instructions
    );
}

#[test]
fn test_load_missing_explicit_file_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.toml");

    let err = GlintConfig::load_or_default(Some(&path)).unwrap_err();
    assert!(matches!(err, ConfigError::NotFound { .. }));
}

#[test]
fn test_load_rejects_zero_timeout() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "[ipc]\nrequest_timeout_ms = 0\n").unwrap();

    let err = GlintConfig::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { .. }));
}

#[test]
fn test_load_reports_parse_errors_with_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "label = [not toml").unwrap();

    let err = GlintConfig::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().contains("config.toml"));
}

#[test]
fn test_message_round_trip_keeps_extra_fields() {
    let line = r#"{"id":"7f3a","type":"exec","ok":true,"result":{"cpu":12}}"#;
    let msg = Message::decode(line).unwrap();

    assert_eq!(msg.id.as_deref(), Some("7f3a"));
    assert_eq!(msg.kind, "exec");
    assert_eq!(msg.get("result"), Some(&json!({ "cpu": 12 })));

    let value = msg.to_value();
    assert_eq!(value["ok"], json!(true));
    assert_eq!(value["type"], json!("exec"));
}

#[test]
fn test_event_message_builder() {
    let msg = Message::new("battery.sh")
        .insert("label", "main")
        .insert("data", json!({ "level": 80 }));

    assert!(msg.id.is_none());
    let encoded = msg.encode().unwrap();
    assert!(!encoded.contains("\"id\""));
    assert!(encoded.contains("\"type\":\"battery.sh\""));
}
