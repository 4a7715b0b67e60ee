//! Unit tests for schema records and redaction.

#![allow(clippy::panic, clippy::unwrap_used)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    NexusError,
    schema::{ConfigMetadata, DEFAULT_GROUP, NexusConfig, REDACTED, redact, shape_name},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
struct Credentials {
    username: String,
    password: String,
    api_key: String,
    normal_field: String,
}

impl NexusConfig for Credentials {
    const METADATA: Option<ConfigMetadata> = Some(ConfigMetadata::new("credentials.json"));
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
struct Server {
    host: String,
    #[serde(default = "default_port")]
    port: u16,
}

fn default_port() -> u16 {
    8080
}

impl NexusConfig for Server {
    fn validate(&self) -> Result<(), String> {
        if self.host.is_empty() {
            return Err("host must not be empty".to_string());
        }
        Ok(())
    }
}

fn as_map(value: Value) -> serde_json::Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other:?}"),
    }
}

#[test]
fn metadata_defaults_to_default_group() {
    let metadata = ConfigMetadata::new("app.json");

    assert_eq!(metadata.id, "app.json");
    assert_eq!(metadata.group, DEFAULT_GROUP);
    assert!(!metadata.auto_refresh);

    let metadata = metadata.with_group("PROD").with_auto_refresh(true);
    assert_eq!(metadata.group, "PROD");
    assert!(metadata.auto_refresh);
}

#[test]
fn metadata_is_absent_unless_declared() {
    assert!(Server::METADATA.is_none());
    assert_eq!(
        Credentials::METADATA.map(|m| m.id),
        Some("credentials.json")
    );
}

#[test]
fn type_name_strips_module_path() {
    assert_eq!(Server::type_name(), "Server");
    assert_eq!(Credentials::type_name(), "Credentials");
}

#[test]
fn from_mapping_fills_defaults() {
    let server = Server::from_mapping(as_map(json!({"host": "localhost"})), "g/server").unwrap();

    assert_eq!(server.host, "localhost");
    assert_eq!(server.port, 8080);
}

#[test]
fn from_mapping_reports_type_errors_under_key() {
    let err = Server::from_mapping(as_map(json!({"host": "h", "port": "high"})), "g/server")
        .unwrap_err();

    match err {
        NexusError::ConfigValidation { key, .. } => assert_eq!(key, "g/server"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn from_mapping_runs_validate_hook() {
    let err = Server::from_mapping(as_map(json!({"host": ""})), "g/server").unwrap_err();

    assert!(err.to_string().contains("host must not be empty"));
}

#[test]
fn json_round_trip_preserves_fields() {
    let original = Server {
        host: "db.internal".to_string(),
        port: 6543,
    };

    let text = serde_json::to_string(&original).unwrap();
    let parsed: Value = serde_json::from_str(&text).unwrap();
    let restored = Server::from_mapping(as_map(parsed), "g/server").unwrap();

    assert_eq!(restored, original);
}

#[test]
fn summary_hides_sensitive_fields() {
    let credentials = Credentials {
        username: "admin".to_string(),
        password: "hunter2".to_string(),
        api_key: "abc".to_string(),
        normal_field: "visible".to_string(),
    };

    let summary = credentials.summary().unwrap();

    assert_eq!(summary["username"], "admin");
    assert_eq!(summary["normal_field"], "visible");
    assert_eq!(summary["password"], REDACTED);
    assert_eq!(summary["api_key"], REDACTED);
    assert_eq!(credentials.password, "hunter2");
}

#[test]
fn redaction_ignores_case() {
    let redacted = redact(as_map(json!({
        "Password": "a",
        "API_KEY": "b",
        "AccessToken": "c",
        "client_secret": "d",
        "endpoint": "e",
    })));

    assert_eq!(redacted["Password"], REDACTED);
    assert_eq!(redacted["API_KEY"], REDACTED);
    assert_eq!(redacted["AccessToken"], REDACTED);
    assert_eq!(redacted["client_secret"], REDACTED);
    assert_eq!(redacted["endpoint"], "e");
}

#[test]
fn schema_document_lists_properties() {
    let schema = Server::schema_document();

    assert!(schema["properties"]["host"].is_object());
    assert!(schema["properties"]["port"].is_object());
}

#[test]
fn shape_names() {
    assert_eq!(shape_name(&json!([1, 2])), "list");
    assert_eq!(shape_name(&json!("x")), "string");
    assert_eq!(shape_name(&json!(1)), "number");
    assert_eq!(shape_name(&json!(null)), "null");
    assert_eq!(shape_name(&json!({})), "mapping");
}
