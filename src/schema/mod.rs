//! Typed configuration records.
//!
//! A schema type is an ordinary serde struct that implements [`NexusConfig`].
//! Its source key is declared statically through [`NexusConfig::METADATA`]:
//!
//! ```rust
//! use nexus_config::{ConfigMetadata, NexusConfig};
//! use schemars::JsonSchema;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
//! struct DatabaseConfig {
//!     host: String,
//!     #[serde(default = "default_port")]
//!     port: u16,
//!     password: String,
//! }
//!
//! fn default_port() -> u16 {
//!     5432
//! }
//!
//! impl NexusConfig for DatabaseConfig {
//!     const METADATA: Option<ConfigMetadata> =
//!         Some(ConfigMetadata::new("database.json").with_group("PROD"));
//! }
//! ```

mod redaction;

#[cfg(test)]
mod tests;

pub use redaction::{REDACTED, redact};

use schemars::JsonSchema;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::{NexusError, Result};

/// Group used when a schema does not name one.
pub const DEFAULT_GROUP: &str = "DEFAULT_GROUP";

/// Source key and refresh policy attached to a schema type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConfigMetadata {
    /// Document id within the group (e.g. `database.json`)
    pub id: &'static str,
    /// Group the document lives in
    pub group: &'static str,
    /// Whether the owner expects live updates for this record
    pub auto_refresh: bool,
}

impl ConfigMetadata {
    /// Metadata for `id` in [`DEFAULT_GROUP`] without auto refresh.
    pub const fn new(id: &'static str) -> Self {
        Self {
            id,
            group: DEFAULT_GROUP,
            auto_refresh: false,
        }
    }

    /// Sets the group.
    pub const fn with_group(mut self, group: &'static str) -> Self {
        self.group = group;
        self
    }

    /// Sets the auto refresh flag.
    pub const fn with_auto_refresh(mut self, auto_refresh: bool) -> Self {
        self.auto_refresh = auto_refresh;
        self
    }
}

/// A configuration schema: constructible from a mapping, self-validating,
/// and serializable back to a mapping.
///
/// Instances are never mutated in place once stored. Every change goes
/// through [`NexusConfig::from_mapping`], which builds a complete candidate
/// and runs [`NexusConfig::validate`] before it can replace the old value.
pub trait NexusConfig:
    Serialize + DeserializeOwned + JsonSchema + Send + Sync + 'static
{
    /// Source metadata. Types that keep the default cannot be registered.
    const METADATA: Option<ConfigMetadata> = None;

    /// Semantic checks beyond what deserialization enforces.
    ///
    /// # Errors
    /// Returns a human readable reason when the record is not acceptable.
    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }

    /// Short type name used in logs, errors and introspection.
    fn type_name() -> &'static str {
        let full = std::any::type_name::<Self>();
        let path = full.split('<').next().unwrap_or(full);
        path.rsplit("::").next().unwrap_or(path)
    }

    /// Builds and validates an instance from a parsed mapping.
    ///
    /// # Errors
    /// Returns `NexusError::ConfigValidation` keyed by `key` when the mapping
    /// does not fit the schema or validation rejects it.
    fn from_mapping(map: Map<String, Value>, key: &str) -> Result<Self> {
        let instance: Self = serde_json::from_value(Value::Object(map))
            .map_err(|e| NexusError::validation(key, e))?;

        instance
            .validate()
            .map_err(|reason| NexusError::validation(key, reason))?;

        Ok(instance)
    }

    /// Serializes the record to its field mapping.
    ///
    /// # Errors
    /// Returns `NexusError::Serialization` when the record does not serialize
    /// to a JSON object.
    fn to_mapping(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(NexusError::Serialization {
                content_type: Self::type_name().to_string(),
                details: format!("expected an object, got {}", shape_name(&other)),
            }),
            Err(e) => Err(NexusError::Serialization {
                content_type: Self::type_name().to_string(),
                details: e.to_string(),
            }),
        }
    }

    /// Field mapping with sensitive values replaced by [`REDACTED`].
    ///
    /// # Errors
    /// Propagates serialization failures from [`NexusConfig::to_mapping`].
    fn summary(&self) -> Result<Map<String, Value>> {
        self.to_mapping().map(redact)
    }

    /// JSON Schema document describing the record.
    fn schema_document() -> Value {
        schemars::schema_for!(Self).to_value()
    }
}

/// Name of a JSON value's shape, as reported in validation errors.
pub fn shape_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}
