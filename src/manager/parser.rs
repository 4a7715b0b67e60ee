use serde_json::{Map, Value};

use crate::{
    ConfigFormat, NexusError, Result, provider::ConfigKey, schema::shape_name,
};

use super::interpolation::interpolate_env;

/// Parses raw document text into a field mapping.
///
/// The parser is picked from the id's extension alone. The top level must
/// be a mapping; string leaves are then expanded from the environment.
///
/// # Errors
/// Returns `NexusError::ConfigValidation` keyed by `group/id` on a syntax
/// error or a non-mapping top level.
pub fn parse_content(content: &str, key: &ConfigKey) -> Result<Map<String, Value>> {
    let format = ConfigFormat::sniff(&key.id);

    let parsed: Value = match format {
        ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
        ConfigFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
    }
    .map_err(|reason| NexusError::validation(key, format!("format parse failed: {reason}")))?;

    let Value::Object(mut map) = parsed else {
        return Err(NexusError::validation(
            key,
            format!("must be a mapping, got {}", shape_name(&parsed)),
        ));
    };

    for value in map.values_mut() {
        interpolate_env(value);
    }

    Ok(map)
}
