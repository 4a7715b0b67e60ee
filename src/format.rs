use std::{fmt, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::NexusError;

/// Serialization format of a configuration document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigFormat {
    /// JSON text.
    #[default]
    Json,
    /// YAML text.
    Yaml,
}

impl ConfigFormat {
    /// File extension appended to ids that have none.
    pub fn extension(self) -> &'static str {
        match self {
            ConfigFormat::Json => "json",
            ConfigFormat::Yaml => "yaml",
        }
    }

    /// Picks the parser for a document by its file name.
    ///
    /// `.yaml` and `.yml` select YAML; anything else, including no
    /// extension at all, is treated as JSON.
    pub fn sniff(name: impl AsRef<Path>) -> Self {
        let extension = name
            .as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("yaml") | Some("yml") => ConfigFormat::Yaml,
            _ => ConfigFormat::Json,
        }
    }
}

impl FromStr for ConfigFormat {
    type Err = NexusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ConfigFormat::Json),
            "yaml" => Ok(ConfigFormat::Yaml),
            other => Err(NexusError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl fmt::Display for ConfigFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}
