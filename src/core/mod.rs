use std::{fmt, path::PathBuf};

use thiserror::Error;

/// Error types for the configuration system.
///
/// Provider-facing failures (`ProviderConnection`, `ConfigSource`) carry the
/// backend or key they relate to; schema-facing failures
/// (`ConfigValidation`, `ConfigNotRegistered`, `MissingConfigMetadata`)
/// carry the key or type name that was involved.
#[derive(Error, Debug)]
pub enum NexusError {
    /// A provider could not reach or initialise its source
    #[error("failed to connect to {backend}: {reason}")]
    ProviderConnection {
        /// Backend name (e.g. "File", "Nacos")
        backend: String,
        /// Why the connection failed
        reason: String,
    },

    /// A fetch, watch or unwatch against a provider failed
    #[error("config source operation [{operation}] failed for {group}/{id}: {reason}")]
    ConfigSource {
        /// Configuration id
        id: String,
        /// Configuration group
        group: String,
        /// Operation that failed (get_config, watch, ...)
        operation: String,
        /// Failure details
        reason: String,
    },

    /// Raw content could not be parsed or did not satisfy the schema
    #[error("configuration validation failed for '{key}': {reason}")]
    ConfigValidation {
        /// The `group/id` key or type name being validated
        key: String,
        /// Validation error details
        reason: String,
    },

    /// The schema type has no instance in the store
    #[error("configuration type '{type_name}' is not registered")]
    ConfigNotRegistered {
        /// Short name of the schema type
        type_name: String,
    },

    /// The schema type does not declare `{id, group}` metadata
    #[error(
        "configuration type '{type_name}' is missing metadata; declare NexusConfig::METADATA"
    )]
    MissingConfigMetadata {
        /// Short name of the schema type
        type_name: String,
    },

    /// A format name outside the supported set
    #[error("unsupported config format '{0}', expected 'json' or 'yaml'")]
    UnsupportedFormat(String),

    /// The manager was closed and no longer accepts work
    #[error("config manager is closed")]
    ManagerClosed,

    /// A record could not be converted to or from its mapping form
    #[error("failed to serialize {content_type}: {details}")]
    Serialization {
        /// What was being serialized
        content_type: String,
        /// Serialization error details
        details: String,
    },

    /// I/O operation error
    #[error("I/O error on '{path}': {details}")]
    Io {
        /// Path where the I/O error occurred
        path: PathBuf,
        /// I/O error details
        details: String,
    },
}

/// A specialized `Result` type for configuration operations.
pub type Result<T> = std::result::Result<T, NexusError>;

impl NexusError {
    /// Creates a `ConfigSource` error for the given key and operation.
    pub fn source_error(
        id: &str,
        group: &str,
        operation: &str,
        reason: impl fmt::Display,
    ) -> Self {
        NexusError::ConfigSource {
            id: id.to_string(),
            group: group.to_string(),
            operation: operation.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Creates a `ConfigValidation` error for the given key.
    pub fn validation(key: impl fmt::Display, reason: impl fmt::Display) -> Self {
        NexusError::ConfigValidation {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Creates an `Io` error with path context.
    pub fn io(error: impl fmt::Display, path: impl Into<PathBuf>) -> Self {
        NexusError::Io {
            path: path.into(),
            details: error.to_string(),
        }
    }
}
