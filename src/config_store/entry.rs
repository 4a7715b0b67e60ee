use std::{any::Any, sync::Arc};

use serde_json::{Map, Value};

use crate::{NexusConfig, Result};

/// Type-erased view of a stored configuration instance.
///
/// Lets callers enumerate the store without knowing every schema type.
pub trait StoredConfig: Send + Sync {
    /// Short name of the schema type.
    fn name(&self) -> &'static str;

    /// Fully qualified path of the schema type.
    fn type_path(&self) -> &'static str;

    /// Full field mapping of the instance.
    ///
    /// # Errors
    /// Returns `NexusError::Serialization` if the instance cannot be serialized.
    fn snapshot(&self) -> Result<Map<String, Value>>;

    /// Field mapping with sensitive values hidden.
    ///
    /// # Errors
    /// Returns `NexusError::Serialization` if the instance cannot be serialized.
    fn redacted(&self) -> Result<Map<String, Value>>;

    /// Upcasts for downcasting back to the concrete schema type.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: NexusConfig> StoredConfig for T {
    fn name(&self) -> &'static str {
        T::type_name()
    }

    fn type_path(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn snapshot(&self) -> Result<Map<String, Value>> {
        self.to_mapping()
    }

    fn redacted(&self) -> Result<Map<String, Value>> {
        self.summary()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
