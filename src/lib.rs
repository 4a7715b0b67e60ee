//! Nexus Config - typed, live-reloading configuration records.
//!
//! Configuration documents live in a source (a directory tree or a config
//! center) and are loaded into strongly typed records. The main pieces are:
//!
//! - [`NexusConfig`] schema types with statically declared source keys
//! - [`Provider`](provider::Provider) backends that fetch and watch documents
//! - A thread-safe [`ConfigStore`] holding one validated instance per type
//! - [`ConfigManager`], which wires the above together and keeps instances
//!   current as their documents change
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use nexus_config::{ConfigManager, ConfigMetadata, FileProviderOptions, NexusConfig};
//! use schemars::JsonSchema;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
//! struct AppConfig {
//!     name: String,
//!     version: u32,
//! }
//!
//! impl NexusConfig for AppConfig {
//!     const METADATA: Option<ConfigMetadata> =
//!         Some(ConfigMetadata::new("app.json").with_group("PROD"));
//! }
//!
//! # fn main() -> nexus_config::Result<()> {
//! let manager = ConfigManager::with_file(FileProviderOptions::new("configs"))?;
//! manager.register::<AppConfig>()?;
//!
//! let app = manager.get::<AppConfig>()?;
//! println!("running {} v{}", app.name, app.version);
//! # Ok(())
//! # }
//! ```

/// Core error types and result aliases.
pub mod core;

/// Schema capability, metadata and redaction.
pub mod schema;

/// Document formats.
pub mod format;

/// Thread-safe store of live configuration instances.
pub mod config_store;

/// Configuration sources.
pub mod provider;

/// Manager tying a provider to the store.
pub mod manager;

/// Tracing subscriber setup for binaries.
pub mod tracing_config;

/// Re-exported core types for convenience.
pub use core::{NexusError, Result};

pub use config_store::ConfigStore;
pub use format::ConfigFormat;
pub use manager::{ConfigManager, ManagerInfo, Registration};
pub use provider::{FileProvider, FileProviderOptions, RemoteOptions, RemoteProvider};
pub use schema::{ConfigMetadata, DEFAULT_GROUP, NexusConfig};
