//! Configuration sources.
//!
//! A [`Provider`] fetches raw documents by `(id, group)` and pushes new
//! content to a [`ChangeListener`] when the document changes. Two backends
//! ship with the crate: [`FileProvider`] polls a directory tree and
//! [`RemoteProvider`] wraps a config-center client.

mod file;
mod remote;
mod watchers;


pub use file::{FileProvider, FileProviderOptions};
pub use remote::{
    ClientError, ClientFactory, ClientResult, NacosClient, NacosClientFactory, RemoteClient,
    RemoteOptions, RemoteProvider,
};
pub use watchers::WatcherRegistry;

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::error;

use crate::Result;

/// Receives new document content for one watched key.
///
/// Implementations run on the provider's delivery thread and must not
/// block for long.
pub trait ChangeListener: Send + Sync {
    /// Called with the full, non-empty new content of the document.
    fn on_change(&self, content: &str);
}

impl<F> ChangeListener for F
where
    F: Fn(&str) + Send + Sync,
{
    fn on_change(&self, content: &str) {
        self(content)
    }
}

/// Two-part key of a configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfigKey {
    /// Document id (file name or data id)
    pub id: String,
    /// Group the document belongs to
    pub group: String,
}

impl ConfigKey {
    /// Builds a key from its parts.
    pub fn new(id: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            group: group.into(),
        }
    }

    /// Composite `group::id` form used to index watchers.
    pub fn watcher_key(&self) -> String {
        format!("{}::{}", self.group, self.id)
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.id)
    }
}

/// Introspection payload describing a provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    /// Backend name
    pub name: String,
    /// Whether the provider is connected
    pub connected: bool,
    /// Number of active watchers
    pub watchers_count: usize,
    /// Backend-specific fields
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// A source of configuration documents.
///
/// `connect` must succeed before any other operation does. After
/// `disconnect` returns no further notifications are delivered and all
/// watchers are gone.
pub trait Provider: Send + Sync {
    /// Backend name used in logs and errors.
    fn name(&self) -> &str;

    /// Prepares the source for use.
    ///
    /// # Errors
    /// Returns `NexusError::ProviderConnection` if the source is unusable.
    fn connect(&self) -> Result<()>;

    /// Releases the source and drops every watcher.
    fn disconnect(&self);

    /// Fetches the raw document for `(id, group)`.
    ///
    /// # Errors
    /// Returns `NexusError::ConfigSource` if the provider is not connected,
    /// the document is missing, or its content is empty.
    fn get_config(&self, id: &str, group: &str) -> Result<String>;

    /// Registers `listener` for changes to `(id, group)`, replacing any
    /// previous listener for the same key.
    ///
    /// # Errors
    /// Returns `NexusError::ConfigSource` if the watch cannot be set up.
    fn watch(&self, id: &str, group: &str, listener: Arc<dyn ChangeListener>) -> Result<()>;

    /// Removes the listener for `(id, group)`. Unknown keys are ignored.
    fn unwatch(&self, id: &str, group: &str);

    /// Whether `connect` has succeeded and `disconnect` has not been called.
    fn is_connected(&self) -> bool;

    /// Introspection payload.
    fn info(&self) -> ProviderInfo;
}

impl<P: Provider + ?Sized> Provider for Arc<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn connect(&self) -> Result<()> {
        (**self).connect()
    }

    fn disconnect(&self) {
        (**self).disconnect();
    }

    fn get_config(&self, id: &str, group: &str) -> Result<String> {
        (**self).get_config(id, group)
    }

    fn watch(&self, id: &str, group: &str, listener: Arc<dyn ChangeListener>) -> Result<()> {
        (**self).watch(id, group, listener)
    }

    fn unwatch(&self, id: &str, group: &str) {
        (**self).unwatch(id, group);
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn info(&self) -> ProviderInfo {
        (**self).info()
    }
}

/// Delivers `content` to `listener`, containing any panic so one faulty
/// listener cannot take down the delivery thread.
pub(crate) fn deliver(key: &str, listener: &dyn ChangeListener, content: &str) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener.on_change(content)));

    if outcome.is_err() {
        error!(key, "Change listener panicked; notification dropped");
    }
}
