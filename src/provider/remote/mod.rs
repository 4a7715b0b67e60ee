//! Config-center provider.
//!
//! [`RemoteProvider`] owns a [`RemoteClient`] for the lifetime of a
//! connection: the client is built on `connect` and shut down on
//! `disconnect`. The shipped client talks to Nacos; any other vendor plugs
//! in through [`ClientFactory`].

mod client;
mod nacos;

#[cfg(test)]
mod tests;

pub use client::{ClientError, ClientFactory, ClientResult, RemoteClient};
pub use nacos::{NacosClient, NacosClientFactory};

use std::{collections::BTreeMap, fmt, sync::Arc};

use parking_lot::RwLock;
use serde_json::{Map, json};
use tracing::{debug, error, info, warn};

use crate::{NexusError, Result, schema::DEFAULT_GROUP};

use super::{ChangeListener, ConfigKey, Provider, ProviderInfo, WatcherRegistry, deliver};

const PROBE_ID: &str = "__connection_test__";

/// Connection parameters for a config center.
#[derive(Clone, PartialEq, Default)]
pub struct RemoteOptions {
    /// One or more `host:port` (or full URL) addresses
    pub server_addresses: Vec<String>,
    /// Namespace id; empty selects the public namespace
    pub namespace: String,
    /// Login name, if the server requires authentication
    pub username: Option<String>,
    /// Login password
    pub password: Option<String>,
    /// Client-specific settings passed through untouched
    pub extra: BTreeMap<String, String>,
}

impl RemoteOptions {
    /// Options for a comma-separated list of server addresses.
    pub fn new(addresses: &str) -> Self {
        Self::with_servers(addresses.split(','))
    }

    /// Options for an explicit list of server addresses.
    pub fn with_servers<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let server_addresses = addresses
            .into_iter()
            .map(|address| address.as_ref().trim().to_string())
            .filter(|address| !address.is_empty())
            .collect();

        Self {
            server_addresses,
            ..Self::default()
        }
    }

    /// Sets the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Sets login credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Adds a client-specific setting.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Namespace as displayed to users.
    pub fn namespace_label(&self) -> &str {
        if self.namespace.is_empty() {
            "public"
        } else {
            &self.namespace
        }
    }
}

impl fmt::Debug for RemoteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteOptions")
            .field("server_addresses", &self.server_addresses)
            .field("namespace", &self.namespace)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| crate::schema::REDACTED))
            .field("extra", &self.extra)
            .finish()
    }
}

/// Wraps a listener so deliveries are logged and isolated from the client.
struct LoggedListener {
    key: ConfigKey,
    inner: Arc<dyn ChangeListener>,
}

impl ChangeListener for LoggedListener {
    fn on_change(&self, content: &str) {
        info!(key = %self.key, "Config change received");
        deliver(&self.key.watcher_key(), self.inner.as_ref(), content);
    }
}

/// Provider backed by a config-center client.
pub struct RemoteProvider {
    name: String,
    options: RemoteOptions,
    factory: Box<dyn ClientFactory>,
    client: RwLock<Option<Arc<dyn RemoteClient>>>,
    watchers: WatcherRegistry,
}

impl RemoteProvider {
    /// Provider for a Nacos server.
    pub fn nacos(options: RemoteOptions) -> Self {
        Self::with_factory("Nacos", options, NacosClientFactory)
    }

    /// Provider using a custom client factory.
    pub fn with_factory(
        name: impl Into<String>,
        options: RemoteOptions,
        factory: impl ClientFactory + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            options,
            factory: Box::new(factory),
            client: RwLock::new(None),
            watchers: WatcherRegistry::new(),
        }
    }

    /// Connection parameters.
    pub fn options(&self) -> &RemoteOptions {
        &self.options
    }

    fn client(&self) -> Option<Arc<dyn RemoteClient>> {
        self.client.read().clone()
    }

    fn connected_client(&self, id: &str, group: &str, operation: &str) -> Result<Arc<dyn RemoteClient>> {
        self.client().ok_or_else(|| {
            NexusError::source_error(id, group, operation, "not connected to config server")
        })
    }
}

impl Provider for RemoteProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&self) -> Result<()> {
        let client = self
            .factory
            .create(&self.options)
            .map_err(|e| NexusError::ProviderConnection {
                backend: self.name.clone(),
                reason: e.to_string(),
            })?;

        // Reachability probe; a failure here is reported later by real fetches.
        if let Err(e) = client.get_config(PROBE_ID, DEFAULT_GROUP) {
            debug!(error = %e, "Connection probe failed");
        }

        if let Some(previous) = self.client.write().replace(client) {
            previous.shutdown();
        }

        info!(
            backend = %self.name,
            servers = ?self.options.server_addresses,
            namespace = self.options.namespace_label(),
            "Connected to config server"
        );
        Ok(())
    }

    fn disconnect(&self) {
        if let Some(client) = self.client.write().take() {
            client.shutdown();
        }
        self.watchers.clear();

        info!(backend = %self.name, "Disconnected from config server");
    }

    fn get_config(&self, id: &str, group: &str) -> Result<String> {
        const OPERATION: &str = "get_config";
        let client = self.connected_client(id, group, OPERATION)?;

        match client.get_config(id, group) {
            Ok(Some(content)) if !content.trim().is_empty() => {
                debug!(key = %ConfigKey::new(id, group), "Fetched config");
                Ok(content)
            }
            Ok(_) => Err(NexusError::source_error(
                id,
                group,
                OPERATION,
                "config does not exist or is empty",
            )),
            Err(e) => {
                error!(key = %ConfigKey::new(id, group), error = %e, "Failed to fetch config");
                Err(NexusError::source_error(id, group, OPERATION, e))
            }
        }
    }

    fn watch(&self, id: &str, group: &str, listener: Arc<dyn ChangeListener>) -> Result<()> {
        let client = self.connected_client(id, group, "watch")?;
        let key = ConfigKey::new(id, group);

        let wrapped: Arc<dyn ChangeListener> = Arc::new(LoggedListener {
            key: key.clone(),
            inner: listener,
        });

        if let Some(previous) = self.watchers.get(&key) {
            if let Err(e) = client.remove_listener(id, group, &previous) {
                warn!(key = %key, error = %e, "Failed to remove replaced listener");
            }
        }

        client
            .add_listener(id, group, wrapped.clone())
            .map_err(|e| {
                error!(key = %key, error = %e, "Failed to register config listener");
                NexusError::source_error(id, group, "watch", e)
            })?;

        self.watchers.register(key.clone(), wrapped);
        info!(key = %key, "Watching remote config");
        Ok(())
    }

    fn unwatch(&self, id: &str, group: &str) {
        let Some(client) = self.client() else {
            return;
        };

        let key = ConfigKey::new(id, group);
        let Some(listener) = self.watchers.unregister(&key) else {
            warn!(key = %key, "Attempted to remove a listener that was never registered");
            return;
        };

        match client.remove_listener(id, group, &listener) {
            Ok(()) => info!(key = %key, "Stopped watching remote config"),
            Err(e) => warn!(key = %key, error = %e, "Failed to remove config listener"),
        }
    }

    fn is_connected(&self) -> bool {
        self.client.read().is_some()
    }

    fn info(&self) -> ProviderInfo {
        let mut details = Map::new();
        details.insert(
            "server_addresses".to_string(),
            json!(self.options.server_addresses),
        );
        details.insert("namespace".to_string(), json!(self.options.namespace));
        details.insert("username".to_string(), json!(self.options.username));
        details.insert(
            "client_initialized".to_string(),
            json!(self.client.read().is_some()),
        );

        ProviderInfo {
            name: self.name.clone(),
            connected: self.is_connected(),
            watchers_count: self.watchers.len(),
            details,
        }
    }
}
