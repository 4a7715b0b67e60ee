//! Typed configuration manager.
//!
//! [`ConfigManager`] ties one [`Provider`] to a [`ConfigStore`]. Registering
//! a schema type fetches its document, parses and validates it, stores the
//! instance and keeps it current through a change listener. Listener
//! failures are logged and leave the last good instance in place; the
//! caller-driven paths (`register`, `reload`) return them instead.

mod interpolation;
mod parser;


use std::{
    any::TypeId,
    collections::{BTreeMap, HashMap},
    marker::PhantomData,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::{
    ConfigMetadata, ConfigStore, NexusConfig, NexusError, Result,
    config_store::StoredConfig,
    provider::{
        ChangeListener, ConfigKey, FileProvider, FileProviderOptions, Provider, ProviderInfo,
        RemoteOptions, RemoteProvider,
    },
};

pub use self::parser::parse_content;

/// A registered schema type and where it is loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Registration {
    /// Short name of the schema type
    pub type_name: &'static str,
    /// Source key and refresh policy
    #[serde(flatten)]
    pub metadata: ConfigMetadata,
}

impl Registration {
    fn key(&self) -> ConfigKey {
        ConfigKey::new(self.metadata.id, self.metadata.group)
    }
}

struct RegistrationEntry {
    registration: Registration,
    active: Arc<AtomicBool>,
}

/// Introspection payload for a manager.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerInfo {
    /// Provider state and backend details
    pub provider: ProviderInfo,
    /// Number of registered schema types
    pub registered_configs: usize,
    /// Registered type names, sorted
    pub config_names: Vec<String>,
    /// Number of instances held by the store
    pub store_config_count: usize,
}

/// Applies pushed content to the store for one schema type.
struct SchemaListener<T> {
    store: Arc<ConfigStore>,
    key: ConfigKey,
    active: Arc<AtomicBool>,
    _schema: PhantomData<fn() -> T>,
}

impl<T: NexusConfig> ChangeListener for SchemaListener<T> {
    fn on_change(&self, content: &str) {
        if !self.active.load(Ordering::Acquire) {
            debug!(key = %self.key, "Ignoring change for unregistered config");
            return;
        }

        match build::<T>(content, &self.key) {
            Ok(instance) => {
                // The flag is re-checked under the store lock that unregister
                // holds while clearing it.
                let active = &self.active;
                match self
                    .store
                    .set_if(instance, || active.load(Ordering::Acquire))
                {
                    Some(_) => {
                        info!(type_name = T::type_name(), key = %self.key, "Applied config change");
                    }
                    None => {
                        debug!(key = %self.key, "Config unregistered during change; dropped");
                    }
                }
            }
            Err(e) => {
                error!(
                    type_name = T::type_name(),
                    key = %self.key,
                    error = %e,
                    "Rejected config change; keeping previous instance"
                );
            }
        }
    }
}

fn build<T: NexusConfig>(content: &str, key: &ConfigKey) -> Result<T> {
    let mapping = parse_content(content, key)?;
    T::from_mapping(mapping, &key.to_string())
}

/// Loads, stores and live-updates typed configuration records.
///
/// Dropping the manager closes it.
pub struct ConfigManager {
    provider: Box<dyn Provider>,
    store: Arc<ConfigStore>,
    registrations: Mutex<HashMap<TypeId, RegistrationEntry>>,
    closed: AtomicBool,
}

impl ConfigManager {
    /// Binds `provider` and connects it.
    ///
    /// # Errors
    /// Propagates `NexusError::ProviderConnection` from `connect`.
    pub fn new(provider: impl Provider + 'static) -> Result<Self> {
        provider.connect()?;
        info!(provider = provider.name(), "Config manager started");

        Ok(Self {
            provider: Box::new(provider),
            store: Arc::new(ConfigStore::new()),
            registrations: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Manager over a directory tree.
    ///
    /// # Errors
    /// Propagates `NexusError::ProviderConnection` from `connect`.
    pub fn with_file(options: FileProviderOptions) -> Result<Self> {
        Self::new(FileProvider::new(options))
    }

    /// Manager over a Nacos server.
    ///
    /// # Errors
    /// Propagates `NexusError::ProviderConnection` from `connect`.
    pub fn with_nacos(options: RemoteOptions) -> Result<Self> {
        Self::new(RemoteProvider::nacos(options))
    }

    /// The bound provider.
    pub fn provider(&self) -> &dyn Provider {
        self.provider.as_ref()
    }

    /// The backing store.
    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Loads `T` from its source, stores it and starts watching for changes.
    ///
    /// Registering an already registered type is a no-op. On failure
    /// nothing is left behind in the store or the registrations.
    ///
    /// # Errors
    /// * `NexusError::ManagerClosed` - the manager was closed
    /// * `NexusError::MissingConfigMetadata` - `T` declares no metadata
    /// * `NexusError::ConfigSource` - the document cannot be fetched or watched
    /// * `NexusError::ConfigValidation` - the document does not parse or fit `T`
    pub fn register<T: NexusConfig>(&self) -> Result<()> {
        self.ensure_open()?;

        let mut registrations = self.registrations.lock();
        if registrations.contains_key(&TypeId::of::<T>()) {
            warn!(type_name = T::type_name(), "Config already registered; ignoring");
            return Ok(());
        }

        let metadata = T::METADATA.ok_or_else(|| NexusError::MissingConfigMetadata {
            type_name: T::type_name().to_string(),
        })?;
        let registration = Registration {
            type_name: T::type_name(),
            metadata,
        };
        let key = registration.key();

        let instance = self.fetch::<T>(&key)?;
        self.store.set(instance);

        let active = Arc::new(AtomicBool::new(true));
        let listener = Arc::new(SchemaListener::<T> {
            store: self.store.clone(),
            key: key.clone(),
            active: active.clone(),
            _schema: PhantomData,
        });

        if let Err(e) = self.provider.watch(&key.id, &key.group, listener) {
            active.store(false, Ordering::Release);
            self.store.remove::<T>();
            return Err(e);
        }

        registrations.insert(
            TypeId::of::<T>(),
            RegistrationEntry {
                registration,
                active,
            },
        );

        info!(
            type_name = T::type_name(),
            key = %key,
            auto_refresh = metadata.auto_refresh,
            "Registered config"
        );
        Ok(())
    }

    /// Current instance of `T`.
    ///
    /// # Errors
    /// Returns `NexusError::ConfigNotRegistered` if `T` has no instance.
    pub fn get<T: NexusConfig>(&self) -> Result<Arc<T>> {
        self.store.get::<T>()
    }

    /// Stops watching `T` and drops its instance. Returns `false` if `T` was
    /// not registered.
    pub fn unregister<T: NexusConfig>(&self) -> bool {
        let Some(entry) = self.registrations.lock().remove(&TypeId::of::<T>()) else {
            debug!(type_name = T::type_name(), "Config not registered; nothing to remove");
            return false;
        };

        self.store.with_lock(|| {
            entry.active.store(false, Ordering::Release);
            self.store.remove::<T>();
        });
        let key = entry.registration.key();
        self.provider.unwatch(&key.id, &key.group);

        info!(type_name = T::type_name(), key = %key, "Unregistered config");
        true
    }

    /// Re-fetches `T` and replaces the stored instance.
    ///
    /// # Errors
    /// * `NexusError::ManagerClosed` - the manager was closed
    /// * `NexusError::ConfigNotRegistered` - `T` is not registered
    /// * `NexusError::ConfigSource` / `NexusError::ConfigValidation` - fetch
    ///   or parse failures, with the stored instance left unchanged
    pub fn reload<T: NexusConfig>(&self) -> Result<Arc<T>> {
        self.ensure_open()?;

        let (key, active) = self
            .registrations
            .lock()
            .get(&TypeId::of::<T>())
            .map(|entry| (entry.registration.key(), entry.active.clone()))
            .ok_or_else(not_registered::<T>)?;

        let instance = self.fetch::<T>(&key)?;
        let instance = self
            .store
            .set_if(instance, || active.load(Ordering::Acquire))
            .ok_or_else(not_registered::<T>)?;

        info!(type_name = T::type_name(), key = %key, "Reloaded config");
        Ok(instance)
    }

    /// Snapshot of every stored instance by type name.
    pub fn all(&self) -> BTreeMap<String, Arc<dyn StoredConfig>> {
        self.store.all()
    }

    /// Replaces one field of the stored `T`, revalidating the whole record.
    ///
    /// # Errors
    /// See [`ConfigStore::update_field`].
    pub fn update_field<T: NexusConfig>(&self, field: &str, value: Value) -> Result<Arc<T>> {
        self.store.update_field::<T>(field, value)
    }

    /// Registered types sorted by name.
    pub fn registrations(&self) -> Vec<Registration> {
        let mut registrations: Vec<Registration> = self
            .registrations
            .lock()
            .values()
            .map(|entry| entry.registration)
            .collect();
        registrations.sort_by_key(|registration| registration.type_name);
        registrations
    }

    /// Introspection payload.
    pub fn info(&self) -> ManagerInfo {
        let config_names: Vec<String> = self
            .registrations()
            .iter()
            .map(|registration| registration.type_name.to_string())
            .collect();

        ManagerInfo {
            provider: self.provider.info(),
            registered_configs: config_names.len(),
            config_names,
            store_config_count: self.store.count(),
        }
    }

    /// Unwatches everything, disconnects the provider and empties the store.
    /// Later calls do nothing.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!("Config manager already closed");
            return;
        }

        let entries: Vec<RegistrationEntry> = self
            .registrations
            .lock()
            .drain()
            .map(|(_, entry)| entry)
            .collect();

        let removed = self.store.with_lock(|| {
            for entry in &entries {
                entry.active.store(false, Ordering::Release);
            }
            self.store.clear()
        });

        for entry in &entries {
            let key = entry.registration.key();
            self.provider.unwatch(&key.id, &key.group);
        }

        if self.provider.is_connected() {
            self.provider.disconnect();
        }
        info!(
            registrations = entries.len(),
            instances = removed,
            "Config manager closed"
        );
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(NexusError::ManagerClosed)
        } else {
            Ok(())
        }
    }

    fn fetch<T: NexusConfig>(&self, key: &ConfigKey) -> Result<T> {
        let content = self.provider.get_config(&key.id, &key.group)?;
        build::<T>(&content, key)
    }
}

fn not_registered<T: NexusConfig>() -> NexusError {
    NexusError::ConfigNotRegistered {
        type_name: T::type_name().to_string(),
    }
}

impl Drop for ConfigManager {
    fn drop(&mut self) {
        self.close();
    }
}
