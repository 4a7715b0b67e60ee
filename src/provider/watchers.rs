use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use tracing::debug;

use super::{ChangeListener, ConfigKey};

/// Listener table shared by provider implementations.
///
/// Keyed by [`ConfigKey`]; at most one listener per key.
#[derive(Default)]
pub struct WatcherRegistry {
    watchers: Mutex<HashMap<ConfigKey, Arc<dyn ChangeListener>>>,
}

impl WatcherRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener`, returning the one it replaced.
    pub fn register(
        &self,
        key: ConfigKey,
        listener: Arc<dyn ChangeListener>,
    ) -> Option<Arc<dyn ChangeListener>> {
        debug!(key = %key.watcher_key(), "Registered config watcher");
        self.watchers.lock().insert(key, listener)
    }

    /// Removes and returns the listener for `key`.
    pub fn unregister(&self, key: &ConfigKey) -> Option<Arc<dyn ChangeListener>> {
        let removed = self.watchers.lock().remove(key);
        if removed.is_some() {
            debug!(key = %key.watcher_key(), "Removed config watcher");
        }
        removed
    }

    /// The listener for `key`, if any.
    pub fn get(&self, key: &ConfigKey) -> Option<Arc<dyn ChangeListener>> {
        self.watchers.lock().get(key).cloned()
    }

    /// Copy of the table, so callers can notify without holding the lock.
    pub fn snapshot(&self) -> Vec<(ConfigKey, Arc<dyn ChangeListener>)> {
        self.watchers
            .lock()
            .iter()
            .map(|(key, listener)| (key.clone(), listener.clone()))
            .collect()
    }

    /// Drops every listener.
    pub fn clear(&self) {
        self.watchers.lock().clear();
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.watchers.lock().len()
    }

    /// Whether no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.watchers.lock().is_empty()
    }
}
