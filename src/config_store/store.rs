use std::{
    any::TypeId,
    cell::RefCell,
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use parking_lot::ReentrantMutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{NexusConfig, NexusError, Result};

use super::StoredConfig;

type Entries = HashMap<TypeId, Arc<dyn StoredConfig>>;

/// Thread-safe mapping from schema type to its current instance.
///
/// Every read and write goes through one reentrant lock, so a thread that
/// already holds it (for example a change listener running inside a store
/// operation) may call back into the store without deadlocking. The inner
/// `RefCell` is never borrowed across calls into schema code.
pub struct ConfigStore {
    entries: ReentrantMutex<RefCell<Entries>>,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            entries: ReentrantMutex::new(RefCell::new(HashMap::new())),
        }
    }

    /// Inserts or replaces the instance for `T`, returning the shared handle.
    pub fn set<T: NexusConfig>(&self, instance: T) -> Arc<T> {
        let instance = Arc::new(instance);
        let entry: Arc<dyn StoredConfig> = instance.clone();

        let guard = self.entries.lock();
        let previous = guard.borrow_mut().insert(TypeId::of::<T>(), entry);
        drop(guard);

        if previous.is_some() {
            info!(type_name = T::type_name(), "Updated config instance");
        } else {
            info!(type_name = T::type_name(), "Stored new config instance");
        }

        instance
    }

    /// Inserts the instance for `T` only if `condition` holds while the store
    /// lock is held. Returns `None` when the condition rejects the write.
    pub fn set_if<T: NexusConfig>(
        &self,
        instance: T,
        condition: impl FnOnce() -> bool,
    ) -> Option<Arc<T>> {
        let guard = self.entries.lock();
        if !condition() {
            debug!(type_name = T::type_name(), "Conditional store write skipped");
            return None;
        }
        let instance = self.set(instance);
        drop(guard);
        Some(instance)
    }

    /// Runs `f` with the store lock held. Store calls made by `f` on the
    /// same thread re-enter the lock; other threads wait until `f` returns.
    pub fn with_lock<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.entries.lock();
        f()
    }

    /// Returns the current instance for `T`.
    ///
    /// # Errors
    /// Returns `NexusError::ConfigNotRegistered` if no instance is stored.
    pub fn get<T: NexusConfig>(&self) -> Result<Arc<T>> {
        let entry = {
            let guard = self.entries.lock();
            let entry = guard.borrow().get(&TypeId::of::<T>()).cloned();
            entry
        };

        entry
            .and_then(|entry| entry.into_any().downcast::<T>().ok())
            .ok_or_else(not_registered::<T>)
    }

    /// Whether an instance for `T` is stored.
    pub fn has<T: NexusConfig>(&self) -> bool {
        let guard = self.entries.lock();
        let present = guard.borrow().contains_key(&TypeId::of::<T>());
        present
    }

    /// Removes the instance for `T`. Returns `true` if one was present.
    pub fn remove<T: NexusConfig>(&self) -> bool {
        let guard = self.entries.lock();
        let removed = guard.borrow_mut().remove(&TypeId::of::<T>());
        drop(guard);

        match removed {
            Some(_) => {
                info!(type_name = T::type_name(), "Removed config instance");
                true
            }
            None => false,
        }
    }

    /// Snapshot of every stored instance keyed by type name.
    ///
    /// Types sharing a short name are keyed by their full path instead.
    pub fn all(&self) -> BTreeMap<String, Arc<dyn StoredConfig>> {
        let entries: Vec<Arc<dyn StoredConfig>> = {
            let guard = self.entries.lock();
            let entries = guard.borrow().values().cloned().collect();
            entries
        };

        let mut name_counts: HashMap<&'static str, usize> = HashMap::new();
        for entry in &entries {
            *name_counts.entry(entry.name()).or_default() += 1;
        }

        entries
            .into_iter()
            .map(|entry| {
                let name = entry.name();
                if name_counts.get(name).copied().unwrap_or_default() > 1 {
                    warn!(
                        type_name = name,
                        type_path = entry.type_path(),
                        "Config types share a short name; keying by full path"
                    );
                    (entry.type_path().to_string(), entry)
                } else {
                    (name.to_string(), entry)
                }
            })
            .collect()
    }

    /// Removes every instance and returns how many were dropped.
    pub fn clear(&self) -> usize {
        let guard = self.entries.lock();
        let drained: Vec<_> = guard.borrow_mut().drain().collect();
        drop(guard);

        let count = drained.len();
        info!(count, "Cleared config store");
        count
    }

    /// Number of stored instances.
    pub fn count(&self) -> usize {
        let guard = self.entries.lock();
        let count = guard.borrow().len();
        count
    }

    /// Replaces one field of the stored `T`, revalidating the whole record.
    ///
    /// The current instance is serialized, `field` is overridden, and a new
    /// instance is built through [`NexusConfig::from_mapping`]. The entry is
    /// swapped only if that succeeds, and the lock is held throughout so no
    /// concurrent writer can interleave.
    ///
    /// # Errors
    /// * `NexusError::ConfigNotRegistered` - no instance is stored for `T`
    /// * `NexusError::ConfigValidation` - `field` is unknown or the candidate
    ///   record fails validation
    pub fn update_field<T: NexusConfig>(&self, field: &str, value: Value) -> Result<Arc<T>> {
        let guard = self.entries.lock();

        let current = guard
            .borrow()
            .get(&TypeId::of::<T>())
            .cloned()
            .ok_or_else(not_registered::<T>)?;
        let current = current
            .into_any()
            .downcast::<T>()
            .map_err(|_| not_registered::<T>())?;

        let mut mapping = current.to_mapping()?;
        if !mapping.contains_key(field) && !declares_field::<T>(field) {
            return Err(NexusError::validation(
                T::type_name(),
                format!("unknown field '{field}'"),
            ));
        }
        mapping.insert(field.to_string(), value);

        let updated = Arc::new(T::from_mapping(mapping, T::type_name())?);
        let entry: Arc<dyn StoredConfig> = updated.clone();
        guard.borrow_mut().insert(TypeId::of::<T>(), entry);
        drop(guard);

        debug!(type_name = T::type_name(), field, "Updated config field");
        Ok(updated)
    }
}

/// Whether the schema of `T` lists `field`, including fields omitted from
/// the serialized mapping.
fn declares_field<T: NexusConfig>(field: &str) -> bool {
    T::schema_document()
        .get("properties")
        .and_then(Value::as_object)
        .is_some_and(|properties| properties.contains_key(field))
}

fn not_registered<T: NexusConfig>() -> NexusError {
    NexusError::ConfigNotRegistered {
        type_name: T::type_name().to_string(),
    }
}
