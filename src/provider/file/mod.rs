//! Local directory provider.
//!
//! Documents live at `{base_path}/{group}/{id}`; ids without an extension
//! get the default format's extension appended. Changes are detected by a
//! background thread that compares modification times every
//! `watch_interval`.

mod watch;


use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use crate::{ConfigFormat, NexusError, Result};

use super::{ChangeListener, ConfigKey, Provider, ProviderInfo};
use watch::{Poller, WatchState};

const NAME: &str = "File";

/// How long `disconnect` waits for the watch thread before detaching it.
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Construction parameters for [`FileProvider`].
#[derive(Debug, Clone, PartialEq)]
pub struct FileProviderOptions {
    /// Root directory holding one sub-directory per group
    pub base_path: PathBuf,
    /// Extension appended to ids that have none
    pub default_format: ConfigFormat,
    /// Pause between change scans
    pub watch_interval: Duration,
    /// Create `base_path` on connect if it is missing
    pub auto_create_dirs: bool,
}

impl Default for FileProviderOptions {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("configs"),
            default_format: ConfigFormat::Json,
            watch_interval: Duration::from_secs(1),
            auto_create_dirs: true,
        }
    }
}

impl FileProviderOptions {
    /// Default options rooted at `base_path`.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            ..Self::default()
        }
    }

    /// Sets the default format.
    pub fn with_format(mut self, format: ConfigFormat) -> Self {
        self.default_format = format;
        self
    }

    /// Sets the scan interval.
    pub fn with_watch_interval(mut self, interval: Duration) -> Self {
        self.watch_interval = interval;
        self
    }

    /// Sets whether the base directory is created on connect.
    pub fn with_auto_create_dirs(mut self, auto_create_dirs: bool) -> Self {
        self.auto_create_dirs = auto_create_dirs;
        self
    }
}

/// Provider backed by JSON/YAML files in a local directory tree.
pub struct FileProvider {
    options: FileProviderOptions,
    state: Arc<WatchState>,
    connected: AtomicBool,
    poller: Mutex<Option<Poller>>,
}

impl FileProvider {
    /// Creates a provider; nothing touches the filesystem until `connect`.
    pub fn new(options: FileProviderOptions) -> Self {
        let state = WatchState::new(options.base_path.clone(), options.default_format);

        Self {
            options,
            state: Arc::new(state),
            connected: AtomicBool::new(false),
            poller: Mutex::new(None),
        }
    }

    /// Root directory of this provider.
    pub fn base_path(&self) -> &Path {
        &self.options.base_path
    }

    /// Path of the document for `(id, group)`.
    pub fn resolve_path(&self, id: &str, group: &str) -> PathBuf {
        self.state.resolve(&ConfigKey::new(id, group))
    }

    /// Writes `data` to the document for `(id, group)`, creating parent
    /// directories. YAML is written for `.yaml`/`.yml` paths, JSON otherwise.
    ///
    /// # Errors
    /// Returns `NexusError::Serialization` or `NexusError::Io` on failure.
    pub fn create_sample_config(&self, id: &str, group: &str, data: &Value) -> Result<PathBuf> {
        let path = self.resolve_path(id, group);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| NexusError::io(e, parent))?;
        }

        let content = match ConfigFormat::sniff(&path) {
            ConfigFormat::Yaml => {
                serde_yaml::to_string(data).map_err(|e| NexusError::Serialization {
                    content_type: "yaml document".to_string(),
                    details: e.to_string(),
                })?
            }
            ConfigFormat::Json => {
                serde_json::to_string_pretty(data).map_err(|e| NexusError::Serialization {
                    content_type: "json document".to_string(),
                    details: e.to_string(),
                })?
            }
        };

        fs::write(&path, content).map_err(|e| NexusError::io(e, &path))?;

        info!(path = %path.display(), "Created sample config file");
        Ok(path)
    }

    fn connection_error(reason: impl Into<String>) -> NexusError {
        NexusError::ProviderConnection {
            backend: NAME.to_string(),
            reason: reason.into(),
        }
    }

    fn prepare_base_dir(&self) -> Result<()> {
        let base = &self.options.base_path;

        if self.options.auto_create_dirs && !base.exists() {
            fs::create_dir_all(base).map_err(|e| {
                Self::connection_error(format!(
                    "failed to create config directory {}: {e}",
                    base.display()
                ))
            })?;
            info!(path = %base.display(), "Created config directory");
        }

        if !base.exists() {
            return Err(Self::connection_error(format!(
                "config directory does not exist: {}",
                base.display()
            )));
        }

        if !base.is_dir() {
            return Err(Self::connection_error(format!(
                "config path is not a directory: {}",
                base.display()
            )));
        }

        Ok(())
    }

    fn start_polling(&self) -> Result<()> {
        let mut poller = self.poller.lock();
        if poller.is_some() {
            return Ok(());
        }

        let started = Poller::spawn(self.state.clone(), self.options.watch_interval)
            .map_err(|e| Self::connection_error(format!("failed to start watch thread: {e}")))?;
        *poller = Some(started);

        debug!("File watch thread started");
        Ok(())
    }

    fn stop_polling(&self) {
        let poller = self.poller.lock().take();

        if let Some(poller) = poller {
            poller.stop(JOIN_TIMEOUT);
            debug!("File watch thread stopped");
        }
    }
}

impl Provider for FileProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn connect(&self) -> Result<()> {
        let connected = self
            .prepare_base_dir()
            .and_then(|()| self.start_polling());

        self.connected.store(connected.is_ok(), Ordering::SeqCst);
        connected?;

        info!(path = %self.options.base_path.display(), "Connected to file system");
        Ok(())
    }

    fn disconnect(&self) {
        self.stop_polling();
        self.connected.store(false, Ordering::SeqCst);
        self.state.watchers.clear();
        self.state.mtimes.lock().clear();

        info!("Disconnected from file system");
    }

    fn get_config(&self, id: &str, group: &str) -> Result<String> {
        const OPERATION: &str = "get_config";

        if !self.is_connected() {
            return Err(NexusError::source_error(
                id,
                group,
                OPERATION,
                "not connected to file system",
            ));
        }

        let path = self.resolve_path(id, group);
        if !path.exists() {
            return Err(NexusError::source_error(
                id,
                group,
                OPERATION,
                format!("config file does not exist: {}", path.display()),
            ));
        }

        let content = fs::read_to_string(&path)
            .map_err(|e| NexusError::source_error(id, group, OPERATION, e))?;
        let content = content.trim();

        if content.is_empty() {
            return Err(NexusError::source_error(
                id,
                group,
                OPERATION,
                format!("config file is empty: {}", path.display()),
            ));
        }

        debug!(path = %path.display(), "Read config file");
        Ok(content.to_string())
    }

    fn watch(&self, id: &str, group: &str, listener: Arc<dyn ChangeListener>) -> Result<()> {
        if !self.is_connected() {
            return Err(NexusError::source_error(
                id,
                group,
                "watch",
                "not connected to file system",
            ));
        }

        let key = ConfigKey::new(id, group);
        let path = self.state.resolve(&key);

        self.state.record_baseline(&path);
        self.state.watchers.register(key, listener);

        info!(path = %path.display(), "Watching config file");
        Ok(())
    }

    fn unwatch(&self, id: &str, group: &str) {
        let key = ConfigKey::new(id, group);
        let path = self.state.resolve(&key);

        self.state.mtimes.lock().remove(&path);

        if self.state.watchers.unregister(&key).is_some() {
            info!(path = %path.display(), "Stopped watching config file");
        } else {
            debug!(key = %key.watcher_key(), "No watcher registered; nothing to remove");
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn info(&self) -> ProviderInfo {
        let mut details = Map::new();
        details.insert(
            "base_path".to_string(),
            json!(self.options.base_path.display().to_string()),
        );
        details.insert(
            "default_format".to_string(),
            json!(self.options.default_format.extension()),
        );
        details.insert(
            "watch_interval_secs".to_string(),
            json!(self.options.watch_interval.as_secs_f64()),
        );

        ProviderInfo {
            name: NAME.to_string(),
            connected: self.is_connected(),
            watchers_count: self.state.watchers.len(),
            details,
        }
    }
}

impl Drop for FileProvider {
    fn drop(&mut self) {
        self.stop_polling();
    }
}
