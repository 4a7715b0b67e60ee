use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    sync::{
        Arc,
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
    },
    thread::{self, JoinHandle},
    time::{Duration, SystemTime},
};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    ConfigFormat,
    provider::{ChangeListener, ConfigKey, WatcherRegistry, deliver},
};

/// State shared between the provider and its watch thread.
pub(super) struct WatchState {
    base_path: PathBuf,
    default_format: ConfigFormat,
    pub(super) watchers: WatcherRegistry,
    pub(super) mtimes: Mutex<HashMap<PathBuf, SystemTime>>,
}

impl WatchState {
    pub(super) fn new(base_path: PathBuf, default_format: ConfigFormat) -> Self {
        Self {
            base_path,
            default_format,
            watchers: WatcherRegistry::new(),
            mtimes: Mutex::new(HashMap::new()),
        }
    }

    pub(super) fn resolve(&self, key: &ConfigKey) -> PathBuf {
        let file_name = if Path::new(&key.id).extension().is_none() {
            format!("{}.{}", key.id, self.default_format.extension())
        } else {
            key.id.clone()
        };

        self.base_path.join(&key.group).join(file_name)
    }

    /// Remembers the current modification time of `path`, if it exists.
    pub(super) fn record_baseline(&self, path: &Path) {
        if let Ok(modified) = fs::metadata(path).and_then(|meta| meta.modified()) {
            self.mtimes.lock().insert(path.to_path_buf(), modified);
        }
    }

    /// One pass over every watched key. A failure on one key is logged and
    /// the remaining keys are still checked.
    pub(super) fn check_changes(&self) {
        for (key, listener) in self.watchers.snapshot() {
            let path = self.resolve(&key);

            if !path.exists() {
                continue;
            }

            match fs::metadata(&path).and_then(|meta| meta.modified()) {
                Ok(modified) => self.handle_observation(&key, &path, modified, listener.as_ref()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    self.mtimes.lock().remove(&path);
                    warn!(path = %path.display(), "Config file removed during check");
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to check config file");
                }
            }
        }
    }

    fn handle_observation(
        &self,
        key: &ConfigKey,
        path: &Path,
        modified: SystemTime,
        listener: &dyn ChangeListener,
    ) {
        if !self.advance_mtime(path, modified) {
            return;
        }

        info!(path = %path.display(), "Detected config file change");

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to read changed config file");
                return;
            }
        };

        let content = content.trim();
        if content.is_empty() {
            warn!(path = %path.display(), "Config file became empty; skipping notification");
            return;
        }

        // The key may have been unwatched since the snapshot was taken.
        if self.watchers.get(key).is_none() {
            return;
        }

        deliver(&key.watcher_key(), listener, content);
    }

    /// Records `modified` if it is the first observation or newer than the
    /// last one. Returns whether it was recorded.
    fn advance_mtime(&self, path: &Path, modified: SystemTime) -> bool {
        let mut mtimes = self.mtimes.lock();

        match mtimes.get(path) {
            Some(last) if modified <= *last => false,
            _ => {
                mtimes.insert(path.to_path_buf(), modified);
                true
            }
        }
    }
}

/// Handle to the background watch thread.
pub(super) struct Poller {
    stop_tx: Sender<()>,
    done_rx: Receiver<()>,
    handle: JoinHandle<()>,
}

impl Poller {
    pub(super) fn spawn(state: Arc<WatchState>, interval: Duration) -> io::Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("nexus-file-watch".to_string())
            .spawn(move || {
                // Dropped on exit, which tells `stop` the thread has finished.
                let _done = done_tx;

                loop {
                    state.check_changes();

                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }

                debug!("File watch loop exited");
            })?;

        Ok(Self {
            stop_tx,
            done_rx,
            handle,
        })
    }

    /// Signals the loop to stop and joins it, giving up after `timeout`.
    pub(super) fn stop(self, timeout: Duration) {
        let _ = self.stop_tx.send(());

        match self.done_rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                warn!(?timeout, "File watch thread did not stop in time; detaching");
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.handle.join().is_err() {
                    error!("File watch thread panicked");
                }
            }
        }
    }
}
