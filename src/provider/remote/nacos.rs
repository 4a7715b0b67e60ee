//! Nacos open-API client.
//!
//! Fetches go through `GET /v1/cs/configs`. Change detection uses the
//! long-polling listener endpoint: the client posts the md5 of every watched
//! document and the server holds the request until one of them changes. On
//! any non-empty answer every watched key is re-fetched and listeners whose
//! content hash moved are notified.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
    },
    thread,
    time::Duration,
};

use parking_lot::{Mutex, ReentrantMutex};
use reqwest::{
    StatusCode,
    blocking::{Client, RequestBuilder, Response},
};
use tracing::{debug, info, warn};

use crate::provider::{ChangeListener, ConfigKey};

use super::{
    RemoteOptions,
    client::{ClientError, ClientFactory, ClientResult, RemoteClient},
};

const DEFAULT_CONTEXT_PATH: &str = "/nacos";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_LONG_POLL: Duration = Duration::from_secs(30);
const IDLE_DELAY: Duration = Duration::from_millis(500);
const RETRY_DELAY: Duration = Duration::from_secs(2);

const WORD_SEPARATOR: char = '\u{2}';
const LINE_SEPARATOR: char = '\u{1}';

/// Builds [`NacosClient`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct NacosClientFactory;

impl ClientFactory for NacosClientFactory {
    fn create(&self, options: &RemoteOptions) -> ClientResult<Arc<dyn RemoteClient>> {
        Ok(Arc::new(NacosClient::new(options)?))
    }
}

struct Watched {
    md5: String,
    listeners: Vec<Arc<dyn ChangeListener>>,
}

struct Inner {
    http: Client,
    servers: Vec<String>,
    context_path: String,
    tenant: String,
    credentials: Option<(String, String)>,
    access_token: Mutex<Option<String>>,
    long_poll: Duration,
    watched: Mutex<HashMap<ConfigKey, Watched>>,
    /// Held for each delivery and while listeners are removed, so removal
    /// waits out a notification already in progress.
    delivery: ReentrantMutex<()>,
    stopped: AtomicBool,
}

/// Blocking client for the Nacos v1 open API.
///
/// Recognised `extra` options: `context_path` (default `/nacos`),
/// `timeout_ms` for plain requests and `long_poll_timeout_ms` for the
/// listener request.
pub struct NacosClient {
    inner: Arc<Inner>,
    stop_tx: Mutex<Option<Sender<()>>>,
}

impl NacosClient {
    /// Builds a client from connection options. No request is made.
    ///
    /// # Errors
    /// Returns `ClientError::Config` for an empty server list, an
    /// unparseable option or an HTTP client that cannot be built.
    pub fn new(options: &RemoteOptions) -> ClientResult<Self> {
        if options.server_addresses.is_empty() {
            return Err(ClientError::Config("no server addresses given".to_string()));
        }

        let timeout = duration_option(options, "timeout_ms")?.unwrap_or(DEFAULT_TIMEOUT);
        let long_poll = duration_option(options, "long_poll_timeout_ms")?.unwrap_or(DEFAULT_LONG_POLL);
        let context_path = options
            .extra
            .get("context_path")
            .map(|path| format!("/{}", path.trim_matches('/')))
            .unwrap_or_else(|| DEFAULT_CONTEXT_PATH.to_string());

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;

        let credentials = match (&options.username, &options.password) {
            (Some(username), Some(password)) => Some((username.clone(), password.clone())),
            _ => None,
        };

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                servers: options.server_addresses.iter().map(|s| base_url(s)).collect(),
                context_path,
                tenant: options.namespace.clone(),
                credentials,
                access_token: Mutex::new(None),
                long_poll,
                watched: Mutex::new(HashMap::new()),
                delivery: ReentrantMutex::new(()),
                stopped: AtomicBool::new(false),
            }),
            stop_tx: Mutex::new(None),
        })
    }

    fn ensure_listener_thread(&self) -> ClientResult<()> {
        let mut stop_tx = self.stop_tx.lock();
        if stop_tx.is_some() {
            return Ok(());
        }

        let (tx, rx) = mpsc::channel::<()>();
        let inner = self.inner.clone();

        thread::Builder::new()
            .name("nexus-nacos-listen".to_string())
            .spawn(move || inner.listen_loop(rx))
            .map_err(|e| ClientError::Config(format!("failed to start listener thread: {e}")))?;

        *stop_tx = Some(tx);
        Ok(())
    }
}

impl RemoteClient for NacosClient {
    fn get_config(&self, data_id: &str, group: &str) -> ClientResult<Option<String>> {
        self.inner.fetch(&ConfigKey::new(data_id, group))
    }

    fn add_listener(
        &self,
        data_id: &str,
        group: &str,
        listener: Arc<dyn ChangeListener>,
    ) -> ClientResult<()> {
        let key = ConfigKey::new(data_id, group);

        let md5 = match self.inner.fetch(&key) {
            Ok(content) => content_md5(content.as_deref()),
            Err(e) => {
                warn!(key = %key, error = %e, "Could not read initial content for listener");
                String::new()
            }
        };

        self.inner
            .watched
            .lock()
            .entry(key)
            .or_insert_with(|| Watched {
                md5,
                listeners: Vec::new(),
            })
            .listeners
            .push(listener);

        self.ensure_listener_thread()
    }

    fn remove_listener(
        &self,
        data_id: &str,
        group: &str,
        listener: &Arc<dyn ChangeListener>,
    ) -> ClientResult<()> {
        let key = ConfigKey::new(data_id, group);
        let _delivery = self.inner.delivery.lock();
        let mut watched = self.inner.watched.lock();

        if let Some(entry) = watched.get_mut(&key) {
            entry.listeners.retain(|existing| !Arc::ptr_eq(existing, listener));
            if entry.listeners.is_empty() {
                watched.remove(&key);
            }
        }

        Ok(())
    }

    fn shutdown(&self) {
        // Dropping the sender ends the loop; an in-flight long poll is
        // abandoned rather than awaited.
        let _delivery = self.inner.delivery.lock();
        self.inner.stopped.store(true, Ordering::Release);
        self.stop_tx.lock().take();
        self.inner.watched.lock().clear();
        debug!("Nacos client shut down");
    }
}

impl Drop for NacosClient {
    fn drop(&mut self) {
        self.inner.stopped.store(true, Ordering::Release);
        self.stop_tx.lock().take();
    }
}

impl Inner {
    fn listen_loop(&self, stop_rx: Receiver<()>) {
        loop {
            match stop_rx.try_recv() {
                Err(TryRecvError::Empty) => {}
                Ok(()) | Err(TryRecvError::Disconnected) => break,
            }

            let delay = if self.watched.lock().is_empty() {
                Some(IDLE_DELAY)
            } else {
                match self.poll_once() {
                    Ok(true) => {
                        self.refresh_changed();
                        None
                    }
                    Ok(false) => None,
                    Err(e) => {
                        warn!(error = %e, "Config listener poll failed");
                        Some(RETRY_DELAY)
                    }
                }
            };

            if let Some(delay) = delay {
                match stop_rx.recv_timeout(delay) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        }

        debug!("Nacos listener loop exited");
    }

    /// One long-poll round. Returns whether the server reported a change.
    fn poll_once(&self) -> ClientResult<bool> {
        let body = {
            let watched = self.watched.lock();
            listening_configs(
                watched.iter().map(|(key, entry)| (key, entry.md5.as_str())),
                &self.tenant,
            )
        };
        if body.is_empty() {
            return Ok(false);
        }

        let token = self.token()?;
        let timeout_ms = self.long_poll.as_millis().to_string();
        let response = self.send("/v1/cs/configs/listener", |url| {
            let mut request = self
                .http
                .post(url)
                .timeout(self.long_poll + Duration::from_secs(10))
                .header("Long-Pulling-Timeout", timeout_ms.as_str())
                .form(&[("Listening-Configs", body.as_str())]);
            if let Some(token) = &token {
                request = request.query(&[("accessToken", token.as_str())]);
            }
            request
        })?;

        let server = response.url().to_string();
        match response.status() {
            StatusCode::OK => {
                let changed = response.text().map_err(transport)?;
                Ok(!changed.trim().is_empty())
            }
            status => Err(self.status_error(server, status, response)),
        }
    }

    /// Re-fetches every watched key and notifies listeners whose content
    /// hash moved.
    fn refresh_changed(&self) {
        let keys: Vec<ConfigKey> = self.watched.lock().keys().cloned().collect();

        for key in keys {
            let content = match self.fetch(&key) {
                Ok(content) => content,
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to re-fetch changed config");
                    continue;
                }
            };
            let md5 = content_md5(content.as_deref());

            let listeners = {
                let mut watched = self.watched.lock();
                match watched.get_mut(&key) {
                    Some(entry) if entry.md5 != md5 => {
                        entry.md5 = md5;
                        entry.listeners.clone()
                    }
                    _ => continue,
                }
            };

            let Some(content) = content.filter(|c| !c.trim().is_empty()) else {
                warn!(key = %key, "Config was removed or emptied; skipping notification");
                continue;
            };

            info!(key = %key, listeners = listeners.len(), "Config changed on server");
            self.notify(&key, &content, listeners);
        }
    }

    /// Delivers `content` to each of `listeners` that is still registered
    /// for `key` at the moment of delivery.
    fn notify(&self, key: &ConfigKey, content: &str, listeners: Vec<Arc<dyn ChangeListener>>) {
        for listener in listeners {
            let _delivery = self.delivery.lock();
            if !self.still_listening(key, &listener) {
                debug!(key = %key, "Listener removed before delivery; skipping");
                continue;
            }
            listener.on_change(content);
        }
    }

    fn still_listening(&self, key: &ConfigKey, listener: &Arc<dyn ChangeListener>) -> bool {
        if self.stopped.load(Ordering::Acquire) {
            return false;
        }

        self.watched.lock().get(key).is_some_and(|entry| {
            entry
                .listeners
                .iter()
                .any(|existing| Arc::ptr_eq(existing, listener))
        })
    }

    fn fetch(&self, key: &ConfigKey) -> ClientResult<Option<String>> {
        let token = self.token()?;

        let response = self.send("/v1/cs/configs", |url| {
            let mut query = vec![("dataId", key.id.as_str()), ("group", key.group.as_str())];
            if !self.tenant.is_empty() {
                query.push(("tenant", self.tenant.as_str()));
            }
            if let Some(token) = &token {
                query.push(("accessToken", token.as_str()));
            }
            self.http.get(url).query(&query)
        })?;

        let server = response.url().to_string();
        match response.status() {
            StatusCode::OK => response.text().map(Some).map_err(transport),
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(self.status_error(server, status, response)),
        }
    }

    /// Current access token, logging in first when credentials are set and
    /// no token is cached.
    fn token(&self) -> ClientResult<Option<String>> {
        let Some((username, password)) = &self.credentials else {
            return Ok(None);
        };

        if let Some(token) = self.access_token.lock().clone() {
            return Ok(Some(token));
        }

        let response = self.send("/v1/auth/login", |url| {
            self.http
                .post(url)
                .form(&[("username", username.as_str()), ("password", password.as_str())])
        })?;

        if !response.status().is_success() {
            return Err(ClientError::Auth(format!(
                "login returned {}",
                response.status()
            )));
        }

        let body: serde_json::Value =
            serde_json::from_str(&response.text().map_err(transport)?)
                .map_err(|e| ClientError::Auth(format!("malformed login response: {e}")))?;

        let token = body
            .get("accessToken")
            .and_then(|token| token.as_str())
            .ok_or_else(|| ClientError::Auth("login response has no accessToken".to_string()))?
            .to_string();

        debug!("Logged in to config server");
        *self.access_token.lock() = Some(token.clone());
        Ok(Some(token))
    }

    /// Sends to each server in turn until one answers.
    fn send<F>(&self, endpoint: &str, build: F) -> ClientResult<Response>
    where
        F: Fn(String) -> RequestBuilder,
    {
        let mut last_error = ClientError::Transport("no servers configured".to_string());

        for server in &self.servers {
            let url = format!("{server}{}{endpoint}", self.context_path);
            match build(url).send() {
                Ok(response) => return Ok(response),
                Err(e) => {
                    debug!(server = %server, error = %e, "Server unreachable; trying next");
                    last_error = transport(e);
                }
            }
        }

        Err(last_error)
    }

    fn status_error(&self, server: String, status: StatusCode, response: Response) -> ClientError {
        if status == StatusCode::FORBIDDEN || status == StatusCode::UNAUTHORIZED {
            // Token probably expired; the next request logs in again.
            self.access_token.lock().take();
        }

        ClientError::Status {
            server,
            status: status.as_u16(),
            body: response.text().unwrap_or_default(),
        }
    }
}

fn transport(error: reqwest::Error) -> ClientError {
    ClientError::Transport(error.to_string())
}

fn duration_option(options: &RemoteOptions, name: &str) -> ClientResult<Option<Duration>> {
    options
        .extra
        .get(name)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| ClientError::Config(format!("{name}='{raw}': {e}")))
        })
        .transpose()
}

/// Normalises `host:port` into an `http://` base URL without a trailing slash.
pub(super) fn base_url(address: &str) -> String {
    let address = address.trim().trim_end_matches('/');
    if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{address}")
    }
}

/// Hex md5 of `content`; absent content hashes as the empty string.
pub(super) fn content_md5(content: Option<&str>) -> String {
    match content {
        Some(content) => format!("{:x}", md5::compute(content.as_bytes())),
        None => String::new(),
    }
}

/// Encodes the `Listening-Configs` form field.
pub(super) fn listening_configs<'a>(
    entries: impl IntoIterator<Item = (&'a ConfigKey, &'a str)>,
    tenant: &str,
) -> String {
    let mut out = String::new();

    for (key, md5) in entries {
        out.push_str(&key.id);
        out.push(WORD_SEPARATOR);
        out.push_str(&key.group);
        out.push(WORD_SEPARATOR);
        out.push_str(md5);
        if !tenant.is_empty() {
            out.push(WORD_SEPARATOR);
            out.push_str(tenant);
        }
        out.push(LINE_SEPARATOR);
    }

    out
}
