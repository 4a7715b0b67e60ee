use std::sync::Arc;

use thiserror::Error;

use crate::provider::ChangeListener;

use super::RemoteOptions;

/// Errors raised by a config-center client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The client options are unusable
    #[error("invalid client configuration: {0}")]
    Config(String),

    /// No server could be reached
    #[error("transport error: {0}")]
    Transport(String),

    /// A server answered with an unexpected status
    #[error("server {server} returned {status}: {body}")]
    Status {
        /// Server base URL
        server: String,
        /// HTTP status code
        status: u16,
        /// Response body, if any
        body: String,
    },

    /// Login was rejected or returned no token
    #[error("authentication failed: {0}")]
    Auth(String),
}

/// Result alias for client operations.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Minimal surface of a config-center client used by
/// [`RemoteProvider`](super::RemoteProvider).
///
/// The client owns its own delivery threads; listeners are invoked from them.
pub trait RemoteClient: Send + Sync {
    /// Fetches `(data_id, group)`; `Ok(None)` when it does not exist.
    fn get_config(&self, data_id: &str, group: &str) -> ClientResult<Option<String>>;

    /// Adds `listener` for changes to `(data_id, group)`.
    fn add_listener(
        &self,
        data_id: &str,
        group: &str,
        listener: Arc<dyn ChangeListener>,
    ) -> ClientResult<()>;

    /// Removes a listener previously passed to `add_listener`, compared by
    /// pointer identity.
    fn remove_listener(
        &self,
        data_id: &str,
        group: &str,
        listener: &Arc<dyn ChangeListener>,
    ) -> ClientResult<()>;

    /// Stops background work. Called once when the provider disconnects.
    fn shutdown(&self) {}
}

/// Builds a client when the provider connects.
pub trait ClientFactory: Send + Sync {
    /// Creates a client for `options`.
    ///
    /// # Errors
    /// Returns a [`ClientError`] if the client cannot be constructed.
    fn create(&self, options: &RemoteOptions) -> ClientResult<Arc<dyn RemoteClient>>;
}

impl<F> ClientFactory for F
where
    F: Fn(&RemoteOptions) -> ClientResult<Arc<dyn RemoteClient>> + Send + Sync,
{
    fn create(&self, options: &RemoteOptions) -> ClientResult<Arc<dyn RemoteClient>> {
        self(options)
    }
}
