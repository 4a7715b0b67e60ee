#![allow(clippy::unwrap_used)]

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use parking_lot::Mutex;

use super::{
    ClientError, ClientResult, RemoteClient, RemoteOptions, RemoteProvider,
    nacos::{base_url, content_md5, listening_configs},
};
use crate::{
    NexusError,
    provider::{ChangeListener, ConfigKey, Provider},
};

/// In-memory client that records calls and lets tests push changes.
#[derive(Default)]
struct FakeClient {
    documents: Mutex<HashMap<ConfigKey, String>>,
    listeners: Mutex<HashMap<ConfigKey, Vec<Arc<dyn ChangeListener>>>>,
    fail_fetch: bool,
    fail_watch: bool,
    shutdowns: AtomicUsize,
}

impl FakeClient {
    fn with_document(self, id: &str, group: &str, content: &str) -> Self {
        self.documents
            .lock()
            .insert(ConfigKey::new(id, group), content.to_string());
        self
    }

    fn push(&self, id: &str, group: &str, content: &str) {
        let listeners = self
            .listeners
            .lock()
            .get(&ConfigKey::new(id, group))
            .cloned()
            .unwrap_or_default();
        for listener in listeners {
            listener.on_change(content);
        }
    }

    fn listener_count(&self, id: &str, group: &str) -> usize {
        self.listeners
            .lock()
            .get(&ConfigKey::new(id, group))
            .map_or(0, Vec::len)
    }
}

impl RemoteClient for FakeClient {
    fn get_config(&self, data_id: &str, group: &str) -> ClientResult<Option<String>> {
        if self.fail_fetch {
            return Err(ClientError::Transport("connection refused".to_string()));
        }
        Ok(self
            .documents
            .lock()
            .get(&ConfigKey::new(data_id, group))
            .cloned())
    }

    fn add_listener(
        &self,
        data_id: &str,
        group: &str,
        listener: Arc<dyn ChangeListener>,
    ) -> ClientResult<()> {
        if self.fail_watch {
            return Err(ClientError::Transport("listener rejected".to_string()));
        }
        self.listeners
            .lock()
            .entry(ConfigKey::new(data_id, group))
            .or_default()
            .push(listener);
        Ok(())
    }

    fn remove_listener(
        &self,
        data_id: &str,
        group: &str,
        listener: &Arc<dyn ChangeListener>,
    ) -> ClientResult<()> {
        if let Some(list) = self.listeners.lock().get_mut(&ConfigKey::new(data_id, group)) {
            list.retain(|existing| !Arc::ptr_eq(existing, listener));
        }
        Ok(())
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

fn provider_with(client: Arc<FakeClient>) -> RemoteProvider {
    RemoteProvider::with_factory(
        "Fake",
        RemoteOptions::new("127.0.0.1:8848"),
        move |_: &RemoteOptions| -> ClientResult<Arc<dyn RemoteClient>> { Ok(client.clone()) },
    )
}

#[test]
fn options_split_and_redact() {
    let options = RemoteOptions::new("a:8848, b:8848,,")
        .with_namespace("dev")
        .with_credentials("nacos", "s3cret");

    assert_eq!(options.server_addresses, vec!["a:8848", "b:8848"]);
    assert_eq!(options.namespace_label(), "dev");
    assert_eq!(RemoteOptions::new("a").namespace_label(), "public");

    let debug = format!("{options:?}");
    assert!(!debug.contains("s3cret"));
    assert!(debug.contains("***hidden***"));
}

#[test]
fn connect_failure_maps_to_provider_connection() {
    let provider = RemoteProvider::with_factory(
        "Fake",
        RemoteOptions::default(),
        |_: &RemoteOptions| -> ClientResult<Arc<dyn RemoteClient>> {
            Err(ClientError::Config("no server addresses given".to_string()))
        },
    );

    let err = provider.connect().unwrap_err();

    assert!(matches!(err, NexusError::ProviderConnection { ref backend, .. } if backend == "Fake"));
    assert!(!provider.is_connected());
}

#[test]
fn failed_probe_does_not_fail_connect() {
    let client = Arc::new(FakeClient {
        fail_fetch: true,
        ..FakeClient::default()
    });
    let provider = provider_with(client);

    provider.connect().unwrap();
    assert!(provider.is_connected());
}

#[test]
fn get_config_returns_content_and_reports_missing() {
    let client = Arc::new(FakeClient::default().with_document("app.json", "PROD", "{\"a\":1}"));
    let provider = provider_with(client);

    assert!(provider.get_config("app.json", "PROD").is_err());

    provider.connect().unwrap();
    assert_eq!(provider.get_config("app.json", "PROD").unwrap(), "{\"a\":1}");

    let err = provider.get_config("other.json", "PROD").unwrap_err();
    assert!(err.to_string().contains("does not exist or is empty"));
}

#[test]
fn get_config_wraps_client_errors() {
    let client = Arc::new(FakeClient {
        fail_fetch: true,
        ..FakeClient::default()
    });
    let provider = provider_with(client);
    provider.connect().unwrap();

    let err = provider.get_config("app.json", "PROD").unwrap_err();

    assert!(matches!(err, NexusError::ConfigSource { ref operation, .. } if operation == "get_config"));
    assert!(err.to_string().contains("connection refused"));
}

#[test]
fn watch_delivers_and_rewatch_replaces_listener() {
    let client = Arc::new(FakeClient::default());
    let provider = provider_with(client.clone());
    provider.connect().unwrap();

    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));

    let counter = first.clone();
    provider
        .watch("app", "g", Arc::new(move |_: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
    let counter = second.clone();
    provider
        .watch("app", "g", Arc::new(move |_: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

    assert_eq!(client.listener_count("app", "g"), 1);
    assert_eq!(provider.info().watchers_count, 1);

    client.push("app", "g", "{}");
    assert_eq!(first.load(Ordering::SeqCst), 0);
    assert_eq!(second.load(Ordering::SeqCst), 1);
}

#[test]
fn watch_failure_is_reported() {
    let client = Arc::new(FakeClient {
        fail_watch: true,
        ..FakeClient::default()
    });
    let provider = provider_with(client);
    provider.connect().unwrap();

    let err = provider.watch("app", "g", Arc::new(|_: &str| {})).unwrap_err();

    assert!(matches!(err, NexusError::ConfigSource { ref operation, .. } if operation == "watch"));
    assert_eq!(provider.info().watchers_count, 0);
}

#[test]
fn unwatch_removes_client_listener() {
    let client = Arc::new(FakeClient::default());
    let provider = provider_with(client.clone());
    provider.connect().unwrap();

    provider.watch("app", "g", Arc::new(|_: &str| {})).unwrap();
    provider.unwatch("app", "g");
    provider.unwatch("app", "g");

    assert_eq!(client.listener_count("app", "g"), 0);
    assert_eq!(provider.info().watchers_count, 0);
}

#[test]
fn disconnect_shuts_client_down_once() {
    let client = Arc::new(FakeClient::default());
    let provider = provider_with(client.clone());
    provider.connect().unwrap();
    provider.watch("app", "g", Arc::new(|_: &str| {})).unwrap();

    provider.disconnect();
    provider.disconnect();

    assert_eq!(client.shutdowns.load(Ordering::SeqCst), 1);
    assert!(!provider.is_connected());
    assert_eq!(provider.info().watchers_count, 0);
}

#[test]
fn info_exposes_connection_details() {
    let client = Arc::new(FakeClient::default());
    let provider = provider_with(client);

    let before = provider.info();
    assert_eq!(before.details["client_initialized"], false);

    provider.connect().unwrap();
    let after = provider.info();
    assert_eq!(after.name, "Fake");
    assert!(after.connected);
    assert_eq!(after.details["client_initialized"], true);
    assert_eq!(after.details["server_addresses"][0], "127.0.0.1:8848");
    assert_eq!(after.details["namespace"], "");
}

#[test]
fn base_url_adds_scheme_once() {
    assert_eq!(base_url("127.0.0.1:8848"), "http://127.0.0.1:8848");
    assert_eq!(base_url("https://nacos.internal/"), "https://nacos.internal");
}

#[test]
fn content_md5_matches_known_digest() {
    assert_eq!(content_md5(Some("")), "d41d8cd98f00b204e9800998ecf8427e");
    assert_eq!(content_md5(None), "");
}

#[test]
fn listening_configs_encodes_separators() {
    let key = ConfigKey::new("app.json", "PROD");

    assert_eq!(
        listening_configs([(&key, "abc")], ""),
        "app.json\u{2}PROD\u{2}abc\u{1}"
    );
    assert_eq!(
        listening_configs([(&key, "abc")], "dev"),
        "app.json\u{2}PROD\u{2}abc\u{2}dev\u{1}"
    );
}

#[test]
fn nacos_client_rejects_empty_server_list() {
    let err = super::NacosClient::new(&RemoteOptions::default()).err().unwrap();
    assert!(matches!(err, ClientError::Config(_)));
}

#[test]
fn nacos_client_rejects_bad_timeout_option() {
    let options = RemoteOptions::new("127.0.0.1:8848").with_option("timeout_ms", "soon");
    let err = super::NacosClient::new(&options).err().unwrap();
    assert!(err.to_string().contains("timeout_ms"));
}
