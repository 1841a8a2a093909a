//! Auth token persistence.
//!
//! # Design
//! The token lives in a durable key-value store under `token`, JSON-encoded
//! so that a logged-out state is stored as `null` rather than as a missing
//! key. At startup `Session::restore` reads it back and installs
//! `Authorization: Token <value>` as a default header. The store is a trait
//! so the application can keep it in a file while tests keep it in memory.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::client::ApiClient;
use crate::config::ApiConfig;
use crate::error::{ObserverError, StorageError};
use crate::interceptors::{response_observer, ResponseObserverHandle};
use crate::transport::Transport;

/// Key the token is stored under.
pub const TOKEN_KEY: &str = "token";

/// Default header the token is sent in.
pub const AUTHORIZATION: &str = "Authorization";

/// Durable string key-value storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// In-process store, lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Store backed by a JSON object file. A missing or empty file is an empty
/// store; every `set` rewrites the whole file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>, StorageError> {
        match fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.load()?;
        entries.insert(key.to_string(), value.to_string());
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&entries)?)?;
        Ok(())
    }
}

fn authorization_value(token: &str) -> String {
    format!("Token {token}")
}

/// Binds a token store to a client's default headers.
pub struct Session<S> {
    config: Arc<ApiConfig>,
    store: Arc<S>,
}

impl<S> Clone for Session<S> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: KeyValueStore + 'static> Session<S> {
    pub fn new<T: Transport>(client: &ApiClient<T>, store: S) -> Self {
        Self {
            config: client.config_handle(),
            store: Arc::new(store),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// The persisted token. `null`, a missing key, or an undecodable value
    /// all read as no token.
    pub fn stored_token(&self) -> Result<Option<String>, StorageError> {
        let Some(raw) = self.store.get(TOKEN_KEY)? else {
            return Ok(None);
        };
        match serde_json::from_str::<Option<String>>(&raw) {
            Ok(token) => Ok(token),
            Err(e) => {
                tracing::warn!(error = %e, "Stored token is not a JSON string, ignoring it");
                Ok(None)
            }
        }
    }

    /// Re-read the persisted token and install it as the `Authorization`
    /// default header. Returns the token that was installed.
    pub fn restore(&self) -> Result<Option<String>, StorageError> {
        let token = self.stored_token()?;
        if let Some(token) = &token {
            self.config
                .set_header(AUTHORIZATION, Some(authorization_value(token)));
            tracing::debug!("Restored session token");
        }
        Ok(token)
    }

    /// Persist `token` (or `null`) and update the `Authorization` header.
    pub fn persist_token(&self, token: Option<&str>) -> Result<(), StorageError> {
        self.store.set(TOKEN_KEY, &serde_json::to_string(&token)?)?;
        self.config
            .set_header(AUTHORIZATION, token.map(authorization_value));
        Ok(())
    }

    /// Observer that forgets the token whenever it fires.
    pub fn unauthorized_observer(&self) -> ResponseObserverHandle {
        let session = self.clone();
        response_observer(move |ctx| {
            tracing::info!(request_id = %ctx.id, status = ctx.status, "Unauthorized, clearing session token");
            session
                .persist_token(None)
                .map_err(|e| ObserverError::with_source("could not clear session token", e))
        })
    }

    /// Register `unauthorized_observer` for 401 responses on `client`.
    pub fn logout_on_unauthorized<T: Transport>(&self, client: &ApiClient<T>) -> ResponseObserverHandle {
        let observer = self.unauthorized_observer();
        client.add_response_observer(401, Arc::clone(&observer));
        observer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientSettings;
    use crate::transport::ReqwestTransport;

    fn client() -> ApiClient<ReqwestTransport> {
        ApiClient::new(&ClientSettings::new("http://localhost/"), ReqwestTransport::new())
    }

    #[test]
    fn persist_then_restore_sets_authorization() {
        let c = client();
        let session = Session::new(&c, MemoryStore::new());
        session.persist_token(Some("abc")).unwrap();
        assert_eq!(session.store().get(TOKEN_KEY).unwrap().as_deref(), Some("\"abc\""));

        c.config().reset();
        assert_eq!(session.restore().unwrap().as_deref(), Some("abc"));
        assert_eq!(c.config().header(AUTHORIZATION).as_deref(), Some("Token abc"));
    }

    #[test]
    fn persisting_none_stores_json_null_and_clears_header() {
        let c = client();
        let session = Session::new(&c, MemoryStore::new());
        session.persist_token(Some("abc")).unwrap();
        session.persist_token(None).unwrap();
        assert_eq!(session.store().get(TOKEN_KEY).unwrap().as_deref(), Some("null"));
        assert_eq!(c.config().header(AUTHORIZATION), None);
        assert_eq!(session.restore().unwrap(), None);
    }

    #[test]
    fn undecodable_token_is_ignored() {
        let c = client();
        let store = MemoryStore::new();
        store.set(TOKEN_KEY, "abc").unwrap();
        let session = Session::new(&c, store);
        assert_eq!(session.restore().unwrap(), None);
        assert_eq!(c.config().header(AUTHORIZATION), None);
    }

    #[test]
    fn missing_token_restores_nothing() {
        let c = client();
        let session = Session::new(&c, MemoryStore::new());
        assert_eq!(session.restore().unwrap(), None);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("storage.json");
        let store = FileStore::open(&path);
        assert_eq!(store.get(TOKEN_KEY).unwrap(), None);
        store.set(TOKEN_KEY, "\"abc\"").unwrap();
        store.set("theme", "dark").unwrap();

        let reopened = FileStore::open(&path);
        assert_eq!(reopened.get(TOKEN_KEY).unwrap().as_deref(), Some("\"abc\""));
        assert_eq!(reopened.get("theme").unwrap().as_deref(), Some("dark"));
    }

    #[test]
    fn file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        fs::write(&path, "[1, 2]").unwrap();
        let err = FileStore::open(&path).get(TOKEN_KEY).unwrap_err();
        assert!(matches!(err, StorageError::Corrupt(_)));
    }

    #[test]
    fn registered_observer_is_removable() {
        let c = client();
        let session = Session::new(&c, MemoryStore::new());
        let observer = session.logout_on_unauthorized(&c);
        assert_eq!(c.interceptors().response_observers(401).len(), 1);
        c.remove_response_observer(401, &observer);
        assert!(c.interceptors().response_observers(401).is_empty());
    }
}
