//! Bearer token discovery in the page's key-value storages.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::errors::StorageError;

/// Index key listing `|`-separated suffixes of cached access tokens.
pub const TOKEN_INDEX_KEY: &str = "adal.token.keys";
/// Prefix of the per-token keys named by [`TOKEN_INDEX_KEY`].
pub const TOKEN_KEY_PREFIX: &str = "adal.access.token.key";

/// Probed in this order when a stored value parses as a JSON object.
const TOKEN_FIELDS: [&str; 5] = ["access_token", "accessToken", "id_token", "idToken", "token"];
const MIN_TOKEN_LEN: usize = 21;

static TOKEN_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)token|idtoken|access").expect("token key regex"));
static TOKEN_SHAPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+$").expect("token shape regex")
});

/// Read side of a browser `Storage` (local or session).
pub trait KeyValueStorage: Send + Sync {
    fn length(&self) -> Result<usize, StorageError>;

    fn key(&self, index: usize) -> Result<Option<String>, StorageError>;

    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
}

/// Insertion-ordered in-memory storage. Counts reads so callers can tell whether a
/// lookup touched it.
#[derive(Default)]
pub struct MemoryStorage {
    items: RwLock<Vec<(String, String)>>,
    reads: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items<K, V>(items: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let storage = Self::new();
        for (k, v) in items {
            storage.set_item(k, v);
        }
        storage
    }

    pub fn set_item(&self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        match items.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => items.push((key, value)),
        }
    }

    /// Number of `length`/`key`/`get_item` calls served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        self.reads.fetch_add(1, Ordering::SeqCst);
    }
}

impl KeyValueStorage for MemoryStorage {
    fn length(&self) -> Result<usize, StorageError> {
        self.touch();
        Ok(self.items.read().unwrap_or_else(PoisonError::into_inner).len())
    }

    fn key(&self, index: usize) -> Result<Option<String>, StorageError> {
        self.touch();
        let items = self.items.read().unwrap_or_else(PoisonError::into_inner);
        Ok(items.get(index).map(|(k, _)| k.clone()))
    }

    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.touch();
        let items = self.items.read().unwrap_or_else(PoisonError::into_inner);
        Ok(items.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone()))
    }
}

/// Storage that refuses every access, like a sandboxed frame.
pub struct DeniedStorage;

impl KeyValueStorage for DeniedStorage {
    fn length(&self) -> Result<usize, StorageError> {
        Err(StorageError::Denied("length".to_string()))
    }

    fn key(&self, _index: usize) -> Result<Option<String>, StorageError> {
        Err(StorageError::Denied("key".to_string()))
    }

    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Err(StorageError::Denied(key.to_string()))
    }
}

/// Single-owner token cache: populated once, then reused until dropped. Never
/// refreshed or invalidated.
#[derive(Default)]
pub struct TokenCache {
    token: Mutex<Option<String>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<String> {
        self.token.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Returns the cached token, or runs `populate` and caches a `Some` result. The lock
    /// is held while populating so there is a single writer.
    pub fn get_or_populate(&self, populate: impl FnOnce() -> Option<String>) -> Option<String> {
        let mut token = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        if token.is_none() {
            *token = populate();
        }
        token.clone()
    }
}

/// Extracts a bearer token from a stored value: a JSON object carrying one of the
/// known fields with a long enough string, or else a raw three-segment token.
pub fn try_extract_token_value(raw: &str) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    let mut raw = raw.trim().to_string();
    match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(serde_json::Value::Object(map)) => {
            let found = TOKEN_FIELDS.iter().find_map(|field| {
                map.get(*field)
                    .and_then(|v| v.as_str())
                    .filter(|t| t.len() >= MIN_TOKEN_LEN)
            });
            if let Some(token) = found {
                return Some(token.to_string());
            }
        }
        Ok(serde_json::Value::String(inner)) => raw = inner,
        _ => {}
    }
    TOKEN_SHAPE_RE.is_match(&raw).then_some(raw)
}

/// Finds the bearer token in the persistent and session storages.
pub struct CredentialLocator {
    persistent: Arc<dyn KeyValueStorage>,
    session: Arc<dyn KeyValueStorage>,
    cache: TokenCache,
}

impl CredentialLocator {
    pub fn new(persistent: Arc<dyn KeyValueStorage>, session: Arc<dyn KeyValueStorage>) -> Self {
        Self {
            persistent,
            session,
            cache: TokenCache::new(),
        }
    }

    /// Memoized lookup; storage is not touched again once a token was found.
    pub fn find_bearer_token(&self) -> Option<String> {
        self.cache.get_or_populate(|| {
            let token = self
                .from_token_index()
                .or_else(|| self.scan(self.persistent.as_ref(), "persistent"))
                .or_else(|| self.scan(self.session.as_ref(), "session"));
            if token.is_none() {
                debug!("No bearer token found in storage");
            }
            token
        })
    }

    fn from_token_index(&self) -> Option<String> {
        let lookup = || -> Result<Option<String>, StorageError> {
            let Some(index) = self.persistent.get_item(TOKEN_INDEX_KEY)? else {
                return Ok(None);
            };
            for id in index.split('|').filter(|s| !s.is_empty()) {
                let key = format!("{TOKEN_KEY_PREFIX}{id}");
                let token = self
                    .persistent
                    .get_item(&key)?
                    .and_then(|raw| try_extract_token_value(&raw));
                if token.is_some() {
                    debug!(key = %key, "Bearer token found via token index");
                    return Ok(token);
                }
            }
            Ok(None)
        };
        lookup().unwrap_or_else(|e| {
            debug!("Token index lookup failed: {}", e);
            None
        })
    }

    fn scan(&self, storage: &dyn KeyValueStorage, area: &str) -> Option<String> {
        let lookup = || -> Result<Option<String>, StorageError> {
            for i in 0..storage.length()? {
                let Some(key) = storage.key(i)? else { continue };
                if !TOKEN_KEY_RE.is_match(&key) {
                    continue;
                }
                let token = storage
                    .get_item(&key)?
                    .and_then(|raw| try_extract_token_value(&raw));
                if token.is_some() {
                    debug!(area, key = %key, "Bearer token found by key scan");
                    return Ok(token);
                }
            }
            Ok(None)
        };
        lookup().unwrap_or_else(|e| {
            debug!(area, "Storage scan failed: {}", e);
            None
        })
    }
}
