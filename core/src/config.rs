//! Client settings and the mutable global configuration (URL root and
//! default headers).
//!
//! # Design
//! `ClientSettings` is the immutable startup input, read from the
//! environment. `ApiConfig` is the live state derived from it: a URL root
//! that can be swapped at runtime and reset to its starting value, plus the
//! header registry merged into every request. Both sit behind `RwLock`s that
//! are only held long enough to copy a snapshot out, never across an await.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use serde::Deserialize;

use crate::http::Headers;

/// Environment variable holding the API root.
pub const API_ROOT_ENV: &str = "AVENUE_API_URL";

/// Environment variable selecting query encoding (`raw` or `percent`).
pub const QUERY_ENCODING_ENV: &str = "AVENUE_QUERY_ENCODING";

/// How query parameter keys and values are written into the URL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryEncoding {
    /// Values are written verbatim. Values containing `&`, `=` or non-ASCII
    /// characters produce a malformed query string.
    #[default]
    Raw,
    /// Keys and values are percent-encoded like `encodeURIComponent`.
    Percent,
}

impl QueryEncoding {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" => Some(QueryEncoding::Raw),
            "percent" => Some(QueryEncoding::Percent),
            _ => None,
        }
    }
}

/// Startup settings for an `ApiClient`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ClientSettings {
    #[serde(default)]
    pub api_root: String,
    #[serde(default)]
    pub query_encoding: QueryEncoding,
}

impl ClientSettings {
    pub fn new(api_root: impl Into<String>) -> Self {
        Self {
            api_root: api_root.into(),
            query_encoding: QueryEncoding::default(),
        }
    }

    /// Read settings from `AVENUE_API_URL` and `AVENUE_QUERY_ENCODING`.
    /// Missing variables fall back to an empty root and raw encoding.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let api_root = lookup(API_ROOT_ENV).unwrap_or_default();
        let query_encoding = match lookup(QUERY_ENCODING_ENV) {
            Some(raw) => QueryEncoding::parse(&raw).unwrap_or_else(|| {
                tracing::warn!(value = %raw, "Unknown {QUERY_ENCODING_ENV}, using raw");
                QueryEncoding::Raw
            }),
            None => QueryEncoding::Raw,
        };
        Self {
            api_root,
            query_encoding,
        }
    }

    pub fn with_query_encoding(mut self, encoding: QueryEncoding) -> Self {
        self.query_encoding = encoding;
        self
    }
}

/// Live URL root and default headers shared by every call on a client.
#[derive(Debug)]
pub struct ApiConfig {
    original_root: String,
    root: RwLock<String>,
    headers: RwLock<BTreeMap<String, String>>,
    query_encoding: QueryEncoding,
}

impl ApiConfig {
    pub fn new(settings: &ClientSettings) -> Self {
        Self {
            original_root: settings.api_root.clone(),
            root: RwLock::new(settings.api_root.clone()),
            headers: RwLock::new(BTreeMap::new()),
            query_encoding: settings.query_encoding,
        }
    }

    pub fn root(&self) -> String {
        self.root.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set_root(&self, root: impl Into<String>) {
        *self.root.write().unwrap_or_else(PoisonError::into_inner) = root.into();
    }

    pub fn query_encoding(&self) -> QueryEncoding {
        self.query_encoding
    }

    /// Set a default header, or remove it with `None`. Removing a header that
    /// was never set is a no-op.
    pub fn set_header(&self, name: impl Into<String>, value: Option<String>) {
        let name = name.into();
        let mut headers = self.headers.write().unwrap_or_else(PoisonError::into_inner);
        match value {
            Some(v) => {
                headers.insert(name, v);
            }
            None => {
                headers.remove(&name);
            }
        }
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Copy of the current default headers.
    pub fn headers(&self) -> BTreeMap<String, String> {
        self.headers.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Restore the starting root and drop every default header.
    pub fn reset(&self) {
        self.set_root(self.original_root.clone());
        self.headers.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Per-call headers overlaid with defaults for names the caller did not
    /// supply. Per-call entries without a value count as not supplied. Names
    /// are compared ignoring ASCII case.
    pub fn merge_headers(&self, per_call: &Headers) -> BTreeMap<String, String> {
        let mut effective: BTreeMap<String, String> = per_call
            .iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| (k.clone(), v.clone())))
            .collect();
        for (name, value) in self.headers() {
            if !effective.keys().any(|k| k.eq_ignore_ascii_case(&name)) {
                effective.insert(name, value);
            }
        }
        effective
    }
}
