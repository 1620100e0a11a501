//! Compiled-template cache.
//!
//! The cached representation of a template is its source after the fragment
//! tag rewrite. Entries go through [`Base64Backend`] so clients that only
//! handle text can hold them.

use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use metrics::counter;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::backend::{CacheBackend, CacheError, SharedBackend};

pub const DEFAULT_BYTECODE_PREFIX: &str = "jinja2/bytecode/";

/// Cache client wrapper that base64-encodes values on the way in and decodes
/// them on the way out.
pub struct Base64Backend<B> {
    inner: B,
}

impl<B: CacheBackend> Base64Backend<B> {
    pub fn new(inner: B) -> Self {
        Self { inner }
    }
}

impl<B: CacheBackend> CacheBackend for Base64Backend<B> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        match self.inner.get(key)? {
            Some(encoded) => STANDARD
                .decode(encoded)
                .map(Some)
                .map_err(|err| CacheError::decode(err.to_string())),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), CacheError> {
        self.inner.set(key, STANDARD.encode(value).as_bytes(), ttl)
    }
}

pub struct BytecodeCache {
    backend: Base64Backend<SharedBackend>,
    prefix: String,
}

impl BytecodeCache {
    pub fn new(backend: SharedBackend, prefix: impl Into<String>) -> Self {
        Self {
            backend: Base64Backend::new(backend),
            prefix: prefix.into(),
        }
    }

    /// Key for `name` at this exact `source`; edits to the file select a new entry.
    pub fn key(&self, name: &str, source: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.update([0]);
        hasher.update(source.as_bytes());
        format!("{}{}", self.prefix, hex::encode(hasher.finalize()))
    }

    pub fn load(&self, name: &str, source: &str) -> Option<String> {
        let key = self.key(name, source);
        match self.backend.get(&key) {
            Ok(Some(bytes)) => match String::from_utf8(bytes) {
                Ok(compiled) => {
                    counter!("jinja_bridge_bytecode_hit_total").increment(1);
                    debug!(cache = "bytecode", outcome = "hit", template = name, "using cached template");
                    Some(compiled)
                }
                Err(err) => {
                    warn!(cache = "bytecode", template = name, error = %err, "ignoring corrupt cached template");
                    None
                }
            },
            Ok(None) => {
                counter!("jinja_bridge_bytecode_miss_total").increment(1);
                None
            }
            Err(err) => {
                counter!("jinja_bridge_bytecode_miss_total").increment(1);
                warn!(cache = "bytecode", op = "get", template = name, error = %err, "bytecode lookup failed");
                None
            }
        }
    }

    pub fn store(&self, name: &str, source: &str, compiled: &str) {
        let key = self.key(name, source);
        if let Err(err) = self.backend.set(&key, compiled.as_bytes(), None) {
            warn!(cache = "bytecode", op = "set", template = name, error = %err, "bytecode store failed");
        }
    }
}
