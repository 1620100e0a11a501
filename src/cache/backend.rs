//! Key-value cache client abstraction.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Failure reported by a cache client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    #[error("cached value could not be decoded: {0}")]
    Decode(String),
}

impl CacheError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }
}

/// Synchronous cache client storing opaque byte values.
///
/// `ttl = None` leaves expiry to the backend's default policy.
pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), CacheError>;
}

impl<B: CacheBackend + ?Sized> CacheBackend for Arc<B> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), CacheError> {
        (**self).set(key, value, ttl)
    }
}

/// Shared handle to a cache client.
pub type SharedBackend = Arc<dyn CacheBackend>;
