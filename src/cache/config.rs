//! Cache configuration.
//!
//! Selects the cache client and the fragment/bytecode namespaces via the
//! `[cache]` table of `jinja-bridge.toml`.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use super::backend::SharedBackend;
use super::bytecode::DEFAULT_BYTECODE_PREFIX;
use super::keys::KeyFormat;
use super::memory::MemoryCache;

const DEFAULT_MEMORY_ENTRY_LIMIT: usize = 1024;
const DEFAULT_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// No cache client; fragments always render.
    None,
    /// In-process LRU client.
    Memory,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub backend: BackendKind,
    pub fragment_key_format: KeyFormat,
    /// Expiry applied when a caller gives no TTL. `None` keeps entries until evicted.
    pub default_timeout: Option<Duration>,
    pub memory_entry_limit: usize,
    pub bytecode_cache: bool,
    pub bytecode_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            fragment_key_format: KeyFormat::default(),
            default_timeout: Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            memory_entry_limit: DEFAULT_MEMORY_ENTRY_LIMIT,
            bytecode_cache: true,
            bytecode_prefix: DEFAULT_BYTECODE_PREFIX.to_string(),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            backend: settings.backend,
            fragment_key_format: settings.fragment_key_format.clone(),
            default_timeout: settings.default_timeout,
            memory_entry_limit: settings.memory_entry_limit.get(),
            bytecode_cache: settings.bytecode_cache,
            bytecode_prefix: settings.bytecode_prefix.clone(),
        }
    }
}

impl CacheConfig {
    /// Memory entry limit as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_entry_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_entry_limit).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn build_backend(&self) -> Option<SharedBackend> {
        match self.backend {
            BackendKind::None => None,
            BackendKind::Memory => Some(Arc::new(MemoryCache::new(
                self.memory_entry_limit_non_zero(),
                self.default_timeout,
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(config.fragment_key_format.to_string(), "jinja_frag_%(hash)s");
        assert_eq!(config.default_timeout, Some(Duration::from_secs(300)));
        assert_eq!(config.memory_entry_limit, 1024);
        assert!(config.bytecode_cache);
        assert_eq!(config.bytecode_prefix, "jinja2/bytecode/");
    }

    #[test]
    fn backend_kind_selects_the_client() {
        let none = CacheConfig {
            backend: BackendKind::None,
            ..Default::default()
        };
        assert!(none.build_backend().is_none());
        assert!(CacheConfig::default().build_backend().is_some());
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = CacheConfig {
            memory_entry_limit: 0,
            ..Default::default()
        };
        assert_eq!(config.memory_entry_limit_non_zero().get(), 1);
    }
}
