//! Caching for rendered templates.
//!
//! - **Fragment cache**: stores the output of `{% cache %}` blocks under keys
//!   derived from template-supplied parameters.
//! - **Bytecode cache**: stores compiled template sources so repeat loads skip
//!   the tag rewrite.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! backend = "memory"
//! fragment_key_format = "jinja_frag_%(hash)s"
//! default_timeout_seconds = 300
//! # ... see config.rs for all options
//! ```

mod backend;
mod bytecode;
mod config;
mod fragment;
mod keys;
mod lock;
mod memory;

pub use backend::{CacheBackend, CacheError, SharedBackend};
pub use bytecode::{Base64Backend, BytecodeCache, DEFAULT_BYTECODE_PREFIX};
pub use config::{BackendKind, CacheConfig};
pub use fragment::FragmentCache;
pub use keys::{
    CacheParameters, DEFAULT_KEY_FORMAT, KeyFormat, KeyFormatError, SerializationError,
    derive_cache_key,
};
pub use memory::MemoryCache;
