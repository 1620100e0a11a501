//! `cache` global giving templates direct access to the cache backend.

use std::sync::Arc;

use minijinja::value::{Object, ObjectRepr, from_args};
use minijinja::{Error, ErrorKind, State, Value};
use tracing::warn;

use crate::cache::SharedBackend;
use crate::template::bundle::{Bundle, Registry};
use crate::template::environment::parse_timeout;

/// Values are stored as JSON. Without a backend every `get` misses and `set` does nothing.
#[derive(Clone)]
pub struct CacheHandle {
    backend: Option<SharedBackend>,
}

impl std::fmt::Debug for CacheHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheHandle")
            .field("enabled", &self.backend.is_some())
            .finish()
    }
}

impl CacheHandle {
    pub fn new(backend: Option<SharedBackend>) -> Self {
        Self { backend }
    }

    fn get(&self, key: &str, default: Value) -> Value {
        let Some(backend) = self.backend.as_ref() else {
            return default;
        };
        match backend.get(key) {
            Ok(Some(bytes)) => match serde_json::from_slice::<serde_json::Value>(&bytes) {
                Ok(stored) => Value::from_serialize(&stored),
                Err(err) => {
                    warn!(cache = "template", op = "get", key, error = %err, "ignoring undecodable entry");
                    default
                }
            },
            Ok(None) => default,
            Err(err) => {
                warn!(cache = "template", op = "get", key, error = %err, "cache lookup failed");
                default
            }
        }
    }

    fn set(&self, key: &str, value: &Value, timeout: &Value) -> Result<(), Error> {
        let ttl = parse_timeout(timeout)?;
        let Some(backend) = self.backend.as_ref() else {
            return Ok(());
        };
        let encoded = serde_json::to_vec(value).map_err(|err| {
            Error::new(ErrorKind::InvalidOperation, "value cannot be cached").with_source(err)
        })?;
        if let Err(err) = backend.set(key, &encoded, ttl) {
            warn!(cache = "template", op = "set", key, error = %err, "cache store failed");
        }
        Ok(())
    }
}

impl Object for CacheHandle {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn call_method(
        self: &Arc<Self>,
        _state: &State<'_, '_>,
        method: &str,
        args: &[Value],
    ) -> Result<Value, Error> {
        match method {
            "get" => {
                let (key, default): (String, Option<Value>) = from_args(args)?;
                Ok(self.get(&key, default.unwrap_or_else(|| Value::from(()))))
            }
            "set" => {
                let (key, value, timeout): (String, Value, Option<Value>) = from_args(args)?;
                self.set(&key, &value, &timeout.unwrap_or_else(|| Value::from(())))?;
                Ok(Value::from(()))
            }
            _ => Err(Error::from(ErrorKind::UnknownMethod)),
        }
    }
}

pub(super) fn bundle(backend: Option<SharedBackend>) -> Bundle {
    let mut bundle = Bundle::new();
    bundle.register_global("cache", Value::from_object(CacheHandle::new(backend)));
    bundle
}
