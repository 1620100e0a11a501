//! Cache-or-render control flow for template fragments.

use std::time::Duration;

use metrics::counter;
use tracing::{debug, warn};

use super::backend::SharedBackend;
use super::keys::{CacheParameters, KeyFormat, derive_cache_key};

/// Fragment cache bound to one template environment.
///
/// Without a backend every execution renders its body; caching never changes
/// whether a page renders.
#[derive(Clone, Default)]
pub struct FragmentCache {
    backend: Option<SharedBackend>,
    key_format: KeyFormat,
}

impl FragmentCache {
    pub fn new(backend: Option<SharedBackend>, key_format: KeyFormat) -> Self {
        Self {
            backend,
            key_format,
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub fn key_format(&self) -> &KeyFormat {
        &self.key_format
    }

    pub fn key_for(&self, parameters: &CacheParameters) -> String {
        derive_cache_key(parameters, &self.key_format)
    }

    /// Return the cached fragment for `parameters`, or render and store it.
    ///
    /// `render_body` runs at most once, and not at all on a hit. Backend
    /// failures are logged and treated as a miss (lookup) or ignored (store).
    pub fn execute<F, E>(
        &self,
        parameters: &CacheParameters,
        ttl: Option<Duration>,
        render_body: F,
    ) -> Result<String, E>
    where
        F: FnOnce() -> Result<String, E>,
    {
        let Some(backend) = self.backend.as_ref() else {
            return render_body();
        };

        let key = self.key_for(parameters);

        match backend.get(&key) {
            Ok(Some(bytes)) => match String::from_utf8(bytes) {
                Ok(fragment) => {
                    counter!("jinja_bridge_fragment_hit_total").increment(1);
                    debug!(cache = "fragment", outcome = "hit", key = %key, "serving cached fragment");
                    return Ok(fragment);
                }
                Err(err) => {
                    warn!(
                        cache = "fragment",
                        op = "get",
                        key = %key,
                        error = %err,
                        "discarding cached fragment that is not valid UTF-8"
                    );
                }
            },
            Ok(None) => {}
            Err(err) => {
                counter!("jinja_bridge_fragment_lookup_error_total").increment(1);
                warn!(
                    cache = "fragment",
                    op = "get",
                    key = %key,
                    error = %err,
                    "fragment lookup failed, rendering instead"
                );
            }
        }

        counter!("jinja_bridge_fragment_miss_total").increment(1);
        debug!(cache = "fragment", outcome = "miss", key = %key, "rendering fragment");

        let fragment = render_body()?;

        if let Err(err) = backend.set(&key, fragment.as_bytes(), ttl) {
            counter!("jinja_bridge_fragment_store_error_total").increment(1);
            warn!(
                cache = "fragment",
                op = "set",
                key = %key,
                error = %err,
                "fragment store failed, returning rendered value"
            );
        }

        Ok(fragment)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::convert::Infallible;
    use std::num::NonZeroUsize;
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::cache::backend::{CacheBackend, CacheError};
    use crate::cache::memory::MemoryCache;

    #[derive(Default)]
    struct RecordingBackend {
        inner: Mutex<Vec<(String, Vec<u8>, Option<Duration>)>>,
        gets: AtomicUsize,
        sets: AtomicUsize,
    }

    impl CacheBackend for RecordingBackend {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            let entries = self.inner.lock().expect("entries lock");
            Ok(entries
                .iter()
                .rev()
                .find(|(candidate, _, _)| candidate == key)
                .map(|(_, value, _)| value.clone()))
        }

        fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), CacheError> {
            self.sets.fetch_add(1, Ordering::SeqCst);
            self.inner
                .lock()
                .expect("entries lock")
                .push((key.to_string(), value.to_vec(), ttl));
            Ok(())
        }
    }

    struct BrokenBackend;

    impl CacheBackend for BrokenBackend {
        fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
            Err(CacheError::unavailable("connection refused"))
        }

        fn set(&self, _key: &str, _value: &[u8], _ttl: Option<Duration>) -> Result<(), CacheError> {
            Err(CacheError::unavailable("connection refused"))
        }
    }

    fn render_counting(calls: &Cell<usize>, output: &str) -> Result<String, Infallible> {
        calls.set(calls.get() + 1);
        Ok(output.to_string())
    }

    #[test]
    fn warm_cache_skips_rendering() {
        let backend = Arc::new(RecordingBackend::default());
        let cache = FragmentCache::new(Some(backend.clone()), KeyFormat::default());
        let parameters = CacheParameters::from(("article", 42));
        let calls = Cell::new(0);

        let first = cache
            .execute(&parameters, Some(Duration::from_secs(60)), || {
                render_counting(&calls, "<p>body</p>")
            })
            .expect("first render");
        let second = cache
            .execute(&parameters, Some(Duration::from_secs(60)), || {
                render_counting(&calls, "<p>other</p>")
            })
            .expect("second render");

        assert_eq!(first, "<p>body</p>");
        assert_eq!(second, first);
        assert_eq!(calls.get(), 1);
        assert_eq!(backend.gets.load(Ordering::SeqCst), 2);
        assert_eq!(backend.sets.load(Ordering::SeqCst), 1);

        let stored = backend.inner.lock().expect("entries lock");
        assert_eq!(stored[0].0, cache.key_for(&parameters));
        assert_eq!(stored[0].2, Some(Duration::from_secs(60)));
    }

    #[test]
    fn disabled_cache_renders_every_time() {
        let cache = FragmentCache::disabled();
        let calls = Cell::new(0);

        for _ in 0..3 {
            let out = cache
                .execute(&"k".into(), None, || render_counting(&calls, "fresh"))
                .expect("render");
            assert_eq!(out, "fresh");
        }
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn different_parameters_render_separately() {
        let backend = Arc::new(MemoryCache::new(NonZeroUsize::new(8).expect("limit"), None));
        let cache = FragmentCache::new(Some(backend), KeyFormat::default());
        let calls = Cell::new(0);

        cache
            .execute(&("article", 1).into(), None, || render_counting(&calls, "one"))
            .expect("render");
        let out = cache
            .execute(&("article", 2).into(), None, || render_counting(&calls, "two"))
            .expect("render");

        assert_eq!(out, "two");
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn backend_failures_degrade_to_rendering() {
        let cache = FragmentCache::new(Some(Arc::new(BrokenBackend)), KeyFormat::default());
        let calls = Cell::new(0);

        for _ in 0..2 {
            let out = cache
                .execute(&"k".into(), None, || render_counting(&calls, "rendered"))
                .expect("render despite backend errors");
            assert_eq!(out, "rendered");
        }
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn invalid_utf8_entry_is_treated_as_miss() {
        let backend = Arc::new(RecordingBackend::default());
        let cache = FragmentCache::new(Some(backend.clone()), KeyFormat::default());
        let parameters = CacheParameters::from("k");
        backend
            .set(&cache.key_for(&parameters), &[0xff, 0xfe], None)
            .expect("seed");

        let calls = Cell::new(0);
        let out = cache
            .execute(&parameters, None, || render_counting(&calls, "repaired"))
            .expect("render");
        assert_eq!(out, "repaired");
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn render_errors_propagate_without_store() {
        let backend = Arc::new(RecordingBackend::default());
        let cache = FragmentCache::new(Some(backend.clone()), KeyFormat::default());

        let err = cache
            .execute(&"k".into(), None, || Err::<String, _>("boom"))
            .expect_err("render error");
        assert_eq!(err, "boom");
        assert_eq!(backend.sets.load(Ordering::SeqCst), 0);
    }
}
