use std::collections::HashSet;
use std::fs;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use jinja_bridge::cache::{
    CacheBackend, CacheError, DEFAULT_BYTECODE_PREFIX, MemoryCache, SharedBackend,
};
use jinja_bridge::infra::telemetry::describe_metrics;
use jinja_bridge::template::TemplateEnvironment;
use metrics_util::debugging::DebuggingRecorder;

struct BrokenBackend;

impl CacheBackend for BrokenBackend {
    fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Err(CacheError::unavailable("offline"))
    }

    fn set(&self, _key: &str, _value: &[u8], _ttl: Option<Duration>) -> Result<(), CacheError> {
        Err(CacheError::unavailable("offline"))
    }
}

fn environment(dir: &std::path::Path, backend: SharedBackend) -> TemplateEnvironment {
    TemplateEnvironment::builder()
        .directories([dir])
        .backend(backend)
        .bytecode_cache(DEFAULT_BYTECODE_PREFIX)
        .build()
        .expect("environment")
}

#[test]
fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");
    describe_metrics();

    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(
        dir.path().join("page.html"),
        "{% cache 'a' %}A{% endcache %}{% cache 'b' %}B{% endcache %}",
    )
    .expect("write template");

    // Two fragments plus one compiled template overflow a two-entry LRU.
    let backend: SharedBackend = Arc::new(MemoryCache::new(
        NonZeroUsize::new(2).expect("limit"),
        None,
    ));
    environment(dir.path(), backend.clone())
        .render("page.html", ())
        .expect("cold render");
    let warm = environment(dir.path(), backend);
    warm.render("page.html", ()).expect("warm render");
    warm.render("page.html", ()).expect("cached render");

    let broken = environment(dir.path(), Arc::new(BrokenBackend));
    assert_eq!(broken.render("page.html", ()).expect("degraded render"), "AB");
    assert_eq!(warm.render_str("{{ 40 + 2 }}", ()).expect("inline render"), "42");

    let snapshot = snapshotter.snapshot().into_vec();
    let names: HashSet<String> = snapshot
        .iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();
    let timed_templates: HashSet<String> = snapshot
        .iter()
        .map(|(composite_key, _, _, _)| composite_key.key())
        .filter(|key| key.name() == "jinja_bridge_template_render_ms")
        .flat_map(|key| key.labels())
        .filter(|label| label.key() == "template")
        .map(|label| label.value().to_string())
        .collect();

    let expected = [
        "jinja_bridge_fragment_hit_total",
        "jinja_bridge_fragment_miss_total",
        "jinja_bridge_fragment_lookup_error_total",
        "jinja_bridge_fragment_store_error_total",
        "jinja_bridge_bytecode_miss_total",
        "jinja_bridge_cache_evict_total",
        "jinja_bridge_template_render_ms",
    ];
    for name in expected {
        assert!(names.contains(name), "missing metric `{name}` in {names:?}");
    }
    assert!(timed_templates.contains("page.html"), "{timed_templates:?}");
    assert!(timed_templates.contains("<string>"), "{timed_templates:?}");
}
