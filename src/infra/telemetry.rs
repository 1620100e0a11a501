use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Logs go to stderr so `render` and `cache-key` output stays clean on stdout.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "jinja_bridge_fragment_hit_total",
            Unit::Count,
            "Total number of fragment cache hits."
        );
        describe_counter!(
            "jinja_bridge_fragment_miss_total",
            Unit::Count,
            "Total number of fragment cache misses, including misses caused by errors."
        );
        describe_counter!(
            "jinja_bridge_fragment_lookup_error_total",
            Unit::Count,
            "Total number of fragment lookups that failed in the backend."
        );
        describe_counter!(
            "jinja_bridge_fragment_store_error_total",
            Unit::Count,
            "Total number of rendered fragments the backend failed to store."
        );
        describe_counter!(
            "jinja_bridge_bytecode_hit_total",
            Unit::Count,
            "Total number of compiled templates served from the bytecode cache."
        );
        describe_counter!(
            "jinja_bridge_bytecode_miss_total",
            Unit::Count,
            "Total number of bytecode cache misses."
        );
        describe_counter!(
            "jinja_bridge_cache_evict_total",
            Unit::Count,
            "Total number of memory cache evictions due to capacity."
        );
        describe_histogram!(
            "jinja_bridge_template_render_ms",
            Unit::Milliseconds,
            "Template render latency in milliseconds."
        );
    });
}
