use std::sync::Once;

use metrics::{Unit, describe_counter};
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
/// Logs go to stderr; stdout is reserved for command output.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true)
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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "keepsake_cache_hit_total",
            Unit::Count,
            "Total number of artifact cache hits."
        );
        describe_counter!(
            "keepsake_cache_miss_total",
            Unit::Count,
            "Total number of artifact cache misses, expired entries included."
        );
        describe_counter!(
            "keepsake_cache_expired_total",
            Unit::Count,
            "Total number of cache entries removed because they had expired."
        );
        describe_counter!(
            "keepsake_cache_fallback_total",
            Unit::Count,
            "Total number of cache operations served from process memory after a durable failure."
        );
        describe_counter!(
            "keepsake_versions_created_total",
            Unit::Count,
            "Total number of version snapshots created."
        );
        describe_counter!(
            "keepsake_versions_pruned_total",
            Unit::Count,
            "Total number of versions removed by the retention cap."
        );
        describe_counter!(
            "keepsake_versions_renumber_total",
            Unit::Count,
            "Total number of renumbering passes applied."
        );
        describe_counter!(
            "keepsake_versions_renumber_failed_total",
            Unit::Count,
            "Total number of renumbering passes that failed and left a gap."
        );
    });
}
