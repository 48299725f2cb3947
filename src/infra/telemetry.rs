use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::metric_names::{
    METRIC_CACHE_CONSUME_MS, METRIC_CACHE_DEDUP, METRIC_CACHE_EVENT_DROPPED,
    METRIC_CACHE_EVENT_QUEUE_LEN, METRIC_CACHE_EVICT, METRIC_CACHE_FETCH_MS, METRIC_CACHE_HIT,
    METRIC_CACHE_INVALIDATE, METRIC_CACHE_MISS, METRIC_REALTIME_RECONNECT,
};
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
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
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
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
            METRIC_CACHE_HIT,
            Unit::Count,
            "Cache lookups answered from an entry without waiting on the store."
        );
        describe_counter!(
            METRIC_CACHE_MISS,
            Unit::Count,
            "Cache lookups that had to wait on the store."
        );
        describe_counter!(
            METRIC_CACHE_DEDUP,
            Unit::Count,
            "Fetches that joined an in-flight request instead of starting one."
        );
        describe_counter!(
            METRIC_CACHE_INVALIDATE,
            Unit::Count,
            "Cache entries marked stale."
        );
        describe_counter!(
            METRIC_CACHE_EVICT,
            Unit::Count,
            "Per-post cache entries evicted, by reason."
        );
        describe_histogram!(
            METRIC_CACHE_FETCH_MS,
            Unit::Milliseconds,
            "Store fetch latency behind a cache entry in milliseconds."
        );
        describe_gauge!(
            METRIC_CACHE_EVENT_QUEUE_LEN,
            Unit::Count,
            "Current number of pending cache events in the queue."
        );
        describe_counter!(
            METRIC_CACHE_EVENT_DROPPED,
            Unit::Count,
            "Total number of cache events collapsed due to queue overflow."
        );
        describe_histogram!(
            METRIC_CACHE_CONSUME_MS,
            Unit::Milliseconds,
            "Cache consumption latency in milliseconds."
        );
        describe_counter!(
            METRIC_REALTIME_RECONNECT,
            Unit::Count,
            "Successful change feed reconnects."
        );
    });
}
