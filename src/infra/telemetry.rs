use std::sync::Once;

use metrics::{Unit, describe_counter};
use tracing::level_filters::LevelFilter;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::metric_names::{
    METRIC_HIT_TOTAL, METRIC_MISS_TOTAL, METRIC_READ_ERROR_TOTAL, METRIC_WRITE_FAILED_TOTAL,
    METRIC_WRITE_SKIPPED_TOTAL, METRIC_WRITE_TOTAL,
};
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Environment variable holding filter directives, e.g. `query_response_cache=debug`.
pub const LOG_FILTER_ENV: &str = "FQC_LOG";

/// Install the global subscriber: `FQC_LOG` directives over the configured level,
/// span traces for errors, and compact or JSON output.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let output = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(false).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter(logging.level))
        .with(ErrorLayer::default())
        .with(output)
        .try_init()
        .map_err(|err| InfraError::telemetry(format!("tracing subscriber already set: {err}")))
}

fn env_filter(level: LevelFilter) -> EnvFilter {
    EnvFilter::builder()
        .with_env_var(LOG_FILTER_ENV)
        .with_default_directive(level.into())
        .from_env_lossy()
}

/// Register descriptions for the cache metrics with the installed recorder.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_HIT_TOTAL,
            Unit::Count,
            "Total number of response-cache hits, labelled by session scope."
        );
        describe_counter!(
            METRIC_MISS_TOTAL,
            Unit::Count,
            "Total number of lookups that found no usable entry."
        );
        describe_counter!(
            METRIC_READ_ERROR_TOTAL,
            Unit::Count,
            "Total number of store reads that failed or returned unreadable entries."
        );
        describe_counter!(
            METRIC_WRITE_TOTAL,
            Unit::Count,
            "Total number of background writes the store accepted."
        );
        describe_counter!(
            METRIC_WRITE_SKIPPED_TOTAL,
            Unit::Count,
            "Total number of responses not written, labelled by reason."
        );
        describe_counter!(
            METRIC_WRITE_FAILED_TOTAL,
            Unit::Count,
            "Total number of background writes the store rejected."
        );
    });
}
