use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::{
    application::{
        render::{
            METRIC_CACHE_WRITE_FAILED, METRIC_RENDER_COALESCED, METRIC_RENDER_FAILED,
            METRIC_RENDER_MS, METRIC_RENDER_TOTAL,
        },
        visits::METRIC_VISITS_RECORDED,
    },
    config::{LogFormat, LoggingSettings},
    infra::edge::{
        METRIC_EDGE_HIT, METRIC_EDGE_MISS, METRIC_LOG_DROPPED, METRIC_LOG_PENDING,
        METRIC_ORIGIN_UNREACHABLE,
    },
    spider::{METRIC_SPIDER_DETECTED, METRIC_SPIDER_VERIFIED},
};

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
            METRIC_EDGE_HIT,
            Unit::Count,
            "Requests answered by the edge straight from the cache tree."
        );
        describe_counter!(
            METRIC_EDGE_MISS,
            Unit::Count,
            "Requests the edge forwarded to the origin."
        );
        describe_counter!(
            METRIC_ORIGIN_UNREACHABLE,
            Unit::Count,
            "Forwarded requests that failed to reach the origin."
        );
        describe_counter!(
            METRIC_RENDER_TOTAL,
            Unit::Count,
            "Pages served by the origin, labelled by outcome."
        );
        describe_counter!(
            METRIC_RENDER_FAILED,
            Unit::Count,
            "Renders that failed, labelled by site."
        );
        describe_counter!(
            METRIC_RENDER_COALESCED,
            Unit::Count,
            "Requests that waited on a render already in flight."
        );
        describe_histogram!(
            METRIC_RENDER_MS,
            Unit::Milliseconds,
            "Time spent rendering one page in milliseconds."
        );
        describe_counter!(
            METRIC_CACHE_WRITE_FAILED,
            Unit::Count,
            "Rendered pages that could not be persisted after retry."
        );
        describe_counter!(
            METRIC_SPIDER_DETECTED,
            Unit::Count,
            "Requests classified as crawlers, labelled by crawler name."
        );
        describe_counter!(
            METRIC_SPIDER_VERIFIED,
            Unit::Count,
            "Crawler claims confirmed by reverse and forward DNS."
        );
        describe_counter!(
            METRIC_LOG_DROPPED,
            Unit::Count,
            "Visit log events dropped after retries or queue overflow."
        );
        describe_gauge!(
            METRIC_LOG_PENDING,
            Unit::Count,
            "Visit log events currently being dispatched."
        );
        describe_counter!(
            METRIC_VISITS_RECORDED,
            Unit::Count,
            "Visit records appended to the visit log."
        );
    });
}
