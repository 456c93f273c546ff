//! Edge-to-origin plumbing: forwarding cache misses and shipping visit
//! events back to the origin without holding up the response.

mod forward;
mod logger;

use std::net::SocketAddr;

use thiserror::Error;

pub use forward::{
    ForwardError, ForwardRequest, ForwardedResponse, OriginForwarder, X_FORWARDED_FOR, X_REAL_IP,
};
pub use logger::{DispatchError, LogEvent, SpiderLogger, log_url};

pub const METRIC_EDGE_HIT: &str = "pagefarm_edge_hit_total";
pub const METRIC_EDGE_MISS: &str = "pagefarm_edge_miss_total";
pub const METRIC_ORIGIN_UNREACHABLE: &str = "pagefarm_edge_origin_unreachable_total";
pub const METRIC_LOG_DROPPED: &str = "pagefarm_edge_log_dropped_total";
pub const METRIC_LOG_PENDING: &str = "pagefarm_edge_log_pending";

#[derive(Debug, Clone, Error)]
#[error("failed to resolve origin `{host}:{port}`: {message}")]
pub struct ResolveError {
    pub host: String,
    pub port: u16,
    pub message: String,
}

/// Resolve the origin address. Called per request so DNS changes to the
/// origin name are picked up without restarting the edge.
pub(crate) async fn resolve_origin(host: &str, port: u16) -> Result<SocketAddr, ResolveError> {
    let failure = |message: String| ResolveError {
        host: host.to_string(),
        port,
        message,
    };

    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|err| failure(err.to_string()))?;
    addrs
        .next()
        .ok_or_else(|| failure("no addresses returned".to_string()))
}

/// Value for the `Host` header sent to the origin.
pub(crate) fn origin_authority(host: &str, port: u16) -> String {
    if port == 80 {
        host.to_string()
    } else {
        format!("{host}:{port}")
    }
}
