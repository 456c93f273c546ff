use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::http::header::HOST;
use metrics::{counter, gauge};
use reqwest::{Client, Url};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::{
    METRIC_LOG_DROPPED, METRIC_LOG_PENDING, ResolveError, origin_authority, resolve_origin,
};
use crate::{config::EdgeSettings, infra::error::InfraError};

const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// One request observed by the edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub user_agent: String,
    pub domain: String,
    pub path: String,
    pub ip: String,
    pub cache_hit: bool,
    pub response_ms: u64,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("invalid log endpoint: {0}")]
    Url(#[from] url::ParseError),
    #[error("log request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("origin answered log request with status {0}")]
    Status(u16),
}

impl DispatchError {
    fn is_retryable(&self) -> bool {
        match self {
            DispatchError::Resolve(_) => true,
            DispatchError::Url(_) => false,
            DispatchError::Request(err) => err.is_connect() || err.is_timeout(),
            DispatchError::Status(status) => *status >= 500,
        }
    }
}

/// Build the origin log endpoint URL carrying one event in its query string.
pub fn log_url(origin: SocketAddr, log_path: &str, event: &LogEvent) -> Result<Url, DispatchError> {
    let mut url = Url::parse(&format!("http://{origin}"))?;
    url.set_path(log_path);
    url.query_pairs_mut()
        .append_pair("ua", &event.user_agent)
        .append_pair("domain", &event.domain)
        .append_pair("path", &event.path)
        .append_pair("ip", &event.ip)
        .append_pair("hit", if event.cache_hit { "1" } else { "0" })
        .append_pair("ms", &event.response_ms.to_string());
    Ok(url)
}

/// Fire-and-forget delivery of visit events to the origin.
///
/// Each dispatch runs on its own task over a shared keep-alive client. The
/// number of undelivered events is bounded; once the bound is reached new
/// events are dropped and counted instead of queueing without limit.
#[derive(Clone)]
pub struct SpiderLogger {
    inner: Arc<LoggerInner>,
}

struct LoggerInner {
    client: Client,
    origin_host: String,
    origin_port: u16,
    log_path: String,
    retries: u32,
    pending: Arc<Semaphore>,
}

impl SpiderLogger {
    pub fn new(settings: &EdgeSettings) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(concat!("pagefarm-edge/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(settings.connect_timeout)
            .read_timeout(settings.read_timeout)
            .timeout(settings.send_timeout)
            .pool_idle_timeout(settings.pool_idle_timeout)
            .tcp_keepalive(settings.pool_idle_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .map_err(|err| InfraError::http_client(format!("failed to build log client: {err}")))?;

        Ok(Self {
            inner: Arc::new(LoggerInner {
                client,
                origin_host: settings.origin_host.clone(),
                origin_port: settings.origin_port,
                log_path: settings.log_path.clone(),
                retries: settings.log_retries,
                pending: Arc::new(Semaphore::new(settings.max_pending_logs.get() as usize)),
            }),
        })
    }

    /// Schedule delivery of `event` and return immediately. Returns `false`
    /// when the event was dropped because too many are already in flight.
    pub fn dispatch(&self, event: LogEvent) -> bool {
        let permit = match Arc::clone(&self.inner.pending).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                counter!(METRIC_LOG_DROPPED, "reason" => "backlog").increment(1);
                warn!(
                    target = "pagefarm::edge::logger",
                    domain = %event.domain,
                    path = %event.path,
                    "visit log backlog full, dropping event"
                );
                return false;
            }
        };

        gauge!(METRIC_LOG_PENDING).increment(1.0);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(err) = inner.deliver(&event).await {
                counter!(METRIC_LOG_DROPPED, "reason" => "delivery").increment(1);
                warn!(
                    target = "pagefarm::edge::logger",
                    domain = %event.domain,
                    path = %event.path,
                    error = %err,
                    "dropping visit log event"
                );
            }
            gauge!(METRIC_LOG_PENDING).decrement(1.0);
        });
        true
    }

    /// Deliver one event and wait for the outcome, retries included.
    pub async fn send(&self, event: &LogEvent) -> Result<(), DispatchError> {
        self.inner.deliver(event).await
    }
}

impl LoggerInner {
    async fn deliver(&self, event: &LogEvent) -> Result<(), DispatchError> {
        let mut attempt = 0;
        loop {
            match self.attempt(event).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < self.retries && err.is_retryable() => {
                    attempt += 1;
                    debug!(
                        target = "pagefarm::edge::logger",
                        attempt,
                        error = %err,
                        "retrying visit log delivery"
                    );
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn attempt(&self, event: &LogEvent) -> Result<(), DispatchError> {
        let origin = resolve_origin(&self.origin_host, self.origin_port).await?;
        let url = log_url(origin, &self.log_path, event)?;

        let response = self
            .client
            .get(url)
            .header(HOST, origin_authority(&self.origin_host, self.origin_port))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DispatchError::Status(status.as_u16()))
        }
    }
}
