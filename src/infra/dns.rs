//! `DnsResolver` backed by hickory's tokio resolver.

use std::{net::IpAddr, time::Duration};

use async_trait::async_trait;
use hickory_resolver::{
    TokioAsyncResolver,
    config::{ResolverConfig, ResolverOpts},
    error::{ResolveError, ResolveErrorKind},
    system_conf::read_system_conf,
};
use tracing::warn;

use crate::spider::{DnsError, DnsResolver};

pub struct HickoryResolver {
    inner: TokioAsyncResolver,
}

impl HickoryResolver {
    /// Resolver using the host's `/etc/resolv.conf`, falling back to the
    /// library defaults when it cannot be read.
    pub fn from_system(timeout: Duration) -> Self {
        let (config, mut opts) = match read_system_conf() {
            Ok(conf) => conf,
            Err(err) => {
                warn!(
                    target = "pagefarm::infra::dns",
                    error = %err,
                    "system resolver configuration unavailable, using defaults"
                );
                (ResolverConfig::default(), ResolverOpts::default())
            }
        };
        opts.timeout = timeout;
        opts.attempts = 1;

        Self {
            inner: TokioAsyncResolver::tokio(config, opts),
        }
    }
}

#[async_trait]
impl DnsResolver for HickoryResolver {
    async fn reverse(&self, ip: IpAddr) -> Result<Vec<String>, DnsError> {
        let lookup = self
            .inner
            .reverse_lookup(ip)
            .await
            .map_err(|err| map_error(ip.to_string(), err))?;
        Ok(lookup.iter().map(|name| name.to_string()).collect())
    }

    async fn forward(&self, hostname: &str) -> Result<Vec<IpAddr>, DnsError> {
        let lookup = self
            .inner
            .lookup_ip(hostname)
            .await
            .map_err(|err| map_error(hostname.to_string(), err))?;
        Ok(lookup.iter().collect())
    }
}

fn map_error(query: String, err: ResolveError) -> DnsError {
    match err.kind() {
        ResolveErrorKind::NoRecordsFound { .. } => DnsError::NotFound(query),
        _ => DnsError::Lookup(format!("{query}: {err}")),
    }
}
