//! Request classification: human, crawler, or unverified crawler claim.

use std::{
    net::IpAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::{
    signatures::{Signature, match_user_agent},
    verify_cache::{Outcome, VerificationCache},
};
use crate::domain::types::SpiderType;

pub const METRIC_SPIDER_DETECTED: &str = "pagefarm_spider_detected_total";
pub const METRIC_SPIDER_VERIFIED: &str = "pagefarm_spider_verified_total";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DnsError {
    #[error("no DNS records for `{0}`")]
    NotFound(String),
    #[error("DNS lookup failed: {0}")]
    Lookup(String),
}

/// Name resolution used for crawler identity confirmation.
#[async_trait]
pub trait DnsResolver: Send + Sync {
    /// PTR host names for `ip`.
    async fn reverse(&self, ip: IpAddr) -> Result<Vec<String>, DnsError>;

    /// A/AAAA addresses for `hostname`.
    async fn forward(&self, hostname: &str) -> Result<Vec<IpAddr>, DnsError>;
}

/// Classification of one request. Never persisted directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectionResult {
    pub is_spider: bool,
    pub spider_type: Option<SpiderType>,
    pub spider_name: Option<&'static str>,
    pub dns_verified: bool,
    pub ip: String,
    pub user_agent: String,
}

impl DetectionResult {
    fn human(ip: &str, user_agent: &str) -> Self {
        Self {
            is_spider: false,
            spider_type: None,
            spider_name: None,
            dns_verified: false,
            ip: ip.to_string(),
            user_agent: user_agent.to_string(),
        }
    }

    /// Compact form used in the `x-pagefarm-spider` response header.
    pub fn header_value(&self) -> String {
        match self.spider_name {
            None => "human".to_string(),
            Some(name) if self.dns_verified => format!("{name}; verified"),
            Some(name) => format!("{name}; unverified"),
        }
    }
}

pub struct SpiderDetector {
    resolver: Arc<dyn DnsResolver>,
    cache: VerificationCache,
    dns_timeout: Duration,
}

impl SpiderDetector {
    pub fn new(resolver: Arc<dyn DnsResolver>, cache: VerificationCache, dns_timeout: Duration) -> Self {
        Self {
            resolver,
            cache,
            dns_timeout,
        }
    }

    /// Classify a request by user agent and, for verifiable crawlers,
    /// confirm the claim with reverse-then-forward DNS.
    pub async fn detect(&self, user_agent: &str, ip: &str) -> DetectionResult {
        let Some(signature) = match_user_agent(user_agent) else {
            return DetectionResult::human(ip, user_agent);
        };

        let dns_verified = match ip.trim().parse::<IpAddr>() {
            Ok(addr) if signature.is_verifiable() => self.verify(signature, addr).await.is_verified(),
            _ => false,
        };

        counter!(
            METRIC_SPIDER_DETECTED,
            "spider" => signature.name,
            "verified" => if dns_verified { "true" } else { "false" }
        )
        .increment(1);

        DetectionResult {
            is_spider: true,
            spider_type: Some(signature.spider_type),
            spider_name: Some(signature.name),
            dns_verified,
            ip: ip.to_string(),
            user_agent: user_agent.to_string(),
        }
    }

    async fn verify(&self, signature: &'static Signature, ip: IpAddr) -> Outcome {
        if let Some(outcome) = self.cache.get(ip, signature.name, Instant::now()) {
            return outcome;
        }

        let outcome = match tokio::time::timeout(self.dns_timeout, self.confirm(signature, ip)).await {
            Ok(Ok(true)) => Outcome::Verified,
            Ok(Ok(false)) | Ok(Err(DnsError::NotFound(_))) => Outcome::Rejected,
            Ok(Err(DnsError::Lookup(reason))) => {
                debug!(
                    target = "pagefarm::spider::detector",
                    spider = signature.name,
                    %ip,
                    %reason,
                    "DNS verification failed"
                );
                Outcome::Transient
            }
            Err(_) => {
                debug!(
                    target = "pagefarm::spider::detector",
                    spider = signature.name,
                    %ip,
                    timeout_ms = self.dns_timeout.as_millis() as u64,
                    "DNS verification timed out"
                );
                Outcome::Transient
            }
        };

        if outcome.is_verified() {
            counter!(METRIC_SPIDER_VERIFIED, "spider" => signature.name).increment(1);
        }
        self.cache.insert(ip, signature.name, outcome, Instant::now());
        outcome
    }

    /// Reverse-resolve `ip`, keep host names inside the crawler's domains and
    /// accept if any of them forward-resolves back to `ip`.
    async fn confirm(&self, signature: &Signature, ip: IpAddr) -> Result<bool, DnsError> {
        let hostnames = self.resolver.reverse(ip).await?;

        for hostname in hostnames.iter().filter(|host| signature.owns_hostname(host)) {
            match self.resolver.forward(hostname).await {
                Ok(addresses) if addresses.contains(&ip) => return Ok(true),
                Ok(_) | Err(DnsError::NotFound(_)) => continue,
                Err(err) => return Err(err),
            }
        }

        Ok(false)
    }
}
