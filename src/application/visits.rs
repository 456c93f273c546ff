//! Origin side of the edge's visit log: classify, then append one record.

use std::sync::Arc;

use metrics::counter;
use serde::Deserialize;
use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::debug;

use crate::{
    application::repos::{RepoError, VisitLogRepo},
    domain::entities::SpiderVisitRecord,
    spider::SpiderDetector,
};

pub const METRIC_VISITS_RECORDED: &str = "pagefarm_visits_recorded_total";

/// Query string sent by the edge logger. Every field is optional on the wire
/// so a malformed request can be rejected with a precise message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VisitQuery {
    pub ua: Option<String>,
    pub domain: Option<String>,
    pub path: Option<String>,
    pub ip: Option<String>,
    pub hit: Option<String>,
    pub ms: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitEvent {
    pub user_agent: String,
    pub domain: String,
    pub path: String,
    pub ip: String,
    pub cache_hit: bool,
    pub response_ms: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VisitError {
    #[error("missing query parameter `{0}`")]
    Missing(&'static str),
    #[error("invalid value for `{field}`: `{value}`")]
    Invalid { field: &'static str, value: String },
}

impl VisitQuery {
    pub fn into_event(self) -> Result<VisitEvent, VisitError> {
        let cache_hit = match self.hit.as_deref() {
            Some("1") => true,
            Some("0") => false,
            Some(other) => {
                return Err(VisitError::Invalid {
                    field: "hit",
                    value: other.to_string(),
                });
            }
            None => return Err(VisitError::Missing("hit")),
        };
        let ms = self.ms.ok_or(VisitError::Missing("ms"))?;
        let response_ms = ms.trim().parse::<u64>().map_err(|_| VisitError::Invalid {
            field: "ms",
            value: ms.clone(),
        })?;

        Ok(VisitEvent {
            // An empty user agent is still a visit.
            user_agent: self.ua.unwrap_or_default(),
            domain: required(self.domain, "domain")?,
            path: required(self.path, "path")?,
            ip: required(self.ip, "ip")?,
            cache_hit,
            response_ms,
        })
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, VisitError> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(VisitError::Missing(field)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitOutcome {
    Recorded,
    /// Human traffic while human recording is disabled.
    Skipped,
}

pub struct VisitRecorder {
    detector: Arc<SpiderDetector>,
    log: Arc<dyn VisitLogRepo>,
    record_humans: bool,
}

impl VisitRecorder {
    pub fn new(detector: Arc<SpiderDetector>, log: Arc<dyn VisitLogRepo>, record_humans: bool) -> Self {
        Self {
            detector,
            log,
            record_humans,
        }
    }

    pub async fn record(&self, event: VisitEvent) -> Result<VisitOutcome, RepoError> {
        let detection = self.detector.detect(&event.user_agent, &event.ip).await;
        if !detection.is_spider && !self.record_humans {
            debug!(
                target = "pagefarm::application::visits",
                domain = %event.domain,
                path = %event.path,
                "skipping human visit"
            );
            return Ok(VisitOutcome::Skipped);
        }

        let now = OffsetDateTime::now_utc();
        let record = SpiderVisitRecord {
            recorded_at: now
                .format(&Rfc3339)
                .unwrap_or_else(|_| now.unix_timestamp().to_string()),
            domain: event.domain,
            path: event.path,
            ip: event.ip,
            user_agent: event.user_agent,
            is_spider: detection.is_spider,
            spider_type: detection.spider_type,
            spider_name: detection.spider_name.map(str::to_string),
            dns_verified: detection.dns_verified,
            cache_hit: event.cache_hit,
            response_ms: event.response_ms,
        };

        self.log.append(&record).await?;
        counter!(
            METRIC_VISITS_RECORDED,
            "spider" => if record.is_spider { "true" } else { "false" }
        )
        .increment(1);
        Ok(VisitOutcome::Recorded)
    }
}

#[cfg(test)]
mod tests {
    use std::{net::IpAddr, sync::Mutex, time::Duration};

    use async_trait::async_trait;

    use super::*;
    use crate::spider::{DnsError, DnsResolver, VerificationCache};

    struct NoDns;

    #[async_trait]
    impl DnsResolver for NoDns {
        async fn reverse(&self, ip: IpAddr) -> Result<Vec<String>, DnsError> {
            Err(DnsError::NotFound(ip.to_string()))
        }

        async fn forward(&self, hostname: &str) -> Result<Vec<IpAddr>, DnsError> {
            Err(DnsError::NotFound(hostname.to_string()))
        }
    }

    #[derive(Default)]
    struct MemoryLog(Mutex<Vec<SpiderVisitRecord>>);

    #[async_trait]
    impl VisitLogRepo for MemoryLog {
        async fn append(&self, record: &SpiderVisitRecord) -> Result<(), RepoError> {
            self.0.lock().expect("lock").push(record.clone());
            Ok(())
        }
    }

    fn recorder(record_humans: bool) -> (VisitRecorder, Arc<MemoryLog>) {
        let detector = Arc::new(SpiderDetector::new(
            Arc::new(NoDns),
            VerificationCache::new(16, Duration::from_secs(60), Duration::from_secs(5)),
            Duration::from_millis(100),
        ));
        let log = Arc::new(MemoryLog::default());
        (VisitRecorder::new(detector, log.clone(), record_humans), log)
    }

    fn query(ua: &str) -> VisitQuery {
        VisitQuery {
            ua: Some(ua.to_string()),
            domain: Some("x.com".to_string()),
            path: Some("/promo".to_string()),
            ip: Some("66.249.66.1".to_string()),
            hit: Some("1".to_string()),
            ms: Some("12".to_string()),
        }
    }

    #[test]
    fn rejects_malformed_queries() {
        let mut bad_hit = query("x");
        bad_hit.hit = Some("yes".to_string());
        assert_eq!(
            bad_hit.into_event(),
            Err(VisitError::Invalid {
                field: "hit",
                value: "yes".to_string()
            })
        );

        let mut no_domain = query("x");
        no_domain.domain = None;
        assert_eq!(no_domain.into_event(), Err(VisitError::Missing("domain")));

        let mut bad_ms = query("x");
        bad_ms.ms = Some("-3".to_string());
        assert!(matches!(
            bad_ms.into_event(),
            Err(VisitError::Invalid { field: "ms", .. })
        ));
    }

    #[tokio::test]
    async fn spoofed_spider_is_recorded_unverified() {
        let (recorder, log) = recorder(false);
        let event = query("Mozilla/5.0 (compatible; Googlebot/2.1)")
            .into_event()
            .expect("event");

        assert_eq!(recorder.record(event).await.expect("record"), VisitOutcome::Recorded);

        let records = log.0.lock().expect("lock");
        assert_eq!(records.len(), 1);
        assert!(records[0].is_spider);
        assert!(!records[0].dns_verified);
        assert!(records[0].cache_hit);
        assert_eq!(records[0].spider_name.as_deref(), Some("Googlebot"));
    }

    #[tokio::test]
    async fn humans_are_recorded_only_when_enabled() {
        let (skipping, log) = recorder(false);
        let event = query("Mozilla/5.0 Firefox/128.0").into_event().expect("event");
        assert_eq!(skipping.record(event.clone()).await.expect("record"), VisitOutcome::Skipped);
        assert!(log.0.lock().expect("lock").is_empty());

        let (recording, log) = recorder(true);
        assert_eq!(recording.record(event).await.expect("record"), VisitOutcome::Recorded);
        assert_eq!(log.0.lock().expect("lock").len(), 1);
    }
}
