//! Crawler detection and DNS identity verification.

mod detector;
pub mod signatures;
mod verify_cache;

pub use detector::{
    DetectionResult, DnsError, DnsResolver, METRIC_SPIDER_DETECTED, METRIC_SPIDER_VERIFIED,
    SpiderDetector,
};
pub use signatures::{SIGNATURES, Signature, match_user_agent};
pub use verify_cache::{Outcome, VerificationCache};
