//! Domain entities supplied by the content collaborators.

use serde::{Deserialize, Serialize};

use crate::domain::types::SpiderType;

/// Per-site configuration as stored by the management side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteRecord {
    pub domain: String,
    pub site_id: String,
    pub name: String,
    /// Template name resolved through the template source.
    pub template: String,
    /// Identifier of the fragment pool feeding this site.
    pub content_group: String,
    #[serde(default)]
    pub analytics: String,
    #[serde(default)]
    pub push_script: String,
}

/// Randomised content pools for one content group. Any pool may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentFragments {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub titles: Vec<String>,
    #[serde(default)]
    pub contents: Vec<String>,
}

/// Raw authoring-dialect template text with a version token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateText {
    pub name: String,
    /// Changes whenever the text changes; compiled output is keyed on it.
    pub version: String,
    pub body: String,
}

/// Append-only record of one visit reported by the edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpiderVisitRecord {
    /// RFC 3339 timestamp of when the origin recorded the visit.
    pub recorded_at: String,
    pub domain: String,
    pub path: String,
    pub ip: String,
    pub user_agent: String,
    pub is_spider: bool,
    pub spider_type: Option<SpiderType>,
    pub spider_name: Option<String>,
    pub dns_verified: bool,
    pub cache_hit: bool,
    pub response_ms: u64,
}
