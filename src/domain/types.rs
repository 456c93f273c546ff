//! Shared domain enumerations.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Crawler family a user-agent signature belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpiderType {
    SearchEngine,
    SocialPreview,
    SeoTool,
}

impl SpiderType {
    pub fn as_str(self) -> &'static str {
        match self {
            SpiderType::SearchEngine => "search_engine",
            SpiderType::SocialPreview => "social_preview",
            SpiderType::SeoTool => "seo_tool",
        }
    }
}

impl fmt::Display for SpiderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the origin produced the HTML it returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageSource {
    /// Read from the cache tree without rendering.
    Cached,
    /// Rendered for this request (or a coalesced concurrent one).
    Rendered,
    /// Render failed; the previously cached version was served.
    Stale,
    /// Render failed and nothing was cached; a degraded page was served.
    Fallback,
}

impl PageSource {
    pub fn as_str(self) -> &'static str {
        match self {
            PageSource::Cached => "cached",
            PageSource::Rendered => "rendered",
            PageSource::Stale => "stale",
            PageSource::Fallback => "fallback",
        }
    }
}
