//! Known crawler user-agent signatures.
//!
//! Matching is a case-insensitive substring test, first match wins, so more
//! specific tokens (`Googlebot-Image`) precede the generic ones (`Googlebot`).
//! A signature with PTR suffixes can be confirmed by reverse-then-forward DNS;
//! one without stays unverified.

use crate::domain::types::SpiderType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    /// Lowercase substring searched for in the user agent.
    pub token: &'static str,
    /// Identity reported in detection results and visit records.
    pub name: &'static str,
    pub spider_type: SpiderType,
    /// Host name suffixes the crawler's PTR records resolve to.
    pub ptr_suffixes: &'static [&'static str],
}

impl Signature {
    pub fn is_verifiable(&self) -> bool {
        !self.ptr_suffixes.is_empty()
    }

    /// Whether `hostname` belongs to one of this crawler's PTR domains.
    pub fn owns_hostname(&self, hostname: &str) -> bool {
        let host = hostname.trim_end_matches('.').to_ascii_lowercase();
        self.ptr_suffixes.iter().any(|suffix| {
            host.strip_suffix(suffix)
                .is_some_and(|label| label.ends_with('.'))
        })
    }
}

const BAIDU: &[&str] = &["baidu.com", "baidu.jp"];
const GOOGLE: &[&str] = &["googlebot.com", "google.com", "googleusercontent.com"];
const BING: &[&str] = &["search.msn.com"];
const SOGOU: &[&str] = &["sogou.com"];
const YANDEX: &[&str] = &["yandex.ru", "yandex.net", "yandex.com"];
const APPLE: &[&str] = &["applebot.apple.com"];
const YAHOO: &[&str] = &["crawl.yahoo.net"];
const PETAL: &[&str] = &["petalsearch.com", "aspiegel.com"];
const UNVERIFIABLE: &[&str] = &[];

const fn signature(
    token: &'static str,
    name: &'static str,
    spider_type: SpiderType,
    ptr_suffixes: &'static [&'static str],
) -> Signature {
    Signature {
        token,
        name,
        spider_type,
        ptr_suffixes,
    }
}

pub const SIGNATURES: &[Signature] = &[
    signature("baiduspider", "Baiduspider", SpiderType::SearchEngine, BAIDU),
    signature("googlebot-image", "Googlebot-Image", SpiderType::SearchEngine, GOOGLE),
    signature("googlebot-news", "Googlebot-News", SpiderType::SearchEngine, GOOGLE),
    signature("googlebot-video", "Googlebot-Video", SpiderType::SearchEngine, GOOGLE),
    signature("googlebot", "Googlebot", SpiderType::SearchEngine, GOOGLE),
    signature("bingbot", "bingbot", SpiderType::SearchEngine, BING),
    signature("sogou", "Sogou", SpiderType::SearchEngine, SOGOU),
    signature("360spider", "360Spider", SpiderType::SearchEngine, UNVERIFIABLE),
    signature("yisouspider", "YisouSpider", SpiderType::SearchEngine, UNVERIFIABLE),
    signature("bytespider", "Bytespider", SpiderType::SearchEngine, UNVERIFIABLE),
    signature("yandexbot", "YandexBot", SpiderType::SearchEngine, YANDEX),
    signature("applebot", "Applebot", SpiderType::SearchEngine, APPLE),
    signature("slurp", "Slurp", SpiderType::SearchEngine, YAHOO),
    signature("petalbot", "PetalBot", SpiderType::SearchEngine, PETAL),
    signature("duckduckbot", "DuckDuckBot", SpiderType::SearchEngine, UNVERIFIABLE),
    signature("facebookexternalhit", "facebookexternalhit", SpiderType::SocialPreview, UNVERIFIABLE),
    signature("twitterbot", "Twitterbot", SpiderType::SocialPreview, UNVERIFIABLE),
    signature("linkedinbot", "LinkedInBot", SpiderType::SocialPreview, UNVERIFIABLE),
    signature("slackbot", "Slackbot", SpiderType::SocialPreview, UNVERIFIABLE),
    signature("telegrambot", "TelegramBot", SpiderType::SocialPreview, UNVERIFIABLE),
    signature("ahrefsbot", "AhrefsBot", SpiderType::SeoTool, UNVERIFIABLE),
    signature("semrushbot", "SemrushBot", SpiderType::SeoTool, UNVERIFIABLE),
    signature("mj12bot", "MJ12bot", SpiderType::SeoTool, UNVERIFIABLE),
    signature("dotbot", "DotBot", SpiderType::SeoTool, UNVERIFIABLE),
];

/// First signature whose token occurs in `user_agent`.
pub fn match_user_agent(user_agent: &str) -> Option<&'static Signature> {
    if user_agent.is_empty() {
        return None;
    }
    let lowered = user_agent.to_ascii_lowercase();
    SIGNATURES
        .iter()
        .find(|signature| lowered.contains(signature.token))
}
