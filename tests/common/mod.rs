#![allow(dead_code)]

use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use pagefarm::{
    application::{
        render::RenderPipeline,
        repos::{FragmentSource, SiteRepo, TemplateSource},
    },
    cache::CacheWriter,
    infra::files::{FileFragmentSource, FileSiteRepo, FileTemplateSource},
    spider::{DnsError, DnsResolver, SpiderDetector, VerificationCache},
    template::TemplateRegistry,
};
use tempfile::TempDir;

pub const ANALYTICS: &str = "<script>stat()</script>";

pub const GOOGLEBOT_UA: &str =
    "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)";
pub const BROWSER_UA: &str = "Mozilla/5.0 (X11; Linux x86_64) Gecko/20100101 Firefox/128.0";

pub const HOME_TEMPLATE: &str = "<html><head><title>{{ title }}</title></head><body>
{% loop 3 %}<a href=\"{{ random_url() }}\">{{ random_keyword() }}</a>
{% endloop %}<p>{{ content }}</p>
{{ analytics }}
</body></html>
";

/// A throwaway content tree: one site `x.com` using template `home` and
/// content group `travel`, plus an empty cache root.
pub struct Farm {
    dir: TempDir,
}

impl Farm {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let farm = Self { dir };

        std::fs::create_dir_all(farm.sites_dir()).expect("sites dir");
        std::fs::create_dir_all(farm.templates_dir()).expect("templates dir");
        std::fs::create_dir_all(farm.cache_root()).expect("cache dir");

        std::fs::write(
            farm.sites_dir().join("x.com.toml"),
            format!(
                r#"
domain = "x.com"
site_id = "site-x"
name = "X Travel"
template = "home"
content_group = "travel"
analytics = "{ANALYTICS}"
"#
            ),
        )
        .expect("write site");

        let group = farm.fragments_dir().join("travel");
        std::fs::create_dir_all(&group).expect("fragments dir");
        std::fs::write(group.join("keywords.txt"), "海岛自由行\n签证攻略\n").expect("keywords");
        std::fs::write(group.join("titles.txt"), "周末去哪儿\n").expect("titles");
        std::fs::write(group.join("contents.txt"), "一段正文。\n").expect("contents");
        std::fs::write(group.join("images.txt"), "/img/sea.jpg\n").expect("images");

        farm.write_template("home", HOME_TEMPLATE);
        farm
    }

    pub fn cache_root(&self) -> PathBuf {
        self.dir.path().join("cache")
    }

    pub fn sites_dir(&self) -> PathBuf {
        self.dir.path().join("sites")
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.dir.path().join("templates")
    }

    pub fn fragments_dir(&self) -> PathBuf {
        self.dir.path().join("fragments")
    }

    pub fn visit_log(&self) -> PathBuf {
        self.dir.path().join("logs").join("spider_visits.jsonl")
    }

    pub fn write_template(&self, name: &str, body: &str) {
        std::fs::write(self.templates_dir().join(format!("{name}.html")), body)
            .expect("write template");
    }

    pub fn fragment_source(&self) -> FileFragmentSource {
        FileFragmentSource::new(self.fragments_dir())
    }

    pub fn pipeline(&self) -> RenderPipeline {
        self.pipeline_with_fragments(Arc::new(self.fragment_source()))
    }

    pub fn pipeline_with_fragments(&self, fragments: Arc<dyn FragmentSource>) -> RenderPipeline {
        let sites: Arc<dyn SiteRepo> = Arc::new(FileSiteRepo::new(self.sites_dir()));
        let templates: Arc<dyn TemplateSource> =
            Arc::new(FileTemplateSource::new(self.templates_dir()));
        RenderPipeline::new(
            sites,
            fragments,
            Arc::new(TemplateRegistry::new(templates)),
            CacheWriter::new(self.cache_root()),
        )
    }
}

pub fn google_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(66, 249, 66, 1))
}

/// Resolver answering from fixed tables; unknown names are `NotFound`.
#[derive(Default)]
pub struct StubResolver {
    ptr: HashMap<IpAddr, Vec<String>>,
    a: HashMap<String, Vec<IpAddr>>,
}

impl StubResolver {
    /// Knows exactly one genuine Googlebot address.
    pub fn genuine_google() -> Self {
        let host = "crawl-66-249-66-1.googlebot.com".to_string();
        Self {
            ptr: HashMap::from([(google_ip(), vec![host.clone()])]),
            a: HashMap::from([(host, vec![google_ip()])]),
        }
    }
}

#[async_trait]
impl DnsResolver for StubResolver {
    async fn reverse(&self, ip: IpAddr) -> Result<Vec<String>, DnsError> {
        self.ptr
            .get(&ip)
            .cloned()
            .ok_or_else(|| DnsError::NotFound(ip.to_string()))
    }

    async fn forward(&self, hostname: &str) -> Result<Vec<IpAddr>, DnsError> {
        self.a
            .get(hostname)
            .cloned()
            .ok_or_else(|| DnsError::NotFound(hostname.to_string()))
    }
}

pub fn detector(resolver: StubResolver) -> Arc<SpiderDetector> {
    Arc::new(SpiderDetector::new(
        Arc::new(resolver),
        VerificationCache::new(64, Duration::from_secs(3600), Duration::from_secs(60)),
        Duration::from_millis(500),
    ))
}
