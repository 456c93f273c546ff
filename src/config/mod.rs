//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::{IpAddr, SocketAddr},
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

mod cli;

pub use cli::{
    CachePathArgs, CliArgs, Command, ContentOverrides, ConvertArgs, EdgeArgs, EdgeOverrides,
    LogOverrides, RenderArgs, ServeArgs, ServeOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "pagefarm";
const ENV_PREFIX: &str = "PAGEFARM";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_ORIGIN_PORT: u16 = 3000;
const DEFAULT_EDGE_PORT: u16 = 8080;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_CACHE_ROOT: &str = "cache";
const DEFAULT_SITES_DIR: &str = "data/sites";
const DEFAULT_TEMPLATES_DIR: &str = "data/templates";
const DEFAULT_FRAGMENTS_DIR: &str = "data/fragments";
const DEFAULT_VISITS_LOG_PATH: &str = "logs/spider_visits.jsonl";
const DEFAULT_VERIFY_TTL_SECS: u64 = 3600;
const DEFAULT_FAILURE_TTL_SECS: u64 = 60;
const DEFAULT_VERIFY_CACHE_CAPACITY: u64 = 10_000;
const DEFAULT_DNS_TIMEOUT_MS: u64 = 1500;
const DEFAULT_ORIGIN_HOST: &str = "localhost";
const DEFAULT_LOG_PATH: &str = "/_spider/log";
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 500;
const DEFAULT_SEND_TIMEOUT_MS: u64 = 2000;
const DEFAULT_READ_TIMEOUT_MS: u64 = 1000;
const DEFAULT_POOL_IDLE_SECS: u64 = 90;
const DEFAULT_LOG_RETRIES: u32 = 1;
const DEFAULT_MAX_PENDING_LOGS: u64 = 1024;
const DEFAULT_FORWARD_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub content: ContentSettings,
    pub visits: VisitSettings,
    pub spider: SpiderSettings,
    pub edge: EdgeSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub origin_addr: SocketAddr,
    pub edge_addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ContentSettings {
    pub sites_dir: PathBuf,
    pub templates_dir: PathBuf,
    pub fragments_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct VisitSettings {
    pub log_path: PathBuf,
    pub record_humans: bool,
}

#[derive(Debug, Clone)]
pub struct SpiderSettings {
    pub verify_ttl: Duration,
    pub failure_ttl: Duration,
    pub cache_capacity: NonZeroUsize,
    pub dns_timeout: Duration,
}

/// Edge-to-origin connection settings.
#[derive(Debug, Clone)]
pub struct EdgeSettings {
    /// Resolved on every log dispatch, never cached at startup.
    pub origin_host: String,
    pub origin_port: u16,
    pub log_path: String,
    pub connect_timeout: Duration,
    /// Upper bound for one whole log request, including sending it.
    pub send_timeout: Duration,
    pub read_timeout: Duration,
    pub pool_idle_timeout: Duration,
    pub log_retries: u32,
    pub max_pending_logs: NonZeroU32,
    pub forward_timeout: Duration,
    /// Peers whose `X-Real-IP` / `X-Forwarded-For` the edge believes. Any
    /// other peer is identified by its socket address alone.
    pub trusted_proxies: Vec<IpAddr>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Edge(args)) => raw.apply_edge_overrides(&args.overrides),
        Some(Command::Render(args)) => raw.apply_content_overrides(&args.content),
        Some(Command::CachePath(args)) => {
            if let Some(root) = args.root.as_ref() {
                raw.cache.root = Some(root.clone());
            }
        }
        Some(Command::Convert(_)) => {}
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    content: RawContentSettings,
    visits: RawVisitSettings,
    spider: RawSpiderSettings,
    edge: RawEdgeSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.origin_port {
            self.server.origin_port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(path) = overrides.visits_log_path.as_ref() {
            self.visits.log_path = Some(path.clone());
        }
        if let Some(record) = overrides.visits_record_humans {
            self.visits.record_humans = Some(record);
        }

        self.apply_log_overrides(&overrides.log);
        self.apply_content_overrides(&overrides.content);
    }

    fn apply_edge_overrides(&mut self, overrides: &EdgeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.edge_port {
            self.server.edge_port = Some(port);
        }
        if let Some(root) = overrides.cache_root.as_ref() {
            self.cache.root = Some(root.clone());
        }
        if let Some(host) = overrides.origin_host.as_ref() {
            self.edge.origin_host = Some(host.clone());
        }
        if let Some(port) = overrides.origin_port {
            self.edge.origin_port = Some(port);
        }

        self.apply_log_overrides(&overrides.log);
    }

    fn apply_log_overrides(&mut self, overrides: &LogOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_content_overrides(&mut self, overrides: &ContentOverrides) {
        if let Some(root) = overrides.cache_root.as_ref() {
            self.cache.root = Some(root.clone());
        }
        if let Some(dir) = overrides.sites_dir.as_ref() {
            self.content.sites_dir = Some(dir.clone());
        }
        if let Some(dir) = overrides.templates_dir.as_ref() {
            self.content.templates_dir = Some(dir.clone());
        }
        if let Some(dir) = overrides.fragments_dir.as_ref() {
            self.content.fragments_dir = Some(dir.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
            content,
            visits,
            spider,
            edge,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache)?;
        let content = build_content_settings(content);
        let visits = build_visit_settings(visits)?;
        let spider = build_spider_settings(spider)?;
        let edge = build_edge_settings(edge, server.origin_addr.port())?;

        Ok(Self {
            server,
            logging,
            cache,
            content,
            visits,
            spider,
            edge,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let origin_port = server.origin_port.unwrap_or(DEFAULT_ORIGIN_PORT);
    if origin_port == 0 {
        return Err(LoadError::invalid(
            "server.origin_port",
            "port must be greater than zero",
        ));
    }

    let edge_port = server.edge_port.unwrap_or(DEFAULT_EDGE_PORT);
    if edge_port == 0 {
        return Err(LoadError::invalid(
            "server.edge_port",
            "port must be greater than zero",
        ));
    }

    let origin_addr = parse_socket_addr(&host, origin_port)
        .map_err(|reason| LoadError::invalid("server.origin_addr", reason))?;
    let edge_addr = parse_socket_addr(&host, edge_port)
        .map_err(|reason| LoadError::invalid("server.edge_addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        origin_addr,
        edge_addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let root = cache
        .root
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_ROOT));
    if root.as_os_str().is_empty() {
        return Err(LoadError::invalid("cache.root", "must not be empty"));
    }
    Ok(CacheSettings { root })
}

fn build_content_settings(content: RawContentSettings) -> ContentSettings {
    ContentSettings {
        sites_dir: content
            .sites_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SITES_DIR)),
        templates_dir: content
            .templates_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TEMPLATES_DIR)),
        fragments_dir: content
            .fragments_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_FRAGMENTS_DIR)),
    }
}

fn build_visit_settings(visits: RawVisitSettings) -> Result<VisitSettings, LoadError> {
    let log_path = visits
        .log_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_VISITS_LOG_PATH));
    if log_path.file_name().is_none() {
        return Err(LoadError::invalid(
            "visits.log_path",
            "must name a file, not a directory",
        ));
    }

    Ok(VisitSettings {
        log_path,
        record_humans: visits.record_humans.unwrap_or(false),
    })
}

fn build_spider_settings(spider: RawSpiderSettings) -> Result<SpiderSettings, LoadError> {
    let verify_ttl = positive_secs(
        spider.verify_ttl_seconds.unwrap_or(DEFAULT_VERIFY_TTL_SECS),
        "spider.verify_ttl_seconds",
    )?;
    let failure_ttl = positive_secs(
        spider
            .failure_ttl_seconds
            .unwrap_or(DEFAULT_FAILURE_TTL_SECS),
        "spider.failure_ttl_seconds",
    )?;
    if failure_ttl > verify_ttl {
        return Err(LoadError::invalid(
            "spider.failure_ttl_seconds",
            "must not exceed spider.verify_ttl_seconds",
        ));
    }

    let capacity = spider
        .cache_capacity
        .unwrap_or(DEFAULT_VERIFY_CACHE_CAPACITY);
    let cache_capacity = usize::try_from(capacity)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| LoadError::invalid("spider.cache_capacity", "must be greater than zero"))?;

    let dns_timeout = positive_millis(
        spider.dns_timeout_ms.unwrap_or(DEFAULT_DNS_TIMEOUT_MS),
        "spider.dns_timeout_ms",
    )?;

    Ok(SpiderSettings {
        verify_ttl,
        failure_ttl,
        cache_capacity,
        dns_timeout,
    })
}

fn build_edge_settings(edge: RawEdgeSettings, default_port: u16) -> Result<EdgeSettings, LoadError> {
    let origin_host = edge
        .origin_host
        .map(|host| host.trim().to_string())
        .unwrap_or_else(|| DEFAULT_ORIGIN_HOST.to_string());
    if origin_host.is_empty() {
        return Err(LoadError::invalid("edge.origin_host", "must not be empty"));
    }

    let origin_port = edge.origin_port.unwrap_or(default_port);
    if origin_port == 0 {
        return Err(LoadError::invalid(
            "edge.origin_port",
            "port must be greater than zero",
        ));
    }

    let log_path = edge
        .log_path
        .unwrap_or_else(|| DEFAULT_LOG_PATH.to_string());
    if !log_path.starts_with('/') {
        return Err(LoadError::invalid(
            "edge.log_path",
            "must be an absolute request path",
        ));
    }

    let max_pending_logs = non_zero_u32(
        edge.max_pending_logs.unwrap_or(DEFAULT_MAX_PENDING_LOGS),
        "edge.max_pending_logs",
    )?;

    let trusted_proxies = edge
        .trusted_proxies
        .unwrap_or_default()
        .iter()
        .map(|entry| {
            entry.trim().parse::<IpAddr>().map_err(|err| {
                LoadError::invalid("edge.trusted_proxies", format!("`{entry}`: {err}"))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(EdgeSettings {
        origin_host,
        origin_port,
        log_path,
        connect_timeout: positive_millis(
            edge.connect_timeout_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
            "edge.connect_timeout_ms",
        )?,
        send_timeout: positive_millis(
            edge.send_timeout_ms.unwrap_or(DEFAULT_SEND_TIMEOUT_MS),
            "edge.send_timeout_ms",
        )?,
        read_timeout: positive_millis(
            edge.read_timeout_ms.unwrap_or(DEFAULT_READ_TIMEOUT_MS),
            "edge.read_timeout_ms",
        )?,
        pool_idle_timeout: positive_secs(
            edge.pool_idle_seconds.unwrap_or(DEFAULT_POOL_IDLE_SECS),
            "edge.pool_idle_seconds",
        )?,
        log_retries: edge.log_retries.unwrap_or(DEFAULT_LOG_RETRIES),
        max_pending_logs,
        forward_timeout: positive_millis(
            edge.forward_timeout_ms.unwrap_or(DEFAULT_FORWARD_TIMEOUT_MS),
            "edge.forward_timeout_ms",
        )?,
        trusted_proxies,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    origin_port: Option<u16>,
    edge_port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    root: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawContentSettings {
    sites_dir: Option<PathBuf>,
    templates_dir: Option<PathBuf>,
    fragments_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawVisitSettings {
    log_path: Option<PathBuf>,
    record_humans: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSpiderSettings {
    verify_ttl_seconds: Option<u64>,
    failure_ttl_seconds: Option<u64>,
    cache_capacity: Option<u64>,
    dns_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawEdgeSettings {
    origin_host: Option<String>,
    origin_port: Option<u16>,
    log_path: Option<String>,
    connect_timeout_ms: Option<u64>,
    send_timeout_ms: Option<u64>,
    read_timeout_ms: Option<u64>,
    pool_idle_seconds: Option<u64>,
    log_retries: Option<u32>,
    max_pending_logs: Option<u64>,
    forward_timeout_ms: Option<u64>,
    trusted_proxies: Option<Vec<String>>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn positive_secs(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

fn positive_millis(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests;
