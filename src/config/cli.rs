use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the pagefarm binary.
#[derive(Debug, Parser)]
#[command(
    name = "pagefarm",
    version,
    about = "Template-driven page renderer with a sharded file cache"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "PAGEFARM_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the origin renderer.
    Serve(Box<ServeArgs>),
    /// Run the edge cache reader in front of the origin.
    Edge(Box<EdgeArgs>),
    /// Convert an authoring-dialect template and print the native form.
    Convert(ConvertArgs),
    /// Print the cache file location for a request path.
    #[command(name = "cache-path")]
    CachePath(CachePathArgs),
    /// Re-render pages into the cache, keeping old copies on failure.
    Render(RenderArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct LogOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ContentOverrides {
    /// Override the cache root directory.
    #[arg(long = "cache-root", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub cache_root: Option<PathBuf>,

    /// Override the directory holding `<domain>.toml` site files.
    #[arg(long = "sites-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub sites_dir: Option<PathBuf>,

    /// Override the directory holding page templates.
    #[arg(long = "templates-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub templates_dir: Option<PathBuf>,

    /// Override the directory holding fragment pools.
    #[arg(long = "fragments-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub fragments_dir: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub log: LogOverrides,

    #[command(flatten)]
    pub content: ContentOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the origin listener port.
    #[arg(long = "origin-port", value_name = "PORT")]
    pub origin_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the visit log file.
    #[arg(long = "visits-log-path", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub visits_log_path: Option<PathBuf>,

    /// Record human visits as well as crawler visits.
    #[arg(
        long = "visits-record-humans",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub visits_record_humans: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct EdgeArgs {
    #[command(flatten)]
    pub overrides: EdgeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct EdgeOverrides {
    #[command(flatten)]
    pub log: LogOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the edge listener port.
    #[arg(long = "edge-port", value_name = "PORT")]
    pub edge_port: Option<u16>,

    /// Override the cache root directory.
    #[arg(long = "cache-root", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub cache_root: Option<PathBuf>,

    /// Override the origin host name, resolved on every log dispatch.
    #[arg(long = "origin-host", value_name = "HOST")]
    pub origin_host: Option<String>,

    /// Override the origin port.
    #[arg(long = "origin-port", value_name = "PORT")]
    pub origin_port: Option<u16>,
}

#[derive(Debug, Args, Clone)]
pub struct ConvertArgs {
    /// Authoring-dialect template to convert.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    /// Also compile the converted template and report errors without printing it.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub check: bool,
}

#[derive(Debug, Args, Clone)]
pub struct CachePathArgs {
    /// Cache root; defaults to the configured `cache.root`.
    #[arg(long, value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub root: Option<PathBuf>,

    /// Site domain the path belongs to.
    #[arg(long, value_name = "DOMAIN")]
    pub domain: String,

    /// Request path exactly as received, e.g. `/promo`.
    #[arg(value_name = "PATH", allow_hyphen_values = true)]
    pub path: String,
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    #[command(flatten)]
    pub content: ContentOverrides,

    /// Site domain to render for.
    #[arg(long, value_name = "DOMAIN")]
    pub domain: String,

    /// Request paths to render.
    #[arg(value_name = "PATH", required = true, num_args = 1..)]
    pub paths: Vec<String>,
}
