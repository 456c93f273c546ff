use std::{path::PathBuf, time::Duration};

use clap::Parser;
use pagefarm::config::{self, CliArgs};
use serial_test::serial;
use tracing::level_filters::LevelFilter;

const ORIGIN_HOST_VAR: &str = "PAGEFARM__EDGE__ORIGIN_HOST";

fn write_config(dir: &tempfile::TempDir) -> PathBuf {
    let path = dir.path().join("layers.toml");
    std::fs::write(
        &path,
        r#"
[logging]
level = "warn"

[cache]
root = "/srv/pagefarm/from-file"

[spider]
verify_ttl_seconds = 120

[edge]
origin_host = "origin.from-file"
"#,
    )
    .expect("write config");
    path
}

#[test]
#[serial]
fn file_env_and_cli_layers_apply_in_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_config(&dir);

    // SAFETY: every test touching the process environment runs under #[serial].
    unsafe { std::env::set_var(ORIGIN_HOST_VAR, "origin.from-env") };
    let cli = CliArgs::try_parse_from([
        "pagefarm",
        "--config-file",
        path.to_str().expect("utf-8 path"),
        "edge",
        "--cache-root",
        "/srv/pagefarm/from-cli",
    ])
    .expect("parse cli");
    let loaded = config::load(&cli);
    unsafe { std::env::remove_var(ORIGIN_HOST_VAR) };

    let settings = loaded.expect("settings load");
    assert_eq!(settings.logging.level, LevelFilter::WARN);
    assert_eq!(settings.spider.verify_ttl, Duration::from_secs(120));
    assert_eq!(settings.edge.origin_host, "origin.from-env");
    assert_eq!(
        settings.cache.root,
        PathBuf::from("/srv/pagefarm/from-cli")
    );
}

#[test]
#[serial]
fn missing_config_file_is_an_error() {
    let cli = CliArgs::try_parse_from([
        "pagefarm",
        "--config-file",
        "/definitely/not/here/pagefarm.toml",
    ])
    .expect("parse cli");

    assert!(config::load(&cli).is_err());
}
