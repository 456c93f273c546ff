use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.origin_port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        origin_port: Some(4321),
        log: LogOverrides {
            log_level: Some("debug".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.origin_addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn defaults_are_valid() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.origin_addr.port(), DEFAULT_ORIGIN_PORT);
    assert_eq!(settings.server.edge_addr.port(), DEFAULT_EDGE_PORT);
    assert_eq!(settings.cache.root, PathBuf::from("cache"));
    assert_eq!(settings.spider.verify_ttl, Duration::from_secs(3600));
    assert_eq!(settings.spider.failure_ttl, Duration::from_secs(60));
    assert_eq!(settings.spider.dns_timeout, Duration::from_millis(1500));
    assert_eq!(settings.edge.origin_host, "localhost");
    assert_eq!(settings.edge.log_path, "/_spider/log");
    assert_eq!(settings.edge.log_retries, 1);
    assert!(!settings.visits.record_humans);
}

#[test]
fn edge_origin_port_follows_origin_listener() {
    let mut raw = RawSettings::default();
    raw.server.origin_port = Some(3100);

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.edge.origin_port, 3100);
}

#[test]
fn edge_overrides_apply_to_edge_section() {
    let mut raw = RawSettings::default();
    let overrides = EdgeOverrides {
        edge_port: Some(9090),
        origin_host: Some("origin.internal".to_string()),
        origin_port: Some(3300),
        cache_root: Some(PathBuf::from("/srv/cache")),
        ..Default::default()
    };

    raw.apply_edge_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.edge_addr.port(), 9090);
    assert_eq!(settings.edge.origin_host, "origin.internal");
    assert_eq!(settings.edge.origin_port, 3300);
    assert_eq!(settings.cache.root, PathBuf::from("/srv/cache"));
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log: LogOverrides {
            log_json: Some(true),
            ..Default::default()
        },
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn zero_values_are_rejected() {
    let mut raw = RawSettings::default();
    raw.spider.dns_timeout_ms = Some(0);
    let err = Settings::from_raw(raw).expect_err("zero timeout");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "spider.dns_timeout_ms",
            ..
        }
    ));

    let mut raw = RawSettings::default();
    raw.spider.cache_capacity = Some(0);
    let err = Settings::from_raw(raw).expect_err("zero capacity");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "spider.cache_capacity",
            ..
        }
    ));
}

#[test]
fn failure_ttl_cannot_outlive_verify_ttl() {
    let mut raw = RawSettings::default();
    raw.spider.verify_ttl_seconds = Some(30);
    raw.spider.failure_ttl_seconds = Some(60);

    let err = Settings::from_raw(raw).expect_err("inverted ttls");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "spider.failure_ttl_seconds",
            ..
        }
    ));
}

#[test]
fn relative_log_path_is_rejected() {
    let mut raw = RawSettings::default();
    raw.edge.log_path = Some("_spider/log".to_string());

    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn invalid_log_level_is_rejected() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("loud".to_string());

    let err = Settings::from_raw(raw).expect_err("bad level");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "logging.level",
            ..
        }
    ));
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["pagefarm"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_cache_path_arguments() {
    let args = CliArgs::parse_from([
        "pagefarm",
        "cache-path",
        "--root",
        "/var/cache/pages",
        "--domain",
        "x.com",
        "/promo",
    ]);

    match args.command.expect("cache-path command") {
        Command::CachePath(args) => {
            assert_eq!(args.root, Some(PathBuf::from("/var/cache/pages")));
            assert_eq!(args.domain, "x.com");
            assert_eq!(args.path, "/promo");
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn parse_render_arguments() {
    let args = CliArgs::parse_from([
        "pagefarm",
        "render",
        "--domain",
        "x.com",
        "--templates-dir",
        "/srv/templates",
        "/promo",
        "/news/",
    ]);

    match args.command.expect("render command") {
        Command::Render(args) => {
            assert_eq!(args.domain, "x.com");
            assert_eq!(args.paths, vec!["/promo".to_string(), "/news/".to_string()]);
            assert_eq!(
                args.content.templates_dir,
                Some(PathBuf::from("/srv/templates"))
            );
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn parse_edge_arguments() {
    let args = CliArgs::parse_from([
        "pagefarm",
        "edge",
        "--edge-port",
        "8081",
        "--origin-host",
        "origin.internal",
        "--log-json",
        "true",
    ]);

    match args.command.expect("edge command") {
        Command::Edge(args) => {
            assert_eq!(args.overrides.edge_port, Some(8081));
            assert_eq!(
                args.overrides.origin_host.as_deref(),
                Some("origin.internal")
            );
            assert_eq!(args.overrides.log.log_json, Some(true));
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn trusted_proxies_default_to_none() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
    assert!(settings.edge.trusted_proxies.is_empty());
}

#[test]
fn trusted_proxies_are_parsed_and_validated() {
    let mut raw = RawSettings::default();
    raw.edge.trusted_proxies = Some(vec!["10.0.0.2".to_string(), " ::1 ".to_string()]);
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(
        settings.edge.trusted_proxies,
        vec![
            "10.0.0.2".parse::<IpAddr>().expect("ip"),
            "::1".parse::<IpAddr>().expect("ip"),
        ]
    );

    let mut raw = RawSettings::default();
    raw.edge.trusted_proxies = Some(vec!["lb.internal".to_string()]);
    let err = Settings::from_raw(raw).expect_err("hostnames are not addresses");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "edge.trusted_proxies",
            ..
        }
    ));
}
