use std::{net::SocketAddr, process, sync::Arc, time::Duration};

use axum::Router;
use pagefarm::{
    application::{
        error::AppError,
        render::RenderPipeline,
        repos::{FragmentSource, SiteRepo, TemplateSource, VisitLogRepo},
        visits::VisitRecorder,
    },
    cache::{CacheWriter, cache_path, normalize_domain},
    config,
    infra::{
        dns::HickoryResolver,
        edge::{OriginForwarder, SpiderLogger},
        error::InfraError,
        files::{FileFragmentSource, FileSiteRepo, FileTemplateSource},
        http::{self, EdgeState, OriginState},
        telemetry,
        visit_log::JsonlVisitLog,
    },
    spider::{SpiderDetector, VerificationCache},
    template::{CompiledTemplate, TemplateConverter, TemplateRegistry},
};
use tokio::{net::TcpListener, sync::oneshot};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::from(InfraError::configuration(err.to_string())))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Edge(_) => run_edge(settings).await,
        config::Command::Convert(args) => run_convert(args).await,
        config::Command::CachePath(args) => run_cache_path(&settings, args),
        config::Command::Render(args) => run_render(settings, args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let pipeline = build_pipeline(&settings);

    let detector = Arc::new(SpiderDetector::new(
        Arc::new(HickoryResolver::from_system(settings.spider.dns_timeout)),
        VerificationCache::new(
            settings.spider.cache_capacity.get(),
            settings.spider.verify_ttl,
            settings.spider.failure_ttl,
        ),
        settings.spider.dns_timeout,
    ));

    let visit_log: Arc<dyn VisitLogRepo> = Arc::new(JsonlVisitLog::new(&settings.visits.log_path));
    let visits = Arc::new(VisitRecorder::new(
        Arc::clone(&detector),
        visit_log,
        settings.visits.record_humans,
    ));

    let router = http::build_origin_router(OriginState {
        pipeline,
        detector,
        visits,
    });

    info!(
        target = "pagefarm::serve",
        addr = %settings.server.origin_addr,
        cache_root = %settings.cache.root.display(),
        "origin listening"
    );
    serve_until_shutdown(
        settings.server.origin_addr,
        router,
        settings.server.graceful_shutdown,
    )
    .await
}

async fn run_edge(settings: config::Settings) -> Result<(), AppError> {
    let state = EdgeState {
        cache: CacheWriter::new(&settings.cache.root),
        forwarder: Arc::new(OriginForwarder::new(&settings.edge)?),
        logger: SpiderLogger::new(&settings.edge)?,
        trusted_proxies: settings.edge.trusted_proxies.clone().into(),
    };
    let router = http::build_edge_router(state);

    info!(
        target = "pagefarm::edge",
        addr = %settings.server.edge_addr,
        origin = %format!("{}:{}", settings.edge.origin_host, settings.edge.origin_port),
        cache_root = %settings.cache.root.display(),
        "edge listening"
    );
    serve_until_shutdown(
        settings.server.edge_addr,
        router,
        settings.server.graceful_shutdown,
    )
    .await
}

async fn run_convert(args: config::ConvertArgs) -> Result<(), AppError> {
    let source = tokio::fs::read_to_string(&args.file)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    let native = TemplateConverter::new()
        .convert(&source)
        .map_err(|err| AppError::validation(format!("{}: {err}", args.file.display())))?;

    if args.check {
        let name = args
            .file
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "template".to_string());
        let compiled = CompiledTemplate::from_native(&name, "check", native)
            .map_err(|err| AppError::validation(format!("{}: {err}", args.file.display())))?;

        let functions: Vec<&str> = compiled.functions().iter().map(String::as_str).collect();
        println!(
            "{}: ok ({} functions: {})",
            args.file.display(),
            functions.len(),
            functions.join(", ")
        );
        return Ok(());
    }

    print!("{native}");
    Ok(())
}

fn run_cache_path(
    settings: &config::Settings,
    args: config::CachePathArgs,
) -> Result<(), AppError> {
    let domain = normalize_domain(&args.domain)
        .ok_or_else(|| AppError::validation(format!("invalid domain `{}`", args.domain)))?;
    let path = cache_path(&settings.cache.root, &domain, &args.path);
    println!("{}", path.display());
    Ok(())
}

async fn run_render(settings: config::Settings, args: config::RenderArgs) -> Result<(), AppError> {
    let domain = normalize_domain(&args.domain)
        .ok_or_else(|| AppError::validation(format!("invalid domain `{}`", args.domain)))?;
    let pipeline = build_pipeline(&settings);

    let mut failures = 0usize;
    for raw_path in &args.paths {
        match pipeline.refresh(&domain, raw_path).await {
            Ok(page) => println!(
                "{} {} {}",
                page.source.as_str(),
                raw_path,
                page.cache_path.display()
            ),
            Err(err) => {
                failures += 1;
                warn!(
                    target = "pagefarm::render",
                    domain = %domain,
                    path = %raw_path,
                    error = %err,
                    "render failed"
                );
            }
        }
    }

    if failures > 0 {
        return Err(AppError::unexpected(format!(
            "{failures} of {} pages failed to render",
            args.paths.len()
        )));
    }
    Ok(())
}

fn build_pipeline(settings: &config::Settings) -> RenderPipeline {
    let sites: Arc<dyn SiteRepo> = Arc::new(FileSiteRepo::new(&settings.content.sites_dir));
    let fragments: Arc<dyn FragmentSource> =
        Arc::new(FileFragmentSource::new(&settings.content.fragments_dir));
    let templates: Arc<dyn TemplateSource> =
        Arc::new(FileTemplateSource::new(&settings.content.templates_dir));

    RenderPipeline::new(
        sites,
        fragments,
        Arc::new(TemplateRegistry::new(templates)),
        CacheWriter::new(&settings.cache.root),
    )
}

/// Serve `router` until Ctrl-C, then give in-flight requests `grace` to finish.
async fn serve_until_shutdown(
    addr: SocketAddr,
    router: Router,
    grace: Duration,
) -> Result<(), AppError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown_rx.await;
    });
    let mut server = tokio::spawn(async move { server.await });

    tokio::select! {
        joined = &mut server => return server_result(joined),
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                warn!(target = "pagefarm::shutdown", error = %err, "failed to listen for shutdown signal");
            }
        }
    }

    info!(
        target = "pagefarm::shutdown",
        grace_seconds = grace.as_secs(),
        "shutdown requested, draining connections"
    );
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(grace, server).await {
        Ok(joined) => server_result(joined),
        Err(_) => {
            warn!(
                target = "pagefarm::shutdown",
                "graceful shutdown timed out, exiting"
            );
            Ok(())
        }
    }
}

fn server_result(
    joined: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<(), AppError> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(AppError::unexpected(format!("server error: {err}"))),
        Err(err) => Err(AppError::unexpected(format!("server task failed: {err}"))),
    }
}
