//! Cache-or-render orchestration for one `(domain, path)` request.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use metrics::{counter, histogram};
use time::OffsetDateTime;
use tracing::{error, info, warn};

use super::types::{RenderContext, RenderError, ServedPage, TemplateIdentity};
use crate::{
    application::repos::{FragmentSource, SiteRepo},
    cache::{CacheWriter, InFlightRenders, RenderRole},
    domain::{entities::SiteRecord, types::PageSource},
    template::{FunctionTable, RegistryError, TemplateRegistry},
};

pub const METRIC_RENDER_TOTAL: &str = "pagefarm_render_total";
pub const METRIC_RENDER_FAILED: &str = "pagefarm_render_failed_total";
pub const METRIC_RENDER_COALESCED: &str = "pagefarm_render_coalesced_total";
pub const METRIC_RENDER_MS: &str = "pagefarm_render_ms";
pub const METRIC_CACHE_WRITE_FAILED: &str = "pagefarm_cache_write_failed_total";

/// Result shared between the leader of a render and its followers.
#[derive(Debug, Clone)]
struct RenderedBody {
    body: Bytes,
    source: PageSource,
    template: Option<TemplateIdentity>,
    cached: bool,
}

#[derive(Clone)]
pub struct RenderPipeline {
    sites: Arc<dyn SiteRepo>,
    fragments: Arc<dyn FragmentSource>,
    templates: Arc<TemplateRegistry>,
    writer: CacheWriter,
    inflight: Arc<InFlightRenders<RenderedBody, RenderError>>,
}

impl RenderPipeline {
    pub fn new(
        sites: Arc<dyn SiteRepo>,
        fragments: Arc<dyn FragmentSource>,
        templates: Arc<TemplateRegistry>,
        writer: CacheWriter,
    ) -> Self {
        Self {
            sites,
            fragments,
            templates,
            writer,
            inflight: Arc::new(InFlightRenders::new()),
        }
    }

    pub fn writer(&self) -> &CacheWriter {
        &self.writer
    }

    /// Serve the page for `(domain, raw_path)`: from the cache when present,
    /// otherwise by rendering it once no matter how many callers ask.
    ///
    /// A failed render falls back to whatever is cached at that moment; if
    /// nothing is, the error is returned for the caller to degrade.
    pub async fn serve(&self, domain: &str, raw_path: &str) -> Result<ServedPage, RenderError> {
        let site = self.site(domain).await?;
        let path = self.writer.path_for(&site.domain, raw_path);

        if let Some(body) = self.read_cached(&site, &path).await {
            counter!(METRIC_RENDER_TOTAL, "outcome" => PageSource::Cached.as_str()).increment(1);
            return Ok(served(&site, path, body, PageSource::Cached, None, true));
        }

        self.render_coalesced(site, raw_path, path, false).await
    }

    /// Re-render `(domain, raw_path)` even when a cached copy exists, keeping
    /// the existing copy if the new render fails.
    pub async fn refresh(&self, domain: &str, raw_path: &str) -> Result<ServedPage, RenderError> {
        let site = self.site(domain).await?;
        let path = self.writer.path_for(&site.domain, raw_path);
        self.render_coalesced(site, raw_path, path, true).await
    }

    async fn site(&self, domain: &str) -> Result<SiteRecord, RenderError> {
        self.sites
            .find_by_domain(domain)
            .await
            .map_err(|err| RenderError::SiteLookup {
                domain: domain.to_string(),
                message: err.to_string(),
            })?
            .ok_or_else(|| RenderError::UnknownSite {
                domain: domain.to_string(),
            })
    }

    async fn read_cached(&self, site: &SiteRecord, path: &Path) -> Option<Bytes> {
        match self.writer.read(path).await {
            Ok(body) => body,
            Err(err) => {
                warn!(
                    target = "pagefarm::application::render",
                    site_id = %site.site_id,
                    path = %path.display(),
                    error = %err,
                    "cache read failed, treating as miss"
                );
                None
            }
        }
    }

    async fn render_coalesced(
        &self,
        site: SiteRecord,
        raw_path: &str,
        path: PathBuf,
        force: bool,
    ) -> Result<ServedPage, RenderError> {
        let key = path.to_string_lossy().into_owned();
        let job = RenderJob {
            site: site.clone(),
            raw_path: raw_path.to_string(),
            path: path.clone(),
            force,
            fragments: Arc::clone(&self.fragments),
            templates: Arc::clone(&self.templates),
            writer: self.writer.clone(),
        };

        let site_id = site.site_id.clone();
        let (result, role) = self
            .inflight
            .run(&key, move || job.execute(), move || RenderError::Aborted {
                site_id,
                message: "render task ended without a result".to_string(),
            })
            .await;
        if role == RenderRole::Follower {
            counter!(METRIC_RENDER_COALESCED).increment(1);
        }

        match result {
            Ok(rendered) => Ok(served(
                &site,
                path,
                rendered.body,
                rendered.source,
                rendered.template,
                rendered.cached,
            )),
            Err(err) => {
                match self.read_cached(&site, &path).await {
                    Some(body) => {
                        warn!(
                            target = "pagefarm::application::render",
                            site_id = %site.site_id,
                            domain = %site.domain,
                            template = %site.template,
                            path = raw_path,
                            error = %err,
                            "render failed, serving previous cached version"
                        );
                        Ok(served(&site, path, body, PageSource::Stale, None, true))
                    }
                    None => Err(err),
                }
            }
        }
    }
}

fn served(
    site: &SiteRecord,
    cache_path: PathBuf,
    body: Bytes,
    source: PageSource,
    template: Option<TemplateIdentity>,
    cached: bool,
) -> ServedPage {
    ServedPage {
        body,
        source,
        site_id: site.site_id.clone(),
        cache_path,
        template,
        cached,
    }
}

/// Owned inputs of one leader render, movable into the shared future.
struct RenderJob {
    site: SiteRecord,
    raw_path: String,
    path: PathBuf,
    force: bool,
    fragments: Arc<dyn FragmentSource>,
    templates: Arc<TemplateRegistry>,
    writer: CacheWriter,
}

impl RenderJob {
    async fn execute(self) -> Result<RenderedBody, RenderError> {
        // A render that finished between the caller's cache check and
        // becoming leader has already persisted the page.
        if !self.force
            && let Ok(Some(body)) = self.writer.read(&self.path).await
        {
            return Ok(RenderedBody {
                body,
                source: PageSource::Cached,
                template: None,
                cached: true,
            });
        }

        let started = Instant::now();
        let result = self.render().await;
        let elapsed = started.elapsed();

        match result {
            Ok((body, template)) => {
                let cached = self.persist(body.clone(), &template).await;
                record_success(&self.site, &template, elapsed);
                Ok(RenderedBody {
                    body,
                    source: PageSource::Rendered,
                    template: Some(template),
                    cached,
                })
            }
            Err(err) => {
                counter!(METRIC_RENDER_FAILED, "site_id" => self.site.site_id.clone()).increment(1);
                error!(
                    target = "pagefarm::application::render",
                    site_id = %self.site.site_id,
                    domain = %self.site.domain,
                    template = %self.site.template,
                    path = %self.raw_path,
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %err,
                    "render failed"
                );
                Err(err)
            }
        }
    }

    async fn render(&self) -> Result<(Bytes, TemplateIdentity), RenderError> {
        let site = &self.site;

        let fragments = self
            .fragments
            .fetch(&site.content_group)
            .await
            .map_err(|err| RenderError::Fragments {
                site_id: site.site_id.clone(),
                group: site.content_group.clone(),
                message: err.to_string(),
            })?;
        let fragments = Arc::new(fragments);

        let template = self
            .templates
            .get(&site.template)
            .await
            .map_err(|err| match err {
                RegistryError::Template(source) => RenderError::Template {
                    site_id: site.site_id.clone(),
                    source,
                },
                RegistryError::Source { .. } => RenderError::TemplateSource {
                    site_id: site.site_id.clone(),
                    template: site.template.clone(),
                    message: err.to_string(),
                },
            })?;

        let identity = TemplateIdentity {
            name: template.name().to_string(),
            version: template.version().to_string(),
        };
        let context = RenderContext::new(
            site,
            &self.raw_path,
            Arc::clone(&fragments),
            OffsetDateTime::now_utc(),
            FunctionTable::with_entropy(fragments),
        )
        .into_value();

        let html = tokio::task::spawn_blocking(move || template.render(context))
            .await
            .map_err(|err| RenderError::Aborted {
                site_id: site.site_id.clone(),
                message: err.to_string(),
            })?
            .map_err(|source| RenderError::Template {
                site_id: site.site_id.clone(),
                source,
            })?;

        Ok((Bytes::from(html), identity))
    }

    /// Write the page into the cache. A failed write is logged and the page
    /// is still served.
    async fn persist(&self, body: Bytes, template: &TemplateIdentity) -> bool {
        match self.writer.store(self.path.clone(), body).await {
            Ok(()) => true,
            Err(err) => {
                counter!(METRIC_CACHE_WRITE_FAILED).increment(1);
                error!(
                    target = "pagefarm::application::render",
                    site_id = %self.site.site_id,
                    template = %template.name,
                    version = %template.version,
                    path = %self.path.display(),
                    error = %err,
                    "cache write failed after retry, serving uncached"
                );
                false
            }
        }
    }
}

fn record_success(site: &SiteRecord, template: &TemplateIdentity, elapsed: Duration) {
    counter!(METRIC_RENDER_TOTAL, "outcome" => PageSource::Rendered.as_str()).increment(1);
    histogram!(METRIC_RENDER_MS).record(elapsed.as_secs_f64() * 1000.0);
    info!(
        target = "pagefarm::application::render",
        site_id = %site.site_id,
        domain = %site.domain,
        template = %template.name,
        version = %template.version,
        elapsed_ms = elapsed.as_millis() as u64,
        "rendered page"
    );
}
