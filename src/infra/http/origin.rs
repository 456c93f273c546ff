use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State},
    http::{Extensions, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use tracing::{debug, info};

use super::{
    client_ip, header_str,
    middleware::{log_responses, set_request_context},
    reject_non_read, repo_error_to_http,
};
use crate::{
    application::{
        error::HttpError,
        render::{RenderError, RenderPipeline, ServedPage},
        visits::{VisitQuery, VisitRecorder},
    },
    cache::normalize_domain,
    domain::types::PageSource,
    presentation::views::{
        render_bad_host_response, render_degraded_response, render_unknown_site_response,
    },
    spider::{DetectionResult, SpiderDetector},
};

/// Crawler classification of the request, e.g. `Googlebot; verified`.
pub const SPIDER_HEADER: HeaderName = HeaderName::from_static("x-pagefarm-spider");
/// How the page body was obtained, as named by [`PageSource::as_str`].
pub const PAGE_SOURCE_HEADER: HeaderName = HeaderName::from_static("x-pagefarm-source");

#[derive(Clone)]
pub struct OriginState {
    pub pipeline: RenderPipeline,
    pub detector: Arc<SpiderDetector>,
    pub visits: Arc<VisitRecorder>,
}

pub fn build_origin_router(state: OriginState) -> Router {
    Router::new()
        .route("/_health", get(health))
        .route("/_spider/log", get(spider_log))
        .fallback(serve_page)
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn spider_log(State(state): State<OriginState>, Query(query): Query<VisitQuery>) -> Response {
    const SOURCE: &str = "infra::http::origin::spider_log";

    let event = match query.into_event() {
        Ok(event) => event,
        Err(err) => {
            return HttpError::new(
                SOURCE,
                StatusCode::BAD_REQUEST,
                "Invalid visit log query",
                err.to_string(),
            )
            .into_response();
        }
    };

    match state.visits.record(event).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => repo_error_to_http(SOURCE, err).into_response(),
    }
}

async fn serve_page(
    State(state): State<OriginState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    extensions: Extensions,
) -> Response {
    const SOURCE: &str = "infra::http::origin::serve_page";

    if let Some(response) = reject_non_read(SOURCE, &method) {
        return response;
    }

    let host = header_str(&headers, header::HOST);
    let Some(domain) = normalize_domain(host) else {
        return render_bad_host_response(host);
    };

    let ip = client_ip(&headers, &extensions);
    let user_agent = header_str(&headers, header::USER_AGENT);
    let detection = state.detector.detect(user_agent, &ip).await;
    log_detection(&domain, uri.path(), &detection);

    let mut response = match state.pipeline.serve(&domain, uri.path()).await {
        Ok(page) => page_response(page),
        Err(RenderError::UnknownSite { .. }) => render_unknown_site_response(&domain),
        Err(err) => {
            let mut response = render_degraded_response(&domain, err.to_string());
            response.headers_mut().insert(
                PAGE_SOURCE_HEADER,
                HeaderValue::from_static(PageSource::Fallback.as_str()),
            );
            response
        }
    };

    if let Ok(value) = HeaderValue::from_str(&detection.header_value()) {
        response.headers_mut().insert(SPIDER_HEADER, value);
    }
    response
}

fn log_detection(domain: &str, path: &str, detection: &DetectionResult) {
    if detection.is_spider {
        info!(
            target = "pagefarm::http::origin",
            domain,
            path,
            ip = %detection.ip,
            spider = detection.spider_name.unwrap_or(""),
            spider_type = detection.spider_type.map(|kind| kind.as_str()).unwrap_or(""),
            dns_verified = detection.dns_verified,
            "crawler request"
        );
    } else {
        debug!(
            target = "pagefarm::http::origin",
            domain,
            path,
            ip = %detection.ip,
            "visitor request"
        );
    }
}

fn page_response(page: ServedPage) -> Response {
    let mime = mime_guess::from_path(&page.cache_path).first_or(mime_guess::mime::TEXT_HTML_UTF_8);
    let mut response = (StatusCode::OK, page.body).into_response();

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    headers.insert(
        PAGE_SOURCE_HEADER,
        HeaderValue::from_static(page.source.as_str()),
    );
    response
}
