//! Edge cache reader: serve straight from the shared cache tree, forward
//! misses to the origin, and report every request to the origin's visit log
//! without waiting for it.

use std::{net::IpAddr, path::Path, sync::Arc, time::Instant};

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{Extensions, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header},
    middleware,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use metrics::counter;
use tracing::warn;

use super::{
    edge_client, header_str,
    middleware::{log_responses, set_request_context},
    reject_non_read,
};
use crate::{
    cache::{CacheWriter, normalize_domain},
    infra::edge::{
        ForwardRequest, LogEvent, METRIC_EDGE_HIT, METRIC_EDGE_MISS, METRIC_ORIGIN_UNREACHABLE,
        OriginForwarder, SpiderLogger,
    },
    presentation::views::{render_bad_gateway_response, render_bad_host_response},
};

/// `hit` when the edge answered from the cache tree, `miss` when it forwarded.
pub const CACHE_STATUS_HEADER: HeaderName = HeaderName::from_static("x-pagefarm-cache");

#[derive(Clone)]
pub struct EdgeState {
    pub cache: CacheWriter,
    pub forwarder: Arc<OriginForwarder>,
    pub logger: SpiderLogger,
    /// Peers allowed to name the client through forwarding headers.
    pub trusted_proxies: Arc<[IpAddr]>,
}

pub fn build_edge_router(state: EdgeState) -> Router {
    Router::new()
        .fallback(edge_page)
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn edge_page(
    State(state): State<EdgeState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    extensions: Extensions,
) -> Response {
    const SOURCE: &str = "infra::http::edge::edge_page";

    let started = Instant::now();
    if let Some(response) = reject_non_read(SOURCE, &method) {
        return response;
    }

    let host = header_str(&headers, header::HOST);
    let Some(domain) = normalize_domain(host) else {
        return render_bad_host_response(host);
    };

    let raw_path = uri.path();
    let client = edge_client(&headers, &extensions, &state.trusted_proxies);
    let path = state.cache.path_for(&domain, raw_path);

    let (response, cache_hit) = match lookup(&state.cache, &path).await {
        Some(body) => {
            counter!(METRIC_EDGE_HIT).increment(1);
            (cached_response(&path, body), true)
        }
        None => {
            counter!(METRIC_EDGE_MISS).increment(1);
            let request = ForwardRequest {
                host,
                path_and_query: uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/"),
                client_ip: &client.ip,
                forwarded_for: client.forwarded_for.as_deref(),
                headers: &headers,
            };
            (forward(&state, &domain, request).await, false)
        }
    };

    state.logger.dispatch(LogEvent {
        user_agent: header_str(&headers, header::USER_AGENT).to_string(),
        domain,
        path: raw_path.to_string(),
        ip: client.ip,
        cache_hit,
        response_ms: started.elapsed().as_millis() as u64,
    });

    response
}

async fn lookup(cache: &CacheWriter, path: &Path) -> Option<Bytes> {
    match cache.read(path).await {
        Ok(body) => body,
        Err(err) => {
            warn!(
                target = "pagefarm::http::edge",
                path = %path.display(),
                error = %err,
                "cache read failed, forwarding to origin"
            );
            None
        }
    }
}

fn cached_response(path: &Path, body: Bytes) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    headers.insert(CACHE_STATUS_HEADER, HeaderValue::from_static("hit"));
    response
}

async fn forward(state: &EdgeState, domain: &str, request: ForwardRequest<'_>) -> Response {
    match state.forwarder.forward(request).await {
        Ok(forwarded) => {
            let mut response = (forwarded.status, forwarded.body).into_response();
            response.headers_mut().extend(forwarded.headers);
            response
                .headers_mut()
                .insert(CACHE_STATUS_HEADER, HeaderValue::from_static("miss"));
            response
        }
        Err(err) => {
            counter!(METRIC_ORIGIN_UNREACHABLE).increment(1);
            warn!(
                target = "pagefarm::http::edge",
                domain,
                error = %err,
                "origin unreachable"
            );
            render_bad_gateway_response(err.to_string())
        }
    }
}
