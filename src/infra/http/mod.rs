mod edge;
mod middleware;
mod origin;

pub use edge::{CACHE_STATUS_HEADER, EdgeState, build_edge_router};
pub use middleware::{REQUEST_ID_HEADER, RequestContext};
pub use origin::{OriginState, PAGE_SOURCE_HEADER, SPIDER_HEADER, build_origin_router};

use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::ConnectInfo,
    http::{Extensions, HeaderMap, HeaderName, Method, StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::{
    application::{error::HttpError, repos::RepoError},
    infra::edge::{X_FORWARDED_FOR, X_REAL_IP},
};

/// Map a repository error to a consistent HTTP error response.
pub fn repo_error_to_http(source: &'static str, err: RepoError) -> HttpError {
    match err {
        RepoError::NotFound => HttpError::new(
            source,
            StatusCode::NOT_FOUND,
            "Resource not found",
            "resource not found",
        ),
        RepoError::Invalid { name, message } => HttpError::new(
            source,
            StatusCode::UNPROCESSABLE_ENTITY,
            "Invalid record",
            format!("{name}: {message}"),
        ),
        RepoError::Persistence(message) => HttpError::new(
            source,
            StatusCode::INTERNAL_SERVER_ERROR,
            "Persistence error",
            message,
        ),
    }
}

/// Client address: `X-Real-IP`, then the first `X-Forwarded-For` hop, then
/// the TCP peer.
pub(crate) fn client_ip(headers: &HeaderMap, extensions: &Extensions) -> String {
    let header_ip = |name: &HeaderName| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .and_then(|value| value.parse::<IpAddr>().ok())
    };

    header_ip(&X_REAL_IP)
        .or_else(|| header_ip(&X_FORWARDED_FOR))
        .or_else(|| {
            extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
        })
        .map(|ip| ip.to_string())
        .unwrap_or_default()
}

/// Who the edge is talking to. The TCP peer is the client unless it is one of
/// `trusted` proxies, in which case its forwarding headers name the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EdgeClient {
    pub ip: String,
    /// Incoming `X-Forwarded-For` chain, kept only from trusted proxies.
    pub forwarded_for: Option<String>,
}

pub(crate) fn edge_client(
    headers: &HeaderMap,
    extensions: &Extensions,
    trusted: &[IpAddr],
) -> EdgeClient {
    let peer = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_canonical());

    match peer {
        Some(peer) if trusted.contains(&peer) => EdgeClient {
            ip: client_ip(headers, extensions),
            forwarded_for: headers
                .get(&X_FORWARDED_FOR)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|chain| !chain.is_empty())
                .map(str::to_string),
        },
        Some(peer) => EdgeClient {
            ip: peer.to_string(),
            forwarded_for: None,
        },
        None => EdgeClient {
            ip: String::new(),
            forwarded_for: None,
        },
    }
}

pub(crate) fn header_str(headers: &HeaderMap, name: HeaderName) -> &str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
}

/// Pages are only ever read.
pub(crate) fn reject_non_read(source: &'static str, method: &Method) -> Option<Response> {
    if method == Method::GET || method == Method::HEAD {
        return None;
    }
    let mut response = HttpError::new(
        source,
        StatusCode::METHOD_NOT_ALLOWED,
        "Method not allowed",
        format!("{method} is not supported"),
    )
    .into_response();
    response
        .headers_mut()
        .insert(header::ALLOW, header::HeaderValue::from_static("GET, HEAD"));
    Some(response)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn client_ip_prefers_real_ip_then_forwarded_for() {
        let mut headers = HeaderMap::new();
        let mut extensions = Extensions::new();
        extensions.insert(ConnectInfo(
            "10.1.1.1:5555".parse::<SocketAddr>().expect("addr"),
        ));
        assert_eq!(client_ip(&headers, &extensions), "10.1.1.1");

        headers.insert(
            X_FORWARDED_FOR,
            HeaderValue::from_static("203.0.113.9, 10.0.0.2"),
        );
        assert_eq!(client_ip(&headers, &extensions), "203.0.113.9");

        headers.insert(X_REAL_IP, HeaderValue::from_static("66.249.66.1"));
        assert_eq!(client_ip(&headers, &extensions), "66.249.66.1");
    }

    fn spoofing_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(X_REAL_IP, HeaderValue::from_static("66.249.66.1"));
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("66.249.66.1"));
        headers
    }

    fn peer(addr: &str) -> Extensions {
        let mut extensions = Extensions::new();
        extensions.insert(ConnectInfo(addr.parse::<SocketAddr>().expect("addr")));
        extensions
    }

    #[test]
    fn edge_ignores_forwarding_headers_from_untrusted_peers() {
        let client = edge_client(&spoofing_headers(), &peer("203.0.113.9:40000"), &[]);
        assert_eq!(
            client,
            EdgeClient {
                ip: "203.0.113.9".to_string(),
                forwarded_for: None,
            }
        );
    }

    #[test]
    fn edge_believes_trusted_proxies() {
        let proxy: IpAddr = "10.0.0.2".parse().expect("ip");
        let client = edge_client(&spoofing_headers(), &peer("10.0.0.2:5000"), &[proxy]);
        assert_eq!(client.ip, "66.249.66.1");
        assert_eq!(client.forwarded_for.as_deref(), Some("66.249.66.1"));

        let mapped = edge_client(&spoofing_headers(), &peer("[::ffff:10.0.0.2]:5000"), &[proxy]);
        assert_eq!(mapped.ip, "66.249.66.1");
    }

    #[test]
    fn malformed_forwarding_headers_fall_through() {
        let mut headers = HeaderMap::new();
        headers.insert(X_REAL_IP, HeaderValue::from_static("not-an-ip"));
        assert_eq!(client_ip(&headers, &Extensions::new()), "");
    }
}
