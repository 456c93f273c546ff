use std::net::SocketAddr;

use axum::http::{
    HeaderMap, HeaderName, HeaderValue, StatusCode,
    header::{
        ACCEPT, ACCEPT_LANGUAGE, CONNECTION, CONTENT_LENGTH, HOST, TRANSFER_ENCODING, UPGRADE,
        USER_AGENT,
    },
};
use bytes::Bytes;
use reqwest::{Client, Url};
use thiserror::Error;

use super::{ResolveError, resolve_origin};
use crate::{config::EdgeSettings, infra::error::InfraError};

pub const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

const HOP_BY_HOP: [HeaderName; 4] = [CONNECTION, TRANSFER_ENCODING, UPGRADE, CONTENT_LENGTH];

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("invalid origin url: {0}")]
    Url(#[from] url::ParseError),
    #[error("origin request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// What the edge knows about a miss it is handing to the origin.
#[derive(Debug, Clone)]
pub struct ForwardRequest<'a> {
    /// `Host` header exactly as the client sent it.
    pub host: &'a str,
    pub path_and_query: &'a str,
    /// Client address as established by the edge; always sent as `X-Real-IP`.
    pub client_ip: &'a str,
    /// `X-Forwarded-For` chain received from a trusted proxy, if any.
    pub forwarded_for: Option<&'a str>,
    pub headers: &'a HeaderMap,
}

#[derive(Debug)]
pub struct ForwardedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Relays cache misses to the origin renderer.
pub struct OriginForwarder {
    client: Client,
    origin_host: String,
    origin_port: u16,
}

impl OriginForwarder {
    pub fn new(settings: &EdgeSettings) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(concat!("pagefarm-edge/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.forward_timeout)
            .pool_idle_timeout(settings.pool_idle_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .map_err(|err| {
                InfraError::http_client(format!("failed to build forwarding client: {err}"))
            })?;

        Ok(Self {
            client,
            origin_host: settings.origin_host.clone(),
            origin_port: settings.origin_port,
        })
    }

    pub async fn forward(
        &self,
        request: ForwardRequest<'_>,
    ) -> Result<ForwardedResponse, ForwardError> {
        let origin = resolve_origin(&self.origin_host, self.origin_port).await?;
        let url = origin_url(origin, request.path_and_query)?;

        let response = self
            .client
            .get(url)
            .headers(upstream_headers(&request))
            .send()
            .await?;

        let status = response.status();
        let headers = downstream_headers(response.headers());
        let body = response.bytes().await?;

        Ok(ForwardedResponse {
            status,
            headers,
            body,
        })
    }
}

/// Origin URL for a request target. The path is set rather than joined so a
/// target such as `//other.host/` cannot redirect the request elsewhere.
fn origin_url(origin: SocketAddr, path_and_query: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(&format!("http://{origin}"))?;
    let (path, query) = match path_and_query.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path_and_query, None),
    };
    url.set_path(path);
    url.set_query(query);
    Ok(url)
}

/// Headers sent to the origin: the client's Host and User-Agent are kept so
/// the origin renders the right site and classifies the right client. The
/// client's own `X-Real-IP` is never passed through.
fn upstream_headers(request: &ForwardRequest<'_>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for name in [USER_AGENT, ACCEPT, ACCEPT_LANGUAGE] {
        if let Some(value) = request.headers.get(&name) {
            headers.insert(name, value.clone());
        }
    }
    if let Ok(host) = HeaderValue::from_str(request.host) {
        headers.insert(HOST, host);
    }

    if request.client_ip.is_empty() {
        return headers;
    }
    if let Ok(ip) = HeaderValue::from_str(request.client_ip) {
        headers.insert(X_REAL_IP, ip);
    }
    let chain = match request.forwarded_for {
        Some(existing) => format!("{existing}, {}", request.client_ip),
        None => request.client_ip.to_string(),
    };
    if let Ok(chain) = HeaderValue::from_str(&chain) {
        headers.insert(X_FORWARDED_FOR, chain);
    }
    headers
}

fn downstream_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = upstream.clone();
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_headers_preserve_client_identity() {
        let mut incoming = HeaderMap::new();
        incoming.insert(USER_AGENT, HeaderValue::from_static("Googlebot/2.1"));
        incoming.insert(X_FORWARDED_FOR, HeaderValue::from_static("10.0.0.1"));
        incoming.insert(CONNECTION, HeaderValue::from_static("close"));

        let headers = upstream_headers(&ForwardRequest {
            host: "x.com",
            path_and_query: "/promo",
            client_ip: "66.249.66.1",
            forwarded_for: Some("10.0.0.1"),
            headers: &incoming,
        });

        assert_eq!(headers.get(HOST).expect("host"), "x.com");
        assert_eq!(headers.get(USER_AGENT).expect("ua"), "Googlebot/2.1");
        assert_eq!(headers.get(X_REAL_IP).expect("real ip"), "66.249.66.1");
        assert_eq!(
            headers.get(X_FORWARDED_FOR).expect("xff"),
            "10.0.0.1, 66.249.66.1"
        );
        assert!(headers.get(CONNECTION).is_none());
    }

    #[test]
    fn client_supplied_addresses_are_replaced() {
        let mut incoming = HeaderMap::new();
        incoming.insert(X_REAL_IP, HeaderValue::from_static("66.249.66.1"));
        incoming.insert(X_FORWARDED_FOR, HeaderValue::from_static("66.249.66.1"));

        let headers = upstream_headers(&ForwardRequest {
            host: "x.com",
            path_and_query: "/promo",
            client_ip: "203.0.113.9",
            forwarded_for: None,
            headers: &incoming,
        });

        assert_eq!(headers.get(X_REAL_IP).expect("real ip"), "203.0.113.9");
        assert_eq!(headers.get(X_FORWARDED_FOR).expect("xff"), "203.0.113.9");
    }

    #[test]
    fn origin_url_keeps_authority_for_scheme_relative_paths() {
        let origin: SocketAddr = "127.0.0.1:3000".parse().expect("addr");

        let url = origin_url(origin, "//evil.example/promo?x=1").expect("url");
        assert_eq!(url.host_str(), Some("127.0.0.1"));
        assert_eq!(url.query(), Some("x=1"));

        let url = origin_url(origin, "/news/").expect("url");
        assert_eq!(url.as_str(), "http://127.0.0.1:3000/news/");
    }

    #[test]
    fn downstream_headers_drop_hop_by_hop() {
        let mut upstream = HeaderMap::new();
        upstream.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        upstream.insert(CONTENT_LENGTH, HeaderValue::from_static("12"));
        upstream.insert(
            HeaderName::from_static("x-pagefarm-source"),
            HeaderValue::from_static("rendered"),
        );

        let headers = downstream_headers(&upstream);
        assert!(headers.get(TRANSFER_ENCODING).is_none());
        assert!(headers.get(CONTENT_LENGTH).is_none());
        assert_eq!(headers.get("x-pagefarm-source").expect("source"), "rendered");
    }
}
