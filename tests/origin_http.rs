mod common;

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use common::{ANALYTICS, BROWSER_UA, Farm, GOOGLEBOT_UA, StubResolver};
use pagefarm::{
    application::{repos::VisitLogRepo, visits::VisitRecorder},
    domain::{entities::SpiderVisitRecord, types::SpiderType},
    infra::{
        http::{
            OriginState, PAGE_SOURCE_HEADER, REQUEST_ID_HEADER, SPIDER_HEADER, build_origin_router,
        },
        visit_log::JsonlVisitLog,
    },
};
use tower::ServiceExt;

fn origin(farm: &Farm, record_humans: bool) -> Router {
    let detector = common::detector(StubResolver::genuine_google());
    let log: Arc<dyn VisitLogRepo> = Arc::new(JsonlVisitLog::new(farm.visit_log()));
    build_origin_router(OriginState {
        pipeline: farm.pipeline(),
        detector: Arc::clone(&detector),
        visits: Arc::new(VisitRecorder::new(detector, log, record_humans)),
    })
}

fn page_request(host: &str, path: &str, user_agent: &str, ip: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(path)
        .header(header::HOST, host)
        .header(header::USER_AGENT, user_agent)
        .header("x-real-ip", ip)
        .body(Body::empty())
        .expect("request")
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    String::from_utf8(bytes.to_vec()).expect("utf-8")
}

fn visit_lines(farm: &Farm) -> Vec<SpiderVisitRecord> {
    match std::fs::read_to_string(farm.visit_log()) {
        Ok(text) => text
            .lines()
            .map(|line| serde_json::from_str(line).expect("visit record"))
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[tokio::test]
async fn health_check_is_empty_success() {
    let farm = Farm::new();
    let response = origin(&farm, false)
        .oneshot(
            Request::builder()
                .uri("/_health")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(response.headers().contains_key(REQUEST_ID_HEADER));
}

#[tokio::test]
async fn verified_crawler_gets_rendered_page() {
    let farm = Farm::new();
    let router = origin(&farm, false);

    let response = router
        .clone()
        .oneshot(page_request("x.com", "/promo", GOOGLEBOT_UA, "66.249.66.1"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[SPIDER_HEADER], "Googlebot; verified");
    assert_eq!(response.headers()[PAGE_SOURCE_HEADER], "rendered");
    assert!(
        response.headers()[header::CONTENT_TYPE]
            .to_str()
            .expect("content type")
            .starts_with("text/html")
    );
    assert!(body_text(response).await.contains(ANALYTICS));

    let again = router
        .oneshot(page_request("x.com:8080", "/promo", BROWSER_UA, "10.0.0.9"))
        .await
        .expect("response");
    assert_eq!(again.status(), StatusCode::OK);
    assert_eq!(again.headers()[SPIDER_HEADER], "human");
    assert_eq!(again.headers()[PAGE_SOURCE_HEADER], "cached");
}

#[tokio::test]
async fn spoofed_crawler_is_flagged_unverified() {
    let farm = Farm::new();
    let response = origin(&farm, false)
        .oneshot(page_request("x.com", "/promo", GOOGLEBOT_UA, "203.0.113.7"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[SPIDER_HEADER], "Googlebot; unverified");
}

#[tokio::test]
async fn unknown_host_is_not_found() {
    let farm = Farm::new();
    let response = origin(&farm, false)
        .oneshot(page_request("y.com", "/", BROWSER_UA, "10.0.0.1"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(!farm.cache_root().join("y.com").exists());
}

#[tokio::test]
async fn unusable_host_is_rejected() {
    let farm = Farm::new();
    let response = origin(&farm, false)
        .oneshot(page_request("../etc", "/passwd", BROWSER_UA, "10.0.0.1"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn writes_are_not_allowed() {
    let farm = Farm::new();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/promo")
        .header(header::HOST, "x.com")
        .body(Body::empty())
        .expect("request");

    let response = origin(&farm, false)
        .oneshot(request)
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers()[header::ALLOW], "GET, HEAD");
}

#[tokio::test]
async fn broken_template_degrades_to_retryable_error() {
    let farm = Farm::new();
    farm.write_template("home", "{% if title %}never closed");

    let response = origin(&farm, false)
        .oneshot(page_request("x.com", "/promo", BROWSER_UA, "10.0.0.1"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
    assert_eq!(response.headers()[PAGE_SOURCE_HEADER], "fallback");
}

#[tokio::test]
async fn spider_log_records_crawler_visits() {
    let farm = Farm::new();
    let uri = "/_spider/log?ua=Mozilla%2F5.0+%28compatible%3B+Googlebot%2F2.1%29\
               &domain=x.com&path=%2Fpromo&ip=66.249.66.1&hit=1&ms=12";

    let response = origin(&farm, false)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let visits = visit_lines(&farm);
    assert_eq!(visits.len(), 1);
    let visit = &visits[0];
    assert_eq!(visit.domain, "x.com");
    assert_eq!(visit.path, "/promo");
    assert_eq!(visit.user_agent, "Mozilla/5.0 (compatible; Googlebot/2.1)");
    assert!(visit.is_spider);
    assert!(visit.dns_verified);
    assert_eq!(visit.spider_type, Some(SpiderType::SearchEngine));
    assert_eq!(visit.spider_name.as_deref(), Some("Googlebot"));
    assert!(visit.cache_hit);
    assert_eq!(visit.response_ms, 12);
}

#[tokio::test]
async fn spider_log_skips_humans_unless_enabled() {
    let uri = "/_spider/log?ua=Firefox&domain=x.com&path=%2F&ip=10.0.0.1&hit=0&ms=3";

    let farm = Farm::new();
    let response = origin(&farm, false)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(visit_lines(&farm).is_empty());

    let farm = Farm::new();
    let response = origin(&farm, true)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let visits = visit_lines(&farm);
    assert_eq!(visits.len(), 1);
    assert!(!visits[0].is_spider);
    assert!(!visits[0].cache_hit);
}

#[tokio::test]
async fn spider_log_rejects_incomplete_queries() {
    let farm = Farm::new();
    let router = origin(&farm, true);

    for uri in [
        "/_spider/log?ua=x&path=%2F&ip=1.2.3.4&hit=1&ms=1",
        "/_spider/log?ua=x&domain=x.com&path=%2F&ip=1.2.3.4&hit=yes&ms=1",
        "/_spider/log?ua=x&domain=x.com&path=%2F&ip=1.2.3.4&hit=1&ms=-5",
    ] {
        let response = router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
    }
    assert!(visit_lines(&farm).is_empty());
}
