use askama::{Error as AskamaError, Template};
use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use thiserror::Error;

use crate::application::error::{ErrorReport, HttpError};

/// Seconds clients are asked to wait after a degraded page.
pub const RETRY_AFTER_SECONDS: u32 = 30;

#[derive(Debug, Error)]
#[error("{public_message}")]
pub struct TemplateRenderError {
    pub(crate) source: &'static str,
    pub(crate) public_message: &'static str,
    #[source]
    pub(crate) error: AskamaError,
}

impl TemplateRenderError {
    pub fn new(source: &'static str, public_message: &'static str, error: AskamaError) -> Self {
        Self {
            source,
            public_message,
            error,
        }
    }
}

impl From<TemplateRenderError> for HttpError {
    fn from(err: TemplateRenderError) -> Self {
        let TemplateRenderError {
            source,
            public_message,
            error,
        } = err;

        HttpError::from_error(
            source,
            StatusCode::INTERNAL_SERVER_ERROR,
            public_message,
            &error,
        )
    }
}

pub fn render_template<T: Template>(template: T) -> Result<Html<String>, HttpError> {
    template.render().map(Html).map_err(|err| {
        TemplateRenderError::new(
            "presentation::views::render_template",
            "Template rendering failed",
            err,
        )
        .into()
    })
}

pub fn render_template_response<T: Template>(template: T, status: StatusCode) -> Response {
    match render_template(template) {
        Ok(html) => (status, html).into_response(),
        Err(err) => err.into_response(),
    }
}

#[derive(Template)]
#[template(path = "error.html")]
pub struct ErrorPageTemplate {
    pub status_code: u16,
    pub title: &'static str,
    pub message: &'static str,
    pub domain: Option<String>,
}

fn error_page(
    source: &'static str,
    status: StatusCode,
    title: &'static str,
    message: &'static str,
    domain: Option<String>,
    detail: String,
) -> Response {
    let template = ErrorPageTemplate {
        status_code: status.as_u16(),
        title,
        message,
        domain,
    };
    let mut response = render_template_response(template, status);
    ErrorReport::from_message(source, status, detail).attach(&mut response);
    response
}

/// 404 for hosts that have no site configured.
pub fn render_unknown_site_response(domain: &str) -> Response {
    error_page(
        "presentation::views::render_unknown_site_response",
        StatusCode::NOT_FOUND,
        "Site not found",
        "No site is configured for this host name.",
        Some(domain.to_string()),
        format!("no site configured for `{domain}`"),
    )
}

/// 400 for requests whose Host header cannot name a site.
pub fn render_bad_host_response(host: &str) -> Response {
    error_page(
        "presentation::views::render_bad_host_response",
        StatusCode::BAD_REQUEST,
        "Bad request",
        "The request did not name a valid host.",
        None,
        format!("unusable Host header `{host}`"),
    )
}

/// 503 degraded page served when a render fails and nothing is cached.
pub fn render_degraded_response(domain: &str, detail: String) -> Response {
    let mut response = error_page(
        "presentation::views::render_degraded_response",
        StatusCode::SERVICE_UNAVAILABLE,
        "Temporarily unavailable",
        "This page is being prepared. Please try again shortly.",
        Some(domain.to_string()),
        detail,
    );
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(RETRY_AFTER_SECONDS));
    response
}

/// 502 served by the edge when the origin cannot be reached.
pub fn render_bad_gateway_response(detail: String) -> Response {
    error_page(
        "presentation::views::render_bad_gateway_response",
        StatusCode::BAD_GATEWAY,
        "Bad gateway",
        "The upstream server could not be reached.",
        None,
        detail,
    )
}
