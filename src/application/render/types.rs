use std::{path::PathBuf, sync::Arc};

use bytes::Bytes;
use minijinja::{Value, context};
use serde::Serialize;
use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::{
    domain::{
        entities::{ContentFragments, SiteRecord},
        types::PageSource,
    },
    template::{FunctionTable, TemplateError},
};

/// Failures on the render path. Cloneable so coalesced waiters can all
/// receive the leader's error.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("no site configured for `{domain}`")]
    UnknownSite { domain: String },
    #[error("site lookup for `{domain}` failed: {message}")]
    SiteLookup { domain: String, message: String },
    #[error("fragments for site `{site_id}` (group `{group}`) unavailable: {message}")]
    Fragments {
        site_id: String,
        group: String,
        message: String,
    },
    #[error("template `{template}` for site `{site_id}` unavailable: {message}")]
    TemplateSource {
        site_id: String,
        template: String,
        message: String,
    },
    #[error("site `{site_id}`: {source}")]
    Template {
        site_id: String,
        #[source]
        source: TemplateError,
    },
    #[error("render task for site `{site_id}` aborted: {message}")]
    Aborted { site_id: String, message: String },
}

/// Name and version of the template that produced a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateIdentity {
    pub name: String,
    pub version: String,
}

/// HTML returned to the caller together with how it was obtained.
#[derive(Debug, Clone)]
pub struct ServedPage {
    pub body: Bytes,
    pub source: PageSource,
    pub site_id: String,
    pub cache_path: PathBuf,
    /// Set when the page was rendered for this request.
    pub template: Option<TemplateIdentity>,
    /// False when rendering succeeded but the cache write did not.
    pub cached: bool,
}

/// Values exposed to templates as `page.*`.
#[derive(Debug, Clone, Serialize)]
pub struct PageFields {
    pub title: String,
    pub site_id: String,
    pub site_name: String,
    pub domain: String,
    pub path: String,
    pub keyword: String,
    pub analytics: String,
    pub push_script: String,
    pub content: String,
    pub now: String,
}

/// Everything one render call sees. Built per call and consumed by it.
#[derive(Debug)]
pub struct RenderContext {
    page: PageFields,
    functions: FunctionTable,
}

impl RenderContext {
    pub fn new(
        site: &SiteRecord,
        raw_path: &str,
        fragments: Arc<ContentFragments>,
        now: OffsetDateTime,
        functions: FunctionTable,
    ) -> Self {
        let title = functions
            .draw(&fragments.titles)
            .unwrap_or_else(|| site.name.clone());
        let keyword = functions.draw(&fragments.keywords).unwrap_or_default();
        let content = functions.draw(&fragments.contents).unwrap_or_default();
        let now = now
            .format(&Rfc3339)
            .unwrap_or_else(|_| now.unix_timestamp().to_string());

        Self {
            page: PageFields {
                title,
                site_id: site.site_id.clone(),
                site_name: site.name.clone(),
                domain: site.domain.clone(),
                path: raw_path.to_string(),
                keyword,
                analytics: site.analytics.clone(),
                push_script: site.push_script.clone(),
                content,
                now,
            },
            functions,
        }
    }

    pub fn page(&self) -> &PageFields {
        &self.page
    }

    /// Template context `{ page, fx }`.
    pub fn into_value(self) -> Value {
        context! {
            page => Value::from_serialize(&self.page),
            fx => Value::from_object(self.functions),
        }
    }
}
