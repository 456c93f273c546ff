//! Collaborator traits the render pipeline and visit recorder depend on.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::entities::{ContentFragments, SiteRecord, SpiderVisitRecord, TemplateText};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("resource not found")]
    NotFound,
    #[error("invalid record `{name}`: {message}")]
    Invalid { name: String, message: String },
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[async_trait]
pub trait SiteRepo: Send + Sync {
    /// Site configured for `domain`, if any.
    async fn find_by_domain(&self, domain: &str) -> Result<Option<SiteRecord>, RepoError>;
}

#[async_trait]
pub trait FragmentSource: Send + Sync {
    /// Fragment pools for a content group. Unknown groups yield empty pools.
    async fn fetch(&self, content_group: &str) -> Result<ContentFragments, RepoError>;
}

#[async_trait]
pub trait TemplateSource: Send + Sync {
    /// Current version token of a template without loading its body.
    async fn version(&self, name: &str) -> Result<String, RepoError>;

    async fn load(&self, name: &str) -> Result<TemplateText, RepoError>;
}

#[async_trait]
pub trait VisitLogRepo: Send + Sync {
    async fn append(&self, record: &SpiderVisitRecord) -> Result<(), RepoError>;
}
