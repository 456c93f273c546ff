//! File-backed collaborators.
//!
//! The management side exports its data into plain files:
//!
//! ```text
//! {sites_dir}/{domain}.toml                 one SiteRecord per domain
//! {templates_dir}/{name}.html               authoring-dialect templates
//! {fragments_dir}/{group}/keywords.txt      one fragment per line
//! {fragments_dir}/{group}/images.txt
//! {fragments_dir}/{group}/titles.txt
//! {fragments_dir}/{group}/contents.txt
//! ```

use std::{
    io,
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};

use async_trait::async_trait;

use crate::{
    application::repos::{FragmentSource, RepoError, SiteRepo, TemplateSource},
    cache::normalize_domain,
    domain::entities::{ContentFragments, SiteRecord, TemplateText},
};

const TEMPLATE_EXTENSION: &str = "html";

#[derive(Debug, Clone)]
pub struct FileSiteRepo {
    dir: PathBuf,
}

impl FileSiteRepo {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl SiteRepo for FileSiteRepo {
    async fn find_by_domain(&self, domain: &str) -> Result<Option<SiteRecord>, RepoError> {
        let Some(domain) = normalize_domain(domain) else {
            return Ok(None);
        };
        let path = self.dir.join(format!("{domain}.toml"));
        let Some(text) = read_optional(&path).await? else {
            return Ok(None);
        };

        let site: SiteRecord = toml::from_str(&text).map_err(|err| RepoError::Invalid {
            name: path.display().to_string(),
            message: err.to_string(),
        })?;

        if site.domain != domain {
            return Err(RepoError::Invalid {
                name: path.display().to_string(),
                message: format!("declares domain `{}`", site.domain),
            });
        }

        Ok(Some(site))
    }
}

#[derive(Debug, Clone)]
pub struct FileFragmentSource {
    dir: PathBuf,
}

impl FileFragmentSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl FragmentSource for FileFragmentSource {
    async fn fetch(&self, content_group: &str) -> Result<ContentFragments, RepoError> {
        let group = self.dir.join(checked_name(content_group)?);

        Ok(ContentFragments {
            keywords: read_lines(&group.join("keywords.txt")).await?,
            images: read_lines(&group.join("images.txt")).await?,
            titles: read_lines(&group.join("titles.txt")).await?,
            contents: read_lines(&group.join("contents.txt")).await?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct FileTemplateSource {
    dir: PathBuf,
}

impl FileTemplateSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, RepoError> {
        Ok(self
            .dir
            .join(format!("{}.{TEMPLATE_EXTENSION}", checked_name(name)?)))
    }
}

#[async_trait]
impl TemplateSource for FileTemplateSource {
    async fn version(&self, name: &str) -> Result<String, RepoError> {
        let path = self.path_for(name)?;
        let metadata = tokio::fs::metadata(&path).await.map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => RepoError::NotFound,
            _ => RepoError::from_persistence(err),
        })?;
        let modified = metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();
        Ok(format!("{}-{modified}", metadata.len()))
    }

    async fn load(&self, name: &str) -> Result<TemplateText, RepoError> {
        let version = self.version(name).await?;
        let path = self.path_for(name)?;
        let body = read_optional(&path).await?.ok_or(RepoError::NotFound)?;

        Ok(TemplateText {
            name: name.to_string(),
            version,
            body,
        })
    }
}

/// Reject names that could leave the configured directory.
fn checked_name(name: &str) -> Result<&str, RepoError> {
    let valid = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if valid {
        Ok(name)
    } else {
        Err(RepoError::Invalid {
            name: name.to_string(),
            message: "only ASCII letters, digits, `-` and `_` are allowed".to_string(),
        })
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>, RepoError> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(RepoError::Persistence(format!(
            "{}: {err}",
            path.display()
        ))),
    }
}

async fn read_lines(path: &Path) -> Result<Vec<String>, RepoError> {
    Ok(read_optional(path)
        .await?
        .map(|text| {
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default())
}
