//! Compiled-template cache keyed by template name and version.
//!
//! The registry asks the template source for the current version on every
//! lookup and only loads and compiles text when that version changes.
//! Compilation failures are cached as well so a broken template version is
//! reported on every render without being recompiled each time.

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tracing::{error, info};

use super::{compile::CompiledTemplate, error::TemplateError};
use crate::application::repos::{RepoError, TemplateSource};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to load template `{name}`: {source}")]
    Source {
        name: String,
        #[source]
        source: RepoError,
    },
    #[error(transparent)]
    Template(#[from] TemplateError),
}

type Compiled = Result<Arc<CompiledTemplate>, TemplateError>;

pub struct TemplateRegistry {
    source: Arc<dyn TemplateSource>,
    compiled: DashMap<String, (String, Compiled)>,
}

impl TemplateRegistry {
    pub fn new(source: Arc<dyn TemplateSource>) -> Self {
        Self {
            source,
            compiled: DashMap::new(),
        }
    }

    /// Compiled form of the current version of `name`.
    pub async fn get(&self, name: &str) -> Result<Arc<CompiledTemplate>, RegistryError> {
        let version = self
            .source
            .version(name)
            .await
            .map_err(|source| RegistryError::Source {
                name: name.to_string(),
                source,
            })?;

        if let Some(entry) = self.compiled.get(name) {
            let (cached_version, compiled) = entry.value();
            if *cached_version == version {
                return compiled.clone().map_err(RegistryError::from);
            }
        }

        let text = self
            .source
            .load(name)
            .await
            .map_err(|source| RegistryError::Source {
                name: name.to_string(),
                source,
            })?;

        let compiled = CompiledTemplate::compile(&text).map(Arc::new);
        match &compiled {
            Ok(template) => info!(
                target = "pagefarm::template::registry",
                template = %text.name,
                version = %text.version,
                functions = template.functions().len(),
                "compiled template"
            ),
            Err(err) => error!(
                target = "pagefarm::template::registry",
                template = %text.name,
                version = %text.version,
                error = %err,
                "template failed to compile"
            ),
        }

        self.compiled
            .insert(name.to_string(), (text.version.clone(), compiled.clone()));
        compiled.map_err(RegistryError::from)
    }

    /// Number of template versions currently held.
    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;

    use super::*;
    use crate::domain::entities::TemplateText;

    struct MemorySource {
        text: Mutex<TemplateText>,
        loads: AtomicUsize,
    }

    impl MemorySource {
        fn new(version: &str, body: &str) -> Self {
            Self {
                text: Mutex::new(TemplateText {
                    name: "home".to_string(),
                    version: version.to_string(),
                    body: body.to_string(),
                }),
                loads: AtomicUsize::new(0),
            }
        }

        fn replace(&self, version: &str, body: &str) {
            let mut text = self.text.lock().expect("lock");
            text.version = version.to_string();
            text.body = body.to_string();
        }
    }

    #[async_trait]
    impl TemplateSource for MemorySource {
        async fn version(&self, _name: &str) -> Result<String, RepoError> {
            Ok(self.text.lock().expect("lock").version.clone())
        }

        async fn load(&self, _name: &str) -> Result<TemplateText, RepoError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(self.text.lock().expect("lock").clone())
        }
    }

    #[tokio::test]
    async fn compiles_once_per_version() {
        let source = Arc::new(MemorySource::new("1", "{{ title }}"));
        let registry = TemplateRegistry::new(source.clone());

        let first = registry.get("home").await.expect("first");
        let second = registry.get("home").await.expect("second");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);

        source.replace("2", "{{ site_name }}");
        let third = registry.get("home").await.expect("third");
        assert_eq!(third.version(), "2");
        assert_eq!(third.native_source(), "{{ page.site_name }}");
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn broken_versions_are_remembered() {
        let source = Arc::new(MemorySource::new("1", "{% loop 2 %}"));
        let registry = TemplateRegistry::new(source.clone());

        assert!(matches!(
            registry.get("home").await,
            Err(RegistryError::Template(TemplateError::Convert { .. }))
        ));
        assert!(registry.get("home").await.is_err());
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
    }
}
