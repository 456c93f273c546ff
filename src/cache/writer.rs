//! Atomic persistence of rendered pages into the shared cache tree.
//!
//! Pages are written to a temporary file inside the destination directory and
//! renamed into place, so a reader either sees the complete previous version
//! or the complete new one. No locks are taken; the rename is the only
//! consistency mechanism between the origin writer and edge readers.

use std::{
    fs::File,
    io::{self, Write},
    path::{Path, PathBuf},
};

use bytes::Bytes;
use tempfile::Builder as TempFileBuilder;
use thiserror::Error;
use tracing::warn;

use super::paths;

const TEMP_PREFIX: &str = ".pagefarm-";
const TEMP_SUFFIX: &str = ".partial";

#[derive(Debug, Error)]
pub enum CacheWriteError {
    #[error("cache path `{}` has no parent directory", path.display())]
    NoParent { path: PathBuf },
    #[error("failed to create cache directory `{}`: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write cache file `{}`: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to move cache file into `{}`: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cache write task aborted: {0}")]
    Join(String),
}

/// Filesystem-backed writer rooted at the cache directory.
#[derive(Debug, Clone)]
pub struct CacheWriter {
    root: PathBuf,
}

impl CacheWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the page for `(domain, raw_path)` under this writer's root.
    pub fn path_for(&self, domain: &str, raw_path: &str) -> PathBuf {
        paths::cache_path(&self.root, domain, raw_path)
    }

    /// Read a cached page. Missing files yield `Ok(None)`.
    pub async fn read(&self, path: &Path) -> io::Result<Option<Bytes>> {
        match tokio::fs::read(path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Persist `contents` at `path`, retrying once before giving up.
    pub async fn store(&self, path: PathBuf, contents: Bytes) -> Result<(), CacheWriteError> {
        match self.store_once(path.clone(), contents.clone()).await {
            Ok(()) => Ok(()),
            Err(first) => {
                warn!(
                    target = "pagefarm::cache::writer",
                    path = %path.display(),
                    error = %first,
                    "cache write failed, retrying once"
                );
                self.store_once(path, contents).await
            }
        }
    }

    async fn store_once(&self, path: PathBuf, contents: Bytes) -> Result<(), CacheWriteError> {
        tokio::task::spawn_blocking(move || write_atomic(&path, &contents))
            .await
            .map_err(|err| CacheWriteError::Join(err.to_string()))?
    }
}

/// Atomically replace `path` with `contents`, creating both shard levels.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), CacheWriteError> {
    write_atomic_with(path, |file| file.write_all(contents))
}

/// Atomically replace `path` with whatever `fill` writes into the temporary
/// file. If `fill` fails, the temporary file is discarded and `path` is left
/// untouched.
pub fn write_atomic_with<F>(path: &Path, fill: F) -> Result<(), CacheWriteError>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let parent = path.parent().ok_or_else(|| CacheWriteError::NoParent {
        path: path.to_path_buf(),
    })?;

    std::fs::create_dir_all(parent).map_err(|source| CacheWriteError::CreateDir {
        path: parent.to_path_buf(),
        source,
    })?;

    let mut temp = TempFileBuilder::new()
        .prefix(TEMP_PREFIX)
        .suffix(TEMP_SUFFIX)
        .tempfile_in(parent)
        .map_err(|source| CacheWriteError::Write {
            path: path.to_path_buf(),
            source,
        })?;

    fill(temp.as_file_mut())
        .and_then(|()| temp.as_file_mut().flush())
        .map_err(|source| CacheWriteError::Write {
            path: path.to_path_buf(),
            source,
        })?;

    temp.persist(path)
        .map_err(|err| CacheWriteError::Persist {
            path: path.to_path_buf(),
            source: err.error,
        })?;

    Ok(())
}
