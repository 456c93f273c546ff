//! Append-only JSON Lines store for spider visits.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
    sync::Mutex,
};

use crate::{
    application::repos::{RepoError, VisitLogRepo},
    domain::entities::SpiderVisitRecord,
};

/// One JSON object per line. The file handle is opened lazily and shared;
/// appends are serialised so lines never interleave.
pub struct JsonlVisitLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl JsonlVisitLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open(&self) -> Result<File, RepoError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(RepoError::from_persistence)?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(RepoError::from_persistence)
    }
}

#[async_trait]
impl VisitLogRepo for JsonlVisitLog {
    async fn append(&self, record: &SpiderVisitRecord) -> Result<(), RepoError> {
        let mut line = serde_json::to_vec(record).map_err(RepoError::from_persistence)?;
        line.push(b'\n');

        let mut guard = self.file.lock().await;
        let mut file = match guard.take() {
            Some(file) => file,
            None => self.open().await?,
        };

        // On failure the handle is dropped and reopened by the next append.
        file.write_all(&line)
            .await
            .map_err(RepoError::from_persistence)?;
        file.flush().await.map_err(RepoError::from_persistence)?;
        *guard = Some(file);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::SpiderType;

    fn record(path: &str) -> SpiderVisitRecord {
        SpiderVisitRecord {
            recorded_at: "2026-01-01T00:00:00Z".to_string(),
            domain: "x.com".to_string(),
            path: path.to_string(),
            ip: "66.249.66.1".to_string(),
            user_agent: "Googlebot/2.1".to_string(),
            is_spider: true,
            spider_type: Some(SpiderType::SearchEngine),
            spider_name: Some("Googlebot".to_string()),
            dns_verified: false,
            cache_hit: true,
            response_ms: 3,
        }
    }

    #[tokio::test]
    async fn appends_one_line_per_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = JsonlVisitLog::new(dir.path().join("logs/visits.jsonl"));

        log.append(&record("/a")).await.expect("first");
        log.append(&record("/b")).await.expect("second");

        let text = std::fs::read_to_string(log.path()).expect("read");
        let lines: Vec<SpiderVisitRecord> = text
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect();
        assert_eq!(lines, vec![record("/a"), record("/b")]);
    }
}
