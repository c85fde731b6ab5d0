//! Report artifacts are produced by engines and referenced by `report_ref`.
//! The bridge only ever resolves a reference to its content through a [`ReportStore`].

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::fs;

use crate::error::ReportError;

#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn fetch(&self, report_ref: &str) -> Result<String, ReportError>;

    async fn store(&self, report_ref: &str, content: String) -> Result<(), ReportError>;
}

#[derive(Default)]
pub struct InMemoryReportStore {
    reports: DashMap<String, String>,
}

impl InMemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }
}

#[async_trait]
impl ReportStore for InMemoryReportStore {
    async fn fetch(&self, report_ref: &str) -> Result<String, ReportError> {
        self.reports
            .get(report_ref)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ReportError::NotFound(report_ref.to_string()))
    }

    async fn store(&self, report_ref: &str, content: String) -> Result<(), ReportError> {
        self.reports.insert(report_ref.to_string(), content);
        Ok(())
    }
}

/// Stores reports as files below a root directory. References are relative paths.
pub struct FsReportStore {
    root: PathBuf,
}

impl FsReportStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, report_ref: &str) -> Result<PathBuf, ReportError> {
        let relative = Path::new(report_ref);
        let safe = !report_ref.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !safe {
            return Err(ReportError::InvalidRef(report_ref.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ReportStore for FsReportStore {
    async fn fetch(&self, report_ref: &str) -> Result<String, ReportError> {
        let path = self.resolve(report_ref)?;
        fs::read_to_string(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                ReportError::NotFound(report_ref.to_string())
            } else {
                ReportError::Io {
                    reference: report_ref.to_string(),
                    reason: err.to_string(),
                }
            }
        })
    }

    async fn store(&self, report_ref: &str, content: String) -> Result<(), ReportError> {
        let path = self.resolve(report_ref)?;
        let io_error = |err: std::io::Error| ReportError::Io {
            reference: report_ref.to_string(),
            reason: err.to_string(),
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        fs::write(&path, content).await.map_err(io_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_round_trip_and_missing() {
        let store = InMemoryReportStore::new();
        store.store("r1", "# Report".into()).await.unwrap();
        assert_eq!(store.fetch("r1").await.unwrap(), "# Report");
        assert!(matches!(
            store.fetch("r2").await,
            Err(ReportError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn fs_store_writes_below_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsReportStore::new(dir.path());
        store
            .store("reports/final_report.md", "content".into())
            .await
            .unwrap();
        assert!(dir.path().join("reports/final_report.md").exists());
        assert_eq!(
            store.fetch("reports/final_report.md").await.unwrap(),
            "content"
        );
    }

    #[tokio::test]
    async fn fs_store_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsReportStore::new(dir.path());
        for bad in ["../etc/passwd", "/final_report.md", ""] {
            assert!(matches!(
                store.fetch(bad).await,
                Err(ReportError::InvalidRef(_))
            ));
        }
    }
}
