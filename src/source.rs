// src/source.rs

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::manager::DownloadManager;

pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

/// Totals reported by one source for one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceSummary {
    /// Files handled (downloaded, already present, or hashed).
    pub files: usize,
    /// Files that failed verification.
    pub mismatches: usize,
}

impl SourceSummary {
    fn merge(self, other: SourceSummary) -> SourceSummary {
        SourceSummary {
            files: self.files + other.files,
            mismatches: self.mismatches + other.mismatches,
        }
    }
}

/// Somewhere game files come from: the section CDN, or anything else able
/// to download and verify a set of files.
#[async_trait]
pub trait DownloadSource: Send + Sync {
    fn name(&self) -> &str;

    async fn download(&self) -> Result<SourceSummary, SourceError>;

    async fn verify_hashes(&self) -> Result<SourceSummary, SourceError>;
}

#[async_trait]
impl DownloadSource for DownloadManager {
    fn name(&self) -> &str {
        "section-cdn"
    }

    async fn download(&self) -> Result<SourceSummary, SourceError> {
        let reports = DownloadManager::download(self).await?;
        Ok(reports.iter().fold(SourceSummary::default(), |acc, r| {
            acc.merge(SourceSummary {
                files: r.run.files_written() + r.run.files_skipped(),
                mismatches: r.verification_failures.len(),
            })
        }))
    }

    async fn verify_hashes(&self) -> Result<SourceSummary, SourceError> {
        let reports = DownloadManager::verify_hashes(self).await?;
        Ok(reports.iter().fold(SourceSummary::default(), |acc, r| {
            acc.merge(SourceSummary {
                files: r.checked,
                mismatches: r.failures.len(),
            })
        }))
    }
}

/// Ordered list of sources; each pass runs them in registration order and
/// stops at the first failing source.
#[derive(Clone, Default)]
pub struct Sources {
    sources: Vec<Arc<dyn DownloadSource>>,
}

impl Sources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, source: Arc<dyn DownloadSource>) {
        self.sources.push(source);
    }

    pub async fn download_all(&self) -> Result<SourceSummary, SourceError> {
        let mut total = SourceSummary::default();
        for source in &self.sources {
            info!(source = source.name(), "downloading");
            total = total.merge(source.download().await?);
        }
        Ok(total)
    }

    pub async fn verify_all(&self) -> Result<SourceSummary, SourceError> {
        let mut total = SourceSummary::default();
        for source in &self.sources {
            info!(source = source.name(), "verifying");
            total = total.merge(source.verify_hashes().await?);
        }
        Ok(total)
    }
}
