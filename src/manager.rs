// src/manager.rs

use std::sync::Arc;

use reqwest::Client;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::codec::{Codec, LzmaCodec};
use crate::config::{CdnOptions, LoaderConfig, Package};
use crate::fetcher::{FetchError, HttpSectionFetcher, SectionFetcher, SectionUrl};
use crate::hash_store::{HashDatabase, HashStore, MemoryHashStore, StoreError};
use crate::integrity::IntegrityChecker;
use crate::manifest::{fetch_index, ManifestError};
use crate::models::Manifest;
use crate::progress::{DownloadListener, ProgressReporter};
use crate::scheduler::{GroupScheduler, RunReport, SchedulerError};
use crate::verifier::{store_key, VerificationFailure, Verifier};

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),
    #[error("{0}")]
    Scheduler(#[from] SchedulerError),
    #[error("hash store error: {0}")]
    Store(#[from] StoreError),
    #[error("http client error: {0}")]
    Client(#[from] FetchError),
}

/// Outcome of one package in a download batch.
#[derive(Debug)]
pub struct PackageReport {
    pub package: Package,
    /// Whether the hash store showed the package as already complete.
    pub skipped: bool,
    pub run: RunReport,
    pub verification_failures: Vec<VerificationFailure>,
}

/// Outcome of a verification-only run over one package.
#[derive(Debug)]
pub struct VerifyReport {
    pub package: Package,
    pub checked: usize,
    pub failures: Vec<VerificationFailure>,
}

/// Entry point tying packages, manifests, the scheduler and the hash store
/// together.
pub struct DownloadManager {
    config: LoaderConfig,
    options: CdnOptions,
    http_client: Client,
    fetcher: Arc<dyn SectionFetcher>,
    codec: Arc<dyn Codec>,
    reporter: ProgressReporter,
    hash_db: Option<HashDatabase>,
    token: CancellationToken,
}

impl DownloadManager {
    pub async fn new(config: LoaderConfig, options: CdnOptions) -> Result<Self, ManagerError> {
        let fetcher = HttpSectionFetcher::with_settings(&config.user_agent, config.request_timeout())?;
        let http_client = fetcher.client().clone();

        let hash_db = match &config.hash_db {
            Some(path) => Some(HashDatabase::open(path).await?),
            None => None,
        };

        Ok(Self {
            config,
            options,
            http_client,
            fetcher: Arc::new(fetcher),
            codec: Arc::new(LzmaCodec::new()),
            reporter: ProgressReporter::new(),
            hash_db,
            token: CancellationToken::new(),
        })
    }

    /// Replaces the decoder used for compressed files.
    pub fn with_codec(self, codec: Arc<dyn Codec>) -> Self {
        Self { codec, ..self }
    }

    pub fn add_listener(&mut self, listener: Arc<dyn DownloadListener>) {
        self.reporter.register(listener);
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stops the running batch; in-flight section requests are abandoned.
    pub fn cancel(&self) {
        info!("Manager: cancellation requested");
        self.token.cancel();
    }

    fn checker(&self) -> IntegrityChecker {
        match self.config.hash_algorithm {
            Some(algorithm) => IntegrityChecker::new(algorithm),
            None => IntegrityChecker::detecting(),
        }
    }

    /// Opens the hash records of `package`, loading them if any were saved.
    async fn open_store(&self, package: Package) -> Result<(Box<dyn HashStore>, bool), ManagerError> {
        let name = package.store_name(&self.options.language);
        let mut store: Box<dyn HashStore> = match &self.hash_db {
            Some(db) => Box::new(db.store(&name)),
            None => Box::new(MemoryHashStore::new()),
        };
        let exists = store.exists().await?;
        if exists {
            store.load().await?;
        }
        Ok((store, exists))
    }

    async fn manifest(&self, package: Package) -> Result<(Manifest, SectionUrl), ManagerError> {
        let url = self.options.index_url(package);
        info!(%package, url, "Manager: retrieving index");
        let manifest = fetch_index(&self.http_client, &url, &self.options.game_dir).await?;
        Ok((manifest, SectionUrl::from_index_url(&url)))
    }

    /// Downloads every configured package in order.
    ///
    /// Listeners receive `on_completed` when every package succeeds, or
    /// `on_failed` with the error that stopped the batch.
    pub async fn download(&self) -> Result<Vec<PackageReport>, ManagerError> {
        let reporter = Arc::new(self.reporter.clone());
        let mut reports = Vec::with_capacity(self.options.packages.len());

        for &package in &self.options.packages {
            match self.download_package(package, &reporter).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    warn!(%package, error = %e, "Manager: package failed");
                    reporter.notify_failed(&e);
                    return Err(e);
                }
            }
        }

        reporter.notify_completed();
        Ok(reports)
    }

    async fn download_package(
        &self,
        package: Package,
        reporter: &Arc<ProgressReporter>,
    ) -> Result<PackageReport, ManagerError> {
        let (manifest, urls) = self.manifest(package).await?;
        let (mut store, exists) = self.open_store(package).await?;

        if exists && is_fully_present(&manifest, store.as_ref()).await {
            info!(%package, files = manifest.files.len(), "Manager: package already complete, skipping");
            reporter.notify(
                manifest.header.length,
                manifest.header.length,
                manifest.header.compressed_length,
                &package.to_string(),
            );
            return Ok(PackageReport {
                package,
                skipped: true,
                run: RunReport::default(),
                verification_failures: Vec::new(),
            });
        }

        let scheduler = GroupScheduler::new(self.fetcher.clone(), self.codec.clone(), reporter.clone())
            .with_max_files_per_group(self.config.max_files_per_group)
            .with_cancellation(self.token.clone());
        let run = scheduler
            .run(&manifest.files, manifest.header, &urls, self.config.max_parallel_groups)
            .await?;

        for file in &manifest.files {
            store.put(&store_key(file), &file.expected_hash);
        }
        store.save().await?;
        info!(%package, written = run.files_written(), skipped = run.files_skipped(), "Manager: package done");

        let verification_failures = if self.config.verify_after_download {
            Verifier::new(self.checker(), reporter.clone())
                .verify_all(&manifest.files, Some(store.as_ref()))
                .await
        } else {
            Vec::new()
        };

        Ok(PackageReport {
            package,
            skipped: false,
            run,
            verification_failures,
        })
    }

    /// Hashes every file of every configured package without downloading
    /// anything. Mismatches are reported and collected, never fatal.
    pub async fn verify_hashes(&self) -> Result<Vec<VerifyReport>, ManagerError> {
        let reporter = Arc::new(self.reporter.clone());
        let verifier = Verifier::new(self.checker(), reporter);
        let mut reports = Vec::with_capacity(self.options.packages.len());

        for &package in &self.options.packages {
            let (manifest, _) = self.manifest(package).await?;
            let (store, _) = self.open_store(package).await?;
            let failures = verifier.verify_all(&manifest.files, Some(store.as_ref())).await;
            reports.push(VerifyReport {
                package,
                checked: manifest.files.len(),
                failures,
            });
        }
        Ok(reports)
    }
}

/// Every file is on disk and recorded with the hash the manifest expects.
async fn is_fully_present(manifest: &Manifest, store: &dyn HashStore) -> bool {
    for file in &manifest.files {
        if store.get(&store_key(file)) != Some(file.expected_hash.as_str()) {
            return false;
        }
        if !tokio::fs::try_exists(file.full_path()).await.unwrap_or(false) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FileDescriptor, IndexHeader, NOT_COMPRESSED};

    fn manifest(dir: &std::path::Path) -> Manifest {
        Manifest {
            header: IndexHeader::default(),
            files: vec![FileDescriptor {
                destination_path: dir.to_path_buf(),
                destination_name: "a.bin".into(),
                original_path: "CDShift".into(),
                expected_hash: "h1".into(),
                revision: 1,
                start_section: 0,
                offset: 0,
                uncompressed_length: 3,
                compressed_length: NOT_COMPRESSED,
            }],
        }
    }

    #[tokio::test]
    async fn complete_package_requires_file_and_matching_record() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = manifest(dir.path());
        let key = store_key(&manifest.files[0]);
        let mut store = MemoryHashStore::new();

        store.put(&key, "h1");
        assert!(!is_fully_present(&manifest, &store).await);

        tokio::fs::write(dir.path().join("a.bin"), b"abc").await.unwrap();
        assert!(is_fully_present(&manifest, &store).await);

        store.put(&key, "h0");
        assert!(!is_fully_present(&manifest, &store).await);
    }

    #[tokio::test]
    async fn hash_db_is_opened_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoaderConfig {
            hash_db: Some(dir.path().join("hashes.db")),
            ..Default::default()
        };
        let manager = DownloadManager::new(config, CdnOptions::default()).await.unwrap();
        assert!(manager.hash_db.is_some());
        assert!(dir.path().join("hashes.db").exists());

        let (store, exists) = manager.open_store(Package::Base).await.unwrap();
        assert!(!exists);
        assert!(store.is_empty());
    }
}
