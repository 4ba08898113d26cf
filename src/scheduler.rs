// src/scheduler.rs

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::Codec;
use crate::fetcher::{CancellableFetcher, FetchError, SectionFetcher, SectionUrl};
use crate::models::{FileDescriptor, GroupStatus, IndexHeader};
use crate::progress::{ProgressCounter, ProgressReporter};
use crate::reconstructor::{FileReconstructor, ReconstructError};

/// Default bound on concurrently processed section groups.
pub const DEFAULT_MAX_PARALLEL_GROUPS: usize = 32;

/// Default bound on concurrently reconstructed files inside one group.
pub const DEFAULT_MAX_FILES_PER_GROUP: usize = 8;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("{} of {total} section groups failed", .failures.len())]
    GroupsFailed {
        failures: Vec<GroupFailure>,
        total: usize,
    },
    #[error("download cancelled")]
    Cancelled,
}

/// The error that moved one group to [`GroupStatus::Failed`].
#[derive(Debug)]
pub struct GroupFailure {
    pub section: u32,
    pub error: ReconstructError,
}

/// Descriptors sharing a starting section.
#[derive(Debug, Clone)]
pub struct SectionGroup {
    pub section: u32,
    pub files: Vec<FileDescriptor>,
}

/// Groups descriptors by starting section, in ascending section order.
/// Files keep their manifest order inside a group.
pub fn group_by_section(descriptors: &[FileDescriptor]) -> Vec<SectionGroup> {
    let mut groups: BTreeMap<u32, Vec<FileDescriptor>> = BTreeMap::new();
    for d in descriptors {
        groups.entry(d.start_section).or_default().push(d.clone());
    }
    groups
        .into_iter()
        .map(|(section, files)| SectionGroup { section, files })
        .collect()
}

/// What happened to one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupOutcome {
    pub section: u32,
    pub status: GroupStatus,
    /// Files written during this pass.
    pub written: Vec<PathBuf>,
    /// Files that were already on disk.
    pub skipped: Vec<PathBuf>,
    /// Whether the starting section had to be fetched.
    pub fetched: bool,
}

/// Result of a scheduling pass, one outcome per group in section order.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub groups: Vec<GroupOutcome>,
}

impl RunReport {
    pub fn files_written(&self) -> usize {
        self.groups.iter().map(|g| g.written.len()).sum()
    }

    pub fn files_skipped(&self) -> usize {
        self.groups.iter().map(|g| g.skipped.len()).sum()
    }

    pub fn sections_fetched(&self) -> usize {
        self.groups.iter().filter(|g| g.fetched).count()
    }

    pub fn all_done(&self) -> bool {
        self.groups.iter().all(|g| g.status == GroupStatus::Done)
    }
}

/// Drives fetch, reconstruction and progress reporting for the section
/// groups of one manifest.
///
/// Groups run concurrently up to `max_parallel_groups`. A failing group is
/// marked [`GroupStatus::Failed`] and does not stop its siblings; once every
/// group has settled the failures are returned together.
pub struct GroupScheduler {
    fetcher: Arc<dyn SectionFetcher>,
    codec: Arc<dyn Codec>,
    reporter: Arc<ProgressReporter>,
    max_files_per_group: usize,
    token: CancellationToken,
    statuses: Arc<Mutex<HashMap<u32, GroupStatus>>>,
}

impl GroupScheduler {
    pub fn new(fetcher: Arc<dyn SectionFetcher>, codec: Arc<dyn Codec>, reporter: Arc<ProgressReporter>) -> Self {
        Self {
            fetcher,
            codec,
            reporter,
            max_files_per_group: DEFAULT_MAX_FILES_PER_GROUP,
            token: CancellationToken::new(),
            statuses: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_max_files_per_group(self, max_files_per_group: usize) -> Self {
        Self {
            max_files_per_group: max_files_per_group.max(1),
            ..self
        }
    }

    pub fn with_cancellation(self, token: CancellationToken) -> Self {
        Self { token, ..self }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Snapshot of the per-group state machine, keyed by starting section.
    pub async fn statuses(&self) -> HashMap<u32, GroupStatus> {
        self.statuses.lock().await.clone()
    }

    /// Downloads every descriptor not yet present on disk.
    pub async fn run(
        &self,
        descriptors: &[FileDescriptor],
        header: IndexHeader,
        urls: &SectionUrl,
        max_parallel_groups: usize,
    ) -> Result<RunReport, SchedulerError> {
        let groups = group_by_section(descriptors);
        let total = groups.len();
        info!(
            base = urls.base(),
            files = descriptors.len(),
            groups = total,
            "scheduling section groups"
        );

        {
            let mut statuses = self.statuses.lock().await;
            statuses.clear();
            for group in &groups {
                statuses.insert(group.section, GroupStatus::Pending);
            }
        }

        let fetcher: Arc<dyn SectionFetcher> =
            Arc::new(CancellableFetcher::new(self.fetcher.clone(), self.token.clone()));
        let reconstructor = FileReconstructor::new(fetcher.clone(), self.codec.clone(), urls.clone());
        let counter = ProgressCounter::new(header);

        let mut results: Vec<(GroupOutcome, Option<GroupFailure>)> = stream::iter(groups)
            .map(|group| self.run_group(group, fetcher.as_ref(), &reconstructor, &counter))
            .buffer_unordered(max_parallel_groups.max(1))
            .collect()
            .await;
        results.sort_by_key(|(outcome, _)| outcome.section);

        let mut report = RunReport::default();
        let mut failures = Vec::new();
        for (outcome, failure) in results {
            report.groups.push(outcome);
            failures.extend(failure);
        }

        if self.token.is_cancelled() {
            warn!("download cancelled");
            return Err(SchedulerError::Cancelled);
        }
        if !failures.is_empty() {
            return Err(SchedulerError::GroupsFailed { failures, total });
        }
        info!(
            written = report.files_written(),
            skipped = report.files_skipped(),
            bytes = counter.so_far(),
            "all section groups done"
        );
        Ok(report)
    }

    async fn set_status(&self, section: u32, status: GroupStatus) {
        debug!(section, ?status, "group status");
        self.statuses.lock().await.insert(section, status);
    }

    async fn run_group(
        &self,
        group: SectionGroup,
        fetcher: &dyn SectionFetcher,
        reconstructor: &FileReconstructor,
        counter: &ProgressCounter,
    ) -> (GroupOutcome, Option<GroupFailure>) {
        let section = group.section;
        let mut outcome = GroupOutcome {
            section,
            status: GroupStatus::Pending,
            written: Vec::new(),
            skipped: Vec::new(),
            fetched: false,
        };

        // Files already on disk are reported as downloaded without touching the network.
        let mut pending = Vec::with_capacity(group.files.len());
        for file in group.files {
            let path = file.full_path();
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                counter.advance(&self.reporter, file.uncompressed_length as u64, &file.label());
                outcome.skipped.push(path);
            } else {
                pending.push(file);
            }
        }

        if pending.is_empty() {
            debug!(section, "every file present, section not fetched");
            outcome.status = GroupStatus::Done;
            self.set_status(section, GroupStatus::Done).await;
            return (outcome, None);
        }

        if let Err(error) = self.fill_group(section, pending, fetcher, reconstructor, counter, &mut outcome).await {
            let reason = error.to_string();
            warn!(section, error = %reason, "section group failed");
            outcome.status = GroupStatus::Failed(Some(reason.clone()));
            self.set_status(section, GroupStatus::Failed(Some(reason))).await;
            return (outcome, Some(GroupFailure { section, error }));
        }

        outcome.status = GroupStatus::Done;
        self.set_status(section, GroupStatus::Done).await;
        (outcome, None)
    }

    /// Fetches the group's starting section once and reconstructs `pending`
    /// against it.
    async fn fill_group(
        &self,
        section: u32,
        pending: Vec<FileDescriptor>,
        fetcher: &dyn SectionFetcher,
        reconstructor: &FileReconstructor,
        counter: &ProgressCounter,
        outcome: &mut GroupOutcome,
    ) -> Result<(), ReconstructError> {
        if self.token.is_cancelled() {
            return Err(FetchError::Cancelled(reconstructor.urls().section(section)).into());
        }

        self.set_status(section, GroupStatus::Fetching).await;
        let buffer = fetcher.fetch(&reconstructor.urls().section(section)).await?;
        outcome.fetched = true;

        // The buffer is immutable and every file reads its own absolute
        // range, so files of one group can be rebuilt concurrently.
        let buffer = &buffer;
        let jobs: Vec<_> = pending
            .iter()
            .enumerate()
            .map(|(index, file)| async move {
                self.set_status(section, GroupStatus::Reconstructing(index)).await;
                reconstructor.reconstruct(file, buffer).await.map(|result| (file, result))
            })
            .collect();
        let mut files = stream::iter(jobs).buffer_unordered(self.max_files_per_group);

        while let Some(result) = files.next().await {
            let (file, written) = result?;
            counter.advance(&self.reporter, file.uncompressed_length as u64, &file.label());
            outcome.written.push(written.path);
        }
        Ok(())
    }
}
