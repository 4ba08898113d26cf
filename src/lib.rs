pub mod codec;
pub mod config;
pub mod fetcher;
pub mod hash_store;
pub mod integrity;
pub mod manager;
pub mod manifest;
pub mod models;
pub mod progress;
pub mod reconstructor;
pub mod scheduler;
pub mod source;
pub mod span;
pub mod verifier;

/// Convenient type alias exposing common structs.
pub mod prelude {
    pub use crate::codec::{Codec, LzmaCodec};
    pub use crate::config::{CdnOptions, LoaderConfig, Package, Settings};
    pub use crate::fetcher::{HttpSectionFetcher, SectionFetcher, SectionUrl};
    pub use crate::hash_store::{HashDatabase, HashStore, MemoryHashStore};
    pub use crate::integrity::{HashAlgorithm, IntegrityChecker};
    pub use crate::manager::{DownloadManager, ManagerError, PackageReport, VerifyReport};
    pub use crate::models::{FileDescriptor, GroupStatus, IndexHeader, Manifest};
    pub use crate::progress::{ChannelListener, DownloadEvent, DownloadListener, ProgressReporter, TracingListener};
    pub use crate::scheduler::{GroupScheduler, RunReport};
    pub use crate::source::{DownloadSource, SourceSummary, Sources};
}
