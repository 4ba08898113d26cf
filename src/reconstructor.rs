use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::codec::{Codec, CompressionHeader, DecodeError};
use crate::fetcher::{FetchError, SectionFetcher, SectionUrl};
use crate::models::{FileDescriptor, COMPRESSION_HEADER_LEN};
use crate::span::{SpanError, SpanReader};

#[derive(Debug, Error)]
pub enum ReconstructError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Span(SpanError),
    #[error("decode error for {}: {source}", path.display())]
    Decode { path: PathBuf, source: DecodeError },
    #[error("corrupt data for {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("decoder task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<SpanError> for ReconstructError {
    fn from(err: SpanError) -> Self {
        match err {
            SpanError::Fetch(e) => ReconstructError::Fetch(e),
            other => ReconstructError::Span(other),
        }
    }
}

/// A file that was written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconstructionResult {
    pub path: PathBuf,
    pub bytes_written: u64,
}

/// Rebuilds files from their spans and persists them.
pub struct FileReconstructor {
    fetcher: Arc<dyn SectionFetcher>,
    codec: Arc<dyn Codec>,
    urls: SectionUrl,
}

impl FileReconstructor {
    pub fn new(fetcher: Arc<dyn SectionFetcher>, codec: Arc<dyn Codec>, urls: SectionUrl) -> Self {
        Self { fetcher, codec, urls }
    }

    pub fn urls(&self) -> &SectionUrl {
        &self.urls
    }

    /// Produces the final bytes of `descriptor` starting from the already
    /// fetched buffer of its starting section.
    pub async fn extract(&self, descriptor: &FileDescriptor, start: &Bytes) -> Result<Bytes, ReconstructError> {
        let reader = SpanReader::new(self.fetcher.as_ref(), &self.urls);
        let plan = descriptor.span_plan();

        if !descriptor.is_compressed() {
            let raw = reader.read_span(&plan, start).await?;
            return Ok(raw);
        }

        if descriptor.compressed_length < COMPRESSION_HEADER_LEN as i64 {
            return Err(ReconstructError::Corrupt {
                path: descriptor.full_path(),
                reason: format!("compressed length {} is shorter than its header", descriptor.compressed_length),
            });
        }
        let header = CompressionHeader::read(start, descriptor.offset as usize).ok_or_else(|| {
            ReconstructError::Corrupt {
                path: descriptor.full_path(),
                reason: format!(
                    "compression header at offset {} does not fit in section {} ({} bytes)",
                    descriptor.offset,
                    descriptor.start_section,
                    start.len()
                ),
            }
        })?;

        let payload = reader.read_span(&plan, start).await?;
        let codec = self.codec.clone();
        let expected = descriptor.uncompressed_length as usize;
        let decoded = tokio::task::spawn_blocking(move || {
            codec.decompress(&payload, &header.properties, expected)
        })
        .await?;

        match decoded {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(DecodeError::LengthMismatch { expected, actual }) => Err(ReconstructError::Corrupt {
                path: descriptor.full_path(),
                reason: format!("decoded {actual} bytes, expected {expected}"),
            }),
            Err(source) => Err(ReconstructError::Decode {
                path: descriptor.full_path(),
                source,
            }),
        }
    }

    /// Extracts `descriptor` and writes it to its destination, overwriting
    /// any existing file. The data goes to a temporary file first and is
    /// renamed into place, so an aborted write never leaves a partial final
    /// file behind.
    pub async fn reconstruct(
        &self,
        descriptor: &FileDescriptor,
        start: &Bytes,
    ) -> Result<ReconstructionResult, ReconstructError> {
        let data = self.extract(descriptor, start).await?;
        if data.len() as u64 != descriptor.uncompressed_length as u64 {
            return Err(ReconstructError::Corrupt {
                path: descriptor.full_path(),
                reason: format!(
                    "reconstructed {} bytes, expected {}",
                    data.len(),
                    descriptor.uncompressed_length
                ),
            });
        }

        tokio::fs::create_dir_all(&descriptor.destination_path).await?;
        let final_path = descriptor.full_path();
        let temp_path = descriptor.temporary_path();

        let written = write_file(&temp_path, &data).await;
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        tokio::fs::rename(&temp_path, &final_path).await?;

        debug!(path = %final_path.display(), bytes = data.len(), "file reconstructed");
        Ok(ReconstructionResult {
            path: final_path,
            bytes_written: data.len() as u64,
        })
    }
}

async fn write_file(path: &std::path::Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(data).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}
