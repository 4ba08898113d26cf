//! Extraction of a file's byte span from the section stream.
//!
//! Files are packed back to back with no gaps, so a span that runs past the
//! end of its starting section continues at offset 0 of the next one. The
//! next section's URL depends on how many bytes are still missing, so
//! continuation fetches are strictly sequential.

use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

use crate::fetcher::{FetchError, SectionFetcher, SectionUrl};
use crate::models::SpanPlan;

/// Upper bound on the up-front reservation for a stitched span; the buffer
/// grows past it only as continuation bytes actually arrive.
const PREALLOC_LIMIT: u64 = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum SpanError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("offset {offset} is outside section {section} ({len} bytes)")]
    OffsetOutOfRange { section: u32, offset: u64, len: u64 },
    #[error("continuation section {section} is empty with {missing} bytes still missing")]
    EmptyContinuation { section: u32, missing: u64 },
}

/// Reads spans described by [`SpanPlan`]s, fetching continuation sections
/// from `fetcher` when a span crosses the end of its starting buffer.
pub struct SpanReader<'a, F: ?Sized> {
    fetcher: &'a F,
    urls: &'a SectionUrl,
}

impl<'a, F: SectionFetcher + ?Sized> SpanReader<'a, F> {
    pub fn new(fetcher: &'a F, urls: &'a SectionUrl) -> Self {
        Self { fetcher, urls }
    }

    /// Returns exactly `plan.byte_count` bytes starting at
    /// `plan.start_offset` of `start`, continuing into later sections.
    pub async fn read_span(&self, plan: &SpanPlan, start: &Bytes) -> Result<Bytes, SpanError> {
        let len = start.len() as u64;
        if plan.start_offset > len {
            return Err(SpanError::OffsetOutOfRange {
                section: plan.start_section,
                offset: plan.start_offset,
                len,
            });
        }

        let available = len - plan.start_offset;
        let begin = plan.start_offset as usize;
        if available >= plan.byte_count {
            // Single-section fast path: a zero-copy view into the shared buffer.
            return Ok(start.slice(begin..begin + plan.byte_count as usize));
        }

        let mut out = Vec::with_capacity(plan.byte_count.min(PREALLOC_LIMIT) as usize);
        out.extend_from_slice(&start[begin..]);

        let mut section = plan.start_section;
        while (out.len() as u64) < plan.byte_count {
            section += 1;
            let missing = plan.byte_count - out.len() as u64;
            let url = self.urls.section(section);
            debug!(url = %url, missing, "span continues into next section");

            let next = self.fetcher.fetch(&url).await?;
            if next.is_empty() {
                return Err(SpanError::EmptyContinuation { section, missing });
            }
            let take = (next.len() as u64).min(missing) as usize;
            out.extend_from_slice(&next[..take]);
        }

        Ok(Bytes::from(out))
    }
}
