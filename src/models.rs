// src/models.rs

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Size of the LZMA header preceding every compressed span:
/// 5 property bytes followed by 8 reserved bytes.
pub const COMPRESSION_HEADER_LEN: u64 = 13;

/// Sentinel used by manifests for files stored without compression.
pub const NOT_COMPRESSED: i64 = -1;

/// Aggregate totals read from a manifest header. Informational only;
/// `length` and `compressed_length` are the progress denominators.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexHeader {
    pub length: u64,
    pub compressed_length: u64,
    pub first_cabinet: u64,
    pub last_cabinet: u64,
}

/// One logical file packed into the section stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileDescriptor {
    /// Directory the reconstructed file is written into.
    pub destination_path: PathBuf,
    pub destination_name: String,
    /// Path as it appeared in the manifest, before placeholder rewriting.
    /// Used as the progress label.
    pub original_path: String,
    pub expected_hash: String,
    pub revision: u32,
    /// Id of the section holding the first byte (or compression header).
    pub start_section: u32,
    /// Byte offset of the file inside `start_section`.
    pub offset: u32,
    pub uncompressed_length: u32,
    /// Total size of the compressed region including its header,
    /// or [`NOT_COMPRESSED`].
    pub compressed_length: i64,
}

impl FileDescriptor {
    /// Where the reconstructed file lives on disk.
    pub fn full_path(&self) -> PathBuf {
        self.destination_path.join(&self.destination_name)
    }

    /// Label reported to progress listeners, e.g. `CDShift/Data/file.bin`.
    pub fn label(&self) -> String {
        format!("{}/{}", self.original_path, self.destination_name)
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed_length != NOT_COMPRESSED
    }

    /// Returns the path used while the file is being written.
    /// e.g., for "/game/Data/file.bin", it returns "/game/Data/file.bin.part"
    pub fn temporary_path(&self) -> PathBuf {
        temporary_path(&self.full_path())
    }

    /// Absolute byte range of the span holding this file's body: the raw
    /// bytes when uncompressed, the payload after the header otherwise.
    pub fn span_plan(&self) -> SpanPlan {
        if self.is_compressed() {
            SpanPlan {
                start_section: self.start_section,
                start_offset: self.offset as u64 + COMPRESSION_HEADER_LEN,
                byte_count: (self.compressed_length as u64).saturating_sub(COMPRESSION_HEADER_LEN),
            }
        } else {
            SpanPlan {
                start_section: self.start_section,
                start_offset: self.offset as u64,
                byte_count: self.uncompressed_length as u64,
            }
        }
    }
}

pub(crate) fn temporary_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Precomputed location of a file's span inside the section stream.
/// Replaces any shared read cursor: every reader works from its own plan
/// over immutable buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanPlan {
    pub start_section: u32,
    /// Offset into the starting section's buffer.
    pub start_offset: u64,
    /// Number of bytes the span covers, possibly across sections.
    pub byte_count: u64,
}

impl SpanPlan {
    /// Whether the span runs past the end of a starting buffer of `section_len` bytes.
    pub fn needs_continuation(&self, section_len: u64) -> bool {
        self.start_offset + self.byte_count > section_len
    }
}

/// A parsed manifest: header totals plus every file descriptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub header: IndexHeader,
    pub files: Vec<FileDescriptor>,
}

/// The status of one section group inside a scheduling pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum GroupStatus {
    Pending,
    Fetching,
    /// Index, within the group, of the file being reconstructed.
    Reconstructing(usize),
    Done,
    Failed(Option<String>), // Storing a reason for failure
}

impl GroupStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GroupStatus::Done | GroupStatus::Failed(_))
    }
}
