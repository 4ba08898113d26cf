//! Index documents describing one package of the section stream.
//!
//! An index is XML with a single `<header>` carrying aggregate totals and
//! one `<fileinfo>` element per packed file:
//!
//! ```xml
//! <index>
//!   <header>
//!     <length>1234</length><compressed>987</compressed>
//!     <firstcab>0</firstcab><lastcab>3</lastcab>
//!   </header>
//!   <fileinfo>
//!     <path>CDShift/Data</path><file>a.bin</file><hash>...</hash>
//!     <revision>1</revision><section>0</section><offset>0</offset>
//!     <length>100</length><compressed>60</compressed>
//!   </fileinfo>
//! </index>
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::fetcher::FetchError;
use crate::models::{FileDescriptor, IndexHeader, Manifest, COMPRESSION_HEADER_LEN, NOT_COMPRESSED};

/// Directory placeholder used by index paths.
pub const GAME_DIR_PLACEHOLDER: &str = "CDShift";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl From<reqwest::Error> for ManifestError {
    fn from(err: reqwest::Error) -> Self {
        ManifestError::Fetch(FetchError::Transport(err))
    }
}

#[derive(Debug, Deserialize)]
struct RawIndex {
    #[serde(default)]
    header: Vec<RawHeader>,
    #[serde(rename = "fileinfo", default)]
    files: Vec<RawFileInfo>,
}

#[derive(Debug, Deserialize)]
struct RawHeader {
    length: Option<String>,
    compressed: Option<String>,
    firstcab: Option<String>,
    lastcab: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawFileInfo {
    path: Option<String>,
    file: Option<String>,
    hash: Option<String>,
    revision: Option<String>,
    section: Option<String>,
    offset: Option<String>,
    length: Option<String>,
    compressed: Option<String>,
}

fn required<'a>(value: &'a Option<String>, what: &str) -> Result<&'a str, ManifestError> {
    value
        .as_deref()
        .map(str::trim)
        .ok_or_else(|| ManifestError::InvalidMetadata(format!("missing {what}")))
}

fn number<T: FromStr>(value: &Option<String>, what: &str) -> Result<T, ManifestError> {
    let raw = required(value, what)?;
    raw.parse()
        .map_err(|_| ManifestError::InvalidMetadata(format!("{what} is not a valid number: {raw:?}")))
}

/// `-1` or a size that covers at least the compression header.
fn compressed_length(value: &Option<String>) -> Result<i64, ManifestError> {
    let length: i32 = number(value, "compressed length")?;
    let length = i64::from(length);
    if length == NOT_COMPRESSED || (COMPRESSION_HEADER_LEN as i64..=i32::MAX as i64).contains(&length) {
        Ok(length)
    } else {
        Err(ManifestError::InvalidMetadata(format!(
            "compressed length {length} is neither -1 nor at least {COMPRESSION_HEADER_LEN}"
        )))
    }
}

/// Replaces the placeholder in an index path with the game directory.
pub fn resolve_path(raw: &str, game_dir: &Path) -> PathBuf {
    match raw.strip_prefix(GAME_DIR_PLACEHOLDER) {
        Some(rest) => {
            let rest = rest.trim_start_matches(['/', '\\']);
            rest.split(['/', '\\'])
                .filter(|part| !part.is_empty())
                .fold(game_dir.to_path_buf(), |acc, part| acc.join(part))
        }
        None => PathBuf::from(raw),
    }
}

impl Manifest {
    /// Parses an index document, placing files under `game_dir`.
    pub fn parse(xml: &str, game_dir: &Path) -> Result<Self, ManifestError> {
        let raw: RawIndex = quick_xml::de::from_str(xml)
            .map_err(|e| ManifestError::InvalidMetadata(format!("malformed index: {e}")))?;

        if raw.header.len() != 1 {
            return Err(ManifestError::InvalidMetadata(format!(
                "expected exactly one header, found {}",
                raw.header.len()
            )));
        }
        let h = &raw.header[0];
        let header = IndexHeader {
            length: number(&h.length, "header length")?,
            compressed_length: number(&h.compressed, "header compressed length")?,
            first_cabinet: number(&h.firstcab, "header firstcab")?,
            last_cabinet: number(&h.lastcab, "header lastcab")?,
        };

        let mut files = Vec::with_capacity(raw.files.len());
        for info in &raw.files {
            let original_path = required(&info.path, "file path")?.to_string();
            let compressed_length = match &info.compressed {
                Some(_) => compressed_length(&info.compressed)?,
                None => NOT_COMPRESSED,
            };
            files.push(FileDescriptor {
                destination_path: resolve_path(&original_path, game_dir),
                destination_name: required(&info.file, "file name")?.to_string(),
                expected_hash: required(&info.hash, "file hash")?.to_string(),
                revision: number(&info.revision, "revision")?,
                start_section: number(&info.section, "section")?,
                offset: number(&info.offset, "offset")?,
                uncompressed_length: number(&info.length, "length")?,
                compressed_length,
                original_path,
            });
        }

        Ok(Manifest { header, files })
    }
}

/// Downloads and parses the index at `url`.
pub async fn fetch_index(client: &Client, url: &str, game_dir: &Path) -> Result<Manifest, ManifestError> {
    debug!(url, "retrieving index");
    let resp = client.get(url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        }
        .into());
    }
    let body = resp.text().await?;
    Manifest::parse(&body, game_dir)
}
