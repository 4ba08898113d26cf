use std::io::{Cursor, Read};

use thiserror::Error;
use xz2::read::XzDecoder;
use xz2::stream::Stream;

use crate::models::COMPRESSION_HEADER_LEN;

const PROPERTIES_LEN: usize = 5;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("lzma backend error: {0}")]
    Backend(#[from] xz2::stream::Error),
    #[error("decoder failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("decoded {actual} bytes, expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Decompression capability consumed by the reconstructor.
///
/// Decoding is CPU bound; callers run it on the blocking pool.
pub trait Codec: Send + Sync {
    fn decompress(
        &self,
        payload: &[u8],
        properties: &[u8; PROPERTIES_LEN],
        expected_len: usize,
    ) -> Result<Vec<u8>, DecodeError>;
}

/// The 13 bytes in front of every compressed span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionHeader {
    pub properties: [u8; PROPERTIES_LEN],
    /// Carried verbatim, never interpreted.
    pub reserved: [u8; 8],
}

impl CompressionHeader {
    /// Reads the header at `offset`. The header never spans a section
    /// boundary, so it must lie entirely inside `buffer`.
    pub fn read(buffer: &[u8], offset: usize) -> Option<Self> {
        let end = offset.checked_add(COMPRESSION_HEADER_LEN as usize)?;
        let raw = buffer.get(offset..end)?;
        let mut properties = [0u8; PROPERTIES_LEN];
        let mut reserved = [0u8; 8];
        properties.copy_from_slice(&raw[..PROPERTIES_LEN]);
        reserved.copy_from_slice(&raw[PROPERTIES_LEN..]);
        Some(Self { properties, reserved })
    }
}

/// LZMA decoding through liblzma's `.lzma` (LZMA-alone) decoder.
///
/// The stream header is rebuilt from the five property bytes with the size
/// field marked unknown; output is bounded by the expected length instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct LzmaCodec;

impl LzmaCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Codec for LzmaCodec {
    fn decompress(
        &self,
        payload: &[u8],
        properties: &[u8; PROPERTIES_LEN],
        expected_len: usize,
    ) -> Result<Vec<u8>, DecodeError> {
        let stream = Stream::new_lzma_decoder(u64::MAX)?;

        let mut header = [0u8; COMPRESSION_HEADER_LEN as usize];
        header[..PROPERTIES_LEN].copy_from_slice(properties);
        header[PROPERTIES_LEN..].copy_from_slice(&u64::MAX.to_le_bytes());

        let input = Cursor::new(header).chain(payload);
        let mut decoder = XzDecoder::new_stream(input, stream);
        let mut out = Vec::with_capacity(expected_len);
        (&mut decoder).take(expected_len as u64).read_to_end(&mut out)?;

        if out.len() != expected_len {
            return Err(DecodeError::LengthMismatch {
                expected: expected_len,
                actual: out.len(),
            });
        }
        Ok(out)
    }
}

/// Produces an LZMA-alone stream: 5 property bytes, 8 size bytes, payload.
#[cfg(test)]
pub(crate) fn lzma_alone_compress(data: &[u8]) -> Vec<u8> {
    use xz2::read::XzEncoder;
    use xz2::stream::LzmaOptions;

    let options = LzmaOptions::new_preset(6).unwrap();
    let stream = Stream::new_lzma_encoder(&options).unwrap();
    let mut encoder = XzEncoder::new_stream(data, stream);
    let mut out = Vec::new();
    encoder.read_to_end(&mut out).unwrap();
    out
}
