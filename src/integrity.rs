use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, BufReader};

#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("expected hash {expected} for {}, got {actual}", path.display())]
    Mismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
}

/// Hash functions found in manifests.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// Legacy manifests: MD5 digest, base64 encoded.
    Md5Base64,
    /// SHA-256 digest, lowercase hex.
    Sha256Hex,
}

impl HashAlgorithm {
    /// Guess the algorithm from the shape of an expected hash.
    pub fn detect(expected: &str) -> Self {
        if expected.len() == 64 && expected.bytes().all(|b| b.is_ascii_hexdigit()) {
            HashAlgorithm::Sha256Hex
        } else {
            HashAlgorithm::Md5Base64
        }
    }

    fn matches(&self, expected: &str, actual: &str) -> bool {
        match self {
            HashAlgorithm::Md5Base64 => expected == actual,
            HashAlgorithm::Sha256Hex => expected.eq_ignore_ascii_case(actual),
        }
    }
}

/// Compute SHA256 hash of a file asynchronously.
pub async fn sha256_sum(path: &Path) -> Result<String, IntegrityError> {
    let mut hasher = Sha256::new();
    read_into(path, |chunk| hasher.update(chunk)).await?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Compute the base64 encoded MD5 digest of a file.
pub async fn md5_base64_sum(path: &Path) -> Result<String, IntegrityError> {
    let mut hasher = Md5::new();
    read_into(path, |chunk| hasher.update(chunk)).await?;
    Ok(BASE64.encode(hasher.finalize()))
}

async fn read_into(path: &Path, mut update: impl FnMut(&[u8])) -> Result<(), IntegrityError> {
    let file = File::open(path).await?;
    let mut reader = BufReader::new(file);
    let mut buffer = [0u8; 1024 * 8];
    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 { break; }
        update(&buffer[..n]);
    }
    Ok(())
}

/// Hashes materialized files and compares them to manifest values.
/// Reporting only: a mismatching file is left where it is.
#[derive(Debug, Clone, Copy)]
pub struct IntegrityChecker {
    algorithm: Option<HashAlgorithm>,
}

impl IntegrityChecker {
    /// Checker with a fixed algorithm.
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self { algorithm: Some(algorithm) }
    }

    /// Checker that picks the algorithm per expected hash.
    pub fn detecting() -> Self {
        Self { algorithm: None }
    }

    pub async fn digest(&self, path: &Path, expected: &str) -> Result<String, IntegrityError> {
        match self.algorithm_for(expected) {
            HashAlgorithm::Md5Base64 => md5_base64_sum(path).await,
            HashAlgorithm::Sha256Hex => sha256_sum(path).await,
        }
    }

    pub async fn verify(&self, path: &Path, expected: &str) -> Result<(), IntegrityError> {
        let actual = self.digest(path, expected).await?;
        if self.algorithm_for(expected).matches(expected, &actual) {
            Ok(())
        } else {
            Err(IntegrityError::Mismatch {
                path: path.to_path_buf(),
                expected: expected.to_string(),
                actual,
            })
        }
    }

    fn algorithm_for(&self, expected: &str) -> HashAlgorithm {
        self.algorithm.unwrap_or_else(|| HashAlgorithm::detect(expected))
    }
}

impl Default for IntegrityChecker {
    fn default() -> Self {
        Self::detecting()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // md5("hello world") and sha256("hello world").
    const MD5_B64: &str = "XrY7u+Ae7tCTyyK7j1rNww==";
    const SHA256_HEX: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn detects_algorithm_from_shape() {
        assert_eq!(HashAlgorithm::detect(SHA256_HEX), HashAlgorithm::Sha256Hex);
        assert_eq!(HashAlgorithm::detect(MD5_B64), HashAlgorithm::Md5Base64);
    }

    #[tokio::test]
    async fn computes_both_digests() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        tokio::fs::write(&path, b"hello world").await.unwrap();

        assert_eq!(md5_base64_sum(&path).await.unwrap(), MD5_B64);
        assert_eq!(sha256_sum(&path).await.unwrap(), SHA256_HEX);
    }

    #[tokio::test]
    async fn verify_reports_mismatch_without_touching_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        tokio::fs::write(&path, b"hello world!").await.unwrap();

        let checker = IntegrityChecker::new(HashAlgorithm::Md5Base64);
        match checker.verify(&path, MD5_B64).await {
            Err(IntegrityError::Mismatch { path: p, expected, actual }) => {
                assert_eq!(p, path);
                assert_eq!(expected, MD5_B64);
                assert_ne!(actual, MD5_B64);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(path.exists());
    }

    #[tokio::test]
    async fn detecting_checker_accepts_uppercase_hex() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        tokio::fs::write(&path, b"hello world").await.unwrap();

        let checker = IntegrityChecker::detecting();
        checker.verify(&path, &SHA256_HEX.to_uppercase()).await.unwrap();
        checker.verify(&path, MD5_B64).await.unwrap();
    }
}
