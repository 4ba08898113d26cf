use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::hash_store::HashStore;
use crate::integrity::{IntegrityChecker, IntegrityError};
use crate::models::FileDescriptor;
use crate::progress::ProgressReporter;

/// Key under which a file's hash is recorded in a [`HashStore`].
pub fn store_key(descriptor: &FileDescriptor) -> String {
    descriptor.full_path().to_string_lossy().into_owned()
}

/// A file that did not pass verification.
#[derive(Debug)]
pub struct VerificationFailure {
    pub path: PathBuf,
    pub error: IntegrityError,
}

/// Sweeps materialized files against their expected hashes.
///
/// A mismatch is reported to listeners and collected; the sweep always
/// covers every descriptor.
pub struct Verifier {
    checker: IntegrityChecker,
    reporter: Arc<ProgressReporter>,
}

impl Verifier {
    pub fn new(checker: IntegrityChecker, reporter: Arc<ProgressReporter>) -> Self {
        Self { checker, reporter }
    }

    pub async fn verify_all(
        &self,
        descriptors: &[FileDescriptor],
        store: Option<&dyn HashStore>,
    ) -> Vec<VerificationFailure> {
        let total = descriptors.len();
        let mut failures = Vec::new();

        for (i, descriptor) in descriptors.iter().enumerate() {
            let path = descriptor.full_path();
            self.reporter
                .notify_verification(&path, &descriptor.label(), i + 1, total);

            let key = store_key(descriptor);
            let expected = store
                .and_then(|s| s.get(&key))
                .unwrap_or(descriptor.expected_hash.as_str());

            match self.checker.verify(&path, expected).await {
                Ok(()) => {}
                Err(IntegrityError::Mismatch { path, expected, actual }) => {
                    self.reporter
                        .notify_verification_failure(&path, &expected, &actual);
                    failures.push(VerificationFailure {
                        path: path.clone(),
                        error: IntegrityError::Mismatch { path, expected, actual },
                    });
                }
                Err(error) => {
                    warn!(path = %path.display(), %error, "could not hash file");
                    failures.push(VerificationFailure { path, error });
                }
            }
        }

        info!(total, failed = failures.len(), "verification finished");
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash_store::MemoryHashStore;
    use crate::models::NOT_COMPRESSED;
    use crate::progress::{ChannelListener, DownloadEvent};
    use std::path::Path;

    const HELLO_MD5: &str = "XrY7u+Ae7tCTyyK7j1rNww==";

    fn descriptor(dir: &Path, name: &str, hash: &str) -> FileDescriptor {
        FileDescriptor {
            destination_path: dir.to_path_buf(),
            destination_name: name.into(),
            original_path: "CDShift".into(),
            expected_hash: hash.into(),
            revision: 1,
            start_section: 0,
            offset: 0,
            uncompressed_length: 11,
            compressed_length: NOT_COMPRESSED,
        }
    }

    #[tokio::test]
    async fn one_mutated_byte_yields_one_failure() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.txt"), b"hello world").await.unwrap();
        tokio::fs::write(dir.path().join("c.txt"), b"hello world").await.unwrap();
        tokio::fs::write(dir.path().join("b.txt"), b"hello worle").await.unwrap();

        let descriptors = vec![
            descriptor(dir.path(), "a.txt", HELLO_MD5),
            descriptor(dir.path(), "b.txt", HELLO_MD5),
            descriptor(dir.path(), "c.txt", HELLO_MD5),
        ];

        let (listener, mut rx) = ChannelListener::new();
        let mut reporter = ProgressReporter::new();
        reporter.register(Arc::new(listener));
        let verifier = Verifier::new(IntegrityChecker::detecting(), Arc::new(reporter));

        let failures = verifier.verify_all(&descriptors, None).await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].path, dir.path().join("b.txt"));

        let mut progress = Vec::new();
        let mut mismatches = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                DownloadEvent::VerificationProgress { index, total, .. } => progress.push((index, total)),
                DownloadEvent::VerificationFailed { expected, .. } => {
                    assert_eq!(expected, HELLO_MD5);
                    mismatches += 1;
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(progress, vec![(1, 3), (2, 3), (3, 3)]);
        assert_eq!(mismatches, 1);
    }

    #[tokio::test]
    async fn stored_hash_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.txt"), b"hello world").await.unwrap();
        let d = descriptor(dir.path(), "a.txt", "stale");

        let mut store = MemoryHashStore::new();
        store.put(&store_key(&d), HELLO_MD5);

        let verifier = Verifier::new(IntegrityChecker::detecting(), Arc::new(ProgressReporter::new()));
        assert!(verifier.verify_all(&[d.clone()], Some(&store as &dyn HashStore)).await.is_empty());
        assert_eq!(verifier.verify_all(&[d], None).await.len(), 1);
    }

    #[tokio::test]
    async fn missing_file_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let verifier = Verifier::new(IntegrityChecker::detecting(), Arc::new(ProgressReporter::new()));
        let failures = verifier
            .verify_all(&[descriptor(dir.path(), "gone.txt", HELLO_MD5)], None)
            .await;
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0].error, IntegrityError::Io(_)));
    }
}
