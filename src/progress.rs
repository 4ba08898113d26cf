//! Fan-out of download and verification events.
//!
//! Listeners are invoked synchronously, in registration order, and every
//! listener sees every event. Callers that prefer to drain events from a
//! queue register a [`ChannelListener`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

use crate::models::IndexHeader;

/// Observer of a download batch. Every method defaults to a no-op.
pub trait DownloadListener: Send + Sync {
    /// A file finished (written or already present). `so_far` is cumulative
    /// for the manifest the file belongs to.
    fn on_progress(&self, _total: u64, _so_far: u64, _total_compressed: u64, _label: &str) {}

    fn on_verification_progress(&self, _path: &Path, _display: &str, _index: usize, _total: usize) {}

    fn on_verification_failed(&self, _path: &Path, _expected: &str, _actual: &str) {}

    fn on_completed(&self) {}

    fn on_failed(&self, _error: &(dyn std::error::Error + Send + Sync)) {}
}

/// Event values forwarded by [`ChannelListener`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DownloadEvent {
    Progress {
        total: u64,
        so_far: u64,
        total_compressed: u64,
        label: String,
    },
    VerificationProgress {
        path: PathBuf,
        display: String,
        index: usize,
        total: usize,
    },
    VerificationFailed {
        path: PathBuf,
        expected: String,
        actual: String,
    },
    Completed,
    Failed(String),
}

/// Forwards every event into an unbounded channel.
pub struct ChannelListener {
    tx: UnboundedSender<DownloadEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, UnboundedReceiver<DownloadEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: DownloadEvent) {
        // A dropped receiver just means nobody is listening anymore.
        let _ = self.tx.send(event);
    }
}

impl DownloadListener for ChannelListener {
    fn on_progress(&self, total: u64, so_far: u64, total_compressed: u64, label: &str) {
        self.send(DownloadEvent::Progress {
            total,
            so_far,
            total_compressed,
            label: label.to_string(),
        });
    }

    fn on_verification_progress(&self, path: &Path, display: &str, index: usize, total: usize) {
        self.send(DownloadEvent::VerificationProgress {
            path: path.to_path_buf(),
            display: display.to_string(),
            index,
            total,
        });
    }

    fn on_verification_failed(&self, path: &Path, expected: &str, actual: &str) {
        self.send(DownloadEvent::VerificationFailed {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }

    fn on_completed(&self) {
        self.send(DownloadEvent::Completed);
    }

    fn on_failed(&self, error: &(dyn std::error::Error + Send + Sync)) {
        self.send(DownloadEvent::Failed(error.to_string()));
    }
}

/// Logs events through `tracing`; progress is reported once per percent.
#[derive(Default)]
pub struct TracingListener {
    last_percent: AtomicU64,
}

impl DownloadListener for TracingListener {
    fn on_progress(&self, total: u64, so_far: u64, _total_compressed: u64, label: &str) {
        debug!(label, so_far, total, "file done");
        if total == 0 {
            return;
        }
        let percent = so_far.saturating_mul(100) / total;
        if self.last_percent.swap(percent, Ordering::Relaxed) != percent {
            info!("{percent}% ({so_far}/{total} bytes)");
        }
    }

    fn on_verification_progress(&self, _path: &Path, label: &str, index: usize, total: usize) {
        debug!("verifying [{index}/{total}] {label}");
    }

    fn on_verification_failed(&self, path: &Path, expected: &str, actual: &str) {
        warn!(path = %path.display(), expected, actual, "hash mismatch");
    }

    fn on_completed(&self) {
        info!("download completed");
    }

    fn on_failed(&self, err: &(dyn std::error::Error + Send + Sync)) {
        error!("download failed: {err}");
    }
}

/// Append-only list of listeners.
#[derive(Clone, Default)]
pub struct ProgressReporter {
    listeners: Vec<Arc<dyn DownloadListener>>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, listener: Arc<dyn DownloadListener>) {
        self.listeners.push(listener);
    }

    pub fn notify(&self, total: u64, so_far: u64, total_compressed: u64, label: &str) {
        for listener in &self.listeners {
            listener.on_progress(total, so_far, total_compressed, label);
        }
    }

    pub fn notify_verification(&self, path: &Path, display: &str, index: usize, total: usize) {
        for listener in &self.listeners {
            listener.on_verification_progress(path, display, index, total);
        }
    }

    pub fn notify_verification_failure(&self, path: &Path, expected: &str, actual: &str) {
        for listener in &self.listeners {
            listener.on_verification_failed(path, expected, actual);
        }
    }

    pub fn notify_completed(&self) {
        for listener in &self.listeners {
            listener.on_completed();
        }
    }

    pub fn notify_failed(&self, error: &(dyn std::error::Error + Send + Sync)) {
        for listener in &self.listeners {
            listener.on_failed(error);
        }
    }
}

/// Cumulative byte count for one manifest. Advancing and notifying happen
/// under one lock, so listeners observe a non-decreasing `so_far`.
pub struct ProgressCounter {
    header: IndexHeader,
    so_far: Mutex<u64>,
}

impl ProgressCounter {
    pub fn new(header: IndexHeader) -> Self {
        Self {
            header,
            so_far: Mutex::new(0),
        }
    }

    /// Adds `bytes` and notifies `reporter`; returns the new total.
    pub fn advance(&self, reporter: &ProgressReporter, bytes: u64, label: &str) -> u64 {
        let mut so_far = self.so_far.lock().unwrap_or_else(|e| e.into_inner());
        *so_far += bytes;
        reporter.notify(self.header.length, *so_far, self.header.compressed_length, label);
        *so_far
    }

    pub fn so_far(&self) -> u64 {
        *self.so_far.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tagged {
        tag: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl DownloadListener for Tagged {
        fn on_progress(&self, _total: u64, so_far: u64, _compressed: u64, label: &str) {
            self.log.lock().unwrap().push(format!("{}:{}:{}", self.tag, label, so_far));
        }

        fn on_completed(&self) {
            self.log.lock().unwrap().push(format!("{}:done", self.tag));
        }
    }

    #[test]
    fn listeners_receive_events_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut reporter = ProgressReporter::new();
        reporter.register(Arc::new(Tagged { tag: "a", log: log.clone() }));
        reporter.register(Arc::new(Tagged { tag: "b", log: log.clone() }));

        reporter.notify(10, 4, 8, "x");
        reporter.notify_completed();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:x:4", "b:x:4", "a:done", "b:done"]
        );
    }

    #[test]
    fn counter_accumulates_per_manifest() {
        let (listener, mut rx) = ChannelListener::new();
        let mut reporter = ProgressReporter::new();
        reporter.register(Arc::new(listener));

        let header = IndexHeader { length: 300, compressed_length: 120, ..Default::default() };
        let counter = ProgressCounter::new(header);
        assert_eq!(counter.advance(&reporter, 100, "one"), 100);
        assert_eq!(counter.advance(&reporter, 200, "two"), 300);
        assert_eq!(counter.so_far(), 300);

        assert_eq!(
            rx.try_recv().unwrap(),
            DownloadEvent::Progress { total: 300, so_far: 100, total_compressed: 120, label: "one".into() }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            DownloadEvent::Progress { total: 300, so_far: 300, total_compressed: 120, label: "two".into() }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn tracing_listener_accepts_every_event() {
        let listener = TracingListener::default();
        listener.on_progress(0, 0, 0, "empty");
        listener.on_progress(200, 100, 80, "CDShift/Data/a.bin");
        listener.on_verification_progress(Path::new("/g/a.bin"), "CDShift/a.bin", 1, 2);
        listener.on_verification_failed(Path::new("/g/a.bin"), "x", "y");
        listener.on_completed();
        listener.on_failed(&std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert_eq!(listener.last_percent.load(Ordering::Relaxed), 50);
    }

    #[test]
    fn channel_listener_forwards_failures() {
        let (listener, mut rx) = ChannelListener::new();
        let err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        listener.on_failed(&err);
        listener.on_verification_failed(Path::new("/g/a"), "x", "y");

        assert_eq!(rx.try_recv().unwrap(), DownloadEvent::Failed("boom".into()));
        assert_eq!(
            rx.try_recv().unwrap(),
            DownloadEvent::VerificationFailed { path: "/g/a".into(), expected: "x".into(), actual: "y".into() }
        );
    }
}
