#![allow(dead_code)]

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use md5::{Digest, Md5};
use speedload::prelude::*;
use tokio::sync::mpsc::UnboundedReceiver;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use xz2::read::XzEncoder;
use xz2::stream::{LzmaOptions, Stream};

pub const VERSION: &str = "v1";
pub const SECTION_LEN: usize = 512;
const HEADER_LEN: usize = 13;

pub fn lzma_alone_compress(data: &[u8]) -> Vec<u8> {
    let options = LzmaOptions::new_preset(6).unwrap();
    let stream = Stream::new_lzma_encoder(&options).unwrap();
    let mut encoder = XzEncoder::new_stream(data, stream);
    let mut out = Vec::new();
    encoder.read_to_end(&mut out).unwrap();
    out
}

pub fn md5_base64(data: &[u8]) -> String {
    BASE64.encode(Md5::digest(data))
}

pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

struct Entry {
    name: String,
    content: Vec<u8>,
    section: usize,
    offset: usize,
    compressed: Option<usize>,
}

/// Packs files back to back into a byte stream cut into fixed size sections,
/// and renders the matching index.
#[derive(Default)]
pub struct CdnFixture {
    stream: Vec<u8>,
    entries: Vec<Entry>,
}

impl CdnFixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw(mut self, name: &str, content: Vec<u8>) -> Self {
        let start = self.stream.len();
        self.stream.extend_from_slice(&content);
        self.entries.push(Entry {
            name: name.into(),
            content,
            section: start / SECTION_LEN,
            offset: start % SECTION_LEN,
            compressed: None,
        });
        self
    }

    pub fn compressed(mut self, name: &str, content: Vec<u8>) -> Self {
        // The header has to sit inside one section.
        let room = SECTION_LEN - self.stream.len() % SECTION_LEN;
        if room < HEADER_LEN {
            self.stream.extend(std::iter::repeat(0u8).take(room));
        }
        let start = self.stream.len();
        let packed = lzma_alone_compress(&content);
        self.stream.extend_from_slice(&packed);
        self.entries.push(Entry {
            name: name.into(),
            content,
            section: start / SECTION_LEN,
            offset: start % SECTION_LEN,
            compressed: Some(packed.len()),
        });
        self
    }

    pub fn content(&self, name: &str) -> &[u8] {
        &self.entries.iter().find(|e| e.name == name).unwrap().content
    }

    pub fn start_section(&self, name: &str) -> usize {
        self.entries.iter().find(|e| e.name == name).unwrap().section
    }

    pub fn sections(&self) -> Vec<Vec<u8>> {
        self.stream.chunks(SECTION_LEN).map(<[u8]>::to_vec).collect()
    }

    pub fn total_length(&self) -> usize {
        self.entries.iter().map(|e| e.content.len()).sum()
    }

    pub fn index_xml(&self) -> String {
        let compressed: usize = self
            .entries
            .iter()
            .map(|e| e.compressed.unwrap_or(e.content.len()))
            .sum();
        let mut xml = format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<index>\n  <header>\n    <length>{}</length>\n    <compressed>{}</compressed>\n    <firstcab>0</firstcab>\n    <lastcab>{}</lastcab>\n  </header>\n",
            self.total_length(),
            compressed,
            self.sections().len().saturating_sub(1)
        );
        for e in &self.entries {
            xml.push_str(&format!(
                "  <fileinfo>\n    <path>CDShift/Data</path>\n    <file>{}</file>\n    <hash>{}</hash>\n    <revision>1</revision>\n    <section>{}</section>\n    <offset>{}</offset>\n    <length>{}</length>\n",
                e.name,
                md5_base64(&e.content),
                e.section,
                e.offset,
                e.content.len()
            ));
            if let Some(c) = e.compressed {
                xml.push_str(&format!("    <compressed>{c}</compressed>\n"));
            }
            xml.push_str("  </fileinfo>\n");
        }
        xml.push_str("</index>\n");
        xml
    }

    /// Serves the index and every section except those in `missing`.
    pub async fn mount(&self, server: &MockServer, missing: &[usize]) {
        Mock::given(method("GET"))
            .and(path(format!("/{VERSION}/client/index.xml")))
            .respond_with(ResponseTemplate::new(200).set_body_string(self.index_xml()))
            .mount(server)
            .await;

        for (id, body) in self.sections().into_iter().enumerate() {
            if missing.contains(&id) {
                continue;
            }
            Mock::given(method("GET"))
                .and(path(format!("/{VERSION}/client/section{id}.dat")))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
                .mount(server)
                .await;
        }
    }
}

/// A small game: a raw file, a compressed one, a raw file spanning three
/// sections, and a trailing raw file.
pub fn sample_fixture() -> CdnFixture {
    let text: Vec<u8> = b"speech and track data ".iter().cycle().take(3000).copied().collect();
    CdnFixture::new()
        .raw("a.bin", pattern(100, 1))
        .compressed("b.bin", text)
        .raw("c.bin", pattern(1200, 2))
        .raw("d.bin", pattern(50, 3))
}

pub async fn build_manager(
    server: &MockServer,
    game_dir: &Path,
    hash_db: Option<&Path>,
) -> (DownloadManager, UnboundedReceiver<DownloadEvent>) {
    let config = LoaderConfig {
        hash_db: hash_db.map(Path::to_path_buf),
        request_timeout_secs: 10,
        ..Default::default()
    };
    let options = CdnOptions {
        game_dir: game_dir.to_path_buf(),
        version: VERSION.into(),
        packages: vec![Package::Base],
        cdn_root: server.uri(),
        ..Default::default()
    };
    let mut manager = DownloadManager::new(config, options).await.unwrap();
    let (listener, rx) = ChannelListener::new();
    manager.add_listener(Arc::new(listener));
    (manager, rx)
}

pub fn drain(rx: &mut UnboundedReceiver<DownloadEvent>) -> Vec<DownloadEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub async fn section_requests(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path().contains("/section"))
        .count()
}
