//! Test helpers for integration tests.
//!
//! Provides an in-memory service fixture, tree builders, and a log capture.

#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex};

use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;
use uuid::Uuid;

use stowbox::storage::{MemoryBlobStore, MemoryNodeStore, MemoryProfileStore, MemoryTempStore};
use stowbox::{
    Backends, BlobLocator, BlobStore, Config, NewNode, NodeStore, StorageNode, StorageService,
};

/// Bucket used for long-term files in tests.
pub const BUCKET: &str = "user_files";

/// In-memory backends with a service on top.
pub struct MemoryFixture {
    pub nodes: Arc<MemoryNodeStore>,
    pub temps: Arc<MemoryTempStore>,
    pub blobs: Arc<MemoryBlobStore>,
    pub profiles: Arc<MemoryProfileStore>,
    pub service: StorageService,
}

impl MemoryFixture {
    /// Fixture with default configuration.
    pub fn new() -> Self {
        Self::with_config(&Config::default())
    }

    /// Fixture with the given configuration.
    pub fn with_config(config: &Config) -> Self {
        let nodes = Arc::new(MemoryNodeStore::new());
        let temps = Arc::new(MemoryTempStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let profiles = Arc::new(MemoryProfileStore::new());
        let backends = Backends::new(
            nodes.clone(),
            temps.clone(),
            blobs.clone(),
            profiles.clone(),
        );

        Self {
            nodes,
            temps,
            blobs,
            profiles,
            service: StorageService::new(backends, config),
        }
    }

    /// Create a folder.
    pub async fn folder(&self, owner: Uuid, parent: Option<Uuid>) -> StorageNode {
        let mut node = NewNode::folder(owner, "folder");
        if let Some(parent) = parent {
            node = node.with_parent(parent);
        }
        self.nodes.insert(&node).await.unwrap()
    }

    /// Create a file with a stored object under `{owner}/`.
    pub async fn file(&self, owner: Uuid, parent: Uuid, size: u64) -> StorageNode {
        let key = format!("{owner}/{}", Uuid::new_v4());
        self.file_at(owner, parent, size, BUCKET, &key).await
    }

    /// Create a file with a stored object at a specific location.
    pub async fn file_at(
        &self,
        owner: Uuid,
        parent: Uuid,
        size: u64,
        bucket: &str,
        key: &str,
    ) -> StorageNode {
        self.blobs.put(bucket, key, b"content").await.unwrap();
        let node = NewNode::file(owner, "file", size)
            .with_parent(parent)
            .with_blob(BlobLocator::new(bucket, key));
        self.nodes.insert(&node).await.unwrap()
    }
}

/// Collects formatted log output.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Install a subscriber writing into this capture for the current thread.
    pub fn install(&self) -> DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    /// Everything logged so far.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
