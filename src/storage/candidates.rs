//! Candidate stores: where each codec worker writes its compressed layer.
//!
//! One candidate exists per (layer, codec). The builder only ever reads one
//! back (the smallest); the rest can be discarded once the winner is in
//! memory.
//!
//! `DirStore` lays candidates out as plain files:
//!
//! ```text
//! work_dir/
//!   layer1.zlib, layer1.gzip, …, layer1.bzip2, layer1.lzw
//!   layer2.zlib, …
//! ```

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::codec::Codec;

/// Backing storage for fan-out candidates. Shared by every worker of an
/// encoder, so implementations must be thread-safe.
pub trait CandidateStore: Send + Sync {
    /// Open a fresh, empty sink for `(layer, codec)`, replacing any
    /// previous candidate.
    fn create(&self, layer: u16, codec: Codec) -> io::Result<Box<dyn Write + Send>>;

    /// Bytes currently held by the candidate.
    fn size(&self, layer: u16, codec: Codec) -> io::Result<u64>;

    /// Full contents of the candidate.
    fn read(&self, layer: u16, codec: Codec) -> io::Result<Vec<u8>>;

    /// Drop the candidate. Missing candidates are not an error.
    fn discard(&self, layer: u16, codec: Codec) -> io::Result<()>;
}

// ─────────────────────────────── DirStore ────────────────────────────────────

/// Candidates as `layer{N}.{codec}` files under one directory.
pub struct DirStore {
    dir: PathBuf,
}

impl DirStore {
    /// Use `dir`, creating it if needed. Existing files are left alone.
    pub fn open(dir: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(DirStore { dir: dir.to_path_buf() })
    }

    /// Wipe `dir` and start empty, so no candidate of an aborted build
    /// can be mistaken for a finished one.
    pub fn reset(dir: &Path) -> io::Result<Self> {
        match std::fs::remove_dir_all(dir) {
            Ok(()) => info!(dir = ?dir, "Removed stale candidate directory"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        Self::open(dir)
    }

    pub fn path_for(&self, layer: u16, codec: Codec) -> PathBuf {
        self.dir.join(format!("layer{layer}.{codec}"))
    }
}

impl CandidateStore for DirStore {
    fn create(&self, layer: u16, codec: Codec) -> io::Result<Box<dyn Write + Send>> {
        let file = File::create(self.path_for(layer, codec))?;
        Ok(Box::new(BufWriter::new(file)))
    }

    fn size(&self, layer: u16, codec: Codec) -> io::Result<u64> {
        Ok(std::fs::metadata(self.path_for(layer, codec))?.len())
    }

    fn read(&self, layer: u16, codec: Codec) -> io::Result<Vec<u8>> {
        std::fs::read(self.path_for(layer, codec))
    }

    fn discard(&self, layer: u16, codec: Codec) -> io::Result<()> {
        let path = self.path_for(layer, codec);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = ?path, "Candidate discarded");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

// ─────────────────────────────── MemoryStore ─────────────────────────────────

type Buffer = Arc<Mutex<Vec<u8>>>;

/// Candidates held in memory. Suited to small plans and tests.
#[derive(Default)]
pub struct MemoryStore {
    buffers: RwLock<HashMap<(u16, Codec), Buffer>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of candidates currently held.
    pub fn len(&self) -> usize {
        self.buffers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.read().is_empty()
    }

    fn buffer(&self, layer: u16, codec: Codec) -> io::Result<Buffer> {
        self.buffers.read().get(&(layer, codec)).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no {codec} candidate for layer {layer}"))
        })
    }
}

struct MemoryWriter(Buffer);

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CandidateStore for MemoryStore {
    fn create(&self, layer: u16, codec: Codec) -> io::Result<Box<dyn Write + Send>> {
        let buf = Buffer::default();
        self.buffers.write().insert((layer, codec), buf.clone());
        Ok(Box::new(MemoryWriter(buf)))
    }

    fn size(&self, layer: u16, codec: Codec) -> io::Result<u64> {
        Ok(self.buffer(layer, codec)?.lock().len() as u64)
    }

    fn read(&self, layer: u16, codec: Codec) -> io::Result<Vec<u8>> {
        Ok(self.buffer(layer, codec)?.lock().clone())
    }

    fn discard(&self, layer: u16, codec: Codec) -> io::Result<()> {
        self.buffers.write().remove(&(layer, codec));
        Ok(())
    }
}
