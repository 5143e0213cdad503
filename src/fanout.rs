// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Fan-out encoder: serialises one layer's sections once and compresses the
//! byte stream with every competing codec at the same time.
//!
//! ```text
//!                  mpsc<Section>               mpsc<Bytes> (one per codec)
//! submit() ─────→ serializer task ──┬──→ zlib worker    ──→ layerN.zlib
//!                                   ├──→ gzip worker    ──→ layerN.gzip
//!                                   ├──→ deflate worker ──→ layerN.deflate
//!                                   ├──→ zstd worker    ──→ layerN.zstd
//!                                   ├──→ lz4 worker     ──→ layerN.lz4
//!                                   ├──→ bzip2 worker   ──→ layerN.bzip2
//!                                   └──→ lzw worker     ──→ layerN.lzw
//! ```
//!
//! Every channel is bounded, so the slowest codec throttles `submit()`.
//! Serialized bytes are batched into chunks and each chunk is shared by all
//! workers (`Bytes` clones are reference counts, not copies).
//!
//! A worker that fails drops its receiver; the serializer notices the closed
//! channel and keeps feeding the others. `close()` joins everything and
//! reports every failure at once.

use std::io::{self, Write};
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::codec::{Codec, Compressor};
use crate::config::{CodecConfig, PipelineConfig};
use crate::error::{CodecFailure, FanoutError, LookupError, Result};
use crate::section::Section;
use crate::storage::candidates::CandidateStore;

type Sink = Compressor<Box<dyn Write + Send>>;

/// What the serializer did before its input closed.
#[derive(Debug, Default)]
struct ProducerReport {
    records: u64,
    serialized_bytes: u64,
}

/// Handle for one layer's fan-out. Feed it with [`FanoutEncoder::submit`],
/// then call [`FanoutEncoder::close`].
pub struct FanoutEncoder {
    layer: u16,
    records: mpsc::Sender<Section>,
    producer: JoinHandle<io::Result<ProducerReport>>,
    workers: Vec<(Codec, JoinHandle<io::Result<u64>>)>,
    store: Arc<dyn CandidateStore>,
}

impl FanoutEncoder {
    /// Open one candidate per competing codec and spawn the serializer and
    /// the codec workers. Must be called from within a tokio runtime.
    pub fn start(
        layer: u16,
        store: Arc<dyn CandidateStore>,
        pipeline: &PipelineConfig,
        codecs: &CodecConfig,
    ) -> Result<Self> {
        // Build every compressor before spawning anything, so a failure here
        // leaves no task behind.
        let mut sinks: Vec<(Codec, Sink)> = Vec::with_capacity(Codec::COMPETING.len());
        for codec in Codec::COMPETING {
            let compressor = store
                .create(layer, codec)
                .and_then(|w| codec.compressor(w, codecs))
                .map_err(|source| LookupError::Codec { codec, layer, source })?;
            sinks.push((codec, compressor));
        }

        let mut chunk_txs = Vec::with_capacity(sinks.len());
        let mut workers = Vec::with_capacity(sinks.len());
        for (codec, sink) in sinks {
            let (tx, rx) = mpsc::channel::<Bytes>(pipeline.chunk_queue);
            let handle = tokio::task::spawn_blocking(move || compress_loop(codec, sink, rx));
            chunk_txs.push((codec, tx));
            workers.push((codec, handle));
        }

        let (records, records_rx) = mpsc::channel::<Section>(pipeline.record_queue);
        let chunk_size = pipeline.chunk_size;
        let producer = tokio::task::spawn_blocking(move || {
            serialize_loop(layer, records_rx, chunk_txs, chunk_size)
        });

        debug!(layer, codecs = workers.len(), "Fan-out encoder started");
        Ok(FanoutEncoder { layer, records, producer, workers, store })
    }

    /// Queue one record. Records are serialized in submission order.
    pub async fn submit(&self, record: Section) -> Result<()> {
        self.records.send(record).await.map_err(|_| {
            LookupError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("layer {} serializer stopped", self.layer),
            ))
        })
    }

    /// Signal end of input and wait for every worker to drain and flush.
    pub async fn close(self) -> Result<ClosedLayer> {
        let FanoutEncoder { layer, records, producer, workers, store } = self;
        drop(records);

        let producer_result = match producer.await {
            Ok(r) => r,
            Err(join) => Err(io::Error::other(format!("serializer task failed: {join}"))),
        };

        let mut failures = Vec::new();
        let mut finished = Vec::with_capacity(workers.len());
        for (codec, handle) in workers {
            match handle.await {
                Ok(Ok(consumed)) => finished.push((codec, consumed)),
                Ok(Err(error)) => failures.push(CodecFailure { codec, error }),
                Err(join) => failures.push(CodecFailure {
                    codec,
                    error: io::Error::other(format!("worker task failed: {join}")),
                }),
            }
        }

        let report = match producer_result {
            Ok(report) if failures.is_empty() => report,
            Ok(_) => return Err(FanoutError { layer, producer: None, failures }.into()),
            Err(e) => return Err(FanoutError { layer, producer: Some(e), failures }.into()),
        };

        let short = short_candidates(&finished, report.serialized_bytes);
        if !short.is_empty() {
            return Err(FanoutError { layer, producer: None, failures: short }.into());
        }

        let mut candidates = Vec::with_capacity(finished.len());
        for (codec, _) in finished {
            let size = store
                .size(layer, codec)
                .map_err(|source| LookupError::Candidate { codec, layer, source })?;
            info!(
                layer,
                codec = %codec,
                compressed = size,
                ratio = %format!("{:.2}", report.serialized_bytes as f64 / size.max(1) as f64),
                "Candidate finished"
            );
            candidates.push(Candidate { codec, size });
        }

        info!(layer, records = report.records, serialized = report.serialized_bytes, "Layer encoded");
        Ok(ClosedLayer {
            layer,
            records: report.records,
            serialized_bytes: report.serialized_bytes,
            candidates,
            store,
        })
    }
}

/// One codec's finished output for a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub codec: Codec,
    pub size: u64,
}

/// The smallest candidate of a layer, read back into memory.
#[derive(Debug, Clone)]
pub struct LayerWinner {
    pub layer: u16,
    pub codec: Codec,
    pub content: Vec<u8>,
}

/// A fully drained layer. Every candidate is complete and sized.
pub struct ClosedLayer {
    layer: u16,
    records: u64,
    serialized_bytes: u64,
    candidates: Vec<Candidate>,
    store: Arc<dyn CandidateStore>,
}

impl ClosedLayer {
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Uncompressed size of the serialized record stream.
    pub fn serialized_bytes(&self) -> u64 {
        self.serialized_bytes
    }

    /// Candidates in [`Codec::COMPETING`] order.
    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Smallest candidate; equal sizes go to the codec listed first in
    /// [`Codec::COMPETING`].
    pub fn smallest(&self) -> Option<Candidate> {
        self.candidates.iter().copied().fold(None, |best, c| match best {
            Some(b) if b.size <= c.size => Some(b),
            _ => Some(c),
        })
    }

    /// Read the smallest candidate back in full.
    pub fn winning_result(&self) -> Result<LayerWinner> {
        let Candidate { codec, size } = self.smallest().ok_or_else(|| LookupError::Candidate {
            codec: Codec::None,
            layer: self.layer,
            source: io::Error::new(io::ErrorKind::NotFound, "no candidates"),
        })?;
        let content = self
            .store
            .read(self.layer, codec)
            .map_err(|source| LookupError::Candidate { codec, layer: self.layer, source })?;
        if content.len() as u64 != size {
            return Err(LookupError::Candidate {
                codec,
                layer: self.layer,
                source: io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("read {} bytes, expected {size}", content.len()),
                ),
            });
        }
        info!(layer = self.layer, codec = %codec, bytes = size, "Codec won the layer");
        Ok(LayerWinner { layer: self.layer, codec, content })
    }

    /// Remove every candidate except `keep`.
    pub fn discard_losers(&self, keep: Codec) -> Result<()> {
        for c in self.candidates.iter().filter(|c| c.codec != keep) {
            self.store
                .discard(self.layer, c.codec)
                .map_err(|source| LookupError::Candidate { codec: c.codec, layer: self.layer, source })?;
        }
        Ok(())
    }

    /// Remove every candidate of this layer.
    pub fn discard_all(&self) -> Result<()> {
        for c in &self.candidates {
            self.store
                .discard(self.layer, c.codec)
                .map_err(|source| LookupError::Candidate { codec: c.codec, layer: self.layer, source })?;
        }
        Ok(())
    }
}

/// Workers that saw less than the full stream hold truncated candidates.
fn short_candidates(finished: &[(Codec, u64)], serialized: u64) -> Vec<CodecFailure> {
    finished
        .iter()
        .filter(|&&(_, consumed)| consumed != serialized)
        .map(|&(codec, consumed)| CodecFailure {
            codec,
            error: io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("consumed {consumed} of {serialized} bytes"),
            ),
        })
        .collect()
}

// ─────────────────────────────── tasks ───────────────────────────────────────

fn serialize_loop(
    layer: u16,
    mut records: mpsc::Receiver<Section>,
    mut live: Vec<(Codec, mpsc::Sender<Bytes>)>,
    chunk_size: usize,
) -> io::Result<ProducerReport> {
    let mut report = ProducerReport::default();
    let mut buf = BytesMut::with_capacity(chunk_size);

    while let Some(section) = records.blocking_recv() {
        report.records += 1;
        if live.is_empty() {
            // Every worker is gone; keep draining so submit() never blocks.
            continue;
        }
        section.write_to(&mut (&mut buf).writer())?;
        if buf.len() >= chunk_size {
            let chunk = buf.split().freeze();
            report.serialized_bytes += chunk.len() as u64;
            broadcast(layer, chunk, &mut live);
        }
    }

    if !buf.is_empty() {
        let chunk = buf.split().freeze();
        report.serialized_bytes += chunk.len() as u64;
        broadcast(layer, chunk, &mut live);
    }
    // Dropping `live` closes every worker's channel.
    Ok(report)
}

fn broadcast(layer: u16, chunk: Bytes, live: &mut Vec<(Codec, mpsc::Sender<Bytes>)>) {
    live.retain(|(codec, tx)| match tx.blocking_send(chunk.clone()) {
        Ok(()) => true,
        Err(_) => {
            warn!(layer, codec = %codec, "Codec worker stopped, no longer feeding it");
            false
        }
    });
}

fn compress_loop(codec: Codec, mut sink: Sink, mut rx: mpsc::Receiver<Bytes>) -> io::Result<u64> {
    let mut consumed = 0u64;
    while let Some(chunk) = rx.blocking_recv() {
        sink.write_all(&chunk)?;
        consumed += chunk.len() as u64;
    }
    let mut inner = sink.finish()?;
    inner.flush()?;
    debug!(codec = %codec, consumed, "Codec worker drained");
    Ok(consumed)
}
