// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Table builder: assembles the section tree bottom-up, one layer at a
//! time, keeping only the smallest compressed form of each layer.
//!
//! With widths `[w0, w1, …, wk]`:
//!
//! ```text
//! seed bitmap          2^w0 values
//! layer 1 sections     2^w1 of them, each wrapping the bitmap      → winner 1
//! layer 2 sections     2^w2 of them, each wrapping winner 1        → winner 2
//! …
//! root (layer k+1)     wraps winner k, covers 2^(w0+…+wk) values
//! ```
//!
//! Only one winning blob per layer is held in memory; each layer's record
//! stream goes straight into a [`FanoutEncoder`].

use std::sync::Arc;

use tracing::{info, warn};

use crate::codec::Codec;
use crate::config::{BuildConfig, CodecConfig, PipelineConfig};
use crate::error::{LookupError, Result};
use crate::fanout::{FanoutEncoder, LayerWinner};
use crate::section::Section;
use crate::storage::candidates::{CandidateStore, DirStore};

/// Largest leaf bitmap accepted, in bits of domain (2^32 values = 512 MiB).
pub const MAX_LEAF_BITS: u32 = 32;

/// Validated per-layer bit widths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerPlan {
    widths: Vec<u32>,
    address_bits: u32,
}

impl LayerPlan {
    pub fn new(widths: Vec<u32>, address_bits: u32) -> Result<Self> {
        if widths.is_empty() {
            return Err(LookupError::Config("at least one layer width is required".into()));
        }
        if widths.len() > u16::MAX as usize {
            return Err(LookupError::Config(format!("{} layers exceed the layer index range", widths.len())));
        }
        if address_bits > 64 {
            return Err(LookupError::Config(format!("address_bits {address_bits} exceeds 64")));
        }
        if widths[0] > MAX_LEAF_BITS {
            return Err(LookupError::Config(format!(
                "leaf width {} exceeds {MAX_LEAF_BITS} bits",
                widths[0]
            )));
        }
        // Every outer layer must split its parent; this also keeps each
        // non-root section's domain below 2^64.
        if let Some(w) = widths[1..].iter().find(|w| !(1..=63).contains(*w)) {
            return Err(LookupError::Config(format!("layer width {w} must be in 1..=63")));
        }
        let total: u64 = widths.iter().map(|&w| w as u64).sum();
        if total != address_bits as u64 {
            return Err(LookupError::Config(format!(
                "layer widths sum to {total}, expected {address_bits}"
            )));
        }
        Ok(LayerPlan { widths, address_bits })
    }

    pub fn from_config(cfg: &BuildConfig) -> Result<Self> {
        Self::new(cfg.widths.clone(), cfg.address_bits)
    }

    pub fn widths(&self) -> &[u32] {
        &self.widths
    }

    pub fn leaf_bits(&self) -> u32 {
        self.widths[0]
    }

    pub fn address_bits(&self) -> u32 {
        self.address_bits
    }

    /// Layer index of the root section.
    pub fn root_layer(&self) -> u16 {
        self.widths.len() as u16
    }

    /// Root domain count; a full 64-bit domain wraps to the `0` sentinel.
    pub fn domain_count(&self) -> u64 {
        1u64.checked_shl(self.address_bits).unwrap_or(0)
    }

    /// Values covered by one section at `layer` (1 ≤ layer < root).
    pub fn section_domain(&self, layer: u16) -> u64 {
        let bits: u32 = self.widths[..layer as usize].iter().sum();
        1u64 << bits
    }

    /// Number of layer-`layer` sections inside one parent.
    pub fn sections_per_parent(&self, layer: u16) -> u64 {
        1u64 << self.widths[layer as usize]
    }
}

/// Layer-0 bitmap: `2^bits` values, 8 per byte, LSB = lowest value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafSeed {
    bits: u32,
    bitmap: Vec<u8>,
}

impl LeafSeed {
    /// Evaluate `predicate` for every value in `0..2^bits`.
    pub fn from_predicate(bits: u32, predicate: impl Fn(u64) -> bool) -> Result<Self> {
        let count = Self::checked_count(bits)?;
        let mut bitmap = vec![0u8; Self::byte_len(count)];
        for v in (0..count).filter(|&v| predicate(v)) {
            bitmap[(v / 8) as usize] |= 1 << (v % 8);
        }
        Ok(LeafSeed { bits, bitmap })
    }

    /// Odd values set: every byte is `0b1010_1010`.
    pub fn parity(bits: u32) -> Result<Self> {
        let count = Self::checked_count(bits)?;
        Ok(LeafSeed { bits, bitmap: vec![0xAA; Self::byte_len(count)] })
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn bitmap(&self) -> &[u8] {
        &self.bitmap
    }

    pub fn domain_count(&self) -> u64 {
        1u64 << self.bits
    }

    pub fn into_section(self) -> Section {
        let domain_count = self.domain_count();
        Section::leaf(domain_count, self.bitmap)
    }

    fn checked_count(bits: u32) -> Result<u64> {
        if bits > MAX_LEAF_BITS {
            return Err(LookupError::Config(format!("leaf width {bits} exceeds {MAX_LEAF_BITS} bits")));
        }
        Ok(1u64 << bits)
    }

    fn byte_len(count: u64) -> usize {
        count.div_ceil(8) as usize
    }
}

/// Drives [`FanoutEncoder`]s layer by layer.
pub struct TableBuilder {
    plan: LayerPlan,
    store: Arc<dyn CandidateStore>,
    pipeline: PipelineConfig,
    codecs: CodecConfig,
    keep_candidates: bool,
}

impl TableBuilder {
    pub fn new(plan: LayerPlan, store: Arc<dyn CandidateStore>) -> Self {
        TableBuilder {
            plan,
            store,
            pipeline: PipelineConfig::default(),
            codecs: CodecConfig::default(),
            keep_candidates: false,
        }
    }

    /// Builder over a freshly wiped `cfg.work_dir`.
    pub fn from_config(cfg: &BuildConfig) -> Result<Self> {
        cfg.validate()?;
        let plan = LayerPlan::from_config(cfg)?;
        let store = DirStore::reset(&cfg.work_dir)
            .map_err(|e| LookupError::Storage(format!("prepare work dir {:?}: {e}", cfg.work_dir)))?;
        Ok(Self::new(plan, Arc::new(store))
            .with_pipeline(cfg.pipeline.clone())
            .with_codecs(cfg.codecs.clone())
            .keep_candidates(cfg.keep_candidates))
    }

    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_codecs(mut self, codecs: CodecConfig) -> Self {
        self.codecs = codecs;
        self
    }

    pub fn keep_candidates(mut self, keep: bool) -> Self {
        self.keep_candidates = keep;
        self
    }

    pub fn plan(&self) -> &LayerPlan {
        &self.plan
    }

    /// Compress one run of `layer` sections, submitted in traversal order,
    /// and return the smallest encoding. The children may differ from one
    /// another; the caller is responsible for their domain counts.
    pub async fn build_layer<I>(&self, layer: u16, children: I) -> Result<LayerWinner>
    where
        I: IntoIterator<Item = Section>,
    {
        match self.encode_layer(layer, children).await {
            Ok(winner) => Ok(winner),
            Err(e) => {
                // Whatever a failed layer left behind must not be picked up later.
                for codec in Codec::COMPETING {
                    if let Err(discard) = self.store.discard(layer, codec) {
                        warn!(layer, codec = %codec, error = %discard, "Cannot discard failed candidate");
                    }
                }
                Err(e)
            }
        }
    }

    async fn encode_layer<I>(&self, layer: u16, children: I) -> Result<LayerWinner>
    where
        I: IntoIterator<Item = Section>,
    {
        let encoder = FanoutEncoder::start(layer, self.store.clone(), &self.pipeline, &self.codecs)?;
        for child in children {
            encoder.submit(child).await?;
        }
        let closed = encoder.close().await?;
        let winner = closed.winning_result()?;
        if !self.keep_candidates {
            closed.discard_all()?;
        }
        Ok(winner)
    }

    /// Build the full tree over `seed`, where every section of a layer is a
    /// copy of the previous layer's winner.
    pub async fn build(&self, seed: LeafSeed) -> Result<Section> {
        if seed.bits() != self.plan.leaf_bits() {
            return Err(LookupError::Config(format!(
                "seed covers 2^{} values, plan expects 2^{}",
                seed.bits(),
                self.plan.leaf_bits()
            )));
        }
        let mut current = seed.into_section();
        let root_layer = self.plan.root_layer();
        if root_layer == 1 {
            return Ok(current);
        }

        for layer in 1..root_layer {
            let count = self.plan.sections_per_parent(layer);
            let template = Section {
                layer,
                subsections: current.subsections,
                domain_count: self.plan.section_domain(layer),
                codec: current.codec,
                content: std::mem::take(&mut current.content),
            };
            info!(
                layer,
                bits = self.plan.widths()[layer as usize],
                sections = count,
                section_bytes = template.encoded_len(),
                "Building layer"
            );
            let winner = self.build_layer(layer, (0..count).map(|_| template.clone())).await?;
            current = Section {
                layer: winner.layer + 1,
                subsections: count,
                domain_count: 0,
                codec: winner.codec,
                content: winner.content,
            };
        }

        current.domain_count = self.plan.domain_count();
        info!(
            layer = current.layer,
            address_bits = self.plan.address_bits(),
            subsections = current.subsections,
            codec = %current.codec,
            bytes = current.content.len(),
            "Root section assembled"
        );
        Ok(current)
    }
}
