// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Query engine: resolves one value by descending from the root section.
//!
//! Each step decodes the current section's children, checks that they
//! exactly cover the section, and moves into the child containing the value.
//! Nothing decoded is kept between queries, so a [`LookupTable`] is
//! immutable after load and can be shared across threads freely.

use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::codec::Codec;
use crate::error::{LookupError, Result};
use crate::section::Section;
use crate::storage::table_file;

/// A loaded table. Cheap to query concurrently; holds only the root.
#[derive(Debug, Clone)]
pub struct LookupTable {
    root: Section,
}

/// One descent step: which child of a layer was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Step {
    /// Layer of the section whose children were decoded.
    pub layer: u16,
    /// Index of the chosen child.
    pub child: usize,
    /// First domain value covered by the chosen child.
    pub start: u64,
}

/// Result of [`LookupTable::lookup_traced`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lookup {
    pub value: u64,
    pub bit: bool,
    pub path: Vec<Step>,
    pub byte_index: usize,
    pub bit_index: u8,
}

/// Shape of one layer, taken along the leftmost path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerSummary {
    pub layer: u16,
    pub subsections: u64,
    /// Values covered; `None` means the full 2^64 domain.
    pub domain_count: Option<u64>,
    pub codec: Codec,
    pub content_bytes: usize,
}

impl LookupTable {
    pub fn from_root(root: Section) -> Result<Self> {
        if root.layer == 0 {
            return Err(LookupError::format(0, "root section cannot be at layer 0"));
        }
        if root.is_leaf() && root.codec != Codec::None {
            return Err(LookupError::format(1, format!("leaf bitmap tagged with codec {}", root.codec)));
        }
        Ok(LookupTable { root })
    }

    /// Decode a table artifact from memory.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_root(table_file::read_table(bytes)?)
    }

    /// Load a table artifact from disk.
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_root(table_file::load_table(path)?)
    }

    pub fn root(&self) -> &Section {
        &self.root
    }

    /// The stored bit for `value`.
    pub fn lookup(&self, value: u64) -> Result<bool> {
        Ok(self.lookup_traced(value)?.bit)
    }

    /// [`LookupTable::lookup`] for a table built over the parity seed.
    pub fn is_odd(&self, value: u64) -> Result<bool> {
        self.lookup(value)
    }

    /// Like [`LookupTable::lookup`], also reporting the path taken.
    pub fn lookup_traced(&self, value: u64) -> Result<Lookup> {
        let mut path = Vec::with_capacity(self.root.layer as usize);
        let mut base = 0u64;
        let mut owned: Option<Section> = None;

        loop {
            let current = owned.as_ref().unwrap_or(&self.root);
            if current.is_leaf() {
                break;
            }
            let children = current.decode_children()?;
            let (child, start) = children.locate(value - base).ok_or_else(|| LookupError::Range {
                value,
                reason: format!(
                    "layer {} covers {} values from {base}",
                    current.layer,
                    current.covered()
                ),
            })?;
            debug!(value, layer = current.layer, child, of = children.len(), "Reading node");
            base += start;
            path.push(Step { layer: current.layer, child, start: base });
            owned = Some(children.into_child(child));
        }

        let leaf = owned.as_ref().unwrap_or(&self.root);
        let local = value - base;
        if local as u128 >= leaf.covered() {
            return Err(LookupError::Range {
                value,
                reason: format!("offset {local} past leaf of {} values", leaf.covered()),
            });
        }
        let byte_index = (local / 8) as usize;
        let bit_index = (local % 8) as u8;
        let byte = leaf.content.get(byte_index).copied().ok_or_else(|| LookupError::Range {
            value,
            reason: format!("byte {byte_index} past leaf bitmap of {} bytes", leaf.content.len()),
        })?;
        debug!(value, byte = byte_index, bit = bit_index, "Reading leaf bit");

        Ok(Lookup { value, bit: byte & (1 << bit_index) != 0, path, byte_index, bit_index })
    }

    /// Describe each layer from the root down, following child 0.
    pub fn summary(&self) -> Result<Vec<LayerSummary>> {
        let mut layers = Vec::with_capacity(self.root.layer as usize);
        let mut owned: Option<Section> = None;
        loop {
            let current = owned.as_ref().unwrap_or(&self.root);
            layers.push(LayerSummary {
                layer: current.layer,
                subsections: current.subsections,
                domain_count: (current.domain_count != 0).then_some(current.domain_count),
                codec: current.codec,
                content_bytes: current.content.len(),
            });
            if current.is_leaf() {
                return Ok(layers);
            }
            let children = current.decode_children()?;
            if children.is_empty() {
                return Err(LookupError::format(current.layer, "section has no children"));
            }
            owned = Some(children.into_child(0));
        }
    }
}
