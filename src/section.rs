//! Section: one node of the layered lookup tree.
//!
//! Layer-1 sections hold a raw bitmap (8 values per byte, LSB first). Every
//! higher section holds a compressed run of child sections from the layer
//! directly below it.
//!
//! ## Record Layout
//!
//! ```text
//! [SectionHeader]
//!   magic        : [u8;4]  = b"LSEC"
//!   layer        : u16     (LE)
//!   subsections  : u64     (LE), children inside `content`, 0 at layer 1
//!   domain_count : u64     (LE), values covered, 0 = 2^64 (root only)
//!   codec_len    : u8
//!   codec        : [u8; codec_len] (UTF-8 codec name)
//!   content_len  : u64     (LE)
//!
//! [content       : content_len bytes]
//! ```
//!
//! A child run is a plain concatenation of records; children are recovered
//! by count, so their order is the order they were written in.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::codec::Codec;
use crate::error::{LookupError, Result};

pub const SECTION_MAGIC: &[u8; 4] = b"LSEC";
/// Fixed header bytes, excluding the codec name.
pub const SECTION_HEADER_SIZE: u64 = 4 + 2 + 8 + 8 + 1 + 8; // 31 bytes

/// Upper bound on children pre-allocated before any has been read.
const MAX_PREALLOC_CHILDREN: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub layer: u16,
    pub subsections: u64,
    pub domain_count: u64,
    pub codec: Codec,
    pub content: Vec<u8>,
}

impl Section {
    /// A layer-1 section over a raw bitmap.
    pub fn leaf(domain_count: u64, bitmap: Vec<u8>) -> Self {
        Section { layer: 1, subsections: 0, domain_count, codec: Codec::None, content: bitmap }
    }

    pub fn is_leaf(&self) -> bool {
        self.layer <= 1
    }

    /// Domain size as an exact integer; the `0` sentinel reads as 2^64.
    pub fn covered(&self) -> u128 {
        match self.domain_count {
            0 => 1u128 << 64,
            n => n as u128,
        }
    }

    /// Serialized size of this record.
    pub fn encoded_len(&self) -> u64 {
        SECTION_HEADER_SIZE + self.codec.name().len() as u64 + self.content.len() as u64
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let name = self.codec.name().as_bytes();
        w.write_all(SECTION_MAGIC)?;
        w.write_u16::<LittleEndian>(self.layer)?;
        w.write_u64::<LittleEndian>(self.subsections)?;
        w.write_u64::<LittleEndian>(self.domain_count)?;
        w.write_u8(name.len() as u8)?;
        w.write_all(name)?;
        w.write_u64::<LittleEndian>(self.content.len() as u64)?;
        w.write_all(&self.content)
    }

    /// Read one record. Truncation shows up as `UnexpectedEof`, anything
    /// structurally wrong as `InvalidData`.
    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != SECTION_MAGIC {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "bad section magic"));
        }
        let layer = r.read_u16::<LittleEndian>()?;
        let subsections = r.read_u64::<LittleEndian>()?;
        let domain_count = r.read_u64::<LittleEndian>()?;

        let name_len = r.read_u8()? as usize;
        let mut name = vec![0u8; name_len];
        r.read_exact(&mut name)?;
        let name = std::str::from_utf8(&name)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "codec name is not UTF-8"))?;
        let codec = Codec::from_name(name).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, format!("unregistered codec '{name}'"))
        })?;

        let content_len = r.read_u64::<LittleEndian>()?;
        // Never trust content_len for the allocation; read what is there.
        let mut content = Vec::new();
        r.by_ref().take(content_len).read_to_end(&mut content)?;
        if content.len() as u64 != content_len {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "section content truncated"));
        }

        Ok(Section { layer, subsections, domain_count, codec, content })
    }

    /// Decode and validate the children of a layer > 1 section.
    ///
    /// Rejects an unusable codec stream, a child count other than the
    /// declared one, a child not at `layer - 1`, a bitmap child carrying a
    /// compressing codec, a child with a zero domain count, and children
    /// whose domain counts do not sum to this section's.
    pub fn decode_children(&self) -> Result<Children> {
        if self.is_leaf() {
            return Err(LookupError::format(self.layer, "layer-1 content is a bitmap, not a section run"));
        }
        let mut reader = self.codec.decompressor(&self.content).map_err(|e| {
            LookupError::format(self.layer, format!("cannot open {} stream: {e}", self.codec))
        })?;

        let capacity = usize::try_from(self.subsections).unwrap_or(usize::MAX).min(MAX_PREALLOC_CHILDREN);
        let mut sections = Vec::with_capacity(capacity);
        let mut ends = Vec::with_capacity(capacity);
        let mut total: u128 = 0;

        for i in 0..self.subsections {
            let child = Section::read_from(&mut reader).map_err(|e| {
                LookupError::format(
                    self.layer,
                    format!("child {i} of {} via {}: {e}", self.subsections, self.codec),
                )
            })?;
            if child.layer.checked_add(1) != Some(self.layer) {
                return Err(LookupError::format(
                    self.layer,
                    format!("child {i} claims layer {}", child.layer),
                ));
            }
            if child.is_leaf() && child.codec != Codec::None {
                return Err(LookupError::format(
                    self.layer,
                    format!("child {i} is a bitmap tagged with codec {}", child.codec),
                ));
            }
            if child.domain_count == 0 {
                return Err(LookupError::format(self.layer, format!("child {i} has a zero domain count")));
            }
            total += child.domain_count as u128;
            ends.push(total);
            sections.push(child);
        }

        match reader.read(&mut [0u8; 1]) {
            Ok(0) => {}
            Ok(_) => {
                return Err(LookupError::format(
                    self.layer,
                    format!("more children than the {} declared", self.subsections),
                ));
            }
            Err(e) => {
                return Err(LookupError::format(self.layer, format!("{} stream after last child: {e}", self.codec)));
            }
        }

        if total != self.covered() {
            return Err(LookupError::format(
                self.layer,
                format!("children cover {total} values, section declares {}", self.covered()),
            ));
        }
        Ok(Children { sections, ends })
    }
}

/// Validated children of one section, with cumulative coverage.
#[derive(Debug)]
pub struct Children {
    sections: Vec<Section>,
    /// `ends[i]` is the number of values covered by children `0..=i`.
    ends: Vec<u128>,
}

impl Children {
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter()
    }

    /// Find the child covering `offset` (relative to the parent's first
    /// value). Returns the child index and the offset of the child's first
    /// value.
    pub fn locate(&self, offset: u64) -> Option<(usize, u64)> {
        let idx = self.ends.partition_point(|&end| end <= offset as u128);
        if idx == self.sections.len() {
            return None;
        }
        let start = if idx == 0 { 0 } else { self.ends[idx - 1] as u64 };
        Some((idx, start))
    }

    /// Take ownership of one child, dropping the rest.
    pub fn into_child(mut self, idx: usize) -> Section {
        self.sections.swap_remove(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_size_matches_encoding() {
        let s = Section::leaf(16, vec![0xAA, 0xAA]);
        let mut buf = Vec::new();
        s.write_to(&mut buf).expect("write");
        assert_eq!(buf.len() as u64, s.encoded_len());
        assert_eq!(&buf[..4], SECTION_MAGIC);
    }

    #[test]
    fn rejects_unknown_codec_name() {
        let mut buf = Vec::new();
        Section::leaf(8, vec![0xAA]).write_to(&mut buf).expect("write");
        // Overwrite "none" with "nope".
        let name_at = 4 + 2 + 8 + 8 + 1;
        buf[name_at..name_at + 4].copy_from_slice(b"nope");
        let err = Section::read_from(&mut buf.as_slice()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn truncated_content_is_eof() {
        let mut buf = Vec::new();
        Section::leaf(64, vec![0xAA; 8]).write_to(&mut buf).expect("write");
        buf.truncate(buf.len() - 3);
        let err = Section::read_from(&mut buf.as_slice()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn locate_walks_cumulative_counts() {
        let children = Children {
            sections: vec![Section::leaf(4, vec![0]), Section::leaf(8, vec![0]), Section::leaf(4, vec![0])],
            ends: vec![4, 12, 16],
        };
        assert_eq!(children.locate(0), Some((0, 0)));
        assert_eq!(children.locate(3), Some((0, 0)));
        assert_eq!(children.locate(4), Some((1, 4)));
        assert_eq!(children.locate(11), Some((1, 4)));
        assert_eq!(children.locate(15), Some((2, 12)));
        assert_eq!(children.locate(16), None);
    }
}
