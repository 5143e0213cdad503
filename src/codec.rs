//! Codec registry: the fixed set of stream compressors a layer competes on.
//!
//! Codecs are identified on disk by their stable name. The list is
//! append-only: a table built with any codec below must stay decodable, so
//! new codecs go at the end of [`Codec::COMPETING`] and names never change.
//!
//! ```text
//! name      crate      stream format
//! none      -          identity (leaf bitmaps only)
//! zlib      flate2     RFC 1950
//! gzip      flate2     RFC 1952
//! deflate   flate2     RFC 1951
//! zstd      zstd       zstd frame
//! lz4       lz4_flex   lz4 frame
//! bzip2     bzip2      bzip2 stream, block size 900k
//! lzw       weezl      LSB-first LZW, 8-bit literals (GIF/PDF style codes)
//! ```

use std::fmt;
use std::io::{self, Read, Write};

use flate2::Compression;
use serde::Serialize;

use crate::config::CodecConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// Raw bytes; carried by layer-1 bitmaps and never entered in a fan-out.
    None,
    Zlib,
    Gzip,
    Deflate,
    Zstd,
    Lz4,
    Bzip2,
    Lzw,
}

impl Codec {
    /// Codecs a layer is compressed with, in tie-break priority order.
    pub const COMPETING: [Codec; 7] = [
        Codec::Zlib,
        Codec::Gzip,
        Codec::Deflate,
        Codec::Zstd,
        Codec::Lz4,
        Codec::Bzip2,
        Codec::Lzw,
    ];

    /// Every codec a table may reference.
    pub const REGISTERED: [Codec; 8] = [
        Codec::None,
        Codec::Zlib,
        Codec::Gzip,
        Codec::Deflate,
        Codec::Zstd,
        Codec::Lz4,
        Codec::Bzip2,
        Codec::Lzw,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Codec::None => "none",
            Codec::Zlib => "zlib",
            Codec::Gzip => "gzip",
            Codec::Deflate => "deflate",
            Codec::Zstd => "zstd",
            Codec::Lz4 => "lz4",
            Codec::Bzip2 => "bzip2",
            Codec::Lzw => "lzw",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::REGISTERED.into_iter().find(|c| c.name() == name)
    }

    /// Wrap `inner` in a streaming compressor for this codec.
    pub fn compressor<W: Write>(self, inner: W, cfg: &CodecConfig) -> io::Result<Compressor<W>> {
        let flate = Compression::new(cfg.flate_level);
        Ok(match self {
            Codec::None => Compressor::None(inner),
            Codec::Zlib => Compressor::Zlib(flate2::write::ZlibEncoder::new(inner, flate)),
            Codec::Gzip => Compressor::Gzip(flate2::write::GzEncoder::new(inner, flate)),
            Codec::Deflate => Compressor::Deflate(flate2::write::DeflateEncoder::new(inner, flate)),
            Codec::Zstd => Compressor::Zstd(zstd::stream::write::Encoder::new(inner, cfg.zstd_level)?),
            Codec::Lz4 => Compressor::Lz4(lz4_flex::frame::FrameEncoder::new(inner)),
            Codec::Bzip2 => Compressor::Bzip2(bzip2::write::BzEncoder::new(inner, bzip2::Compression::best())),
            Codec::Lzw => Compressor::Lzw(LzwWriter::new(inner)),
        })
    }

    /// Streaming decompressor over a complete compressed blob.
    pub fn decompressor<'a>(self, content: &'a [u8]) -> io::Result<Box<dyn Read + 'a>> {
        Ok(match self {
            Codec::None => Box::new(content),
            Codec::Zlib => Box::new(flate2::read::ZlibDecoder::new(content)),
            Codec::Gzip => Box::new(flate2::read::GzDecoder::new(content)),
            Codec::Deflate => Box::new(flate2::read::DeflateDecoder::new(content)),
            Codec::Zstd => Box::new(zstd::stream::read::Decoder::new(content)?),
            Codec::Lz4 => Box::new(lz4_flex::frame::FrameDecoder::new(content)),
            Codec::Bzip2 => Box::new(bzip2::read::BzDecoder::new(content)),
            Codec::Lzw => Box::new(io::Cursor::new(lzw_decode(content)?)),
        })
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A codec's streaming writer. Call [`Compressor::finish`] to flush the
/// trailer and get the inner writer back.
pub enum Compressor<W: Write> {
    None(W),
    Zlib(flate2::write::ZlibEncoder<W>),
    Gzip(flate2::write::GzEncoder<W>),
    Deflate(flate2::write::DeflateEncoder<W>),
    Zstd(zstd::stream::write::Encoder<'static, W>),
    Lz4(lz4_flex::frame::FrameEncoder<W>),
    Bzip2(bzip2::write::BzEncoder<W>),
    Lzw(LzwWriter<W>),
}

impl<W: Write> Compressor<W> {
    pub fn finish(self) -> io::Result<W> {
        match self {
            Compressor::None(w) => Ok(w),
            Compressor::Zlib(e) => e.finish(),
            Compressor::Gzip(e) => e.finish(),
            Compressor::Deflate(e) => e.finish(),
            Compressor::Zstd(e) => e.finish(),
            Compressor::Lz4(e) => e.finish().map_err(io::Error::other),
            Compressor::Bzip2(e) => e.finish(),
            Compressor::Lzw(e) => e.finish(),
        }
    }
}

impl<W: Write> Write for Compressor<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Compressor::None(w) => w.write(buf),
            Compressor::Zlib(e) => e.write(buf),
            Compressor::Gzip(e) => e.write(buf),
            Compressor::Deflate(e) => e.write(buf),
            Compressor::Zstd(e) => e.write(buf),
            Compressor::Lz4(e) => e.write(buf),
            Compressor::Bzip2(e) => e.write(buf),
            Compressor::Lzw(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Compressor::None(w) => w.flush(),
            Compressor::Zlib(e) => e.flush(),
            Compressor::Gzip(e) => e.flush(),
            Compressor::Deflate(e) => e.flush(),
            Compressor::Zstd(e) => e.flush(),
            Compressor::Lz4(e) => e.flush(),
            Compressor::Bzip2(e) => e.flush(),
            Compressor::Lzw(e) => e.flush(),
        }
    }
}

// ─────────────────────────────── lzw ─────────────────────────────────────────

const LZW_ORDER: weezl::BitOrder = weezl::BitOrder::Lsb;
const LZW_LITERAL_BITS: u8 = 8;
const LZW_SCRATCH: usize = 16 * 1024;

/// Streaming LZW writer over weezl's buffer-to-buffer encoder.
pub struct LzwWriter<W: Write> {
    encoder: weezl::encode::Encoder,
    inner: W,
    scratch: Vec<u8>,
}

impl<W: Write> LzwWriter<W> {
    fn new(inner: W) -> Self {
        LzwWriter {
            encoder: weezl::encode::Encoder::new(LZW_ORDER, LZW_LITERAL_BITS),
            inner,
            scratch: vec![0u8; LZW_SCRATCH],
        }
    }

    /// Run the encoder over `input`, writing out every produced byte. When
    /// `finishing`, keep going until the end code is out.
    fn pump(&mut self, mut input: &[u8], finishing: bool) -> io::Result<()> {
        loop {
            let res = self.encoder.encode_bytes(input, &mut self.scratch);
            self.inner.write_all(&self.scratch[..res.consumed_out])?;
            input = &input[res.consumed_in..];
            match res.status {
                Ok(weezl::LzwStatus::Done) => return Ok(()),
                Ok(weezl::LzwStatus::NoProgress) if res.consumed_out == 0 && res.consumed_in == 0 => {
                    return if finishing || !input.is_empty() {
                        Err(io::Error::other("lzw: encoder stalled"))
                    } else {
                        Ok(())
                    };
                }
                Ok(_) if !finishing && input.is_empty() => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(io::Error::other(format!("lzw: {e}"))),
            }
        }
    }

    fn finish(mut self) -> io::Result<W> {
        self.encoder.finish();
        self.pump(&[], true)?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for LzwWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pump(buf, false)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn lzw_decode(content: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoder = weezl::decode::Decoder::new(LZW_ORDER, LZW_LITERAL_BITS);
    let mut out = Vec::new();
    let res = decoder.into_vec(&mut out).decode_all(content);
    res.status.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("lzw: {e}")))?;
    if !decoder.has_ended() {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "lzw: stream ends before its end code"));
    }
    Ok(out)
}

/// Compress a whole buffer in one go.
pub fn compress(codec: Codec, data: &[u8], cfg: &CodecConfig) -> io::Result<Vec<u8>> {
    let mut enc = codec.compressor(Vec::new(), cfg)?;
    enc.write_all(data)?;
    enc.finish()
}

/// Decompress a whole buffer in one go.
pub fn decompress(codec: Codec, data: &[u8]) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    codec.decompressor(data)?.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_stable() {
        let names: Vec<_> = Codec::REGISTERED.iter().map(|c| c.name()).collect();
        assert_eq!(names, ["none", "zlib", "gzip", "deflate", "zstd", "lz4", "bzip2", "lzw"]);
        for codec in Codec::REGISTERED {
            assert_eq!(Codec::from_name(codec.name()), Some(codec));
        }
        assert_eq!(Codec::from_name("brotli"), None);
    }

    #[test]
    fn none_never_competes() {
        assert!(!Codec::COMPETING.contains(&Codec::None));
    }
}
