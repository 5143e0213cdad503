//! Persisted table artifact.
//!
//! ## File Layout
//!
//! ```text
//! [TableHeader : 8 bytes]
//!   magic      : [u8;8] = b"LKUPTBL1"
//!
//! [root Section record]  (see `section` for the record layout)
//! ```
//!
//! Only the root is stored; every other section lives compressed inside it.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use tracing::info;

use crate::error::{LookupError, Result};
use crate::section::Section;

pub const TABLE_MAGIC: &[u8; 8] = b"LKUPTBL1";

/// Serialize `root` as a complete table artifact.
pub fn write_table<W: Write>(root: &Section, w: &mut W) -> Result<()> {
    w.write_all(TABLE_MAGIC)?;
    root.write_to(w)?;
    w.flush()?;
    Ok(())
}

/// Decode an artifact produced by [`write_table`].
pub fn read_table(bytes: &[u8]) -> Result<Section> {
    let body = bytes
        .strip_prefix(TABLE_MAGIC.as_slice())
        .ok_or_else(|| LookupError::format(0, "missing table magic"))?;
    let mut cursor = body;
    let root = Section::read_from(&mut cursor)
        .map_err(|e| LookupError::format(0, format!("cannot decode root section: {e}")))?;
    if !cursor.is_empty() {
        return Err(LookupError::format(
            root.layer,
            format!("{} trailing bytes after root section", cursor.len()),
        ));
    }
    Ok(root)
}

pub fn save_table(root: &Section, path: &Path) -> Result<()> {
    let mut out = BufWriter::new(
        File::create(path)
            .map_err(|e| LookupError::Storage(format!("create table {path:?}: {e}")))?,
    );
    write_table(root, &mut out)?;
    info!(
        path = ?path,
        layer = root.layer,
        bytes = root.encoded_len() + TABLE_MAGIC.len() as u64,
        "Lookup table written"
    );
    Ok(())
}

pub fn load_table(path: &Path) -> Result<Section> {
    let mut bytes = Vec::new();
    File::open(path)
        .map_err(|e| LookupError::Storage(format!("open table {path:?}: {e}")))?
        .read_to_end(&mut bytes)?;
    read_table(&bytes)
}
