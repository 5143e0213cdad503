// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Layered compressed lookup table over the 64-bit integer domain.
//!
//! A table is a tree of [`section::Section`]s: layer-1 sections hold raw
//! bitmaps, every higher layer holds a compressed run of the layer below.
//! [`builder::TableBuilder`] produces the tree, racing every codec in
//! [`codec::Codec::COMPETING`] per layer through a [`fanout::FanoutEncoder`];
//! [`lookup::LookupTable`] answers queries against the persisted root.

pub mod builder;
pub mod codec;
pub mod config;
pub mod error;
pub mod fanout;
pub mod lookup;
pub mod section;
pub mod storage;

pub use builder::{LayerPlan, LeafSeed, TableBuilder};
pub use codec::Codec;
pub use error::{LookupError, Result};
pub use lookup::LookupTable;
pub use section::Section;
