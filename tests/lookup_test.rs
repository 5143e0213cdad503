//! End-to-end tests: build a table, persist it, query it, reject corruption.
//!
//! Run with: `cargo test`

use std::io::Write;
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use tempfile::TempDir;

use lookup_table::builder::{LayerPlan, LeafSeed, TableBuilder};
use lookup_table::codec::{self, Codec};
use lookup_table::config::{BuildConfig, CodecConfig};
use lookup_table::error::LookupError;
use lookup_table::lookup::{LookupTable, Step};
use lookup_table::section::Section;
use lookup_table::storage::candidates::MemoryStore;
use lookup_table::storage::table_file;

fn fast() -> CodecConfig {
    CodecConfig { flate_level: 6, zstd_level: 3 }
}

async fn build_parity(widths: Vec<u32>, address_bits: u32) -> LookupTable {
    let plan = LayerPlan::new(widths, address_bits).expect("plan");
    let seed = LeafSeed::parity(plan.leaf_bits()).expect("seed");
    let builder = TableBuilder::new(plan, Arc::new(MemoryStore::new())).with_codecs(fast());
    let root = builder.build(seed).await.expect("build");
    LookupTable::from_root(root).expect("table")
}

/// Serialize `children` back to back and compress the run with `codec`.
fn run_of(children: &[Section], codec: Codec) -> Vec<u8> {
    let mut raw = Vec::new();
    for c in children {
        c.write_to(&mut raw).expect("serialize");
    }
    codec::compress(codec, &raw, &fast()).expect("compress")
}

#[tokio::test]
async fn test_two_by_two_worked_example() {
    let plan = LayerPlan::new(vec![2, 2], 4).expect("plan");
    let seed = LeafSeed::parity(2).expect("seed");
    assert_eq!(seed.bitmap(), &[0xAA]);

    let store = Arc::new(MemoryStore::new());
    let builder = TableBuilder::new(plan, store.clone()).with_codecs(fast());
    let root = builder.build(seed).await.expect("build");
    assert_eq!(root.layer, 2);
    assert_eq!(root.subsections, 4);
    assert_eq!(root.domain_count, 16);
    assert!(store.is_empty(), "candidates should be discarded after each layer");

    let table = LookupTable::from_root(root).expect("table");
    let hit = table.lookup_traced(5).expect("lookup 5");
    assert!(hit.bit, "5 is odd");
    assert_eq!(hit.path, vec![Step { layer: 2, child: 1, start: 4 }]);
    assert_eq!((hit.byte_index, hit.bit_index), (0, 1));

    for v in 0..16 {
        assert_eq!(table.lookup(v).expect("lookup"), v % 2 == 1, "value {v}");
    }
    assert!(matches!(table.lookup(16), Err(LookupError::Range { value: 16, .. })));
    assert!(matches!(table.lookup(u64::MAX), Err(LookupError::Range { .. })));
}

#[tokio::test]
async fn test_exhaustive_small_plan() {
    let table = build_parity(vec![3, 2, 2, 3], 10).await;
    assert_eq!(table.root().layer, 4);
    for v in 0..1024u64 {
        assert_eq!(table.is_odd(v).expect("lookup"), v % 2 == 1, "value {v}");
    }
    assert!(matches!(table.lookup(1024), Err(LookupError::Range { .. })));
}

#[tokio::test]
async fn test_single_layer_plan_is_a_bare_bitmap() {
    let table = build_parity(vec![5], 5).await;
    assert_eq!(table.root().layer, 1);
    assert_eq!(table.root().codec, Codec::None);
    for v in 0..32u64 {
        assert_eq!(table.lookup(v).expect("lookup"), v % 2 == 1);
    }
    assert!(matches!(table.lookup(32), Err(LookupError::Range { .. })));
}

#[tokio::test]
async fn test_full_width_table_matches_parity() {
    let table = build_parity(vec![10, 9, 9, 9, 9, 9, 9], 64).await;
    assert_eq!(table.root().domain_count, 0, "full domain uses the 0 sentinel");

    let fixed = [0u64, 1, 2, 3, 11_111_111_111_111_112, u64::MAX - 1, u64::MAX];
    for v in fixed {
        assert_eq!(table.lookup(v).expect("lookup"), v % 2 == 1, "value {v}");
    }

    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);
    for _ in 0..500 {
        let v: u64 = rng.gen();
        assert_eq!(table.lookup(v).expect("lookup"), v % 2 == 1, "value {v}");
    }

    let last = table.lookup_traced(u64::MAX).expect("lookup");
    assert_eq!(last.path.len(), 6);
    assert!(last.path.iter().all(|s| s.child == 511));
    assert_eq!((last.byte_index, last.bit_index), (127, 7));
}

#[tokio::test]
async fn test_heterogeneous_children() {
    // Three leaves of different widths, each with its own predicate.
    let a = LeafSeed::from_predicate(3, |v| v == 2).expect("seed").into_section();
    let b = LeafSeed::from_predicate(4, |v| v % 5 == 0).expect("seed").into_section();
    let c = LeafSeed::from_predicate(3, |_| true).expect("seed").into_section();

    let plan = LayerPlan::new(vec![3, 2], 5).expect("plan");
    let builder = TableBuilder::new(plan, Arc::new(MemoryStore::new())).with_codecs(fast());
    let winner = builder.build_layer(1, vec![a, b, c]).await.expect("layer");

    let root = Section { layer: 2, subsections: 3, domain_count: 32, codec: winner.codec, content: winner.content };
    let table = LookupTable::from_root(root).expect("table");

    let expect = |v: u64| match v {
        0..=7 => v == 2,
        8..=23 => (v - 8) % 5 == 0,
        _ => true,
    };
    for v in 0..32u64 {
        assert_eq!(table.lookup(v).expect("lookup"), expect(v), "value {v}");
    }
    assert_eq!(table.lookup_traced(9).expect("lookup").path[0].start, 8);
}

#[tokio::test]
async fn test_concurrent_queries_share_one_table() {
    let table = Arc::new(build_parity(vec![4, 4, 4], 12).await);
    let handles: Vec<_> = (0..4u64)
        .map(|t| {
            let table = table.clone();
            std::thread::spawn(move || {
                for v in (t..4096).step_by(4) {
                    assert_eq!(table.lookup(v).expect("lookup"), v % 2 == 1);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("query thread");
    }
}

#[tokio::test]
async fn test_build_persist_and_reload_from_config() {
    let dir = TempDir::new().expect("tempdir");
    let work_dir = dir.path().join("layers");
    let output = dir.path().join("table.bin");
    let cfg = BuildConfig::from_toml(&format!(
        "output = {output:?}\nwork_dir = {work_dir:?}\naddress_bits = 16\nwidths = [6, 5, 5]\nkeep_candidates = true\n\n[codecs]\nzstd_level = 3\n"
    ))
    .expect("config");

    // A stale candidate from an earlier build must not survive.
    std::fs::create_dir_all(&work_dir).expect("mkdir");
    std::fs::write(work_dir.join("layer9.zlib"), b"stale").expect("stale file");

    let builder = TableBuilder::from_config(&cfg).expect("builder");
    let root = builder.build(LeafSeed::parity(6).expect("seed")).await.expect("build");
    table_file::save_table(&root, &cfg.output).expect("save");

    assert!(!work_dir.join("layer9.zlib").exists());
    for codec in Codec::COMPETING {
        assert!(work_dir.join(format!("layer1.{codec}")).exists(), "kept {codec} candidate");
        assert!(work_dir.join(format!("layer2.{codec}")).exists(), "kept {codec} candidate");
    }

    let table = LookupTable::open(&cfg.output).expect("open");
    assert_eq!(table.root(), &root);
    for v in (0..65_536u64).step_by(97) {
        assert_eq!(table.lookup(v).expect("lookup"), v % 2 == 1);
    }

    let layers = table.summary().expect("summary");
    let shape: Vec<(u16, u64)> = layers.iter().map(|l| (l.layer, l.subsections)).collect();
    assert_eq!(shape, vec![(3, 32), (2, 32), (1, 0)]);
    assert_eq!(layers[2].content_bytes, 8);
    assert_eq!(layers[0].domain_count, Some(65_536));
}

// ─────────────────────────────── corruption ──────────────────────────────────

#[test]
fn test_rejects_domain_count_mismatch() {
    let leaves = vec![Section::leaf(8, vec![0xAA]), Section::leaf(8, vec![0xAA])];
    let root = Section { layer: 2, subsections: 2, domain_count: 20, codec: Codec::Zlib, content: run_of(&leaves, Codec::Zlib) };
    let table = LookupTable::from_root(root).expect("root itself is fine");
    assert!(matches!(table.lookup(3), Err(LookupError::Format { layer: 2, .. })));
}

#[test]
fn test_rejects_missing_children() {
    let leaves = vec![Section::leaf(8, vec![0xAA]), Section::leaf(8, vec![0xAA])];
    let root = Section { layer: 2, subsections: 3, domain_count: 24, codec: Codec::Gzip, content: run_of(&leaves, Codec::Gzip) };
    let table = LookupTable::from_root(root).expect("table");
    let Err(LookupError::Format { reason, .. }) = table.lookup(0) else {
        panic!("expected a format error");
    };
    assert!(reason.contains("child 2"), "{reason}");
}

#[test]
fn test_rejects_extra_children() {
    let leaves = vec![Section::leaf(8, vec![0xAA]), Section::leaf(8, vec![0xAA])];
    let root = Section { layer: 2, subsections: 1, domain_count: 8, codec: Codec::Zlib, content: run_of(&leaves, Codec::Zlib) };
    let table = LookupTable::from_root(root).expect("table");
    let Err(LookupError::Format { reason, .. }) = table.lookup(3) else {
        panic!("expected a format error");
    };
    assert!(reason.contains("more children"), "{reason}");
}

#[test]
fn test_rejects_compressed_bitmap_child() {
    let mut leaf = Section::leaf(8, vec![0xAA]);
    leaf.codec = Codec::Bzip2;
    let root = Section { layer: 2, subsections: 1, domain_count: 8, codec: Codec::Lzw, content: run_of(&[leaf], Codec::Lzw) };
    let table = LookupTable::from_root(root).expect("table");
    let Err(LookupError::Format { reason, .. }) = table.lookup(1) else {
        panic!("expected a format error");
    };
    assert!(reason.contains("bitmap tagged with codec bzip2"), "{reason}");
}

#[test]
fn test_rejects_zero_domain_child() {
    let leaves = vec![Section::leaf(0, vec![0xAA]), Section::leaf(8, vec![0xAA])];
    let root = Section { layer: 2, subsections: 2, domain_count: 8, codec: Codec::Zstd, content: run_of(&leaves, Codec::Zstd) };
    let table = LookupTable::from_root(root).expect("table");
    assert!(matches!(table.lookup(0), Err(LookupError::Format { .. })));
}

#[test]
fn test_rejects_child_at_wrong_layer() {
    let wrong = Section { layer: 3, subsections: 0, domain_count: 8, codec: Codec::None, content: vec![0xAA] };
    let root = Section { layer: 2, subsections: 1, domain_count: 8, codec: Codec::Lz4, content: run_of(&[wrong], Codec::Lz4) };
    let table = LookupTable::from_root(root).expect("table");
    assert!(matches!(table.lookup(0), Err(LookupError::Format { .. })));
}

#[test]
fn test_rejects_codec_mismatch() {
    let leaves = vec![Section::leaf(8, vec![0xAA])];
    // Content compressed with zstd but labelled zlib.
    let root = Section { layer: 2, subsections: 1, domain_count: 8, codec: Codec::Zlib, content: run_of(&leaves, Codec::Zstd) };
    let table = LookupTable::from_root(root).expect("table");
    assert!(matches!(table.lookup(0), Err(LookupError::Format { .. })));
}

#[test]
fn test_short_leaf_bitmap_is_a_range_error() {
    // Leaf claims 64 values but carries only 2 bytes.
    let leaves = vec![Section::leaf(64, vec![0xAA, 0xAA])];
    let root = Section { layer: 2, subsections: 1, domain_count: 64, codec: Codec::Deflate, content: run_of(&leaves, Codec::Deflate) };
    let table = LookupTable::from_root(root).expect("table");
    assert!(table.lookup(15).expect("in bitmap"));
    assert!(matches!(table.lookup(16), Err(LookupError::Range { value: 16, .. })));
}

#[test]
fn test_artifact_rejects_bad_framing() {
    let root = Section::leaf(16, vec![0xAA, 0xAA]);
    let mut bytes = Vec::new();
    table_file::write_table(&root, &mut bytes).expect("write");
    assert_eq!(LookupTable::from_bytes(&bytes).expect("valid").root(), &root);

    let mut trailing = bytes.clone();
    trailing.write_all(b"junk").expect("append");
    assert!(matches!(LookupTable::from_bytes(&trailing), Err(LookupError::Format { .. })));

    assert!(matches!(LookupTable::from_bytes(&bytes[8..]), Err(LookupError::Format { .. })));
    assert!(matches!(LookupTable::from_bytes(&bytes[..bytes.len() - 1]), Err(LookupError::Format { .. })));

    // Root codec name rewritten to something unregistered.
    let mut unknown = bytes.clone();
    let name_at = 8 + 4 + 2 + 8 + 8 + 1;
    unknown[name_at..name_at + 4].copy_from_slice(b"bzp2");
    let Err(LookupError::Format { reason, .. }) = LookupTable::from_bytes(&unknown) else {
        panic!("expected a format error");
    };
    assert!(reason.contains("bzp2"), "{reason}");
}
