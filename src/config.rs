use serde::Deserialize;
use std::path::PathBuf;
use crate::error::{LookupError, Result};

/// Top-level build configuration loaded from a TOML file.
#[derive(Debug, Deserialize, Clone)]
pub struct BuildConfig {
    /// Where the finished table artifact is written.
    #[serde(default = "default_output")]
    pub output: PathBuf,
    /// Directory holding the per-layer, per-codec candidate files.
    /// Wiped at the start of every build.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// Width of the addressed domain in bits. The widths must sum to this.
    #[serde(default = "default_address_bits")]
    pub address_bits: u32,
    /// Per-layer bit widths, innermost (leaf bitmap) first.
    #[serde(default = "default_widths")]
    pub widths: Vec<u32>,
    /// Keep losing candidate files after each layer instead of deleting them.
    #[serde(default)]
    pub keep_candidates: bool,
    /// Fan-out channel sizing.
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Compression levels.
    #[serde(default)]
    pub codecs: CodecConfig,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            work_dir: default_work_dir(),
            address_bits: default_address_bits(),
            widths: default_widths(),
            keep_candidates: false,
            pipeline: PipelineConfig::default(),
            codecs: CodecConfig::default(),
        }
    }
}

fn default_output() -> PathBuf { PathBuf::from("lookup_table") }
fn default_work_dir() -> PathBuf { PathBuf::from(".tmp-layers") }
fn default_address_bits() -> u32 { 64 }
fn default_widths() -> Vec<u32> { vec![17, 6, 7, 11, 7, 7, 5, 4] }

/// Bounded channel parameters for the fan-out encoder.
#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Capacity of the record queue between `submit` and the serializer.
    #[serde(default = "default_record_queue")]
    pub record_queue: usize,
    /// Capacity of each codec worker's chunk queue.
    #[serde(default = "default_chunk_queue")]
    pub chunk_queue: usize,
    /// Serialized bytes batched into one chunk before broadcast.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            record_queue: default_record_queue(),
            chunk_queue: default_chunk_queue(),
            chunk_size: default_chunk_size(),
        }
    }
}

fn default_record_queue() -> usize { 64 }
fn default_chunk_queue() -> usize { 8 }
fn default_chunk_size() -> usize { 64 * 1024 }

/// Compression levels handed to each codec's encoder.
#[derive(Debug, Deserialize, Clone)]
pub struct CodecConfig {
    /// zlib / gzip / deflate level, 0..=9.
    #[serde(default = "default_flate_level")]
    pub flate_level: u32,
    /// zstd level, 1..=22.
    #[serde(default = "default_zstd_level")]
    pub zstd_level: i32,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self { flate_level: default_flate_level(), zstd_level: default_zstd_level() }
    }
}

fn default_flate_level() -> u32 { 9 }
fn default_zstd_level() -> i32 { 19 }

impl BuildConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LookupError::Config(format!("Cannot read config file: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: BuildConfig = toml::from_str(content)
            .map_err(|e| LookupError::Config(format!("Invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks channel and codec settings. Layer widths are checked by
    /// [`crate::builder::LayerPlan::new`].
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.record_queue == 0 || self.pipeline.chunk_queue == 0 {
            return Err(LookupError::Config("queue capacities must be > 0".into()));
        }
        if self.pipeline.chunk_size == 0 {
            return Err(LookupError::Config("chunk_size must be > 0".into()));
        }
        if self.codecs.flate_level > 9 {
            return Err(LookupError::Config("flate_level must be in 0..=9".into()));
        }
        if !(1..=22).contains(&self.codecs.zstd_level) {
            return Err(LookupError::Config("zstd_level must be in 1..=22".into()));
        }
        Ok(())
    }
}
