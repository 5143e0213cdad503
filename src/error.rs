use std::fmt;

use thiserror::Error;

use crate::codec::Codec;

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Table storage error: {0}")]
    Storage(String),

    #[error("Layer {layer}: cannot start {codec} codec: {source}")]
    Codec {
        codec: Codec,
        layer: u16,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Fanout(#[from] FanoutError),

    #[error("Layer {layer}: cannot read back {codec} candidate: {source}")]
    Candidate {
        codec: Codec,
        layer: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed section at layer {layer}: {reason}")]
    Format { layer: u16, reason: String },

    #[error("Value {value} out of range: {reason}")]
    Range { value: u64, reason: String },
}

impl LookupError {
    pub(crate) fn format(layer: u16, reason: impl Into<String>) -> Self {
        LookupError::Format { layer, reason: reason.into() }
    }
}

/// One codec worker that failed while a layer was being encoded.
#[derive(Debug)]
pub struct CodecFailure {
    pub codec: Codec,
    pub error: std::io::Error,
}

/// Every worker failure seen by one fan-out encoder, reported together.
#[derive(Debug)]
pub struct FanoutError {
    pub layer: u16,
    /// The serializer itself failed; every candidate is incomplete.
    pub producer: Option<std::io::Error>,
    pub failures: Vec<CodecFailure>,
}

impl FanoutError {
    /// Codecs that failed, in the order their workers were joined.
    pub fn failed_codecs(&self) -> Vec<Codec> {
        self.failures.iter().map(|f| f.codec).collect()
    }
}

impl fmt::Display for FanoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Layer {} fan-out failed for {} codec(s)", self.layer, self.failures.len())?;
        if let Some(e) = &self.producer {
            write!(f, "; serializer: {e}")?;
        }
        for failure in &self.failures {
            write!(f, "; {}: {}", failure.codec, failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for FanoutError {}

pub type Result<T> = std::result::Result<T, LookupError>;
