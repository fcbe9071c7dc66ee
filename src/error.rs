use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QuantizeError {
    #[error("image dimensions cannot be zero")]
    ZeroDimension,

    #[error("pixel buffer length {len} does not match dimensions {width}x{height}")]
    DimensionMismatch {
        len: usize,
        width: usize,
        height: usize,
    },

    #[error("max_colors must be between 1 and 256 (0 only with a forced palette), got {0}")]
    InvalidMaxColors(u32),

    #[error("compression level must be between 0 and 9, got {0}")]
    InvalidCompression(u32),

    #[error("invalid value {value:?} for format option {key}")]
    InvalidOption { key: String, value: String },

    #[error("out of memory allocating {bytes} bytes")]
    OutOfMemory { bytes: usize },

    #[error("failed to parse palette entry in line {line} ({content:?}) from {origin}")]
    MalformedPalette {
        origin: String,
        line: usize,
        content: String,
    },

    #[error("error opening palette file {}", path.display())]
    PaletteIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("quantization sanity check failed: {0}")]
    InternalConsistency(&'static str),

    #[error("palette image encoding failed")]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl QuantizeError {
    /// True when the error points at a logic defect rather than bad input.
    pub fn is_bug(&self) -> bool {
        matches!(self, Self::InternalConsistency(_))
    }
}

/// Errors raised by the palette image encoder and its sinks.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EncodeError {
    #[error("write to output sink failed")]
    Io(#[from] io::Error),

    #[error("{operation} called in state {state}")]
    OutOfSequence {
        operation: &'static str,
        state: &'static str,
    },

    #[error("index row has {actual} entries, expected {expected}")]
    RowLength { expected: usize, actual: usize },

    #[error("index buffer has {actual} entries, expected {expected}")]
    ImageLength { expected: usize, actual: usize },

    #[error("palette must hold 1 to 256 entries, got {0}")]
    InvalidPalette(usize),

    #[error("transparency table of {count} entries does not fit a palette of {palette_len}")]
    InvalidTransparency { count: usize, palette_len: usize },

    #[error("encoder already failed; output discarded")]
    Failed,
}
