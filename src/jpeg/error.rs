// Codec errors.

use thiserror::Error;

/// The input is not a decodable sequential-Huffman JPEG.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("not a JPEG stream (missing SOI marker)")]
    NotJpeg,

    #[error("unexpected end of data at byte {0}")]
    Truncated(usize),

    #[error("unexpected marker 0xFF{marker:02X} at byte {offset}")]
    UnexpectedMarker { marker: u8, offset: usize },

    #[error("unsupported JPEG: {0}")]
    Unsupported(String),

    #[error("invalid {segment} segment: {reason}")]
    InvalidSegment {
        segment: &'static str,
        reason: String,
    },

    #[error("invalid Huffman table: {0}")]
    InvalidHuffmanTable(&'static str),

    #[error("{class} Huffman table {id} used before it was defined")]
    MissingHuffmanTable { class: &'static str, id: u8 },

    #[error("corrupt entropy-coded data at byte {offset}: {reason}")]
    CorruptScan { offset: usize, reason: &'static str },

    #[error("scan header before frame header")]
    MissingFrame,

    #[error("image has no scans")]
    NoScans,

    #[error("component {component}: DC value {value} out of range")]
    CoefficientOverflow { component: usize, value: i32 },
}

impl DecodeError {
    pub(crate) fn segment(segment: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidSegment {
            segment,
            reason: reason.into(),
        }
    }
}

/// Coefficients or header cannot be written as a JPEG.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("frame has {expected} components, coefficients have {actual}")]
    ComponentCount { expected: usize, actual: usize },

    #[error(
        "component {component}: coefficients are {}x{}, frame needs {}x{}",
        actual.0, actual.1, expected.0, expected.1
    )]
    ComponentShape {
        component: usize,
        actual: (usize, usize),
        expected: (usize, usize),
    },

    #[error("component {component}: value {value} does not fit {precision}-bit precision")]
    ValueOutOfRange {
        component: usize,
        value: i32,
        precision: u8,
    },

    #[error("{class} Huffman table {id} has no code for symbol 0x{symbol:02X}")]
    MissingSymbol {
        class: &'static str,
        id: u8,
        symbol: u8,
    },

    #[error(
        "component {component}: block ({block_row}, {block_col}) is non-zero but outside every scan"
    )]
    UncodedBlock {
        component: usize,
        block_row: usize,
        block_col: usize,
    },

    #[error("optimal Huffman code needs {length} bits, more than the 32-bit working limit")]
    CodeLengthOverflow { length: usize },

    #[error("invalid header: {0}")]
    InvalidHeader(String),
}
