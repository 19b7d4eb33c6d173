//! jpegdelta: block-level JPEG diffs in the DCT coefficient domain.
//!
//! A diff is itself a valid JPEG: it holds the coefficients of every 8x8
//! block that changed between a base image and a modified one, with all
//! other blocks zeroed. Merging overlays the diff's non-zero blocks onto
//! the base to rebuild the modified image.
//!
//! The crate provides:
//! - Coefficient planes (`coeffs`) and block masks (`mask`)
//! - The diff/merge engine (`engine`)
//! - A sequential-Huffman JPEG coefficient codec (`jpeg`)
//! - File-oriented helpers (`io`)
//! - Delta archives: dependency maps resolved into diff chains (`archive`)
//! - An optional CLI (`cli` feature)
//!
//! # Quick Start
//!
//! ```no_run
//! use jpegdelta::engine;
//! use jpegdelta::jpeg::{BaselineCodec, CoefficientCodec};
//!
//! let codec = BaselineCodec::default();
//! let base = codec.decode(&std::fs::read("base.jpg").unwrap()).unwrap();
//! let modified = codec.decode(&std::fs::read("modified.jpg").unwrap()).unwrap();
//!
//! let (header, coefficients) = modified.into_parts();
//! let diff = engine::diff(base.coefficients(), coefficients).unwrap();
//! let merged = engine::merge(base.into_coefficients(), &diff).unwrap();
//! # let _ = (header, merged);
//! ```

pub mod archive;
pub mod coeffs;
pub mod engine;
pub mod io;
pub mod jpeg;
pub mod mask;

#[cfg(feature = "cli")]
pub mod cli;

pub use coeffs::{BLOCK_SIZE, CoefficientMatrix, ImageCoefficients, ShapeMismatch};
pub use archive::{ArchiveMap, ChainError};
pub use engine::{BlockReport, ChainMismatch, diff, merge, merge_chain};
pub use mask::BlockMask;
