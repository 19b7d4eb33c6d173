// Coefficient planes: the in-memory form of one decoded JPEG.
//
// A `CoefficientMatrix` is one component's quantized DCT coefficients laid
// out as a row-major plane. Block (r, c) occupies rows [8r, 8r+8) and
// columns [8c, 8c+8); inside a block, (u, v) is the natural-order frequency
// position. `ImageCoefficients` is the ordered set of planes for one image.

use thiserror::Error;

/// Edge length of a DCT block.
pub const BLOCK_SIZE: usize = 8;

/// Coefficients per block.
pub const BLOCK_LEN: usize = BLOCK_SIZE * BLOCK_SIZE;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Two coefficient sets (or a matrix and a mask) do not line up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeMismatch {
    #[error("component count differs: base has {base}, other has {other}")]
    ComponentCount { base: usize, other: usize },

    #[error(
        "component {component}: base is {}x{}, other is {}x{}",
        base.0, base.1, other.0, other.1
    )]
    Dimensions {
        component: usize,
        base: (usize, usize),
        other: (usize, usize),
    },

    #[error("{rows}x{cols} is not a whole number of {BLOCK_SIZE}x{BLOCK_SIZE} blocks")]
    NotBlockAligned { rows: usize, cols: usize },

    #[error("buffer holds {actual} coefficients, {rows}x{cols} needs {expected}")]
    BufferLength {
        rows: usize,
        cols: usize,
        expected: usize,
        actual: usize,
    },

    #[error(
        "mask covers {}x{} blocks, matrix has {}x{} blocks",
        mask.0, mask.1, matrix.0, matrix.1
    )]
    MaskShape {
        mask: (usize, usize),
        matrix: (usize, usize),
    },
}

// ---------------------------------------------------------------------------
// CoefficientMatrix
// ---------------------------------------------------------------------------

/// One component's quantized DCT coefficients.
#[derive(Clone, PartialEq, Eq)]
pub struct CoefficientMatrix {
    rows: usize,
    cols: usize,
    data: Vec<i16>,
}

impl CoefficientMatrix {
    /// All-zero matrix. Both dimensions must be multiples of [`BLOCK_SIZE`].
    pub fn zeros(rows: usize, cols: usize) -> Result<Self, ShapeMismatch> {
        check_aligned(rows, cols)?;
        Ok(Self {
            rows,
            cols,
            data: vec![0; rows * cols],
        })
    }

    /// All-zero matrix sized in blocks.
    pub fn with_blocks(blocks_tall: usize, blocks_wide: usize) -> Self {
        Self {
            rows: blocks_tall * BLOCK_SIZE,
            cols: blocks_wide * BLOCK_SIZE,
            data: vec![0; blocks_tall * blocks_wide * BLOCK_LEN],
        }
    }

    /// Wrap a row-major buffer.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<i16>) -> Result<Self, ShapeMismatch> {
        check_aligned(rows, cols)?;
        if data.len() != rows * cols {
            return Err(ShapeMismatch::BufferLength {
                rows,
                cols,
                expected: rows * cols,
                actual: data.len(),
            });
        }
        Ok(Self { rows, cols, data })
    }

    /// `(rows, cols)` in coefficients.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn blocks_tall(&self) -> usize {
        self.rows / BLOCK_SIZE
    }

    pub fn blocks_wide(&self) -> usize {
        self.cols / BLOCK_SIZE
    }

    /// `(blocks_tall, blocks_wide)`.
    pub fn block_shape(&self) -> (usize, usize) {
        (self.blocks_tall(), self.blocks_wide())
    }

    pub fn get(&self, row: usize, col: usize) -> i16 {
        self.data[row * self.cols + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: i16) {
        self.data[row * self.cols + col] = value;
    }

    pub fn as_slice(&self) -> &[i16] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [i16] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<i16> {
        self.data
    }

    /// True when every coefficient is zero.
    pub fn is_all_zero(&self) -> bool {
        self.data.iter().all(|&c| c == 0)
    }

    /// The 8 coefficients of row `u` of block (`block_row`, `block_col`).
    #[inline]
    pub fn block_row_slice(&self, block_row: usize, block_col: usize, u: usize) -> &[i16] {
        let start = (block_row * BLOCK_SIZE + u) * self.cols + block_col * BLOCK_SIZE;
        &self.data[start..start + BLOCK_SIZE]
    }

    #[inline]
    pub fn block_row_slice_mut(
        &mut self,
        block_row: usize,
        block_col: usize,
        u: usize,
    ) -> &mut [i16] {
        let start = (block_row * BLOCK_SIZE + u) * self.cols + block_col * BLOCK_SIZE;
        &mut self.data[start..start + BLOCK_SIZE]
    }

    /// Copy one block out in natural order (index `u * 8 + v`).
    pub fn block(&self, block_row: usize, block_col: usize) -> [i16; BLOCK_LEN] {
        let mut out = [0i16; BLOCK_LEN];
        for u in 0..BLOCK_SIZE {
            out[u * BLOCK_SIZE..(u + 1) * BLOCK_SIZE]
                .copy_from_slice(self.block_row_slice(block_row, block_col, u));
        }
        out
    }

    /// Store one block given in natural order.
    pub fn set_block(&mut self, block_row: usize, block_col: usize, block: &[i16; BLOCK_LEN]) {
        for u in 0..BLOCK_SIZE {
            self.block_row_slice_mut(block_row, block_col, u)
                .copy_from_slice(&block[u * BLOCK_SIZE..(u + 1) * BLOCK_SIZE]);
        }
    }

    /// Fill one block with a single value.
    pub fn fill_block(&mut self, block_row: usize, block_col: usize, value: i16) {
        for u in 0..BLOCK_SIZE {
            self.block_row_slice_mut(block_row, block_col, u).fill(value);
        }
    }
}

impl std::fmt::Debug for CoefficientMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Full planes are far too large to print.
        f.debug_struct("CoefficientMatrix")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .field("nonzero", &self.data.iter().filter(|&&c| c != 0).count())
            .finish()
    }
}

fn check_aligned(rows: usize, cols: usize) -> Result<(), ShapeMismatch> {
    if rows % BLOCK_SIZE != 0 || cols % BLOCK_SIZE != 0 {
        return Err(ShapeMismatch::NotBlockAligned { rows, cols });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ImageCoefficients
// ---------------------------------------------------------------------------

/// Per-component coefficient planes of one image, in frame component order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImageCoefficients {
    components: Vec<CoefficientMatrix>,
}

impl ImageCoefficients {
    pub fn new(components: Vec<CoefficientMatrix>) -> Self {
        Self { components }
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn components(&self) -> &[CoefficientMatrix] {
        &self.components
    }

    pub fn components_mut(&mut self) -> &mut [CoefficientMatrix] {
        &mut self.components
    }

    pub fn get(&self, component: usize) -> Option<&CoefficientMatrix> {
        self.components.get(component)
    }

    pub fn get_mut(&mut self, component: usize) -> Option<&mut CoefficientMatrix> {
        self.components.get_mut(component)
    }

    pub fn into_components(self) -> Vec<CoefficientMatrix> {
        self.components
    }

    /// Shapes of every component, in order.
    pub fn shapes(&self) -> Vec<(usize, usize)> {
        self.components.iter().map(CoefficientMatrix::shape).collect()
    }

    /// Check that `other` has the same component count and per-component
    /// shapes. Reports the first offending component.
    pub fn check_same_shape(&self, other: &ImageCoefficients) -> Result<(), ShapeMismatch> {
        if self.len() != other.len() {
            return Err(ShapeMismatch::ComponentCount {
                base: self.len(),
                other: other.len(),
            });
        }
        for (component, (a, b)) in self.components.iter().zip(&other.components).enumerate() {
            if a.shape() != b.shape() {
                return Err(ShapeMismatch::Dimensions {
                    component,
                    base: a.shape(),
                    other: b.shape(),
                });
            }
        }
        Ok(())
    }
}

impl From<Vec<CoefficientMatrix>> for ImageCoefficients {
    fn from(components: Vec<CoefficientMatrix>) -> Self {
        Self::new(components)
    }
}

impl std::ops::Index<usize> for ImageCoefficients {
    type Output = CoefficientMatrix;

    fn index(&self, component: usize) -> &CoefficientMatrix {
        &self.components[component]
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
