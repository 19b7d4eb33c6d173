// Block masks: per-8x8-block booleans derived from coefficient planes.
//
// Masks are computed by reducing each block with a logical OR (any
// differing coefficient, any non-zero coefficient) and applied by expanding
// every mask bit back to exactly one 8x8 tile.

use crate::coeffs::{BLOCK_SIZE, CoefficientMatrix, ShapeMismatch};

// ---------------------------------------------------------------------------
// BlockMask
// ---------------------------------------------------------------------------

/// One boolean per 8x8 block, row-major over the block grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMask {
    blocks_tall: usize,
    blocks_wide: usize,
    bits: Vec<bool>,
}

impl BlockMask {
    /// Mask with every block set to `value`.
    pub fn filled(blocks_tall: usize, blocks_wide: usize, value: bool) -> Self {
        Self {
            blocks_tall,
            blocks_wide,
            bits: vec![value; blocks_tall * blocks_wide],
        }
    }

    /// Build from row-major bits. Returns `None` if the length is wrong.
    pub fn from_bits(blocks_tall: usize, blocks_wide: usize, bits: Vec<bool>) -> Option<Self> {
        (bits.len() == blocks_tall * blocks_wide).then_some(Self {
            blocks_tall,
            blocks_wide,
            bits,
        })
    }

    pub fn blocks_tall(&self) -> usize {
        self.blocks_tall
    }

    pub fn blocks_wide(&self) -> usize {
        self.blocks_wide
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.blocks_tall, self.blocks_wide)
    }

    pub fn get(&self, block_row: usize, block_col: usize) -> bool {
        self.bits[block_row * self.blocks_wide + block_col]
    }

    pub fn set(&mut self, block_row: usize, block_col: usize, value: bool) {
        self.bits[block_row * self.blocks_wide + block_col] = value;
    }

    /// Total number of blocks covered.
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Number of blocks set.
    pub fn count_set(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }

    /// Row-major iterator over `(block_row, block_col, bit)`.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, bool)> + '_ {
        let wide = self.blocks_wide.max(1);
        self.bits
            .iter()
            .enumerate()
            .map(move |(i, &b)| (i / wide, i % wide, b))
    }
}

// ---------------------------------------------------------------------------
// Mask computation
// ---------------------------------------------------------------------------

/// Blocks where any coefficient of `a` differs from `b`.
pub fn difference_mask(
    a: &CoefficientMatrix,
    b: &CoefficientMatrix,
) -> Result<BlockMask, ShapeMismatch> {
    if a.shape() != b.shape() {
        return Err(ShapeMismatch::Dimensions {
            component: 0,
            base: a.shape(),
            other: b.shape(),
        });
    }
    Ok(reduce_blocks(a, |br, bc| {
        (0..BLOCK_SIZE).any(|u| a.block_row_slice(br, bc, u) != b.block_row_slice(br, bc, u))
    }))
}

/// Blocks holding at least one non-zero coefficient.
pub fn non_zero_mask(m: &CoefficientMatrix) -> BlockMask {
    reduce_blocks(m, |br, bc| {
        (0..BLOCK_SIZE).any(|u| m.block_row_slice(br, bc, u).iter().any(|&c| c != 0))
    })
}

fn reduce_blocks(m: &CoefficientMatrix, mut any: impl FnMut(usize, usize) -> bool) -> BlockMask {
    let (blocks_tall, blocks_wide) = m.block_shape();
    let mut bits = Vec::with_capacity(blocks_tall * blocks_wide);
    for br in 0..blocks_tall {
        for bc in 0..blocks_wide {
            bits.push(any(br, bc));
        }
    }
    BlockMask {
        blocks_tall,
        blocks_wide,
        bits,
    }
}

// ---------------------------------------------------------------------------
// Mask application
// ---------------------------------------------------------------------------

/// Zero every block of `target` whose mask bit is false.
pub fn apply_zeroing(target: &mut CoefficientMatrix, mask: &BlockMask) -> Result<(), ShapeMismatch> {
    check_mask(target, mask)?;
    for (br, bc, keep) in mask.iter() {
        if !keep {
            target.fill_block(br, bc, 0);
        }
    }
    Ok(())
}

/// Copy every block of `overlay` whose mask bit is true into `base`.
pub fn apply_overwrite(
    base: &mut CoefficientMatrix,
    overlay: &CoefficientMatrix,
    mask: &BlockMask,
) -> Result<(), ShapeMismatch> {
    if base.shape() != overlay.shape() {
        return Err(ShapeMismatch::Dimensions {
            component: 0,
            base: base.shape(),
            other: overlay.shape(),
        });
    }
    check_mask(base, mask)?;
    for (br, bc, take) in mask.iter() {
        if take {
            for u in 0..BLOCK_SIZE {
                base.block_row_slice_mut(br, bc, u)
                    .copy_from_slice(overlay.block_row_slice(br, bc, u));
            }
        }
    }
    Ok(())
}

fn check_mask(m: &CoefficientMatrix, mask: &BlockMask) -> Result<(), ShapeMismatch> {
    if m.block_shape() != mask.shape() {
        return Err(ShapeMismatch::MaskShape {
            mask: mask.shape(),
            matrix: m.block_shape(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
