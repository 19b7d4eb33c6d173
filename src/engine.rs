// Diff/merge engine: composes block masks over every image component.
//
//   - diff:  keep only the blocks of `modified` that differ from `base`
//   - merge: overlay the non-zero blocks of a diff onto `base`
//   - merge_chain: fold merge over a list of diffs, oldest first
//
// All of them validate every component's shape before touching any coefficient.

use log::debug;
use thiserror::Error;

use crate::coeffs::{CoefficientMatrix, ImageCoefficients, ShapeMismatch};
use crate::mask::{self, BlockMask};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Block counts for one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ComponentReport {
    /// Blocks in the component's grid.
    pub total_blocks: usize,
    /// Blocks carried by the diff (diff) or taken from it (merge).
    pub touched_blocks: usize,
}

/// Per-component block counts for one diff or merge.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockReport {
    pub components: Vec<ComponentReport>,
}

impl BlockReport {
    pub fn total_blocks(&self) -> usize {
        self.components.iter().map(|c| c.total_blocks).sum()
    }

    pub fn touched_blocks(&self) -> usize {
        self.components.iter().map(|c| c.touched_blocks).sum()
    }
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

/// Reduce `modified` to the blocks that differ from `base`; every other
/// block becomes zero.
pub fn diff(
    base: &ImageCoefficients,
    modified: ImageCoefficients,
) -> Result<ImageCoefficients, ShapeMismatch> {
    diff_with_report(base, modified).map(|(out, _)| out)
}

/// [`diff`], also returning how many blocks each component kept.
pub fn diff_with_report(
    base: &ImageCoefficients,
    mut modified: ImageCoefficients,
) -> Result<(ImageCoefficients, BlockReport), ShapeMismatch> {
    base.check_same_shape(&modified)?;

    let report = for_each_component(base, &mut modified, |base, target| {
        let mask = mask::difference_mask(base, target)?;
        mask::apply_zeroing(target, &mask)?;
        Ok(mask)
    })?;

    Ok((modified, report))
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Overwrite the blocks of `base` with every block of `diff` that holds a
/// non-zero coefficient.
///
/// This reconstructs the modified image exactly only when every changed
/// block of it has at least one non-zero coefficient. A block that changed
/// to all zeros looks the same as an unchanged block in the diff, so the
/// base block is kept for it.
pub fn merge(
    base: ImageCoefficients,
    diff: &ImageCoefficients,
) -> Result<ImageCoefficients, ShapeMismatch> {
    merge_with_report(base, diff).map(|(out, _)| out)
}

/// [`merge`], also returning how many blocks each component took from the diff.
pub fn merge_with_report(
    mut base: ImageCoefficients,
    diff: &ImageCoefficients,
) -> Result<(ImageCoefficients, BlockReport), ShapeMismatch> {
    base.check_same_shape(diff)?;

    let report = for_each_component(diff, &mut base, |overlay, target| {
        let mask = mask::non_zero_mask(overlay);
        mask::apply_overwrite(target, overlay, &mask)?;
        Ok(mask)
    })?;

    Ok((base, report))
}

// ---------------------------------------------------------------------------
// Chains
// ---------------------------------------------------------------------------

/// A diff in a chain that does not line up with the chain's base.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("diff {link} of the chain: {source}")]
pub struct ChainMismatch {
    /// Position of the offending diff, counting from 0.
    pub link: usize,
    #[source]
    pub source: ShapeMismatch,
}

/// Apply `diffs` to `base` in order, each on top of the previous result.
///
/// Every diff is checked against `base` before the first merge, so a bad
/// link late in the chain fails without doing any work.
pub fn merge_chain<'a, I>(
    base: ImageCoefficients,
    diffs: I,
) -> Result<ImageCoefficients, ChainMismatch>
where
    I: IntoIterator<Item = &'a ImageCoefficients>,
{
    merge_chain_with_report(base, diffs).map(|(out, _)| out)
}

/// [`merge_chain`], also returning one report per diff.
pub fn merge_chain_with_report<'a, I>(
    base: ImageCoefficients,
    diffs: I,
) -> Result<(ImageCoefficients, Vec<BlockReport>), ChainMismatch>
where
    I: IntoIterator<Item = &'a ImageCoefficients>,
{
    let diffs: Vec<&ImageCoefficients> = diffs.into_iter().collect();
    for (link, d) in diffs.iter().enumerate() {
        base.check_same_shape(d).map_err(|source| ChainMismatch { link, source })?;
    }

    let mut current = base;
    let mut reports = Vec::with_capacity(diffs.len());
    for (link, d) in diffs.into_iter().enumerate() {
        let (next, report) =
            merge_with_report(current, d).map_err(|source| ChainMismatch { link, source })?;
        debug!("chain link {link}: {} blocks taken", report.touched_blocks());
        current = next;
        reports.push(report);
    }
    Ok((current, reports))
}

// ---------------------------------------------------------------------------
// Component loop
// ---------------------------------------------------------------------------

/// Run `op(reference[c], &mut target[c])` for every component. Shapes have
/// already been checked by the caller.
fn for_each_component<F>(
    reference: &ImageCoefficients,
    target: &mut ImageCoefficients,
    op: F,
) -> Result<BlockReport, ShapeMismatch>
where
    F: Fn(&CoefficientMatrix, &mut CoefficientMatrix) -> Result<BlockMask, ShapeMismatch>
        + Sync,
{
    #[cfg(feature = "parallel")]
    let masks: Vec<Result<BlockMask, ShapeMismatch>> = reference
        .components()
        .par_iter()
        .zip(target.components_mut().par_iter_mut())
        .map(|(r, t)| op(r, t))
        .collect();

    #[cfg(not(feature = "parallel"))]
    let masks: Vec<Result<BlockMask, ShapeMismatch>> = reference
        .components()
        .iter()
        .zip(target.components_mut().iter_mut())
        .map(|(r, t)| op(r, t))
        .collect();

    let mut report = BlockReport::default();
    for (component, mask) in masks.into_iter().enumerate() {
        let mask = mask?;
        let entry = ComponentReport {
            total_blocks: mask.len(),
            touched_blocks: mask.count_set(),
        };
        debug!(
            "component {component}: {}/{} blocks",
            entry.touched_blocks, entry.total_blocks
        );
        report.components.push(entry);
    }
    Ok(report)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn single(m: CoefficientMatrix) -> ImageCoefficients {
        ImageCoefficients::new(vec![m])
    }

    #[test]
    fn top_left_block_scenario() {
        let base = CoefficientMatrix::zeros(16, 16).unwrap();
        let mut modified = base.clone();
        modified.fill_block(0, 0, 5);

        let base = single(base);
        let modified = single(modified);

        let (d, report) = diff_with_report(&base, modified.clone()).unwrap();
        for r in 0..16 {
            for c in 0..16 {
                let expected = if r < 8 && c < 8 { 5 } else { 0 };
                assert_eq!(d[0].get(r, c), expected);
            }
        }
        assert_eq!(report.touched_blocks(), 1);
        assert_eq!(report.total_blocks(), 4);

        let merged = merge(base, &d).unwrap();
        assert_eq!(merged, modified);
    }

    #[test]
    fn identical_inputs_give_all_zero_diff() {
        let mut m = CoefficientMatrix::with_blocks(3, 2);
        for (i, c) in m.as_mut_slice().iter_mut().enumerate() {
            *c = (i % 7) as i16 - 3;
        }
        let img = ImageCoefficients::new(vec![m.clone(), m]);

        let (d, report) = diff_with_report(&img, img.clone()).unwrap();
        assert!(d.components().iter().all(CoefficientMatrix::is_all_zero));
        assert_eq!(report.touched_blocks(), 0);

        let merged = merge(img.clone(), &d).unwrap();
        assert_eq!(merged, img);
    }

    #[test]
    fn unchanged_blocks_keep_nonzero_base_values_out_of_diff() {
        let mut base = CoefficientMatrix::with_blocks(1, 2);
        base.fill_block(0, 0, 3);
        base.fill_block(0, 1, 3);
        let mut modified = base.clone();
        modified.set(2, 10, -8);

        let d = diff(&single(base), single(modified.clone())).unwrap();
        assert_eq!(d[0].block(0, 0), [0; 64]);
        assert_eq!(d[0].block(0, 1), modified.block(0, 1));
    }

    #[test]
    fn merge_is_left_biased_overlay() {
        let mut base = CoefficientMatrix::with_blocks(2, 2);
        base.fill_block(0, 0, 1);
        base.fill_block(1, 1, 1);
        let mut overlay = CoefficientMatrix::with_blocks(2, 2);
        overlay.set(0, 0, 4); // block (0,0) partially set
        overlay.fill_block(1, 0, -2);

        let merged = merge(single(base.clone()), &single(overlay.clone())).unwrap();
        assert_eq!(merged[0].block(0, 0), overlay.block(0, 0));
        assert_eq!(merged[0].block(1, 0), overlay.block(1, 0));
        assert_eq!(merged[0].block(0, 1), base.block(0, 1));
        assert_eq!(merged[0].block(1, 1), base.block(1, 1));
    }

    #[test]
    fn block_changed_to_all_zero_is_not_recovered() {
        // Known limitation: the diff cannot tell "changed to zero" from
        // "unchanged", so merge keeps the base block.
        let mut base = CoefficientMatrix::with_blocks(1, 2);
        base.fill_block(0, 1, 6);
        let mut modified = base.clone();
        modified.fill_block(0, 1, 0);

        let d = diff(&single(base.clone()), single(modified.clone())).unwrap();
        assert!(d[0].is_all_zero());

        let merged = merge(single(base.clone()), &d).unwrap();
        assert_eq!(merged[0], base);
        assert_ne!(merged[0], modified);
    }

    #[test]
    fn component_count_mismatch_is_rejected() {
        let a = ImageCoefficients::new(vec![CoefficientMatrix::with_blocks(1, 1)]);
        let b = ImageCoefficients::new(vec![
            CoefficientMatrix::with_blocks(1, 1),
            CoefficientMatrix::with_blocks(1, 1),
        ]);
        assert_eq!(
            diff(&a, b.clone()),
            Err(ShapeMismatch::ComponentCount { base: 1, other: 2 })
        );
        assert_eq!(
            merge(b, &a),
            Err(ShapeMismatch::ComponentCount { base: 2, other: 1 })
        );
    }

    #[test]
    fn later_component_mismatch_is_reported_before_any_work() {
        let a = ImageCoefficients::new(vec![
            CoefficientMatrix::with_blocks(2, 2),
            CoefficientMatrix::with_blocks(1, 1),
        ]);
        let b = ImageCoefficients::new(vec![
            CoefficientMatrix::with_blocks(2, 2),
            CoefficientMatrix::with_blocks(1, 2),
        ]);
        assert_eq!(
            diff(&a, b),
            Err(ShapeMismatch::Dimensions {
                component: 1,
                base: (8, 8),
                other: (8, 16),
            })
        );
    }

    #[test]
    fn three_link_chain_applies_diffs_in_order() {
        let mut v1 = CoefficientMatrix::with_blocks(2, 2);
        for (i, c) in v1.as_mut_slice().iter_mut().enumerate() {
            *c = (i % 5) as i16 + 1;
        }
        let mut v2 = v1.clone();
        v2.fill_block(0, 1, 9);
        v2.set(8, 8, -4);
        let mut v3 = v2.clone();
        v3.fill_block(0, 1, 2); // rewrites a block v2 already changed
        v3.set(9, 0, 7);

        let d12 = diff(&single(v1.clone()), single(v2.clone())).unwrap();
        let d23 = diff(&single(v2.clone()), single(v3.clone())).unwrap();

        let (out, reports) = merge_chain_with_report(single(v1.clone()), [&d12, &d23]).unwrap();
        assert_eq!(out, single(v3.clone()));
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].touched_blocks(), 2);
        assert_eq!(reports[1].touched_blocks(), 2);

        // Order matters: applying the newer diff first leaves v2's block (0,1).
        let swapped = merge_chain(single(v1), [&d23, &d12]).unwrap();
        assert_eq!(swapped[0].block(0, 1), v2.block(0, 1));
        assert_ne!(swapped, single(v3));
    }

    #[test]
    fn empty_chain_returns_base() {
        let mut m = CoefficientMatrix::with_blocks(1, 1);
        m.set(0, 0, 12);
        let out = merge_chain(single(m.clone()), std::iter::empty()).unwrap();
        assert_eq!(out, single(m));
    }

    #[test]
    fn chain_mismatch_names_the_link() {
        let base = single(CoefficientMatrix::with_blocks(1, 1));
        let mut good = CoefficientMatrix::with_blocks(1, 1);
        good.set(0, 0, 1);
        let good = single(good);
        let bad = single(CoefficientMatrix::with_blocks(1, 2));

        let err = merge_chain(base, [&good, &good, &bad]).unwrap_err();
        assert_eq!(err.link, 2);
        assert_eq!(
            err.source,
            ShapeMismatch::Dimensions {
                component: 0,
                base: (8, 8),
                other: (8, 16),
            }
        );
    }

    #[test]
    fn shapes_are_preserved() {
        let a = ImageCoefficients::new(vec![
            CoefficientMatrix::with_blocks(4, 4),
            CoefficientMatrix::with_blocks(2, 2),
            CoefficientMatrix::with_blocks(2, 2),
        ]);
        let mut b = a.clone();
        b.get_mut(2).unwrap().set(3, 3, 1);
        let d = diff(&a, b).unwrap();
        assert_eq!(d.shapes(), a.shapes());
        let m = merge(a.clone(), &d).unwrap();
        assert_eq!(m.shapes(), a.shapes());
    }
}
