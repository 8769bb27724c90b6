//! Memory-bounded staged evaluation
//!
//! The output is walked in tiles of at most `budget / size_of::<T>()` entries.
//! Norms are prepared once for the whole problem; each tile is computed with
//! `apply` and `finalize` into one reused buffer and immediately reduced
//! against the matching slice of the vector.

use crate::core::{EvaluationContext, KernelBlock, PointSetRef, Real, Result};
use crate::kernel::traits::{check_same_dim, Kernel};
use log::debug;
use std::mem;
use std::ops::Range;

/// Tile extents for an `rows x cols` evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilePlan {
    pub row_tile: usize,
    pub col_tile: usize,
}

impl TilePlan {
    /// Square tiles of side `floor(sqrt(budget / elem_size))`, widened along
    /// the columns when the rows run out first
    pub fn new(rows: usize, cols: usize, elem_size: usize, budget: usize) -> Self {
        let elements = (budget / elem_size.max(1)).max(1);
        let side = ((elements as f64).sqrt().floor() as usize).max(1);
        let row_tile = rows.min(side).max(1);
        let col_tile = cols.min((elements / row_tile).max(1)).max(1);
        Self { row_tile, col_tile }
    }

    pub fn for_scalar<T>(rows: usize, cols: usize, budget: usize) -> Self {
        Self::new(rows, cols, mem::size_of::<T>(), budget)
    }

    pub fn row_ranges(&self, rows: usize) -> impl Iterator<Item = Range<usize>> {
        ranges(rows, self.row_tile)
    }

    pub fn col_ranges(&self, cols: usize) -> impl Iterator<Item = Range<usize>> {
        ranges(cols, self.col_tile)
    }

    /// Entries held by the tile buffer at its largest
    pub fn peak_elements(&self) -> usize {
        self.row_tile * self.col_tile
    }
}

fn ranges(len: usize, step: usize) -> impl Iterator<Item = Range<usize>> {
    (0..len)
        .step_by(step.max(1))
        .map(move |start| start..(start + step).min(len))
}

/// `direct_kernel(x1, x2) · v` through prepare/apply/finalize tiles
pub fn matrix_vector_product<K, T>(
    kernel: &K,
    x1: PointSetRef<'_, T>,
    x2: PointSetRef<'_, T>,
    v: &[T],
    ctx: &EvaluationContext,
) -> Result<Vec<T>>
where
    K: Kernel + ?Sized,
    T: Real,
{
    check_same_dim(x1, x2)?;
    let (n, m) = (x1.len(), x2.len());
    let mut out = vec![T::zero(); n];
    if n == 0 || m == 0 {
        return Ok(out);
    }

    let aux = kernel.prepare(x1, x2)?;
    let plan = TilePlan::for_scalar::<T>(n, m, ctx.memory_budget);
    if ctx.debug || kernel.debug() {
        debug!(
            "{}: staged {n}x{m} in {}x{} tiles",
            kernel.name(),
            plan.row_tile,
            plan.col_tile
        );
    }

    let mut block = KernelBlock::zeros(plan.row_tile, plan.col_tile);
    for rows in plan.row_ranges(n) {
        for cols in plan.col_ranges(m) {
            block.reshape(rows.len(), cols.len());
            kernel.apply(x1.slice(rows.clone()), x2.slice(cols.clone()), &mut block)?;
            kernel.finalize(&mut block, aux.slice(rows.clone(), cols.clone()))?;
            block.matvec_accumulate(&v[cols], &mut out[rows.clone()])?;
        }
    }
    Ok(out)
}
