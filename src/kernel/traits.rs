//! Kernel trait definition
//!
//! Every kernel family exposes the same staged capability set so solvers can
//! stay kernel-agnostic: `prepare` computes per-row/per-column quantities once
//! for a whole matrix, `apply` writes the raw bilinear block, and `finalize`
//! applies the kernel's nonlinearity to that block in place. `direct_kernel`
//! is the self-contained reference used for small problems and checks.

use crate::core::{
    EvaluationContext, KernelBlock, KernelError, PointSetRef, Real, Result, SparsePointSet,
};
use crate::kernel::device::{self, DeviceLaunch};
use crate::kernel::formula::{self, Formula};
use crate::kernel::linear;
use crate::kernel::staged;
use crate::kernel::strategy::{select_strategy, KernelCapabilities, ProblemShape, Strategy};
use log::debug;
use rayon::prelude::*;
use std::ops::Range;

/// Quantities computed by [`Kernel::prepare`] and consumed by [`Kernel::finalize`]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Auxiliary<T> {
    pub row_norms: Vec<T>,
    pub col_norms: Vec<T>,
}

impl<T: Real> Auxiliary<T> {
    /// Nothing reusable
    pub fn empty() -> Self {
        Self {
            row_norms: Vec::new(),
            col_norms: Vec::new(),
        }
    }

    /// Euclidean norms of every query and reference point
    pub fn norms(x1: PointSetRef<'_, T>, x2: PointSetRef<'_, T>) -> Self {
        Self {
            row_norms: x1.norms(),
            col_norms: x2.norms(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.row_norms.is_empty() && self.col_norms.is_empty()
    }

    /// View over the whole evaluation
    pub fn full(&self) -> AuxiliaryRef<'_, T> {
        AuxiliaryRef {
            row_norms: &self.row_norms,
            col_norms: &self.col_norms,
        }
    }

    /// View over one tile; an empty auxiliary yields an empty view
    pub fn slice(&self, rows: Range<usize>, cols: Range<usize>) -> AuxiliaryRef<'_, T> {
        AuxiliaryRef {
            row_norms: self.row_norms.get(rows).unwrap_or(&[]),
            col_norms: self.col_norms.get(cols).unwrap_or(&[]),
        }
    }
}

/// Borrowed auxiliary data for one block
#[derive(Debug, Clone, Copy)]
pub struct AuxiliaryRef<'a, T> {
    pub row_norms: &'a [T],
    pub col_norms: &'a [T],
}

impl<'a, T: Real> AuxiliaryRef<'a, T> {
    /// Fail unless the norms line up with `block`
    pub fn check_norms(&self, block: &KernelBlock<T>) -> Result<()> {
        let actual = (self.row_norms.len(), self.col_norms.len());
        if actual != block.shape() {
            return Err(KernelError::BlockShapeMismatch {
                expected: block.shape(),
                actual,
            });
        }
        Ok(())
    }
}

/// Kernel function trait
///
/// Implementations must be symmetric for `x1 == x2` and positive semi-definite
/// up to rounding; the regularized solve relies on it.
pub trait Kernel: Send + Sync {
    /// Short human readable name
    fn name(&self) -> &'static str;

    /// Whether this kernel logs its stages
    fn debug(&self) -> bool {
        false
    }

    /// Closed-form expression for the symbolic engine
    fn formula(&self) -> Option<Formula> {
        None
    }

    /// Precompiled device kernel, if the family defines one
    fn device_kernel(&self) -> Option<DeviceLaunch> {
        None
    }

    fn capabilities(&self) -> KernelCapabilities {
        KernelCapabilities {
            sparse: false,
            symbolic: self.formula().is_some(),
            device_kernel: self.device_kernel().map(|launch| launch.kernel),
        }
    }

    /// Precompute per-row and per-column quantities for a whole evaluation
    fn prepare<T: Real>(
        &self,
        x1: PointSetRef<'_, T>,
        x2: PointSetRef<'_, T>,
    ) -> Result<Auxiliary<T>>;

    /// Write the raw bilinear block `x1 · x2ᵀ` into `out`
    fn apply<T: Real>(
        &self,
        x1: PointSetRef<'_, T>,
        x2: PointSetRef<'_, T>,
        out: &mut KernelBlock<T>,
    ) -> Result<()> {
        linear::apply_dot(x1, x2, out)
    }

    /// Turn a raw block into kernel values, in place
    fn finalize<T: Real>(&self, block: &mut KernelBlock<T>, aux: AuxiliaryRef<'_, T>)
        -> Result<()>;

    /// Reference dense kernel matrix
    fn direct_kernel<T: Real>(
        &self,
        x1: PointSetRef<'_, T>,
        x2: PointSetRef<'_, T>,
    ) -> Result<KernelBlock<T>>;

    fn prepare_sparse<T: Real>(
        &self,
        _x1: &SparsePointSet<T>,
        _x2: &SparsePointSet<T>,
    ) -> Result<Auxiliary<T>> {
        Err(KernelError::UnsupportedOperation(format!(
            "{} does not implement sparse prepare",
            self.name()
        )))
    }

    fn apply_sparse<T: Real>(
        &self,
        _x1: &SparsePointSet<T>,
        _x2: &SparsePointSet<T>,
        _out: &mut KernelBlock<T>,
    ) -> Result<()> {
        Err(KernelError::UnsupportedOperation(format!(
            "{} does not implement sparse apply",
            self.name()
        )))
    }

    /// Run prepare, apply and finalize on a single block
    fn compute_block<T: Real>(
        &self,
        x1: PointSetRef<'_, T>,
        x2: PointSetRef<'_, T>,
    ) -> Result<KernelBlock<T>> {
        let aux = self.prepare(x1, x2)?;
        let mut block = KernelBlock::zeros(x1.len(), x2.len());
        self.apply(x1, x2, &mut block)?;
        self.finalize(&mut block, aux.full())?;
        Ok(block)
    }

    /// Compute `direct_kernel(x1, x2) · v` with the cheapest available strategy
    fn matrix_vector_product<T: Real>(
        &self,
        x1: PointSetRef<'_, T>,
        x2: PointSetRef<'_, T>,
        v: &[T],
        ctx: &EvaluationContext,
    ) -> Result<Vec<T>> {
        let shape = ProblemShape {
            rows: x1.len(),
            cols: x2.len(),
            dim: x1.dim(),
        };
        let strategy = select_strategy(&self.capabilities(), &shape, ctx);
        if ctx.debug || self.debug() {
            debug!(
                "{}: matrix-vector product {}x{} (d={}) via {:?}",
                self.name(),
                shape.rows,
                shape.cols,
                shape.dim,
                strategy
            );
        }
        self.matrix_vector_product_with(strategy, x1, x2, v, ctx)
    }

    /// Compute `direct_kernel(x1, x2) · v` with a given strategy
    ///
    /// A strategy the kernel cannot serve falls back to the staged pipeline.
    fn matrix_vector_product_with<T: Real>(
        &self,
        strategy: Strategy,
        x1: PointSetRef<'_, T>,
        x2: PointSetRef<'_, T>,
        v: &[T],
        ctx: &EvaluationContext,
    ) -> Result<Vec<T>> {
        ctx.check_precision::<T>()?;
        check_same_dim(x1, x2)?;
        if v.len() != x2.len() {
            return Err(KernelError::DimensionMismatch {
                expected: x2.len(),
                actual: v.len(),
            });
        }

        match strategy {
            Strategy::Direct => self.direct_kernel(x1, x2)?.matvec(v),
            Strategy::Staged => staged::matrix_vector_product(self, x1, x2, v, ctx),
            Strategy::Symbolic => match self.formula() {
                Some(formula) => {
                    if ctx.debug || self.debug() {
                        debug!("{}: symbolic formula {}", self.name(), formula);
                    }
                    formula::matrix_vector_product(&formula.compile::<T>(), x1, x2, v)
                }
                None => {
                    debug!("{}: no symbolic formula, using staged path", self.name());
                    staged::matrix_vector_product(self, x1, x2, v, ctx)
                }
            },
            Strategy::Device(requested) => match self.device_kernel() {
                Some(launch) if launch.kernel == requested && device::lookup(requested).is_some() => {
                    device::matrix_vector_product(&launch, x1, x2, v, ctx)
                }
                _ => {
                    debug!(
                        "{}: device kernel {:?} unavailable, using staged path",
                        self.name(),
                        requested
                    );
                    staged::matrix_vector_product(self, x1, x2, v, ctx)
                }
            },
        }
    }
}

/// Fail unless both point sets share one feature dimension
pub(crate) fn check_same_dim<T: Real>(x1: PointSetRef<'_, T>, x2: PointSetRef<'_, T>) -> Result<()> {
    if x1.dim() != x2.dim() {
        return Err(KernelError::DimensionMismatch {
            expected: x1.dim(),
            actual: x2.dim(),
        });
    }
    Ok(())
}

/// Fail unless `out` is exactly `rows x cols`
pub(crate) fn check_block_shape<T: Real>(out: &KernelBlock<T>, rows: usize, cols: usize) -> Result<()> {
    if out.shape() != (rows, cols) {
        return Err(KernelError::BlockShapeMismatch {
            expected: (rows, cols),
            actual: out.shape(),
        });
    }
    Ok(())
}

/// Apply `f(raw, n1, n2)` to every entry of a raw block, rows in parallel
pub(crate) fn finalize_with<T, F>(block: &mut KernelBlock<T>, aux: AuxiliaryRef<'_, T>, f: F) -> Result<()>
where
    T: Real,
    F: Fn(T, T, T) -> T + Sync,
{
    aux.check_norms(block)?;
    let cols = block.cols();
    if cols == 0 {
        return Ok(());
    }
    let col_norms = aux.col_norms;
    block
        .as_mut_slice()
        .par_chunks_exact_mut(cols)
        .zip(aux.row_norms.par_iter())
        .for_each(|(row, &n1)| {
            for (a, &n2) in row.iter_mut().zip(col_norms) {
                *a = f(*a, n1, n2);
            }
        });
    Ok(())
}

/// Dense matrix of `f(x, y, ‖x‖, ‖y‖)` over every pair, rows in parallel
pub(crate) fn direct_with<T, F>(
    x1: PointSetRef<'_, T>,
    x2: PointSetRef<'_, T>,
    f: F,
) -> Result<KernelBlock<T>>
where
    T: Real,
    F: Fn(&[T], &[T], T, T) -> T + Sync,
{
    check_same_dim(x1, x2)?;
    let (rows, cols) = (x1.len(), x2.len());
    let mut out = KernelBlock::zeros(rows, cols);
    if rows == 0 || cols == 0 {
        return Ok(out);
    }
    let n1 = x1.norms();
    let n2 = x2.norms();
    out.as_mut_slice()
        .par_chunks_exact_mut(cols)
        .enumerate()
        .for_each(|(i, row)| {
            let xi = x1.row(i);
            for (j, value) in row.iter_mut().enumerate() {
                *value = f(xi, x2.row(j), n1[i], n2[j]);
            }
        });
    Ok(out)
}

/// `dot / n1 / n2`, or 0 when either norm vanishes
#[inline]
pub(crate) fn divide_by_norms<T: Real>(dot: T, n1: T, n2: T) -> T {
    if n1.is_zero() || n2.is_zero() {
        T::zero()
    } else {
        dot / n1 / n2
    }
}

/// Clamp a cosine into the domain of `acos`
///
/// Rounding can push the cosine of (anti)parallel vectors just past ±1.
#[inline]
pub(crate) fn clamp_unit<T: Real>(cos: T) -> T {
    cos.max(-T::one()).min(T::one())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PointSet;

    #[test]
    fn test_clamp_unit() {
        assert_eq!(clamp_unit(1.0 + 1e-15), 1.0);
        assert_eq!(clamp_unit(-1.0 - 1e-15), -1.0);
        assert_eq!(clamp_unit(0.25), 0.25);
        assert_eq!(clamp_unit(1.0f64 + f64::EPSILON).acos(), 0.0);
    }

    #[test]
    fn test_divide_by_norms_zero_guard() {
        assert_eq!(divide_by_norms(0.0, 0.0, 2.0), 0.0);
        assert_eq!(divide_by_norms(6.0, 2.0, 3.0), 1.0);
    }

    #[test]
    fn test_auxiliary_slices() {
        let x1 = PointSet::from_rows(&[[3.0, 4.0], [1.0, 0.0], [0.0, 2.0]]).unwrap();
        let x2 = PointSet::from_rows(&[[0.0, 1.0]]).unwrap();
        let aux = Auxiliary::norms(x1.view(), x2.view());
        let tile = aux.slice(1..3, 0..1);
        assert_eq!(tile.row_norms, &[1.0, 2.0]);
        assert_eq!(tile.col_norms, &[1.0]);

        let block = KernelBlock::<f64>::zeros(2, 1);
        assert!(tile.check_norms(&block).is_ok());
        assert!(aux.full().check_norms(&block).is_err());

        let empty = Auxiliary::<f64>::empty();
        assert!(empty.is_empty());
        assert!(empty.slice(0..2, 0..2).row_norms.is_empty());
    }

    #[test]
    fn test_shape_checks() {
        let a = PointSet::from_rows(&[[1.0, 2.0]]).unwrap();
        let b = PointSet::from_rows(&[[1.0, 2.0, 3.0]]).unwrap();
        assert!(check_same_dim(a.view(), b.view()).is_err());
        assert!(check_same_dim(a.view(), a.view()).is_ok());

        let block = KernelBlock::<f64>::zeros(1, 2);
        assert!(check_block_shape(&block, 1, 2).is_ok());
        assert!(matches!(
            check_block_shape(&block, 2, 1),
            Err(KernelError::BlockShapeMismatch { .. })
        ));
    }
}
