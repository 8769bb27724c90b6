//! Dot-product stage shared by the angular kernels

use crate::core::{KernelBlock, PointSetRef, Real, Result};
use crate::kernel::traits::{check_block_shape, check_same_dim};
use rayon::prelude::*;

/// Dot product of two equally long coordinate slices
#[inline]
pub fn dot<T: Real>(x: &[T], y: &[T]) -> T {
    x.iter()
        .zip(y)
        .fold(T::zero(), |acc, (&a, &b)| a.mul_add(b, acc))
}

/// Squared Euclidean distance of two equally long coordinate slices
#[inline]
pub fn squared_distance<T: Real>(x: &[T], y: &[T]) -> T {
    x.iter().zip(y).fold(T::zero(), |acc, (&a, &b)| {
        let d = a - b;
        d.mul_add(d, acc)
    })
}

/// Overwrite `out` with `x1 · x2ᵀ`
pub fn apply_dot<T: Real>(
    x1: PointSetRef<'_, T>,
    x2: PointSetRef<'_, T>,
    out: &mut KernelBlock<T>,
) -> Result<()> {
    check_same_dim(x1, x2)?;
    check_block_shape(out, x1.len(), x2.len())?;
    if x1.is_empty() || x2.is_empty() {
        return Ok(());
    }

    let cols = x2.len();
    out.as_mut_slice()
        .par_chunks_exact_mut(cols)
        .zip(x1.as_slice().par_chunks_exact(x1.dim()))
        .for_each(|(out_row, xi)| {
            for (o, yj) in out_row.iter_mut().zip(x2.rows()) {
                *o = dot(xi, yj);
            }
        });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{KernelError, PointSet};

    #[test]
    fn test_dot_basic() {
        // 1*4 + 2*5 + 3*6 = 32
        assert_eq!(dot(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]), 32.0);
        assert_eq!(dot::<f64>(&[], &[]), 0.0);
    }

    #[test]
    fn test_squared_distance() {
        assert_eq!(squared_distance(&[1.0, 2.0], &[4.0, 6.0]), 25.0);
        assert_eq!(squared_distance(&[1.0, 2.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_apply_dot_block() {
        let x1 = PointSet::from_rows(&[[1.0, 0.0], [1.0, 2.0], [0.0, -1.0]]).unwrap();
        let x2 = PointSet::from_rows(&[[3.0, 4.0], [0.0, 1.0]]).unwrap();
        let mut out = KernelBlock::from_vec(3, 2, vec![9.0; 6]).unwrap();

        apply_dot(x1.view(), x2.view(), &mut out).unwrap();

        // Previous contents are overwritten, not accumulated
        assert_eq!(out.as_slice(), &[3.0, 0.0, 11.0, 2.0, -4.0, -1.0]);
    }

    #[test]
    fn test_apply_dot_rejects_bad_buffer() {
        let x1 = PointSet::from_rows(&[[1.0, 0.0]]).unwrap();
        let x2 = PointSet::from_rows(&[[1.0, 0.0], [0.0, 1.0]]).unwrap();
        let mut out = KernelBlock::<f64>::zeros(2, 1);
        let err = apply_dot(x1.view(), x2.view(), &mut out).unwrap_err();
        assert!(matches!(
            err,
            KernelError::BlockShapeMismatch {
                expected: (1, 2),
                actual: (2, 1)
            }
        ));
    }

    #[test]
    fn test_apply_dot_rejects_dim_mismatch() {
        let x1 = PointSet::from_rows(&[[1.0, 0.0]]).unwrap();
        let x2 = PointSet::from_rows(&[[1.0, 0.0, 0.0]]).unwrap();
        let mut out = KernelBlock::<f64>::zeros(1, 1);
        assert!(matches!(
            apply_dot(x1.view(), x2.view(), &mut out),
            Err(KernelError::DimensionMismatch { .. })
        ));
    }
}
