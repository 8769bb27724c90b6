//! Arc-cosine kernel of degree one

use crate::core::{KernelBlock, PointSetRef, Real, Result};
use crate::kernel::formula::Formula;
use crate::kernel::linear::dot;
use crate::kernel::traits::{
    check_same_dim, clamp_unit, direct_with, divide_by_norms, finalize_with, Auxiliary,
    AuxiliaryRef,
};
use crate::kernel::Kernel;
use std::f64::consts::PI;
use std::fmt;

/// Arc-cosine kernel: K(x, y) = ‖x‖‖y‖/π · (sin θ + (π − θ) cos θ)
///
/// θ is the angle between `x` and `y`. This is the infinite-width limit of a
/// single ReLU layer and has no hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ArcCosineKernel {
    debug: bool,
}

impl ArcCosineKernel {
    pub fn new() -> Self {
        Self { debug: false }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

impl fmt::Display for ArcCosineKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArcCosineKernel()")
    }
}

impl Kernel for ArcCosineKernel {
    fn name(&self) -> &'static str {
        "arc-cosine"
    }

    fn debug(&self) -> bool {
        self.debug
    }

    fn formula(&self) -> Option<Formula> {
        Some(arc_cosine_formula(1.0))
    }

    fn prepare<T: Real>(
        &self,
        x1: PointSetRef<'_, T>,
        x2: PointSetRef<'_, T>,
    ) -> Result<Auxiliary<T>> {
        check_same_dim(x1, x2)?;
        Ok(Auxiliary::norms(x1, x2))
    }

    fn finalize<T: Real>(
        &self,
        block: &mut KernelBlock<T>,
        aux: AuxiliaryRef<'_, T>,
    ) -> Result<()> {
        finalize_arc_cosine(block, aux, T::one())
    }

    fn direct_kernel<T: Real>(
        &self,
        x1: PointSetRef<'_, T>,
        x2: PointSetRef<'_, T>,
    ) -> Result<KernelBlock<T>> {
        direct_arc_cosine(x1, x2, T::one())
    }
}

/// Arc-cosine expression with `outer` scaling the `(π − θ) cos θ` term
pub(crate) fn arc_cosine_formula(outer: f64) -> Formula {
    let pi = Formula::constant(PI);
    let cos = Formula::Cosine.clamp_unit();
    let theta = cos.clone().acos();
    let mut slope = (pi.clone() - theta.clone()) * cos;
    if outer != 1.0 {
        slope = Formula::constant(outer) * slope;
    }
    Formula::NormX * Formula::NormY * (theta.sin() + slope) / pi
}

/// In-place arc-cosine transform of a raw dot-product block
pub(crate) fn finalize_arc_cosine<T: Real>(
    block: &mut KernelBlock<T>,
    aux: AuxiliaryRef<'_, T>,
    outer: T,
) -> Result<()> {
    let pi = T::PI();
    finalize_with(block, aux, |raw, n1, n2| {
        let mut a = divide_by_norms(raw, n1, n2);
        a = clamp_unit(a);
        // θ and sin θ
        let mut b = a.acos();
        let c = b.sin();
        // (π − θ)
        b = pi - b;
        b = b * outer;
        a = a * b;
        a = a + c;
        a = a * n1;
        a = a * n2;
        a / pi
    })
}

pub(crate) fn direct_arc_cosine<T: Real>(
    x1: PointSetRef<'_, T>,
    x2: PointSetRef<'_, T>,
    outer: T,
) -> Result<KernelBlock<T>> {
    let pi = T::PI();
    direct_with(x1, x2, |x, y, nx, ny| {
        let cos = clamp_unit(divide_by_norms(dot(x, y), nx, ny));
        let theta = cos.acos();
        nx * ny * (theta.sin() + outer * (pi - theta) * cos) / pi
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EvaluationContext, KernelError, PointSet, SparsePointSet, SparseVector};
    use crate::kernel::Strategy;
    use approx::assert_relative_eq;

    fn sample_points() -> PointSet<f64> {
        PointSet::from_rows(&[
            [0.3, -0.2, 0.9, 1.0],
            [-0.7, 0.1, 0.4, 1.0],
            [0.0, 0.0, 0.0, 1.0],
            [1.5, 0.2, -0.3, 1.0],
            [0.3, -0.2, 0.9, 1.0],
        ])
        .unwrap()
    }

    #[test]
    fn test_orthogonal_unit_vectors() {
        let kernel = ArcCosineKernel::new();
        let x = PointSet::from_rows(&[[1.0, 0.0]]).unwrap();
        let y = PointSet::from_rows(&[[0.0, 1.0]]).unwrap();

        // θ = π/2, so K = 1/π
        let k = kernel.direct_kernel(x.view(), y.view()).unwrap();
        assert_relative_eq!(k.get(0, 0), 1.0 / PI, epsilon = 1e-12);

        let staged = kernel.compute_block(x.view(), y.view()).unwrap();
        assert_relative_eq!(staged.get(0, 0), 1.0 / PI, epsilon = 1e-12);
    }

    #[test]
    fn test_identical_and_collinear_vectors() {
        let kernel = ArcCosineKernel::new();
        let x = PointSet::from_rows(&[[1.0f64, 2.0, 3.0], [2.0, 4.0, 6.0]]).unwrap();
        let k = kernel.direct_kernel(x.view(), x.view()).unwrap();

        // θ = 0 gives ‖x‖‖y‖
        assert_relative_eq!(k.get(0, 0), 14.0, max_relative = 1e-12);
        assert_relative_eq!(k.get(0, 1), 28.0, max_relative = 1e-12);
        assert!(k.as_slice().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_zero_vector_gives_zero() {
        let kernel = ArcCosineKernel::new();
        let x = PointSet::from_rows(&[[0.0, 0.0], [1.0, 1.0]]).unwrap();
        let direct = kernel.direct_kernel(x.view(), x.view()).unwrap();
        let staged = kernel.compute_block(x.view(), x.view()).unwrap();
        for k in [&direct, &staged] {
            assert_eq!(k.get(0, 0), 0.0);
            assert_eq!(k.get(0, 1), 0.0);
            assert_eq!(k.get(1, 0), 0.0);
        }
    }

    #[test]
    fn test_staged_matches_direct() {
        let kernel = ArcCosineKernel::new();
        let x = sample_points();
        let direct = kernel.direct_kernel(x.view(), x.view()).unwrap();
        let staged = kernel.compute_block(x.view(), x.view()).unwrap();
        assert!(direct.max_abs_diff(&staged).unwrap() < 1e-12);
        assert!(direct.is_symmetric(1e-12));
    }

    #[test]
    fn test_symbolic_matches_direct() {
        let kernel = ArcCosineKernel::new();
        let x = sample_points();
        let v = [1.0, -2.0, 0.5, 0.25, 3.0];
        let ctx = EvaluationContext::new::<f64>();

        let reference = kernel
            .matrix_vector_product_with(Strategy::Direct, x.view(), x.view(), &v, &ctx)
            .unwrap();
        let symbolic = kernel
            .matrix_vector_product_with(Strategy::Symbolic, x.view(), x.view(), &v, &ctx)
            .unwrap();
        for (a, b) in reference.iter().zip(&symbolic) {
            assert_relative_eq!(a, b, epsilon = 1e-12, max_relative = 1e-10);
        }
    }

    #[test]
    fn test_sparse_inputs_unsupported() {
        let kernel = ArcCosineKernel::new();
        let sparse =
            SparsePointSet::new(vec![SparseVector::new(vec![0], vec![1.0f64])], 2).unwrap();
        assert!(matches!(
            kernel.prepare_sparse(&sparse, &sparse),
            Err(KernelError::UnsupportedOperation(_))
        ));
        let mut out = KernelBlock::zeros(1, 1);
        assert!(kernel.apply_sparse(&sparse, &sparse, &mut out).is_err());
        assert!(!kernel.capabilities().sparse);
    }

    #[test]
    fn test_single_precision() {
        let kernel = ArcCosineKernel::new();
        let x = PointSet::from_rows(&[[1.0f32, 0.0], [0.6, 0.8]]).unwrap();
        let k = kernel.compute_block(x.view(), x.view()).unwrap();
        assert_relative_eq!(k.get(0, 0), 1.0f32, epsilon = 1e-6);
        assert!(k.is_symmetric(1e-6));
    }

    #[test]
    fn test_display() {
        assert_eq!(ArcCosineKernel::new().to_string(), "ArcCosineKernel()");
    }
}
