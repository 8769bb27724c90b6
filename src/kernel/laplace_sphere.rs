//! Spherical Laplace kernels

use crate::core::{Hyperparameter, KernelBlock, KernelError, PointSetRef, Real, Result};
use crate::kernel::formula::Formula;
use crate::kernel::linear::{dot, squared_distance};
use crate::kernel::traits::{
    check_same_dim, clamp_unit, direct_with, divide_by_norms, finalize_with, Auxiliary,
    AuxiliaryRef,
};
use crate::kernel::Kernel;
use std::fmt;

fn read_gamma(gamma: Hyperparameter) -> Result<f64> {
    let gamma = gamma.extract_scalar("gamma")?;
    if gamma <= 0.0 {
        return Err(KernelError::hyperparameter(
            "gamma",
            format!("must be positive, got {gamma}"),
        ));
    }
    Ok(gamma)
}

/// Laplace kernel on the sphere, rescaled by the norms:
/// K(x, y) = ‖x‖‖y‖ · exp(α (1 − cos θ)^γ)
///
/// `alpha` is typically negative; its sign is not checked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaplaceKernelSphere {
    alpha: f64,
    gamma: f64,
    debug: bool,
}

impl LaplaceKernelSphere {
    pub const DEFAULT_ALPHA: f64 = -1.0;
    pub const DEFAULT_GAMMA: f64 = 0.5;

    pub fn new(alpha: impl Into<Hyperparameter>, gamma: impl Into<Hyperparameter>) -> Result<Self> {
        Ok(Self {
            alpha: alpha.into().extract_scalar("alpha")?,
            gamma: read_gamma(gamma.into())?,
            debug: false,
        })
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    fn formula_inner(&self) -> Formula {
        let one_minus_cos = Formula::constant(1.0) - Formula::Cosine.clamp_unit();
        let exponent = Formula::constant(self.alpha) * one_minus_cos.powf(Formula::constant(self.gamma));
        Formula::NormX * Formula::NormY * exponent.exp()
    }

    /// One entry of the undecayed kernel from a raw dot product
    #[inline]
    fn transform<T: Real>(raw: T, n1: T, n2: T, alpha: T, gamma: T) -> T {
        let mut a = divide_by_norms(raw, n1, n2);
        a = clamp_unit(a);
        a = -a;
        a = a + T::one();
        a = a.powf(gamma);
        a = a * alpha;
        a = a.exp();
        a = a * n1;
        a * n2
    }

    fn scalars<T: Real>(&self) -> (T, T) {
        (T::from_f64(self.alpha), T::from_f64(self.gamma))
    }
}

impl Default for LaplaceKernelSphere {
    fn default() -> Self {
        Self {
            alpha: Self::DEFAULT_ALPHA,
            gamma: Self::DEFAULT_GAMMA,
            debug: false,
        }
    }
}

impl fmt::Display for LaplaceKernelSphere {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LaplaceKernelSphere(alpha={}, gamma={})",
            self.alpha, self.gamma
        )
    }
}

impl Kernel for LaplaceKernelSphere {
    fn name(&self) -> &'static str {
        "spherical-laplace"
    }

    fn debug(&self) -> bool {
        self.debug
    }

    fn formula(&self) -> Option<Formula> {
        Some(self.formula_inner())
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
        let (alpha, gamma) = self.scalars::<T>();
        finalize_with(block, aux, |raw, n1, n2| {
            Self::transform(raw, n1, n2, alpha, gamma)
        })
    }

    fn direct_kernel<T: Real>(
        &self,
        x1: PointSetRef<'_, T>,
        x2: PointSetRef<'_, T>,
    ) -> Result<KernelBlock<T>> {
        let (alpha, gamma) = self.scalars::<T>();
        direct_with(x1, x2, |x, y, nx, ny| {
            let cos = clamp_unit(divide_by_norms(dot(x, y), nx, ny));
            nx * ny * (alpha * (T::one() - cos).powf(gamma)).exp()
        })
    }
}

/// Spherical Laplace kernel damped by a Gaussian of the Euclidean distance:
/// K(x, y) = ‖x‖‖y‖ · exp(α (1 − cos θ)^γ) · exp(−‖x − y‖² / (2σ²))
///
/// As σ grows this tends to [`LaplaceKernelSphere`] with the same α and γ.
///
/// The staged path recovers ‖x − y‖² as ‖x‖² + ‖y‖² − 2⟨x, y⟩. Values within
/// a few ulps of ‖x‖² + ‖y‖² are cancellation noise and are read as zero, so
/// coincident points get an undamped entry even in single precision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaplaceKernelSphereDecay {
    base: LaplaceKernelSphere,
    sigma: f64,
}

impl LaplaceKernelSphereDecay {
    pub fn new(
        alpha: impl Into<Hyperparameter>,
        gamma: impl Into<Hyperparameter>,
        sigma: impl Into<Hyperparameter>,
    ) -> Result<Self> {
        let base = LaplaceKernelSphere::new(alpha, gamma)?;
        let sigma = sigma.into().extract_scalar("sigma")?;
        if sigma <= 0.0 {
            return Err(KernelError::hyperparameter(
                "sigma",
                format!("must be positive, got {sigma}"),
            ));
        }
        Ok(Self { base, sigma })
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.base.debug = debug;
        self
    }

    pub fn alpha(&self) -> f64 {
        self.base.alpha
    }

    pub fn gamma(&self) -> f64 {
        self.base.gamma
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// The same kernel with the decay removed
    pub fn undecayed(&self) -> LaplaceKernelSphere {
        self.base
    }

    /// `−1 / (2σ²)`
    fn decay_rate(&self) -> f64 {
        -0.5 / (self.sigma * self.sigma)
    }
}

impl fmt::Display for LaplaceKernelSphereDecay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LaplaceKernelSphereDecay(alpha={}, gamma={}, sigma={})",
            self.base.alpha, self.base.gamma, self.sigma
        )
    }
}

impl Kernel for LaplaceKernelSphereDecay {
    fn name(&self) -> &'static str {
        "spherical-laplace-decay"
    }

    fn debug(&self) -> bool {
        self.base.debug
    }

    fn formula(&self) -> Option<Formula> {
        let decay = (Formula::constant(self.decay_rate()) * Formula::SquaredDistance).exp();
        Some(self.base.formula_inner() * decay)
    }

    fn prepare<T: Real>(
        &self,
        x1: PointSetRef<'_, T>,
        x2: PointSetRef<'_, T>,
    ) -> Result<Auxiliary<T>> {
        self.base.prepare(x1, x2)
    }

    fn finalize<T: Real>(
        &self,
        block: &mut KernelBlock<T>,
        aux: AuxiliaryRef<'_, T>,
    ) -> Result<()> {
        let (alpha, gamma) = self.base.scalars::<T>();
        let rate = T::from_f64(self.decay_rate());
        let two = T::one() + T::one();
        let noise = T::from_f64(8.0) * T::epsilon();
        finalize_with(block, aux, |raw, n1, n2| {
            // squared distance from the raw dot, before it is overwritten
            let sq = n1 * n1 + n2 * n2;
            let d2 = sq - two * raw;
            let d2 = if d2 <= noise * sq { T::zero() } else { d2 };
            let a = LaplaceKernelSphere::transform(raw, n1, n2, alpha, gamma);
            a * (rate * d2).exp()
        })
    }

    fn direct_kernel<T: Real>(
        &self,
        x1: PointSetRef<'_, T>,
        x2: PointSetRef<'_, T>,
    ) -> Result<KernelBlock<T>> {
        let (alpha, gamma) = self.base.scalars::<T>();
        let rate = T::from_f64(self.decay_rate());
        direct_with(x1, x2, |x, y, nx, ny| {
            let cos = clamp_unit(divide_by_norms(dot(x, y), nx, ny));
            let laplace = nx * ny * (alpha * (T::one() - cos).powf(gamma)).exp();
            laplace * (rate * squared_distance(x, y)).exp()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EvaluationContext, PointSet};
    use crate::kernel::Strategy;
    use approx::assert_relative_eq;

    fn sample_points() -> PointSet<f64> {
        PointSet::from_rows(&[
            [0.4, 0.4, -0.1, 1.0],
            [-0.2, 0.8, 0.5, 1.0],
            [0.9, -0.9, 0.0, 1.0],
            [0.0, 0.1, 0.3, 1.0],
        ])
        .unwrap()
    }

    #[test]
    fn test_orthogonal_value() {
        // cos θ = 0, so K = exp(-1)
        let kernel = LaplaceKernelSphere::new(-1.0, 1.0).unwrap();
        let x = PointSet::from_rows(&[[1.0, 0.0]]).unwrap();
        let y = PointSet::from_rows(&[[0.0, 1.0]]).unwrap();
        let direct = kernel.direct_kernel(x.view(), y.view()).unwrap();
        let staged = kernel.compute_block(x.view(), y.view()).unwrap();
        assert_relative_eq!(direct.get(0, 0), (-1.0f64).exp(), epsilon = 1e-12);
        assert_relative_eq!(staged.get(0, 0), (-1.0f64).exp(), epsilon = 1e-12);
    }

    #[test]
    fn test_identical_vectors_finite() {
        let kernel = LaplaceKernelSphere::default();
        let x = PointSet::from_rows(&[[0.1f64, 0.2, 0.3], [0.2, 0.4, 0.6]]).unwrap();
        let k = kernel.compute_block(x.view(), x.view()).unwrap();
        assert!(k.as_slice().iter().all(|v| v.is_finite()));
        assert_relative_eq!(k.get(0, 0), 0.14, max_relative = 1e-6);
    }

    #[test]
    fn test_gamma_validation() {
        assert!(LaplaceKernelSphere::new(-1.0, 0.0).is_err());
        assert!(LaplaceKernelSphere::new(-1.0, -2.0).is_err());
        // sign of alpha is not checked
        assert!(LaplaceKernelSphere::new(2.0, 0.5).is_ok());
        let err = LaplaceKernelSphere::new(Hyperparameter::tensor(vec![3], vec![1.0; 3]), 0.5)
            .unwrap_err();
        assert!(matches!(
            err,
            KernelError::InvalidHyperparameter { name: "alpha", .. }
        ));
    }

    #[test]
    fn test_sigma_validation() {
        assert!(LaplaceKernelSphereDecay::new(-1.0, 0.5, 0.0).is_err());
        assert!(LaplaceKernelSphereDecay::new(-1.0, 0.5, -1.0).is_err());
        let kernel = LaplaceKernelSphereDecay::new(-1.0, 0.5, 2.0).unwrap();
        assert_eq!(kernel.sigma(), 2.0);
        assert_eq!(kernel.undecayed(), LaplaceKernelSphere::new(-1.0, 0.5).unwrap());
    }

    #[test]
    fn test_staged_matches_direct() {
        let x = sample_points();
        let plain = LaplaceKernelSphere::new(-1.5, 0.5).unwrap();
        let decayed = LaplaceKernelSphereDecay::new(-1.5, 0.5, 0.8).unwrap();

        let a = plain.direct_kernel(x.view(), x.view()).unwrap();
        let b = plain.compute_block(x.view(), x.view()).unwrap();
        assert!(a.max_abs_diff(&b).unwrap() < 1e-12);

        let a = decayed.direct_kernel(x.view(), x.view()).unwrap();
        let b = decayed.compute_block(x.view(), x.view()).unwrap();
        assert!(a.max_abs_diff(&b).unwrap() < 1e-10);
        assert!(a.is_symmetric(1e-12));
    }

    #[test]
    fn test_narrow_decay_single_precision_coincident_points() {
        let x = PointSet::from_rows(&[
            [0.37f32, 1.21, -0.83, 1.0],
            [0.37, 1.21, -0.83, 1.0],
            [-0.52, 0.18, 0.94, 1.0],
        ])
        .unwrap();
        let kernel = LaplaceKernelSphereDecay::new(-1.0, 1.0, 0.01).unwrap();
        let direct = kernel.direct_kernel(x.view(), x.view()).unwrap();
        let staged = kernel.compute_block(x.view(), x.view()).unwrap();
        for i in 0..2 {
            for j in 0..2 {
                assert_relative_eq!(staged.get(i, j), direct.get(i, j), max_relative = 1e-5);
            }
        }
        assert!(staged.get(0, 2).abs() < 1e-12);
    }

    #[test]
    fn test_decay_damps_distant_pairs() {
        let x = sample_points();
        let plain = LaplaceKernelSphere::new(-1.0, 0.5).unwrap();
        let decayed = LaplaceKernelSphereDecay::new(-1.0, 0.5, 0.5).unwrap();
        let a = plain.direct_kernel(x.view(), x.view()).unwrap();
        let b = decayed.direct_kernel(x.view(), x.view()).unwrap();
        for i in 0..x.len() {
            assert_relative_eq!(a.get(i, i), b.get(i, i), max_relative = 1e-12);
            for j in 0..x.len() {
                assert!(b.get(i, j) <= a.get(i, j));
            }
        }
    }

    #[test]
    fn test_large_sigma_recovers_undecayed() {
        let x = sample_points();
        let plain = LaplaceKernelSphere::new(-1.0, 0.5).unwrap();
        let decayed = LaplaceKernelSphereDecay::new(-1.0, 0.5, 1e8).unwrap();
        let a = plain.direct_kernel(x.view(), x.view()).unwrap();
        let b = decayed.direct_kernel(x.view(), x.view()).unwrap();
        assert!(a.max_abs_diff(&b).unwrap() < 1e-12);
    }

    #[test]
    fn test_symbolic_matches_direct() {
        let x = sample_points();
        let v = [1.0, 0.5, -0.5, 2.0];
        let ctx = EvaluationContext::new::<f64>();
        let kernel = LaplaceKernelSphereDecay::new(-1.0, 0.5, 1.2).unwrap();
        let reference = kernel
            .matrix_vector_product_with(Strategy::Direct, x.view(), x.view(), &v, &ctx)
            .unwrap();
        let symbolic = kernel
            .matrix_vector_product(x.view(), x.view(), &v, &ctx)
            .unwrap();
        for (a, b) in reference.iter().zip(&symbolic) {
            assert_relative_eq!(a, b, epsilon = 1e-12, max_relative = 1e-9);
        }
    }

    #[test]
    fn test_display() {
        let kernel = LaplaceKernelSphereDecay::new(-1.0, 0.5, 2.0).unwrap();
        assert_eq!(
            kernel.to_string(),
            "LaplaceKernelSphereDecay(alpha=-1, gamma=0.5, sigma=2)"
        );
    }
}
