//! Neural tangent kernel of a two-layer ReLU network

use crate::core::{Hyperparameter, KernelBlock, KernelError, PointSetRef, Real, Result};
use crate::kernel::arc_cosine::{arc_cosine_formula, direct_arc_cosine, finalize_arc_cosine};
use crate::kernel::device::{DeviceKernel, DeviceLaunch, DeviceParams};
use crate::kernel::formula::Formula;
use crate::kernel::traits::{check_same_dim, Auxiliary, AuxiliaryRef};
use crate::kernel::Kernel;
use std::f64::consts::PI;
use std::fmt;

/// Neural tangent kernel:
/// K(x, y) = ‖x‖‖y‖/π · (sin θ + (1 + variance)(π − θ) cos θ)
///
/// With `variance = 0` this is exactly [`ArcCosineKernel`](crate::kernel::ArcCosineKernel).
/// It is the only family with a precompiled device kernel, which evaluates
/// the angle through the numerically stable `atan2` form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeuralTangentKernel {
    variance: f64,
    debug: bool,
}

impl NeuralTangentKernel {
    pub const DEFAULT_VARIANCE: f64 = 1.0;

    pub fn new(variance: impl Into<Hyperparameter>) -> Result<Self> {
        let variance = variance.into().extract_scalar("variance")?;
        if variance < 0.0 {
            return Err(KernelError::hyperparameter(
                "variance",
                format!("must be non-negative, got {variance}"),
            ));
        }
        Ok(Self {
            variance,
            debug: false,
        })
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn variance(&self) -> f64 {
        self.variance
    }

    fn outer<T: Real>(&self) -> T {
        T::one() + T::from_f64(self.variance)
    }
}

impl Default for NeuralTangentKernel {
    fn default() -> Self {
        Self {
            variance: Self::DEFAULT_VARIANCE,
            debug: false,
        }
    }
}

impl fmt::Display for NeuralTangentKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NeuralTangentKernel(variance={})", self.variance)
    }
}

impl Kernel for NeuralTangentKernel {
    fn name(&self) -> &'static str {
        "neural-tangent"
    }

    fn debug(&self) -> bool {
        self.debug
    }

    /// Stable angle form: θ = 2·atan2(‖‖y‖x − ‖x‖y‖, ‖‖y‖x + ‖x‖y‖)
    fn formula(&self) -> Option<Formula> {
        if self.variance == 0.0 {
            return Some(arc_cosine_formula(1.0));
        }
        let pi = Formula::constant(PI);
        let theta = Formula::constant(2.0)
            * Formula::atan2(Formula::ScaledDiffNorm, Formula::ScaledSumNorm);
        let slope = Formula::constant(1.0 + self.variance)
            * (pi.clone() - theta.clone())
            * theta.clone().cos();
        Some(Formula::NormX * Formula::NormY * (theta.sin() + slope) / pi)
    }

    fn device_kernel(&self) -> Option<DeviceLaunch> {
        Some(DeviceLaunch {
            kernel: DeviceKernel::StableNeuralTangent,
            params: DeviceParams {
                variance: self.variance,
            },
        })
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
        finalize_arc_cosine(block, aux, self.outer())
    }

    fn direct_kernel<T: Real>(
        &self,
        x1: PointSetRef<'_, T>,
        x2: PointSetRef<'_, T>,
    ) -> Result<KernelBlock<T>> {
        direct_arc_cosine(x1, x2, self.outer())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EvaluationContext, PointSet};
    use crate::kernel::{ArcCosineKernel, Strategy};
    use approx::assert_relative_eq;

    fn sample_points() -> PointSet<f64> {
        PointSet::from_rows(&[
            [0.1, 0.5, -0.4, 1.0],
            [0.9, -0.3, 0.2, 1.0],
            [-0.6, -0.6, 0.1, 1.0],
            [0.2, 0.2, 0.2, 1.0],
        ])
        .unwrap()
    }

    #[test]
    fn test_variance_validation() {
        assert!(NeuralTangentKernel::new(0.0).is_ok());
        assert!(matches!(
            NeuralTangentKernel::new(-0.5),
            Err(KernelError::InvalidHyperparameter { name: "variance", .. })
        ));
        let vector = Hyperparameter::tensor(vec![2], vec![1.0, 2.0]);
        assert!(NeuralTangentKernel::new(vector).is_err());
        assert_eq!(NeuralTangentKernel::default().variance(), 1.0);
    }

    #[test]
    fn test_zero_variance_is_arc_cosine() {
        let ntk = NeuralTangentKernel::new(0.0).unwrap();
        let arc = ArcCosineKernel::new();
        let x = sample_points();

        let a = ntk.direct_kernel(x.view(), x.view()).unwrap();
        let b = arc.direct_kernel(x.view(), x.view()).unwrap();
        assert_eq!(a, b);

        let a = ntk.compute_block(x.view(), x.view()).unwrap();
        let b = arc.compute_block(x.view(), x.view()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_orthogonal_value_independent_of_variance() {
        // cos θ = 0 removes the variance term
        let x = PointSet::from_rows(&[[1.0, 0.0]]).unwrap();
        let y = PointSet::from_rows(&[[0.0, 1.0]]).unwrap();
        let k = NeuralTangentKernel::new(3.0)
            .unwrap()
            .direct_kernel(x.view(), y.view())
            .unwrap();
        assert_relative_eq!(k.get(0, 0), 1.0 / PI, epsilon = 1e-12);
    }

    #[test]
    fn test_all_paths_agree() {
        let kernel = NeuralTangentKernel::new(0.7).unwrap();
        let x = sample_points();
        let v = [0.5, -1.0, 2.0, 1.5];
        let ctx = EvaluationContext::accelerator::<f64>();

        let reference = kernel
            .matrix_vector_product_with(Strategy::Direct, x.view(), x.view(), &v, &ctx)
            .unwrap();
        for strategy in [
            Strategy::Staged,
            Strategy::Symbolic,
            Strategy::Device(DeviceKernel::StableNeuralTangent),
        ] {
            let out = kernel
                .matrix_vector_product_with(strategy, x.view(), x.view(), &v, &ctx)
                .unwrap();
            for (a, b) in reference.iter().zip(&out) {
                assert_relative_eq!(a, b, epsilon = 1e-9, max_relative = 1e-6);
            }
        }
    }

    #[test]
    fn test_capabilities() {
        let caps = NeuralTangentKernel::default().capabilities();
        assert!(caps.symbolic);
        assert!(!caps.sparse);
        assert_eq!(caps.device_kernel, Some(DeviceKernel::StableNeuralTangent));
    }

    #[test]
    fn test_display() {
        let kernel = NeuralTangentKernel::new(0.5).unwrap();
        assert_eq!(kernel.to_string(), "NeuralTangentKernel(variance=0.5)");
    }
}
