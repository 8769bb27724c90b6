//! Kernel selection by name and the tagged kernel union

use crate::core::{KernelBlock, KernelError, PointSetRef, Real, Result, SparsePointSet};
use crate::kernel::device::DeviceLaunch;
use crate::kernel::formula::Formula;
use crate::kernel::traits::{Auxiliary, AuxiliaryRef};
use crate::kernel::{
    ArcCosineKernel, Kernel, LaplaceKernelSphere, LaplaceKernelSphereDecay, NeuralTangentKernel,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kernel family as named in configuration and on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KernelKind {
    ArcCosine,
    #[default]
    NeuralSpline,
    SphericalLaplace,
}

impl KernelKind {
    pub fn name(&self) -> &'static str {
        match self {
            KernelKind::ArcCosine => "arccosine",
            KernelKind::NeuralSpline => "neural-spline",
            KernelKind::SphericalLaplace => "spherical-laplace",
        }
    }
}

impl fmt::Display for KernelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for KernelKind {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "arccosine" | "arc-cosine" => Ok(KernelKind::ArcCosine),
            "neural-spline" | "ntk" | "neural-tangent" => Ok(KernelKind::NeuralSpline),
            "spherical-laplace" | "laplace" => Ok(KernelKind::SphericalLaplace),
            other => Err(KernelError::InvalidParameter(format!(
                "unknown kernel `{other}`, expected one of arccosine, neural-spline, spherical-laplace"
            ))),
        }
    }
}

/// Kernel family plus hyperparameters, as stored in configs and checkpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub kind: KernelKind,
    /// Laplace scale
    pub alpha: f64,
    /// Laplace exponent
    pub gamma: f64,
    /// NTK variance
    pub variance: f64,
    /// Gaussian decay width; only positive values enable it
    pub decay: Option<f64>,
    pub debug: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            kind: KernelKind::default(),
            alpha: LaplaceKernelSphere::DEFAULT_ALPHA,
            gamma: LaplaceKernelSphere::DEFAULT_GAMMA,
            variance: NeuralTangentKernel::DEFAULT_VARIANCE,
            decay: None,
            debug: false,
        }
    }
}

impl KernelConfig {
    pub fn new(kind: KernelKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    /// Construct the configured kernel, validating every hyperparameter
    pub fn build(&self) -> Result<KernelFunction> {
        let decay = self.decay.filter(|&d| d > 0.0);
        let kernel = match (self.kind, decay) {
            (KernelKind::ArcCosine, None) => {
                KernelFunction::ArcCosine(ArcCosineKernel::new().with_debug(self.debug))
            }
            (KernelKind::NeuralSpline, None) => KernelFunction::NeuralTangent(
                NeuralTangentKernel::new(self.variance)?.with_debug(self.debug),
            ),
            (KernelKind::SphericalLaplace, None) => KernelFunction::LaplaceSphere(
                LaplaceKernelSphere::new(self.alpha, self.gamma)?.with_debug(self.debug),
            ),
            (KernelKind::SphericalLaplace, Some(sigma)) => KernelFunction::LaplaceSphereDecay(
                LaplaceKernelSphereDecay::new(self.alpha, self.gamma, sigma)?
                    .with_debug(self.debug),
            ),
            (kind, Some(_)) => {
                return Err(KernelError::UnsupportedOperation(format!(
                    "{kind} kernel does not support decay"
                )))
            }
        };
        Ok(kernel)
    }
}

/// Variant tag of a [`KernelFunction`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelTag {
    ArcCosine,
    NeuralTangent,
    LaplaceSphere,
    LaplaceSphereDecay,
}

/// Any of the angular kernel families
#[derive(Debug, Clone, PartialEq)]
pub enum KernelFunction {
    ArcCosine(ArcCosineKernel),
    NeuralTangent(NeuralTangentKernel),
    LaplaceSphere(LaplaceKernelSphere),
    LaplaceSphereDecay(LaplaceKernelSphereDecay),
}

macro_rules! dispatch {
    ($self:ident, $k:ident => $body:expr) => {
        match $self {
            KernelFunction::ArcCosine($k) => $body,
            KernelFunction::NeuralTangent($k) => $body,
            KernelFunction::LaplaceSphere($k) => $body,
            KernelFunction::LaplaceSphereDecay($k) => $body,
        }
    };
}

impl KernelFunction {
    pub fn tag(&self) -> KernelTag {
        match self {
            KernelFunction::ArcCosine(_) => KernelTag::ArcCosine,
            KernelFunction::NeuralTangent(_) => KernelTag::NeuralTangent,
            KernelFunction::LaplaceSphere(_) => KernelTag::LaplaceSphere,
            KernelFunction::LaplaceSphereDecay(_) => KernelTag::LaplaceSphereDecay,
        }
    }

    /// Configuration that rebuilds this kernel
    pub fn config(&self) -> KernelConfig {
        let debug = self.debug();
        match self {
            KernelFunction::ArcCosine(_) => KernelConfig {
                debug,
                ..KernelConfig::new(KernelKind::ArcCosine)
            },
            KernelFunction::NeuralTangent(k) => KernelConfig {
                variance: k.variance(),
                debug,
                ..KernelConfig::new(KernelKind::NeuralSpline)
            },
            KernelFunction::LaplaceSphere(k) => KernelConfig {
                alpha: k.alpha(),
                gamma: k.gamma(),
                debug,
                ..KernelConfig::new(KernelKind::SphericalLaplace)
            },
            KernelFunction::LaplaceSphereDecay(k) => KernelConfig {
                alpha: k.alpha(),
                gamma: k.gamma(),
                decay: Some(k.sigma()),
                debug,
                ..KernelConfig::new(KernelKind::SphericalLaplace)
            },
        }
    }
}

impl Default for KernelFunction {
    fn default() -> Self {
        KernelFunction::NeuralTangent(NeuralTangentKernel::default())
    }
}

impl fmt::Display for KernelFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        dispatch!(self, k => fmt::Display::fmt(k, f))
    }
}

impl From<ArcCosineKernel> for KernelFunction {
    fn from(k: ArcCosineKernel) -> Self {
        KernelFunction::ArcCosine(k)
    }
}

impl From<NeuralTangentKernel> for KernelFunction {
    fn from(k: NeuralTangentKernel) -> Self {
        KernelFunction::NeuralTangent(k)
    }
}

impl From<LaplaceKernelSphere> for KernelFunction {
    fn from(k: LaplaceKernelSphere) -> Self {
        KernelFunction::LaplaceSphere(k)
    }
}

impl From<LaplaceKernelSphereDecay> for KernelFunction {
    fn from(k: LaplaceKernelSphereDecay) -> Self {
        KernelFunction::LaplaceSphereDecay(k)
    }
}

impl Kernel for KernelFunction {
    fn name(&self) -> &'static str {
        dispatch!(self, k => k.name())
    }

    fn debug(&self) -> bool {
        dispatch!(self, k => k.debug())
    }

    fn formula(&self) -> Option<Formula> {
        dispatch!(self, k => k.formula())
    }

    fn device_kernel(&self) -> Option<DeviceLaunch> {
        dispatch!(self, k => k.device_kernel())
    }

    fn prepare<T: Real>(
        &self,
        x1: PointSetRef<'_, T>,
        x2: PointSetRef<'_, T>,
    ) -> Result<Auxiliary<T>> {
        dispatch!(self, k => k.prepare(x1, x2))
    }

    fn apply<T: Real>(
        &self,
        x1: PointSetRef<'_, T>,
        x2: PointSetRef<'_, T>,
        out: &mut KernelBlock<T>,
    ) -> Result<()> {
        dispatch!(self, k => k.apply(x1, x2, out))
    }

    fn finalize<T: Real>(
        &self,
        block: &mut KernelBlock<T>,
        aux: AuxiliaryRef<'_, T>,
    ) -> Result<()> {
        dispatch!(self, k => k.finalize(block, aux))
    }

    fn direct_kernel<T: Real>(
        &self,
        x1: PointSetRef<'_, T>,
        x2: PointSetRef<'_, T>,
    ) -> Result<KernelBlock<T>> {
        dispatch!(self, k => k.direct_kernel(x1, x2))
    }

    fn prepare_sparse<T: Real>(
        &self,
        x1: &SparsePointSet<T>,
        x2: &SparsePointSet<T>,
    ) -> Result<Auxiliary<T>> {
        dispatch!(self, k => k.prepare_sparse(x1, x2))
    }

    fn apply_sparse<T: Real>(
        &self,
        x1: &SparsePointSet<T>,
        x2: &SparsePointSet<T>,
        out: &mut KernelBlock<T>,
    ) -> Result<()> {
        dispatch!(self, k => k.apply_sparse(x1, x2, out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EvaluationContext, PointSet};
    use crate::kernel::{DeviceKernel, Strategy};

    #[test]
    fn test_kind_parsing() {
        assert_eq!("ntk".parse::<KernelKind>().unwrap(), KernelKind::NeuralSpline);
        assert_eq!(
            "Neural-Spline".parse::<KernelKind>().unwrap(),
            KernelKind::NeuralSpline
        );
        assert_eq!("arccosine".parse::<KernelKind>().unwrap(), KernelKind::ArcCosine);
        assert_eq!(
            "spherical-laplace".parse::<KernelKind>().unwrap(),
            KernelKind::SphericalLaplace
        );
        assert!("rbf".parse::<KernelKind>().is_err());
    }

    #[test]
    fn test_build_variants() {
        let ntk = KernelConfig::default().build().unwrap();
        assert_eq!(ntk.tag(), KernelTag::NeuralTangent);

        let arc = KernelConfig::new(KernelKind::ArcCosine).build().unwrap();
        assert_eq!(arc.tag(), KernelTag::ArcCosine);

        let laplace = KernelConfig::new(KernelKind::SphericalLaplace).build().unwrap();
        assert_eq!(laplace.tag(), KernelTag::LaplaceSphere);

        let decayed = KernelConfig {
            decay: Some(0.5),
            ..KernelConfig::new(KernelKind::SphericalLaplace)
        }
        .build()
        .unwrap();
        assert_eq!(decayed.tag(), KernelTag::LaplaceSphereDecay);
    }

    #[test]
    fn test_non_positive_decay_is_ignored() {
        let config = KernelConfig {
            decay: Some(-1.0),
            ..KernelConfig::new(KernelKind::SphericalLaplace)
        };
        assert_eq!(config.build().unwrap().tag(), KernelTag::LaplaceSphere);
    }

    #[test]
    fn test_decay_rejected_for_arc_cosine() {
        let config = KernelConfig {
            decay: Some(1.0),
            ..KernelConfig::new(KernelKind::ArcCosine)
        };
        assert!(matches!(
            config.build(),
            Err(KernelError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_invalid_hyperparameters_surface() {
        let config = KernelConfig {
            gamma: 0.0,
            ..KernelConfig::new(KernelKind::SphericalLaplace)
        };
        assert!(matches!(
            config.build(),
            Err(KernelError::InvalidHyperparameter { name: "gamma", .. })
        ));
    }

    #[test]
    fn test_config_round_trip() {
        let configs = [
            KernelConfig::new(KernelKind::ArcCosine),
            KernelConfig {
                variance: 0.25,
                ..KernelConfig::default()
            },
            KernelConfig {
                alpha: -2.0,
                gamma: 0.75,
                decay: Some(3.0),
                ..KernelConfig::new(KernelKind::SphericalLaplace)
            },
        ];
        for config in configs {
            assert_eq!(config.build().unwrap().config(), config);
        }
    }

    #[test]
    fn test_config_json() {
        let json = r#"{"kind": "spherical-laplace", "alpha": -0.5}"#;
        let config: KernelConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.kind, KernelKind::SphericalLaplace);
        assert_eq!(config.alpha, -0.5);
        assert_eq!(config.gamma, 0.5);
    }

    #[test]
    fn test_dispatch_delegates() {
        let kernel = KernelFunction::default();
        assert_eq!(kernel.name(), "neural-tangent");
        assert_eq!(
            kernel.capabilities().device_kernel,
            Some(DeviceKernel::StableNeuralTangent)
        );

        let x = PointSet::from_rows(&[[1.0, 0.0, 1.0], [0.0, 1.0, 1.0]]).unwrap();
        let direct = kernel.direct_kernel(x.view(), x.view()).unwrap();
        let inner = NeuralTangentKernel::default()
            .direct_kernel(x.view(), x.view())
            .unwrap();
        assert_eq!(direct, inner);

        let ctx = EvaluationContext::new::<f64>();
        let staged = kernel
            .matrix_vector_product_with(Strategy::Staged, x.view(), x.view(), &[1.0, 1.0], &ctx)
            .unwrap();
        assert_eq!(staged.len(), 2);
    }

    #[test]
    fn test_display_delegates() {
        let kernel: KernelFunction = ArcCosineKernel::new().into();
        assert_eq!(kernel.to_string(), "ArcCosineKernel()");
    }
}
