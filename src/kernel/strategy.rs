//! Evaluation strategy selection

use crate::core::{Device, EvaluationContext};
use crate::kernel::device::{self, DeviceKernel};

/// How a kernel matrix-vector product is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Precompiled device kernel
    Device(DeviceKernel),
    /// Lazy symbolic formula, never materializing the matrix
    Symbolic,
    /// Tiled prepare/apply/finalize pipeline
    Staged,
    /// Full dense matrix from `direct_kernel`; never chosen automatically
    Direct,
}

/// What a kernel variant can offer the selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KernelCapabilities {
    pub sparse: bool,
    pub symbolic: bool,
    pub device_kernel: Option<DeviceKernel>,
}

/// Extent of one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProblemShape {
    pub rows: usize,
    pub cols: usize,
    pub dim: usize,
}

/// Pick the cheapest strategy the kernel and the context both support
pub fn select_strategy(
    caps: &KernelCapabilities,
    shape: &ProblemShape,
    ctx: &EvaluationContext,
) -> Strategy {
    if let Some(kernel) = caps.device_kernel {
        if ctx.device == Device::Accelerator && ctx.device_kernels && device::lookup(kernel).is_some()
        {
            return Strategy::Device(kernel);
        }
    }
    if caps.symbolic && ctx.symbolic_engine && shape.dim <= ctx.max_symbolic_dim {
        return Strategy::Symbolic;
    }
    Strategy::Staged
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHAPE: ProblemShape = ProblemShape {
        rows: 100,
        cols: 80,
        dim: 4,
    };

    fn ntk_caps() -> KernelCapabilities {
        KernelCapabilities {
            sparse: false,
            symbolic: true,
            device_kernel: Some(DeviceKernel::StableNeuralTangent),
        }
    }

    #[test]
    fn test_device_has_priority() {
        let ctx = EvaluationContext::accelerator::<f64>();
        assert_eq!(
            select_strategy(&ntk_caps(), &SHAPE, &ctx),
            Strategy::Device(DeviceKernel::StableNeuralTangent)
        );
    }

    #[test]
    fn test_device_needs_accelerator_and_flag() {
        let cpu = EvaluationContext::new::<f64>().with_device_kernels(true);
        assert_eq!(select_strategy(&ntk_caps(), &SHAPE, &cpu), Strategy::Symbolic);

        let no_kernels = EvaluationContext::accelerator::<f64>().with_device_kernels(false);
        assert_eq!(
            select_strategy(&ntk_caps(), &SHAPE, &no_kernels),
            Strategy::Symbolic
        );
    }

    #[test]
    fn test_symbolic_dimension_limit() {
        let ctx = EvaluationContext::new::<f64>().with_max_symbolic_dim(3);
        assert_eq!(select_strategy(&ntk_caps(), &SHAPE, &ctx), Strategy::Staged);

        let ctx = EvaluationContext::new::<f64>().with_max_symbolic_dim(4);
        assert_eq!(select_strategy(&ntk_caps(), &SHAPE, &ctx), Strategy::Symbolic);
    }

    #[test]
    fn test_staged_fallback() {
        let caps = KernelCapabilities::default();
        let ctx = EvaluationContext::accelerator::<f64>();
        assert_eq!(select_strategy(&caps, &SHAPE, &ctx), Strategy::Staged);
        assert_eq!(
            select_strategy(&ntk_caps(), &SHAPE, &EvaluationContext::staged_only::<f64>()),
            Strategy::Staged
        );
    }
}
