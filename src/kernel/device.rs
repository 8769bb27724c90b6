//! Precompiled device kernels
//!
//! Device kernels are fixed entry points looked up in a dispatch table by
//! [`DeviceKernel`]. Each launch covers an `n x m` output with a grid of
//! thread blocks; every thread writes exactly one entry and threads outside
//! the output do nothing. Blocks run on the rayon pool, one block row per
//! task, so the evaluation order inside a block matches the thread layout.

use crate::core::{EvaluationContext, KernelBlock, KernelError, PointSetRef, Real, Result};
use crate::kernel::staged::TilePlan;
use crate::kernel::traits::{check_block_shape, check_same_dim};
use log::debug;
use rayon::prelude::*;

/// Identifier of a precompiled kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKernel {
    /// Neural tangent kernel with the `atan2` angle
    StableNeuralTangent,
}

/// Scalars passed to a device kernel at launch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceParams {
    pub variance: f64,
}

/// A kernel together with its launch-time scalars
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceLaunch {
    pub kernel: DeviceKernel,
    pub params: DeviceParams,
}

/// Dispatch-table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceKernelInfo {
    pub kernel: DeviceKernel,
    /// Entry-point symbol of the compiled kernel
    pub symbol: &'static str,
    /// Threads per block as `(rows, cols)`
    pub threads: (usize, usize),
}

pub const DISPATCH_TABLE: &[DeviceKernelInfo] = &[DeviceKernelInfo {
    kernel: DeviceKernel::StableNeuralTangent,
    symbol: "stable_ntk",
    threads: (16, 16),
}];

pub fn lookup(kernel: DeviceKernel) -> Option<&'static DeviceKernelInfo> {
    DISPATCH_TABLE.iter().find(|info| info.kernel == kernel)
}

/// Launch geometry of one device kernel call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchConfig {
    pub threads: (usize, usize),
    pub blocks: (usize, usize),
}

impl LaunchConfig {
    /// Smallest grid of `threads`-sized blocks covering `rows x cols`
    pub fn for_shape(threads: (usize, usize), rows: usize, cols: usize) -> Self {
        Self {
            threads,
            blocks: (rows.div_ceil(threads.0), cols.div_ceil(threads.1)),
        }
    }

    pub fn total_threads(&self) -> usize {
        self.threads.0 * self.threads.1 * self.blocks.0 * self.blocks.1
    }
}

type EntryPoint<T> = fn(&[T], &[T], &DeviceParams) -> T;

fn entry_point<T: Real>(kernel: DeviceKernel) -> EntryPoint<T> {
    match kernel {
        DeviceKernel::StableNeuralTangent => stable_neural_tangent::<T>,
    }
}

/// One NTK entry, computing both norms and the angle in registers
fn stable_neural_tangent<T: Real>(x: &[T], y: &[T], params: &DeviceParams) -> T {
    let (mut norm_x, mut norm_y) = (T::zero(), T::zero());
    for (&a, &b) in x.iter().zip(y) {
        norm_x = a.mul_add(a, norm_x);
        norm_y = b.mul_add(b, norm_y);
    }
    let norm_x = norm_x.sqrt();
    let norm_y = norm_y.sqrt();

    let (mut arg1, mut arg2) = (T::zero(), T::zero());
    for (&a, &b) in x.iter().zip(y) {
        let diff = norm_y * a - norm_x * b;
        let sum = norm_y * a + norm_x * b;
        arg1 = diff.mul_add(diff, arg1);
        arg2 = sum.mul_add(sum, arg2);
    }
    let two = T::one() + T::one();
    let angle = two * arg1.sqrt().atan2(arg2.sqrt());

    let scale = T::one() + T::from_f64(params.variance);
    norm_x * norm_y * (angle.sin() + scale * (T::PI() - angle) * angle.cos()) / T::PI()
}

/// Evaluate `launch` over every pair of `x1 x x2` into `out`
pub fn launch<T: Real>(
    launch: &DeviceLaunch,
    x1: PointSetRef<'_, T>,
    x2: PointSetRef<'_, T>,
    out: &mut KernelBlock<T>,
) -> Result<LaunchConfig> {
    check_same_dim(x1, x2)?;
    let (n, m) = (x1.len(), x2.len());
    check_block_shape(out, n, m)?;
    let info = lookup(launch.kernel).ok_or_else(|| {
        KernelError::UnsupportedOperation(format!("no compiled kernel for {:?}", launch.kernel))
    })?;
    let config = LaunchConfig::for_shape(info.threads, n, m);
    if n == 0 || m == 0 {
        return Ok(config);
    }

    let entry = entry_point::<T>(launch.kernel);
    let params = launch.params;
    let (tdx, tdy) = config.threads;
    out.as_mut_slice()
        .par_chunks_mut(tdx * m)
        .enumerate()
        .for_each(|(bx, band)| {
            for by in 0..config.blocks.1 {
                for ty in 0..tdx {
                    for tx in 0..tdy {
                        let i = bx * tdx + ty;
                        let j = by * tdy + tx;
                        if i >= n || j >= m {
                            continue;
                        }
                        band[ty * m + j] = entry(x1.row(i), x2.row(j), &params);
                    }
                }
            }
        });
    Ok(config)
}

/// Tiled `K(x1, x2) · v` through a device kernel
pub fn matrix_vector_product<T: Real>(
    device_launch: &DeviceLaunch,
    x1: PointSetRef<'_, T>,
    x2: PointSetRef<'_, T>,
    v: &[T],
    ctx: &EvaluationContext,
) -> Result<Vec<T>> {
    check_same_dim(x1, x2)?;
    let (n, m) = (x1.len(), x2.len());
    let mut out = vec![T::zero(); n];
    if n == 0 || m == 0 {
        return Ok(out);
    }

    let plan = TilePlan::for_scalar::<T>(n, m, ctx.memory_budget);
    let mut block = KernelBlock::zeros(plan.row_tile, plan.col_tile);
    let mut launches = 0usize;
    for rows in plan.row_ranges(n) {
        for cols in plan.col_ranges(m) {
            block.reshape(rows.len(), cols.len());
            launch(
                device_launch,
                x1.slice(rows.clone()),
                x2.slice(cols.clone()),
                &mut block,
            )?;
            block.matvec_accumulate(&v[cols], &mut out[rows.clone()])?;
            launches += 1;
        }
    }
    if ctx.debug {
        debug!(
            "device kernel {:?}: {launches} launches over {n}x{m}",
            device_launch.kernel
        );
    }
    Ok(out)
}
