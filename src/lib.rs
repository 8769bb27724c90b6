//! Implicit surface reconstruction with angular kernels
//!
//! Fits kernel ridge regression on oriented point clouds and samples the
//! fitted function on a grid whose zero level-set is the surface. Kernels are
//! evaluated through staged, symbolic or device strategies chosen per call.

pub mod api;
pub mod core;
pub mod data;
pub mod kernel;
pub mod persistence;
pub mod pipeline;
pub mod solver;

// Re-export main types for convenience
pub use crate::api::{FittedSurface, Reconstruction, SurfaceReconstructor, TrainingSet};
pub use crate::core::error::{KernelError, Result};
pub use crate::core::traits::*;
pub use crate::core::types::*;
pub use crate::data::XyzDataset;
pub use crate::kernel::{Kernel, KernelConfig, KernelFunction, KernelKind, Strategy};
pub use crate::persistence::{SerializableGrid, SerializableModel};
pub use crate::pipeline::{BoundingBox, GridSpec, OrientedPointCloud, UnitCubeFrame, VoxelGrid};
pub use crate::solver::{DirectKernelSolver, SolverScalar};

// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
