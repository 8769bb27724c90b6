//! High-level API for surface reconstruction
//!
//! This module chains the pipeline pieces: cleaning the oriented cloud,
//! building labeled triples, the seeded shuffle, the kernel fit and the grid
//! evaluation.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use ksurf::api::SurfaceReconstructor;
//! use ksurf::kernel::{KernelConfig, KernelKind};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let reconstruction = SurfaceReconstructor::new()
//!     .with_kernel(KernelConfig::new(KernelKind::SphericalLaplace))
//!     .with_grid_size(64)
//!     .with_seed(7)
//!     .reconstruct_file::<f64, _>("bunny.xyz")?;
//!
//! let (lo, hi) = reconstruction.grid.range().unwrap_or_default();
//! println!("implicit values in [{lo}, {hi}]");
//! # Ok(())
//! # }
//! ```

use crate::core::{EvaluationContext, KernelError, PointSet, Real, ReconstructionConfig, Regressor, Result};
use crate::data::{write_values, XyzDataset};
use crate::kernel::{KernelConfig, KernelFunction};
use crate::persistence::SerializableModel;
use crate::pipeline::{
    eval_grid, make_triples, BoundingBox, GridSpec, LabeledPoints, OrientedPointCloud, UnitCubeFrame,
    VoxelGrid,
};
use crate::solver::{DirectKernelSolver, SolverScalar};
use log::info;
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;

/// Surface reconstruction with builder pattern
#[derive(Debug, Clone, Default)]
pub struct SurfaceReconstructor {
    config: ReconstructionConfig,
    context: Option<EvaluationContext>,
}

impl SurfaceReconstructor {
    /// Reconstructor with the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: ReconstructionConfig) -> Self {
        Self {
            config,
            context: None,
        }
    }

    /// Read a JSON [`ReconstructionConfig`]; missing fields take their defaults
    pub fn from_config_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let config = serde_json::from_reader(reader)
            .map_err(|e| KernelError::SerializationError(e.to_string()))?;
        Ok(Self::from_config(config))
    }

    pub fn config(&self) -> &ReconstructionConfig {
        &self.config
    }

    pub fn with_kernel(mut self, kernel: KernelConfig) -> Self {
        self.config.kernel = kernel;
        self
    }

    /// Set the ridge penalty
    pub fn with_penalty(mut self, penalty: f64) -> Self {
        self.config.penalty = penalty;
        self
    }

    /// Set the offset along normals for the inside/outside copies
    pub fn with_eps(mut self, eps: f64) -> Self {
        self.config.eps = eps;
        self
    }

    pub fn with_grid_size(mut self, grid_size: usize) -> Self {
        self.config.grid_size = grid_size;
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.config.scale = scale;
        self
    }

    /// Normalize the cloud into the unit cube and pad its box by `padding`
    pub fn with_padding(mut self, padding: f64) -> Self {
        self.config.padding = Some(padding);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    pub fn with_chunks(mut self, chunks: usize) -> Self {
        self.config.chunks = chunks;
        self
    }

    /// Use `ctx` for grid evaluation instead of a CPU context in the
    /// cloud's precision
    pub fn with_context(mut self, ctx: EvaluationContext) -> Self {
        self.context = Some(ctx);
        self
    }

    fn validate(&self) -> Result<()> {
        let config = &self.config;
        if !config.eps.is_finite() || config.eps <= 0.0 {
            return Err(KernelError::InvalidParameter(format!(
                "eps must be positive, got {}",
                config.eps
            )));
        }
        if !config.scale.is_finite() || config.scale <= 0.0 {
            return Err(KernelError::InvalidParameter(format!(
                "scale must be positive, got {}",
                config.scale
            )));
        }
        if let Some(padding) = config.padding {
            if !padding.is_finite() || padding < 0.0 {
                return Err(KernelError::InvalidParameter(format!(
                    "padding must be non-negative, got {padding}"
                )));
            }
        }
        if config.grid_size < 2 {
            return Err(KernelError::InvalidParameter(format!(
                "grid size must be at least 2, got {}",
                config.grid_size
            )));
        }
        if config.chunks == 0 {
            return Err(KernelError::InvalidParameter(
                "chunks must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Clean the cloud and build the shuffled labeled points it is fitted on
    pub fn prepare<T: SolverScalar>(&self, cloud: &OrientedPointCloud<T>) -> Result<TrainingSet<T>> {
        self.validate()?;
        let clean = cloud.normalized(self.config.min_normal_norm)?;

        let (clean, bbox, frame) = match self.config.padding {
            Some(padding) => {
                let (unit, frame) = clean.to_unit_cube()?;
                info!(
                    "Normalized cloud into the unit cube (center {:?}, scale {})",
                    frame.center(),
                    frame.scale()
                );
                let bbox = BoundingBox::from_points(unit.points())?.padded(<T as Real>::from_f64(padding));
                (unit, bbox, Some(frame))
            }
            None => {
                let bbox = BoundingBox::from_points(clean.points())?
                    .scaled(<T as Real>::from_f64(self.config.scale));
                (clean, bbox, None)
            }
        };

        let seed = self.config.seed.unwrap_or_else(|| {
            let seed = rand::random();
            info!("No seed configured, shuffling with seed {seed}");
            seed
        });
        let labeled = make_triples(&clean, <T as Real>::from_f64(self.config.eps))?.shuffled(seed);

        Ok(TrainingSet {
            labeled,
            bbox,
            seed,
            frame,
        })
    }

    /// Fit a prepared training set
    pub fn fit_training_set<T: SolverScalar>(&self, set: TrainingSet<T>) -> Result<FittedSurface<T>> {
        let kernel = self.config.kernel.build()?;
        let labeled = set.labeled.with_bias();

        let mut solver = DirectKernelSolver::new(kernel, self.config.penalty)?;
        solver.fit(&labeled.points, &labeled.labels)?;

        Ok(FittedSurface {
            solver,
            bbox: set.bbox,
            seed: set.seed,
            frame: set.frame,
            context: self.context.unwrap_or_else(EvaluationContext::new::<T>),
        })
    }

    /// Fit the implicit function of an oriented cloud
    pub fn fit<T: SolverScalar>(&self, cloud: &OrientedPointCloud<T>) -> Result<FittedSurface<T>> {
        let set = self.prepare(cloud)?;
        self.fit_training_set(set)
    }

    /// Fit and sample the implicit function on the configured grid
    pub fn reconstruct<T: SolverScalar>(&self, cloud: &OrientedPointCloud<T>) -> Result<Reconstruction<T>> {
        let surface = self.fit(cloud)?;
        let grid = surface.sample(self.config.grid_size, self.config.chunks)?;
        Ok(Reconstruction { surface, grid })
    }

    /// Read an xyz file with normals and reconstruct it in precision `T`
    pub fn reconstruct_file<T: SolverScalar, P: AsRef<Path>>(&self, path: P) -> Result<Reconstruction<T>> {
        let cloud = XyzDataset::from_file(path)?.into_oriented()?;
        self.reconstruct(&cloud.cast::<T>())
    }
}

/// Labeled points ready for fitting, plus the box and frame they live in
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSet<T> {
    /// Shuffled surface, inside and outside points, without the bias column
    pub labeled: LabeledPoints<T>,
    /// Box the grid is sampled over
    pub bbox: BoundingBox<T>,
    pub seed: u64,
    /// Unit cube normalization, when padding was configured
    pub frame: Option<UnitCubeFrame<T>>,
}

impl<T: Real> TrainingSet<T> {
    /// Write `x y z label` lines in the fitting frame
    pub fn write_points<W: Write>(&self, writer: W) -> Result<()> {
        let labels: Vec<f64> = self.labeled.labels.iter().map(|&v| v.into_f64()).collect();
        write_values(writer, &self.labeled.points.cast::<f64>(), &labels)
    }
}

/// A fitted implicit function together with the box it was fitted in
#[derive(Debug, Clone)]
pub struct FittedSurface<T> {
    solver: DirectKernelSolver<T, KernelFunction>,
    bbox: BoundingBox<T>,
    seed: u64,
    frame: Option<UnitCubeFrame<T>>,
    context: EvaluationContext,
}

impl<T: SolverScalar> FittedSurface<T> {
    /// Rebuild a surface from a stored model; the box must have been stored
    /// along with it
    pub fn from_model(model: &SerializableModel, context: EvaluationContext) -> Result<Self> {
        let bbox = model.bbox()?.ok_or_else(|| {
            KernelError::InvalidParameter("model has no bounding box".to_string())
        })?;
        let bbox = BoundingBox::new(
            bbox.min().iter().map(|&v| <T as Real>::from_f64(v)).collect(),
            bbox.size().iter().map(|&v| <T as Real>::from_f64(v)).collect(),
        )?;
        let frame = model.frame()?.map(|frame| frame.cast::<T>());
        Ok(Self {
            solver: model.to_solver()?,
            bbox,
            seed: model.metadata.seed.unwrap_or_default(),
            frame,
            context,
        })
    }

    pub fn solver(&self) -> &DirectKernelSolver<T, KernelFunction> {
        &self.solver
    }

    /// Scaled bounding box of the cleaned input, in the fitting frame
    pub fn bbox(&self) -> &BoundingBox<T> {
        &self.bbox
    }

    /// Seed the labeled points were shuffled with
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Unit cube normalization applied to the input, if any
    pub fn frame(&self) -> Option<&UnitCubeFrame<T>> {
        self.frame.as_ref()
    }

    pub fn context(&self) -> &EvaluationContext {
        &self.context
    }

    /// Implicit function values at input-frame points given without the
    /// bias coordinate
    pub fn predict(&self, points: &PointSet<T>) -> Result<Vec<T>> {
        let biased = match &self.frame {
            Some(frame) => frame.apply(points)?.with_bias(),
            None => points.with_bias(),
        };
        self.solver.predict_with(&biased, &self.context)
    }

    /// Sample the function over the bounding box; grid coordinates are in
    /// the fitting frame
    pub fn sample(&self, grid_size: usize, chunks: usize) -> Result<VoxelGrid<T>> {
        let spec = GridSpec::from_longest_side(self.bbox.clone(), grid_size)?;
        info!(
            "Evaluating {} grid samples ({:?}) in {} chunks",
            spec.len(),
            spec.resolution(),
            chunks.max(1)
        );
        eval_grid(&spec, chunks, |points| self.solver.predict_with(points, &self.context))
    }

    /// Checkpoint of the fitted solver, seed and box
    pub fn to_model(&self) -> Result<SerializableModel> {
        let model = SerializableModel::from_solver(&self.solver)?
            .with_seed(self.seed)
            .with_bbox(&self.bbox);
        Ok(match &self.frame {
            Some(frame) => model.with_frame(frame),
            None => model,
        })
    }
}

/// Fitted surface plus its sampled grid
#[derive(Debug, Clone)]
pub struct Reconstruction<T> {
    pub surface: FittedSurface<T>,
    pub grid: VoxelGrid<T>,
}

/// Convenience functions for quick operations
pub mod quick {
    use super::*;

    /// Reconstruct an xyz file in double precision with default parameters
    pub fn reconstruct_file<P: AsRef<Path>>(path: P, grid_size: usize) -> Result<VoxelGrid<f64>> {
        let reconstruction = SurfaceReconstructor::new()
            .with_grid_size(grid_size)
            .reconstruct_file::<f64, _>(path)?;
        Ok(reconstruction.grid)
    }

    /// Fit a cloud with a fixed seed and default parameters
    pub fn fit_seeded<T: SolverScalar>(cloud: &OrientedPointCloud<T>, seed: u64) -> Result<FittedSurface<T>> {
        SurfaceReconstructor::new().with_seed(seed).fit(cloud)
    }
}
