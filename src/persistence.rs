//! Model and grid serialization
//!
//! Fitted solvers and sampled grids are stored as JSON so the command line
//! tool can fit once and evaluate or inspect later.

use crate::core::{KernelError, PointSet, Precision, Real, Regressor, Result};
use crate::kernel::{KernelConfig, KernelFunction};
use crate::pipeline::{BoundingBox, GridSpec, UnitCubeFrame, VoxelGrid};
use crate::solver::{DirectKernelSolver, SolverScalar};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Serializable representation of a fitted [`DirectKernelSolver`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializableModel {
    /// Kernel family and hyperparameters
    pub kernel: KernelConfig,
    /// Ridge penalty used in the fit
    pub penalty: f64,
    /// Feature dimension of the training points, bias included
    pub dim: usize,
    /// Row-major training points
    pub points: Vec<f64>,
    /// Fitted coefficients, one per training point
    pub alpha: Vec<f64>,
    /// Model metadata
    pub metadata: ModelMetadata,
}

/// Model metadata for tracking and validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Library version used to create the model
    pub library_version: String,
    /// Precision the model was fitted in
    pub precision: Precision,
    /// Number of training points
    pub n_points: usize,
    /// Shuffle seed, when the model came out of the reconstruction pipeline
    pub seed: Option<u64>,
    /// Bounding box of the input cloud as `(min, size)`
    pub bbox: Option<(Vec<f64>, Vec<f64>)>,
    /// Unit cube normalization as `(center, scale)`; training points and
    /// box are in the normalized frame when present
    #[serde(default)]
    pub frame: Option<(Vec<f64>, f64)>,
    /// Creation timestamp
    pub created_at: String,
}

fn widen<T: Real>(values: &[T]) -> Vec<f64> {
    values.iter().map(|&v| v.into_f64()).collect()
}

fn narrow<T: Real>(values: &[f64]) -> Vec<T> {
    values.iter().map(|&v| T::from_f64(v)).collect()
}

impl SerializableModel {
    /// Snapshot a fitted solver
    pub fn from_solver<T: SolverScalar>(solver: &DirectKernelSolver<T, KernelFunction>) -> Result<Self> {
        let (points, alpha) = match (solver.training_points(), solver.alpha()) {
            (Some(points), Some(alpha)) => (points, alpha),
            _ => return Err(KernelError::UnfittedModel),
        };
        Ok(Self {
            kernel: solver.kernel().config(),
            penalty: solver.penalty(),
            dim: points.dim(),
            points: widen(points.as_slice()),
            alpha: widen(alpha),
            metadata: ModelMetadata {
                library_version: env!("CARGO_PKG_VERSION").to_string(),
                precision: T::PRECISION,
                n_points: points.len(),
                seed: None,
                bbox: None,
                frame: None,
                created_at: chrono::Utc::now().to_rfc3339(),
            },
        })
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.metadata.seed = Some(seed);
        self
    }

    pub fn with_bbox<T: Real>(mut self, bbox: &BoundingBox<T>) -> Self {
        self.metadata.bbox = Some((widen(bbox.min()), widen(bbox.size())));
        self
    }

    pub fn with_frame<T: Real>(mut self, frame: &UnitCubeFrame<T>) -> Self {
        self.metadata.frame = Some((widen(frame.center()), frame.scale().into_f64()));
        self
    }

    /// Rebuild the fitted solver in precision `T`
    pub fn to_solver<T: SolverScalar>(&self) -> Result<DirectKernelSolver<T, KernelFunction>> {
        let kernel = self.kernel.build()?;
        let points = PointSet::new(narrow(&self.points), self.dim)?;
        DirectKernelSolver::from_parts(kernel, self.penalty, points, narrow(&self.alpha))
    }

    /// Stored bounding box, if any
    pub fn bbox(&self) -> Result<Option<BoundingBox<f64>>> {
        match &self.metadata.bbox {
            Some((min, size)) => Ok(Some(BoundingBox::new(min.clone(), size.clone())?)),
            None => Ok(None),
        }
    }

    /// Stored unit cube normalization, if any
    pub fn frame(&self) -> Result<Option<UnitCubeFrame<f64>>> {
        match &self.metadata.frame {
            Some((center, scale)) => Ok(Some(UnitCubeFrame::new(center.clone(), *scale)?)),
            None => Ok(None),
        }
    }

    /// Save model to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        save_json(self, path)
    }

    /// Load model from file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_json(path)
    }

    /// Print model summary
    pub fn print_summary(&self) {
        println!("=== Kernel Surface Model Summary ===");
        println!("Kernel: {}", self.kernel.kind);
        match self.kernel.build() {
            Ok(kernel) => println!("  {kernel}"),
            Err(e) => println!("  (invalid kernel: {e})"),
        }
        println!("Penalty: {}", self.penalty);
        println!("Training Points: {}", self.metadata.n_points);
        println!("Dimension: {}", self.dim);
        println!("Precision: {}", self.metadata.precision);
        if let Some(seed) = self.metadata.seed {
            println!("Seed: {seed}");
        }
        if let Some((min, size)) = &self.metadata.bbox {
            println!("Bounding Box: min {min:?}, size {size:?}");
        }
        if let Some((center, scale)) = &self.metadata.frame {
            println!("Normalized Frame: center {center:?}, scale {scale}");
        }
        println!("Library Version: {}", self.metadata.library_version);
        println!("Created: {}", self.metadata.created_at);
    }
}

/// Serializable representation of a [`VoxelGrid`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializableGrid {
    pub min: Vec<f64>,
    pub size: Vec<f64>,
    /// Samples per axis; the last axis varies fastest in `values`
    pub resolution: Vec<usize>,
    pub values: Vec<f64>,
    pub created_at: String,
}

impl SerializableGrid {
    pub fn from_grid<T: Real>(grid: &VoxelGrid<T>) -> Self {
        let spec = grid.spec();
        Self {
            min: widen(spec.bbox().min()),
            size: widen(spec.bbox().size()),
            resolution: spec.resolution().to_vec(),
            values: widen(grid.values()),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn to_grid(&self) -> Result<VoxelGrid<f64>> {
        let bbox = BoundingBox::new(self.min.clone(), self.size.clone())?;
        let spec = GridSpec::new(bbox, self.resolution.clone())?;
        VoxelGrid::new(spec, self.values.clone())
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        save_json(self, path)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_json(path)
    }
}

fn save_json<S: Serialize, P: AsRef<Path>>(value: &S, path: P) -> Result<()> {
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, value)
        .map_err(|e| KernelError::SerializationError(e.to_string()))?;
    Ok(())
}

fn load_json<S: for<'de> Deserialize<'de>, P: AsRef<Path>>(path: P) -> Result<S> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader).map_err(|e| KernelError::SerializationError(e.to_string()))
}

/// Fitted solver plus whatever the model file says about its origin
pub fn load_solver<T: SolverScalar, P: AsRef<Path>>(
    path: P,
) -> Result<(DirectKernelSolver<T, KernelFunction>, SerializableModel)> {
    let model = SerializableModel::load_from_file(path)?;
    let solver = model.to_solver::<T>()?;
    debug_assert!(solver.is_fitted());
    Ok((solver, model))
}
