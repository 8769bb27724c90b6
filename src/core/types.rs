//! Core type definitions for kernel evaluation

use crate::core::{KernelError, Real, Result};
use crate::kernel::KernelConfig;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

/// Numeric precision of an evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// 32-bit floats
    Single,
    /// 64-bit floats
    #[default]
    Double,
}

impl Precision {
    /// Canonical dtype name
    pub fn name(&self) -> &'static str {
        match self {
            Precision::Single => "float32",
            Precision::Double => "float64",
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Precision {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "float32" | "f32" | "single" => Ok(Precision::Single),
            "float64" | "f64" | "double" => Ok(Precision::Double),
            other => Err(KernelError::InvalidParameter(format!(
                "invalid dtype `{other}`, must be one of 'float32' or 'float64'"
            ))),
        }
    }
}

/// Where kernel evaluation runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cpu,
    /// Accelerator target; enables precompiled device kernels when the
    /// context also allows them
    Accelerator,
}

/// Capabilities and diagnostics for one fit/predict call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationContext {
    pub device: Device,
    /// Symbolic (lazy) formula engine is usable
    pub symbolic_engine: bool,
    /// Precompiled device kernels are usable
    pub device_kernels: bool,
    pub precision: Precision,
    /// Emit per-stage debug logging
    pub debug: bool,
    /// Upper bound in bytes for one staged tile buffer
    pub memory_budget: usize,
    /// Largest feature dimension the symbolic engine accepts
    pub max_symbolic_dim: usize,
}

impl EvaluationContext {
    pub const DEFAULT_MEMORY_BUDGET: usize = 64 * 1024 * 1024; // 64MB
    pub const DEFAULT_MAX_SYMBOLIC_DIM: usize = 64;

    /// CPU context with the symbolic engine enabled
    pub fn new<T: Real>() -> Self {
        Self {
            device: Device::Cpu,
            symbolic_engine: true,
            device_kernels: false,
            precision: T::PRECISION,
            debug: false,
            memory_budget: Self::DEFAULT_MEMORY_BUDGET,
            max_symbolic_dim: Self::DEFAULT_MAX_SYMBOLIC_DIM,
        }
    }

    /// Accelerator context with every engine enabled
    pub fn accelerator<T: Real>() -> Self {
        Self {
            device: Device::Accelerator,
            device_kernels: true,
            ..Self::new::<T>()
        }
    }

    /// Context that only allows the staged pipeline
    pub fn staged_only<T: Real>() -> Self {
        Self {
            symbolic_engine: false,
            ..Self::new::<T>()
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn with_symbolic_engine(mut self, enabled: bool) -> Self {
        self.symbolic_engine = enabled;
        self
    }

    pub fn with_device_kernels(mut self, enabled: bool) -> Self {
        self.device_kernels = enabled;
        self
    }

    pub fn with_memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget = bytes;
        self
    }

    pub fn with_max_symbolic_dim(mut self, dim: usize) -> Self {
        self.max_symbolic_dim = dim;
        self
    }

    /// Fail if the operands are not in the precision this context was built for
    pub fn check_precision<T: Real>(&self) -> Result<()> {
        if self.precision != T::PRECISION {
            return Err(KernelError::InvalidParameter(format!(
                "context precision {} does not match operand precision {}",
                self.precision,
                T::PRECISION
            )));
        }
        Ok(())
    }
}

impl Default for EvaluationContext {
    fn default() -> Self {
        Self::new::<f64>()
    }
}

/// A hyperparameter value as supplied by a caller
///
/// Kernels accept either a plain number or a tensor value; tensors must hold
/// exactly one element to be usable.
#[derive(Debug, Clone, PartialEq)]
pub enum Hyperparameter {
    Scalar(f64),
    Tensor { shape: Vec<usize>, values: Vec<f64> },
}

impl Hyperparameter {
    pub fn tensor(shape: Vec<usize>, values: Vec<f64>) -> Self {
        Hyperparameter::Tensor { shape, values }
    }

    /// Reduce to a single finite number
    pub fn extract_scalar(&self, name: &'static str) -> Result<f64> {
        let value = match self {
            Hyperparameter::Scalar(v) => *v,
            Hyperparameter::Tensor { shape, values } => {
                let expected: usize = shape.iter().product();
                if expected != values.len() {
                    return Err(KernelError::hyperparameter(
                        name,
                        format!(
                            "tensor of shape {shape:?} carries {} values",
                            values.len()
                        ),
                    ));
                }
                if values.len() != 1 {
                    return Err(KernelError::hyperparameter(
                        name,
                        format!("item is not a scalar (tensor of shape {shape:?})"),
                    ));
                }
                values[0]
            }
        };

        if !value.is_finite() {
            return Err(KernelError::hyperparameter(
                name,
                format!("value must be finite, got {value}"),
            ));
        }
        Ok(value)
    }
}

impl From<f64> for Hyperparameter {
    fn from(v: f64) -> Self {
        Hyperparameter::Scalar(v)
    }
}

impl From<f32> for Hyperparameter {
    fn from(v: f32) -> Self {
        Hyperparameter::Scalar(v as f64)
    }
}

impl From<i32> for Hyperparameter {
    fn from(v: i32) -> Self {
        Hyperparameter::Scalar(v as f64)
    }
}

/// Dense, row-major set of points
#[derive(Debug, Clone, PartialEq)]
pub struct PointSet<T> {
    data: Vec<T>,
    dim: usize,
}

impl<T: Real> PointSet<T> {
    /// Wrap row-major coordinates of `dim`-dimensional points
    pub fn new(data: Vec<T>, dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(KernelError::InvalidParameter(
                "point dimension must be positive".to_string(),
            ));
        }
        if data.len() % dim != 0 {
            return Err(KernelError::InvalidParameter(format!(
                "{} coordinates do not form whole {dim}-dimensional points",
                data.len()
            )));
        }
        Ok(Self { data, dim })
    }

    /// An empty set of `dim`-dimensional points
    pub fn empty(dim: usize) -> Result<Self> {
        Self::new(Vec::new(), dim)
    }

    /// Build from rows that must all share one length
    pub fn from_rows<R: AsRef<[T]>>(rows: &[R]) -> Result<Self> {
        let first = rows.first().ok_or(KernelError::EmptyDataset)?;
        let dim = first.as_ref().len();
        let mut data = Vec::with_capacity(dim * rows.len());
        for row in rows {
            let row = row.as_ref();
            if row.len() != dim {
                return Err(KernelError::DimensionMismatch {
                    expected: dim,
                    actual: row.len(),
                });
            }
            data.extend_from_slice(row);
        }
        Self::new(data, dim)
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.dim.max(1)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Coordinates of point `i`
    ///
    /// # Panics
    /// Panics if `i >= len()`
    pub fn row(&self, i: usize) -> &[T] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    pub fn rows(&self) -> std::slice::ChunksExact<'_, T> {
        self.data.chunks_exact(self.dim)
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn view(&self) -> PointSetRef<'_, T> {
        PointSetRef {
            data: &self.data,
            dim: self.dim,
        }
    }

    /// Append a point
    pub fn push(&mut self, row: &[T]) -> Result<()> {
        if row.len() != self.dim {
            return Err(KernelError::DimensionMismatch {
                expected: self.dim,
                actual: row.len(),
            });
        }
        self.data.extend_from_slice(row);
        Ok(())
    }

    /// Copy with a homogeneous `1` appended to every point
    pub fn with_bias(&self) -> Self {
        let dim = self.dim + 1;
        let mut data = Vec::with_capacity(self.len() * dim);
        for row in self.rows() {
            data.extend_from_slice(row);
            data.push(T::one());
        }
        Self { data, dim }
    }

    /// Copy of the points at `indices`, in that order
    pub fn select(&self, indices: &[usize]) -> Self {
        let mut data = Vec::with_capacity(indices.len() * self.dim);
        for &i in indices {
            data.extend_from_slice(self.row(i));
        }
        Self {
            data,
            dim: self.dim,
        }
    }

    /// Copy converted to another precision
    pub fn cast<U: Real>(&self) -> PointSet<U> {
        PointSet {
            data: self.data.iter().map(|&v| U::from_f64(v.into_f64())).collect(),
            dim: self.dim,
        }
    }

    /// Stack point sets of equal dimension
    pub fn concat(sets: &[&PointSet<T>]) -> Result<Self> {
        let first = sets.first().ok_or(KernelError::EmptyDataset)?;
        let mut out = Self::empty(first.dim)?;
        for set in sets {
            if set.dim != first.dim {
                return Err(KernelError::DimensionMismatch {
                    expected: first.dim,
                    actual: set.dim,
                });
            }
            out.data.extend_from_slice(&set.data);
        }
        Ok(out)
    }
}

/// Borrowed view of a contiguous run of points
#[derive(Debug, Clone, Copy)]
pub struct PointSetRef<'a, T> {
    data: &'a [T],
    dim: usize,
}

impl<'a, T: Real> PointSetRef<'a, T> {
    pub fn len(&self) -> usize {
        self.data.len() / self.dim.max(1)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn row(&self, i: usize) -> &'a [T] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    pub fn rows(&self) -> std::slice::ChunksExact<'a, T> {
        self.data.chunks_exact(self.dim)
    }

    pub fn as_slice(&self) -> &'a [T] {
        self.data
    }

    /// Sub-view of points `range`
    pub fn slice(&self, range: Range<usize>) -> PointSetRef<'a, T> {
        PointSetRef {
            data: &self.data[range.start * self.dim..range.end * self.dim],
            dim: self.dim,
        }
    }

    /// Euclidean norm of every point
    pub fn norms(&self) -> Vec<T> {
        self.data
            .par_chunks_exact(self.dim)
            .map(|row| row.iter().map(|&v| v * v).sum::<T>().sqrt())
            .collect()
    }
}

impl<'a, T: Real> From<&'a PointSet<T>> for PointSetRef<'a, T> {
    fn from(set: &'a PointSet<T>) -> Self {
        set.view()
    }
}

/// Sparse vector representation with sorted indices
#[derive(Clone, Debug, PartialEq)]
pub struct SparseVector<T> {
    /// Sorted indices of non-zero elements
    pub indices: Vec<usize>,
    /// Values corresponding to indices
    pub values: Vec<T>,
}

impl<T: Real> SparseVector<T> {
    /// Create a new sparse vector, ensuring indices are sorted
    pub fn new(indices: Vec<usize>, values: Vec<T>) -> Self {
        assert_eq!(
            indices.len(),
            values.len(),
            "Indices and values must have same length"
        );

        let mut pairs: Vec<_> = indices.into_iter().zip(values).collect();
        pairs.sort_by_key(|&(idx, _)| idx);

        let (indices, values): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
        Self { indices, values }
    }

    /// Number of non-zero elements
    pub fn nnz(&self) -> usize {
        self.indices.len()
    }
}

/// Points stored as sparse rows
#[derive(Clone, Debug, PartialEq)]
pub struct SparsePointSet<T> {
    rows: Vec<SparseVector<T>>,
    dim: usize,
}

impl<T: Real> SparsePointSet<T> {
    pub fn new(rows: Vec<SparseVector<T>>, dim: usize) -> Result<Self> {
        for row in &rows {
            if let Some(&last) = row.indices.last() {
                if last >= dim {
                    return Err(KernelError::DimensionMismatch {
                        expected: dim,
                        actual: last + 1,
                    });
                }
            }
        }
        Ok(Self { rows, dim })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[SparseVector<T>] {
        &self.rows
    }
}

/// Dense row-major block of kernel values
#[derive(Debug, Clone, PartialEq)]
pub struct KernelBlock<T> {
    rows: usize,
    cols: usize,
    data: Vec<T>,
}

impl<T: Real> KernelBlock<T> {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![T::zero(); rows * cols],
        }
    }

    pub fn from_vec(rows: usize, cols: usize, data: Vec<T>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(KernelError::InvalidParameter(format!(
                "{} values cannot fill a {rows}x{cols} block",
                data.len()
            )));
        }
        Ok(Self { rows, cols, data })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn get(&self, i: usize, j: usize) -> T {
        self.data[i * self.cols + j]
    }

    pub fn set(&mut self, i: usize, j: usize, value: T) {
        self.data[i * self.cols + j] = value;
    }

    pub fn row(&self, i: usize) -> &[T] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Change the shape in place, keeping the allocation
    pub fn reshape(&mut self, rows: usize, cols: usize) {
        self.data.clear();
        self.data.resize(rows * cols, T::zero());
        self.rows = rows;
        self.cols = cols;
    }

    /// Compute `self · v`
    pub fn matvec(&self, v: &[T]) -> Result<Vec<T>> {
        let mut out = vec![T::zero(); self.rows];
        self.matvec_accumulate(v, &mut out)?;
        Ok(out)
    }

    /// Accumulate `self · v` into `out`
    pub fn matvec_accumulate(&self, v: &[T], out: &mut [T]) -> Result<()> {
        if v.len() != self.cols {
            return Err(KernelError::DimensionMismatch {
                expected: self.cols,
                actual: v.len(),
            });
        }
        if out.len() != self.rows {
            return Err(KernelError::DimensionMismatch {
                expected: self.rows,
                actual: out.len(),
            });
        }
        if self.cols == 0 {
            return Ok(());
        }
        out.par_iter_mut()
            .zip(self.data.par_chunks_exact(self.cols))
            .for_each(|(acc, row)| {
                *acc = *acc + row.iter().zip(v).map(|(&k, &vj)| k * vj).sum::<T>();
            });
        Ok(())
    }

    /// Whether the block is square and symmetric within `tol`
    pub fn is_symmetric(&self, tol: T) -> bool {
        if self.rows != self.cols {
            return false;
        }
        (0..self.rows).all(|i| (i + 1..self.cols).all(|j| (self.get(i, j) - self.get(j, i)).abs() <= tol))
    }

    /// Largest absolute element-wise difference, `None` if shapes differ
    pub fn max_abs_diff(&self, other: &KernelBlock<T>) -> Option<T> {
        if self.shape() != other.shape() {
            return None;
        }
        Some(
            self.data
                .iter()
                .zip(&other.data)
                .fold(T::zero(), |m, (&a, &b)| m.max((a - b).abs())),
        )
    }
}

/// Configuration of one surface reconstruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    /// Kernel family and hyperparameters
    pub kernel: KernelConfig,
    /// Ridge penalty added to the kernel diagonal
    pub penalty: f64,
    /// Offset along the normals used to build labeled triples
    pub eps: f64,
    /// Voxels along the longest side of the bounding box
    pub grid_size: usize,
    /// Factor by which the bounding box diameter is grown
    pub scale: f64,
    /// Move the cloud into the unit cube and grow its box on every side by
    /// this fraction of the extent; replaces `scale` when set
    pub padding: Option<f64>,
    /// Seed for the shuffle of labeled points
    pub seed: Option<u64>,
    /// Number of chunks the grid is evaluated in
    pub chunks: usize,
    /// Normals shorter than this are treated as missing
    pub min_normal_norm: f64,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            kernel: KernelConfig::default(),
            penalty: 1e-7,
            eps: 0.01,
            grid_size: 128,
            scale: 1.1,
            padding: None,
            seed: None,
            chunks: 1,
            min_normal_norm: 1e-5,
        }
    }
}
