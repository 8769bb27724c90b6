//! Bounding boxes and regular sampling grids

use crate::core::{KernelError, PointSet, Real, Result};
use log::debug;
use std::ops::Range;

/// Axis-aligned box given by its minimum corner and extent
#[derive(Debug, Clone, PartialEq)]
pub struct BoundingBox<T> {
    min: Vec<T>,
    size: Vec<T>,
}

impl<T: Real> BoundingBox<T> {
    pub fn new(min: Vec<T>, size: Vec<T>) -> Result<Self> {
        if min.is_empty() {
            return Err(KernelError::EmptyDataset);
        }
        if min.len() != size.len() {
            return Err(KernelError::DimensionMismatch {
                expected: min.len(),
                actual: size.len(),
            });
        }
        if size.iter().any(|s| !s.is_finite() || *s < T::zero()) {
            return Err(KernelError::InvalidParameter(
                "bounding box extents must be finite and non-negative".to_string(),
            ));
        }
        Ok(Self { min, size })
    }

    /// Tightest box around `points`
    pub fn from_points(points: &PointSet<T>) -> Result<Self> {
        let first = points.rows().next().ok_or(KernelError::EmptyDataset)?;
        let mut min = first.to_vec();
        let mut max = first.to_vec();
        for row in points.rows() {
            for (k, &v) in row.iter().enumerate() {
                min[k] = min[k].min(v);
                max[k] = max[k].max(v);
            }
        }
        let size = max.iter().zip(&min).map(|(&hi, &lo)| hi - lo).collect();
        Self::new(min, size)
    }

    pub fn dim(&self) -> usize {
        self.min.len()
    }

    pub fn min(&self) -> &[T] {
        &self.min
    }

    pub fn size(&self) -> &[T] {
        &self.size
    }

    pub fn max(&self) -> Vec<T> {
        self.min.iter().zip(&self.size).map(|(&m, &s)| m + s).collect()
    }

    pub fn center(&self) -> Vec<T> {
        let two = T::one() + T::one();
        self.min.iter().zip(&self.size).map(|(&m, &s)| m + s / two).collect()
    }

    pub fn longest_side(&self) -> T {
        self.size.iter().fold(T::zero(), |acc, &s| acc.max(s))
    }

    /// Box with the same center and every extent multiplied by `scale`
    pub fn scaled(&self, scale: T) -> Self {
        let two = T::one() + T::one();
        let size: Vec<T> = self.size.iter().map(|&s| s * scale).collect();
        let min = self
            .center()
            .iter()
            .zip(&size)
            .map(|(&c, &s)| c - s / two)
            .collect();
        Self { min, size }
    }

    /// Box grown on every side by `padding` times its extent along that axis
    pub fn padded(&self, padding: T) -> Self {
        let two = T::one() + T::one();
        Self {
            min: self.min.iter().zip(&self.size).map(|(&m, &s)| m - padding * s).collect(),
            size: self.size.iter().map(|&s| s * (T::one() + two * padding)).collect(),
        }
    }

    pub fn contains(&self, point: &[T]) -> bool {
        point.len() == self.dim()
            && point
                .iter()
                .zip(self.min.iter().zip(&self.size))
                .all(|(&p, (&m, &s))| p >= m && p <= m + s)
    }
}

/// Regular grid of sample positions spanning a bounding box, endpoints included
#[derive(Debug, Clone, PartialEq)]
pub struct GridSpec<T> {
    bbox: BoundingBox<T>,
    resolution: Vec<usize>,
}

impl<T: Real> GridSpec<T> {
    pub fn new(bbox: BoundingBox<T>, resolution: Vec<usize>) -> Result<Self> {
        if resolution.len() != bbox.dim() {
            return Err(KernelError::DimensionMismatch {
                expected: bbox.dim(),
                actual: resolution.len(),
            });
        }
        if resolution.iter().any(|&r| r < 2) {
            return Err(KernelError::InvalidParameter(format!(
                "every grid axis needs at least 2 samples, got {resolution:?}"
            )));
        }
        Ok(Self { bbox, resolution })
    }

    /// `grid_size` samples along the longest side, proportionally fewer on
    /// the others
    pub fn from_longest_side(bbox: BoundingBox<T>, grid_size: usize) -> Result<Self> {
        let longest = bbox.longest_side().into_f64();
        if longest <= 0.0 {
            return Err(KernelError::InvalidParameter(
                "bounding box has no extent".to_string(),
            ));
        }
        let resolution = bbox
            .size()
            .iter()
            .map(|s| ((s.into_f64() / longest * grid_size as f64).round() as usize).max(2))
            .collect();
        Self::new(bbox, resolution)
    }

    pub fn bbox(&self) -> &BoundingBox<T> {
        &self.bbox
    }

    pub fn resolution(&self) -> &[usize] {
        &self.resolution
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.resolution.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Distance between neighbouring samples along every axis
    pub fn spacing(&self) -> Vec<T> {
        self.bbox
            .size()
            .iter()
            .zip(&self.resolution)
            .map(|(&s, &r)| s / T::from_f64((r - 1) as f64))
            .collect()
    }

    /// Position of sample `k` along `axis`
    pub fn coordinate(&self, axis: usize, k: usize) -> T {
        let steps = (self.resolution[axis] - 1) as f64;
        let t = T::from_f64(k as f64 / steps);
        self.bbox.min[axis] + self.bbox.size[axis] * t
    }

    /// Per-axis indices of flat sample `flat`; the last axis varies fastest
    pub fn unravel(&self, mut flat: usize) -> Vec<usize> {
        let mut index = vec![0; self.resolution.len()];
        for (axis, &r) in self.resolution.iter().enumerate().rev() {
            index[axis] = flat % r;
            flat /= r;
        }
        index
    }

    /// Sample positions with flat indices in `range`
    pub fn points_range(&self, range: Range<usize>) -> Result<PointSet<T>> {
        let dim = self.bbox.dim();
        let mut data = Vec::with_capacity(range.len() * dim);
        for flat in range {
            let index = self.unravel(flat);
            data.extend(index.iter().enumerate().map(|(axis, &k)| self.coordinate(axis, k)));
        }
        PointSet::new(data, dim)
    }

    /// Every sample position
    pub fn points(&self) -> Result<PointSet<T>> {
        self.points_range(0..self.len())
    }
}

/// Function values sampled on a [`GridSpec`]
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelGrid<T> {
    spec: GridSpec<T>,
    values: Vec<T>,
}

impl<T: Real> VoxelGrid<T> {
    pub fn new(spec: GridSpec<T>, values: Vec<T>) -> Result<Self> {
        if values.len() != spec.len() {
            return Err(KernelError::DimensionMismatch {
                expected: spec.len(),
                actual: values.len(),
            });
        }
        Ok(Self { spec, values })
    }

    pub fn spec(&self) -> &GridSpec<T> {
        &self.spec
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn into_values(self) -> Vec<T> {
        self.values
    }

    /// Value at per-axis `index`
    pub fn get(&self, index: &[usize]) -> Option<T> {
        if index.len() != self.spec.resolution.len() {
            return None;
        }
        let mut flat = 0;
        for (&i, &r) in index.iter().zip(&self.spec.resolution) {
            if i >= r {
                return None;
            }
            flat = flat * r + i;
        }
        self.values.get(flat).copied()
    }

    /// Smallest and largest sampled value
    pub fn range(&self) -> Option<(T, T)> {
        let first = *self.values.first()?;
        Some(
            self.values
                .iter()
                .fold((first, first), |(lo, hi), &v| (lo.min(v), hi.max(v))),
        )
    }
}

/// Evaluate `predict` on every sample of `spec`, `chunks` slices at a time
///
/// `predict` receives the sample positions with a homogeneous `1` appended.
pub fn eval_grid<T, F>(spec: &GridSpec<T>, chunks: usize, mut predict: F) -> Result<VoxelGrid<T>>
where
    T: Real,
    F: FnMut(&PointSet<T>) -> Result<Vec<T>>,
{
    let total = spec.len();
    let chunk_len = total.div_ceil(chunks.max(1)).max(1);
    let mut values = Vec::with_capacity(total);
    for (i, start) in (0..total).step_by(chunk_len).enumerate() {
        let range = start..(start + chunk_len).min(total);
        let points = spec.points_range(range.clone())?.with_bias();
        let chunk = predict(&points)?;
        if chunk.len() != range.len() {
            return Err(KernelError::DimensionMismatch {
                expected: range.len(),
                actual: chunk.len(),
            });
        }
        debug!("Evaluated grid chunk {} ({} samples)", i + 1, range.len());
        values.extend(chunk);
    }
    VoxelGrid::new(spec.clone(), values)
}
