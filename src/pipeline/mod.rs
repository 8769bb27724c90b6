//! Surface reconstruction pipeline pieces
//!
//! An oriented cloud is cleaned, turned into three labeled copies (on the
//! surface, pushed inside, pushed outside), shuffled, fitted and finally
//! sampled on a grid whose zero level-set is the surface.

pub mod grid;

pub use self::grid::{eval_grid, BoundingBox, GridSpec, VoxelGrid};

use crate::core::{KernelError, PointSet, Real, Result};
use log::{info, warn};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Points with one normal each
#[derive(Debug, Clone, PartialEq)]
pub struct OrientedPointCloud<T> {
    points: PointSet<T>,
    normals: PointSet<T>,
}

impl<T: Real> OrientedPointCloud<T> {
    pub fn new(points: PointSet<T>, normals: PointSet<T>) -> Result<Self> {
        if points.len() != normals.len() {
            return Err(KernelError::DimensionMismatch {
                expected: points.len(),
                actual: normals.len(),
            });
        }
        if points.dim() != normals.dim() {
            return Err(KernelError::DimensionMismatch {
                expected: points.dim(),
                actual: normals.dim(),
            });
        }
        Ok(Self { points, normals })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.points.dim()
    }

    pub fn points(&self) -> &PointSet<T> {
        &self.points
    }

    pub fn normals(&self) -> &PointSet<T> {
        &self.normals
    }

    /// Drop points whose normal is not longer than `min_norm` and scale the
    /// remaining normals to unit length
    pub fn normalized(&self, min_norm: f64) -> Result<Self> {
        let threshold = T::from_f64(min_norm);
        let norms = self.normals.view().norms();
        let keep: Vec<usize> = (0..self.len()).filter(|&i| norms[i] > threshold).collect();

        let dropped = self.len() - keep.len();
        if dropped > 0 {
            warn!("Dropping {dropped} points with zero-length normals");
        }
        if keep.is_empty() {
            return Err(KernelError::EmptyDataset);
        }

        let points = self.points.select(&keep);
        let mut data = Vec::with_capacity(keep.len() * self.dim());
        for &i in &keep {
            data.extend(self.normals.row(i).iter().map(|&v| v / norms[i]));
        }
        let normals = PointSet::new(data, self.dim())?;
        Ok(Self { points, normals })
    }

    /// Same cloud centered on the origin with its longest side scaled to 1
    ///
    /// Normals keep their direction under the uniform scale.
    pub fn to_unit_cube(&self) -> Result<(Self, UnitCubeFrame<T>)> {
        let frame = UnitCubeFrame::enclosing(&self.points)?;
        let cloud = Self {
            points: frame.apply(&self.points)?,
            normals: self.normals.clone(),
        };
        Ok((cloud, frame))
    }

    pub fn cast<U: Real>(&self) -> OrientedPointCloud<U> {
        OrientedPointCloud {
            points: self.points.cast(),
            normals: self.normals.cast(),
        }
    }
}

/// Translation and uniform scale taking input coordinates into a frame
/// where the cloud is centered and its longest side has length 1
#[derive(Debug, Clone, PartialEq)]
pub struct UnitCubeFrame<T> {
    center: Vec<T>,
    scale: T,
}

impl<T: Real> UnitCubeFrame<T> {
    pub fn new(center: Vec<T>, scale: T) -> Result<Self> {
        if center.is_empty() {
            return Err(KernelError::EmptyDataset);
        }
        if !scale.is_finite() || scale <= T::zero() {
            return Err(KernelError::InvalidParameter(format!(
                "frame scale must be positive, got {scale}"
            )));
        }
        Ok(Self { center, scale })
    }

    /// Frame of the bounding box of `points`; a box with no extent is only
    /// translated
    pub fn enclosing(points: &PointSet<T>) -> Result<Self> {
        let bbox = BoundingBox::from_points(points)?;
        let side = bbox.longest_side();
        let scale = if side > T::zero() { side } else { T::one() };
        Self::new(bbox.center(), scale)
    }

    pub fn center(&self) -> &[T] {
        &self.center
    }

    pub fn scale(&self) -> T {
        self.scale
    }

    /// Map input coordinates into the frame
    pub fn apply(&self, points: &PointSet<T>) -> Result<PointSet<T>> {
        if points.dim() != self.center.len() {
            return Err(KernelError::DimensionMismatch {
                expected: self.center.len(),
                actual: points.dim(),
            });
        }
        let mut data = Vec::with_capacity(points.as_slice().len());
        for row in points.rows() {
            data.extend(row.iter().zip(&self.center).map(|(&v, &c)| (v - c) / self.scale));
        }
        PointSet::new(data, points.dim())
    }

    pub fn cast<U: Real>(&self) -> UnitCubeFrame<U> {
        UnitCubeFrame {
            center: self.center.iter().map(|&v| U::from_f64(v.into_f64())).collect(),
            scale: U::from_f64(self.scale.into_f64()),
        }
    }
}

/// Points with one regression target each
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledPoints<T> {
    pub points: PointSet<T>,
    pub labels: Vec<T>,
}

impl<T: Real> LabeledPoints<T> {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Same points in an order drawn from `seed`
    pub fn shuffled(&self, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.shuffle(&mut rng);
        Self {
            points: self.points.select(&order),
            labels: order.iter().map(|&i| self.labels[i]).collect(),
        }
    }

    /// Same labels with a homogeneous coordinate appended to every point
    pub fn with_bias(&self) -> Self {
        Self {
            points: self.points.with_bias(),
            labels: self.labels.clone(),
        }
    }
}

/// Surface points, points moved `eps` against the normal and points moved
/// `eps` along it, labeled `0`, `-eps` and `+eps`
pub fn make_triples<T: Real>(cloud: &OrientedPointCloud<T>, eps: T) -> Result<LabeledPoints<T>> {
    if cloud.is_empty() {
        return Err(KernelError::EmptyDataset);
    }
    let n = cloud.len();
    let dim = cloud.dim();
    let mut data = Vec::with_capacity(3 * n * dim);
    data.extend_from_slice(cloud.points.as_slice());
    for sign in [-T::one(), T::one()] {
        for (x, normal) in cloud.points.rows().zip(cloud.normals.rows()) {
            data.extend(x.iter().zip(normal).map(|(&xi, &ni)| xi + sign * eps * ni));
        }
    }

    let mut labels = vec![T::zero(); n];
    labels.extend(std::iter::repeat(-eps).take(n));
    labels.extend(std::iter::repeat(eps).take(n));

    info!("Built {} labeled points from {n} oriented points", 3 * n);
    Ok(LabeledPoints {
        points: PointSet::new(data, dim)?,
        labels,
    })
}
