//! Core traits shared by kernels, solvers and the reconstruction pipeline

use crate::core::{PointSet, Precision, Result};
use num_traits::{Float, FloatConst};
use std::fmt::{Debug, Display};
use std::iter::Sum;

/// Floating point scalar the kernel engine evaluates in.
///
/// Implemented for `f32` and `f64`; [`Real::PRECISION`] ties the type to the
/// [`Precision`] recorded on an [`EvaluationContext`](crate::core::EvaluationContext).
pub trait Real: Float + FloatConst + Sum + Send + Sync + Debug + Display + 'static {
    const PRECISION: Precision;

    /// Cast an `f64` hyperparameter into this precision
    fn from_f64(value: f64) -> Self;

    /// Widen to `f64` for persistence and reporting
    fn into_f64(self) -> f64;
}

impl Real for f32 {
    const PRECISION: Precision = Precision::Single;

    fn from_f64(value: f64) -> Self {
        value as f32
    }

    fn into_f64(self) -> f64 {
        self as f64
    }
}

impl Real for f64 {
    const PRECISION: Precision = Precision::Double;

    fn from_f64(value: f64) -> Self {
        value
    }

    fn into_f64(self) -> f64 {
        self
    }
}

/// A fitted scalar-valued function of points
pub trait Regressor<T: Real>: Send + Sync {
    /// Fit the model to points `x` with one label per point
    fn fit(&mut self, x: &PointSet<T>, y: &[T]) -> Result<()>;

    /// Evaluate the fitted function at every point of `x`
    fn predict(&self, x: &PointSet<T>) -> Result<Vec<T>>;

    /// Whether `fit` has completed successfully
    fn is_fitted(&self) -> bool;

    /// Feature dimensionality of the training points, if fitted
    fn dim(&self) -> Option<usize>;
}
