//! Dense regularized kernel solver
//!
//! Fits `(K + λI) α = y` with an LU factorization with partial pivoting and
//! predicts `K(x_query, x_train) · α`.

use crate::core::{EvaluationContext, KernelError, PointSet, Real, Regressor, Result};
use crate::kernel::{Kernel, KernelFunction};
use log::{debug, info};
use nalgebra::{DMatrix, DVector, RealField};
use std::sync::Arc;

/// Scalars the dense solver can factorize in
pub trait SolverScalar: Real + RealField {}

impl<T: Real + RealField> SolverScalar for T {}

/// Kernel ridge regression with a dense direct solve
#[derive(Debug, Clone)]
pub struct DirectKernelSolver<T, K: Kernel = KernelFunction> {
    kernel: Arc<K>,
    penalty: f64,
    x_: Option<PointSet<T>>,
    alpha_: Option<Vec<T>>,
}

impl<T: SolverScalar, K: Kernel> DirectKernelSolver<T, K> {
    pub fn new(kernel: K, penalty: f64) -> Result<Self> {
        Self::with_shared_kernel(Arc::new(kernel), penalty)
    }

    pub fn with_shared_kernel(kernel: Arc<K>, penalty: f64) -> Result<Self> {
        if !penalty.is_finite() || penalty < 0.0 {
            return Err(KernelError::InvalidParameter(format!(
                "penalty must be finite and non-negative, got {penalty}"
            )));
        }
        Ok(Self {
            kernel,
            penalty,
            x_: None,
            alpha_: None,
        })
    }

    /// Rebuild a fitted solver from stored training points and coefficients
    pub fn from_parts(kernel: K, penalty: f64, x: PointSet<T>, alpha: Vec<T>) -> Result<Self> {
        if alpha.len() != x.len() {
            return Err(KernelError::DimensionMismatch {
                expected: x.len(),
                actual: alpha.len(),
            });
        }
        if x.is_empty() {
            return Err(KernelError::EmptyDataset);
        }
        let mut solver = Self::new(kernel, penalty)?;
        solver.x_ = Some(x);
        solver.alpha_ = Some(alpha);
        Ok(solver)
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn penalty(&self) -> f64 {
        self.penalty
    }

    pub fn training_points(&self) -> Option<&PointSet<T>> {
        self.x_.as_ref()
    }

    pub fn alpha(&self) -> Option<&[T]> {
        self.alpha_.as_deref()
    }

    fn fitted(&self, query_dim: usize) -> Result<(&PointSet<T>, &[T])> {
        let (x, alpha) = match (&self.x_, &self.alpha_) {
            (Some(x), Some(alpha)) => (x, alpha.as_slice()),
            _ => return Err(KernelError::UnfittedModel),
        };
        if query_dim != x.dim() {
            return Err(KernelError::DimensionMismatch {
                expected: x.dim(),
                actual: query_dim,
            });
        }
        Ok((x, alpha))
    }

    /// Predict through the kernel's matrix-vector product, with memory
    /// bounded by `ctx` instead of the query-by-training matrix
    pub fn predict_with(&self, x: &PointSet<T>, ctx: &EvaluationContext) -> Result<Vec<T>> {
        let (train, alpha) = self.fitted(x.dim())?;
        self.kernel
            .matrix_vector_product(x.view(), train.view(), alpha, ctx)
    }
}

impl<T: SolverScalar, K: Kernel> Regressor<T> for DirectKernelSolver<T, K> {
    fn fit(&mut self, x: &PointSet<T>, y: &[T]) -> Result<()> {
        if x.is_empty() {
            return Err(KernelError::EmptyDataset);
        }
        if y.len() != x.len() {
            return Err(KernelError::DimensionMismatch {
                expected: x.len(),
                actual: y.len(),
            });
        }

        info!(
            "Fitting {} kernel on {} points (d={}, penalty={})",
            self.kernel.name(),
            x.len(),
            x.dim(),
            self.penalty
        );
        let gram = self.kernel.direct_kernel(x.view(), x.view())?;
        let alpha = solve_regularized(gram.as_slice(), x.len(), y, <T as Real>::from_f64(self.penalty))?;
        if self.kernel.debug() {
            debug!("{}: solved {}x{} system", self.kernel.name(), x.len(), x.len());
        }

        self.x_ = Some(x.clone());
        self.alpha_ = Some(alpha);
        Ok(())
    }

    fn predict(&self, x: &PointSet<T>) -> Result<Vec<T>> {
        let (train, alpha) = self.fitted(x.dim())?;
        self.kernel
            .direct_kernel(x.view(), train.view())?
            .matvec(alpha)
    }

    fn is_fitted(&self) -> bool {
        self.alpha_.is_some()
    }

    fn dim(&self) -> Option<usize> {
        self.x_.as_ref().map(|x| x.dim())
    }
}

/// Solve `(gram + penalty·I) α = y` for a row-major `n x n` gram matrix
fn solve_regularized<T: SolverScalar>(gram: &[T], n: usize, y: &[T], penalty: T) -> Result<Vec<T>> {
    let mut a = DMatrix::from_row_slice(n, n, gram);
    for i in 0..n {
        a[(i, i)] = a[(i, i)] + penalty;
    }
    let b = DVector::from_column_slice(y);
    let solution = a.lu().solve(&b).ok_or(KernelError::SingularSystem)?;
    if solution.iter().any(|v| !num_traits::Float::is_finite(*v)) {
        return Err(KernelError::SingularSystem);
    }
    Ok(solution.as_slice().to_vec())
}
