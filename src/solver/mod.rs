//! Solvers for the regularized kernel system
//!
//! Only the dense direct solve lives here. Iterative solvers consume the
//! [`Kernel`](crate::kernel::Kernel) matrix-vector product instead of a
//! materialized matrix.

pub mod direct;

pub use self::direct::{DirectKernelSolver, SolverScalar};
