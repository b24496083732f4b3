//! Iterative solvers
//!
//! Preconditioned conjugate gradient and the BLAS-like back ends it runs on.

pub mod blas;
pub mod cg;

pub use blas::{Blas, BlasBackend, CpuBlas, ParallelBlas};
pub use cg::{conjugate_gradient, jacobi_inverse_diagonal, CgOutcome, Preconditioner};
