//! Preconditioned conjugate gradient
//!
//! Solves `Ax = b` for a symmetric positive definite [`EllpackMatrix`],
//! starting from `x0 = 0`. All vector work goes through a [`Blas`] back end,
//! so the iteration itself is independent of how the primitives are
//! executed.
//!
//! Reference:
//! Shewchuk, "An Introduction to the Conjugate Gradient Method Without the
//! Agonizing Pain", 1994.

use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};

use crate::error::{try_copied, try_filled, RandomWalkerError, RwResult};
use crate::solvers::blas::Blas;
use crate::sparse::EllpackMatrix;

/// Preconditioner applied to the residual in every iteration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preconditioner {
    /// Plain CG.
    None,
    /// Diagonal scaling by `1 / A[i][i]`.
    #[default]
    Jacobi,
}

/// Result of a CG run.
#[derive(Clone, Debug)]
pub struct CgOutcome {
    pub solution: Vec<f32>,
    /// Iterations actually performed.
    pub iterations: usize,
    /// `||r|| / ||b||` of the returned iterate.
    pub relative_residual: f32,
}

/// Inverse diagonal of `mat` for Jacobi scaling.
///
/// A zero, negative or non-finite diagonal means the system was not built
/// correctly and is reported as [`RandomWalkerError::SingularDiagonal`].
pub fn jacobi_inverse_diagonal(mat: &EllpackMatrix) -> RwResult<Vec<f32>> {
    let mut inv = try_filled("jacobi preconditioner", mat.num_rows(), 0.0f32)?;
    for (row, out) in inv.iter_mut().enumerate() {
        let value = mat.diagonal(row);
        if !(value.is_finite() && value >= f32::MIN_POSITIVE) {
            return Err(RandomWalkerError::SingularDiagonal { row, value });
        }
        *out = 1.0 / value;
    }
    Ok(inv)
}

/// Preconditioned conjugate gradient solver
///
/// # Arguments
/// * `blas` - Back end executing dot products, AXPY updates and SpMV
/// * `mat` - Square, symmetric positive definite system matrix
/// * `rhs` - Right-hand side vector
/// * `preconditioner` - Preconditioner to apply
/// * `threshold` - Stop once `||r|| / ||b||` drops below this value
/// * `max_iterations` - Iteration cap (0 = unlimited)
///
/// # Returns
/// The last iterate and the number of iterations used. Hitting the
/// iteration cap is not an error.
pub fn conjugate_gradient(
    blas: &dyn Blas,
    mat: &EllpackMatrix,
    rhs: &[f32],
    preconditioner: Preconditioner,
    threshold: f32,
    max_iterations: usize,
) -> RwResult<CgOutcome> {
    let n = mat.num_rows();
    if mat.num_cols() != n || rhs.len() != n {
        return Err(RandomWalkerError::invalid_params(format!(
            "cannot solve a {}x{} system with a right-hand side of length {}",
            n,
            mat.num_cols(),
            rhs.len()
        )));
    }

    let mut x = try_filled("solution vector", n, 0.0f32)?;

    let b_norm = blas.norm2(rhs);
    if b_norm == 0.0 {
        debug!("CG: zero right-hand side, returning x = 0");
        return Ok(CgOutcome { solution: x, iterations: 0, relative_residual: 0.0 });
    }

    let inv_diag = match preconditioner {
        Preconditioner::Jacobi => Some(jacobi_inverse_diagonal(mat)?),
        Preconditioner::None => None,
    };
    let precondition = |r: &[f32], z: &mut [f32]| match &inv_diag {
        Some(inv) => blas.scale(inv, r, z),
        None => z.copy_from_slice(r),
    };

    // x0 = 0, so r0 = b
    let mut r = try_copied("residual", rhs)?;
    let mut z = try_filled("preconditioned residual", n, 0.0f32)?;
    let mut ap = try_filled("search direction product", n, 0.0f32)?;
    precondition(&r, &mut z);
    let mut p = try_copied("search direction", &z)?;
    let mut rz = blas.dot(&r, &z);

    let mut relative_residual = 1.0f32;
    let mut iterations = 0usize;

    while relative_residual >= threshold {
        if max_iterations > 0 && iterations >= max_iterations {
            debug!(
                "CG: iteration cap {} reached, relative residual {:.3e}",
                max_iterations, relative_residual
            );
            break;
        }

        blas.spmv(mat, &p, &mut ap);
        let p_ap = blas.dot(&p, &ap);
        if p_ap.is_nan() || p_ap <= 0.0 {
            warn!("CG: breakdown at iteration {} (p'Ap = {})", iterations, p_ap);
            break;
        }

        let alpha = rz / p_ap;
        blas.axpy(alpha, &p, &mut x);
        blas.axpy(-alpha, &ap, &mut r);
        iterations += 1;

        relative_residual = blas.norm2(&r) / b_norm;
        trace!("CG iter {}: relative residual {:.3e}", iterations, relative_residual);
        if relative_residual < threshold {
            break;
        }

        precondition(&r, &mut z);
        let rz_new = blas.dot(&r, &z);
        let beta = rz_new / rz;
        rz = rz_new;
        blas.xpby(&z, beta, &mut p);
    }

    debug!(
        "CG ({}, {:?}): {} iterations, relative residual {:.3e}",
        blas.name(),
        preconditioner,
        iterations,
        relative_residual
    );

    Ok(CgOutcome { solution: x, iterations, relative_residual })
}
