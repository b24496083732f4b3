//! BLAS-like back ends for the conjugate gradient solver
//!
//! The solver only needs four primitives: dot product, AXPY, the CG
//! direction update and a sparse matrix-vector product. Back ends are
//! interchangeable; the sequential one uses the SIMD kernels from
//! [`crate::utils::simd_ops`], the parallel one spreads the work over the
//! rayon thread pool.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::sparse::EllpackMatrix;
use crate::utils::simd_ops::{axpy_f32, dot_product_f32, multiply_elementwise_f32, norm_squared_f32, xpby_f32};

/// Minimum vector length before the parallel back end splits work.
const PAR_MIN_LEN: usize = 4096;

/// Vector primitives used by the solver.
pub trait Blas: Send + Sync {
    /// Short name for logging.
    fn name(&self) -> &'static str;

    /// sum(x[i] * y[i])
    fn dot(&self, x: &[f32], y: &[f32]) -> f32;

    /// Euclidean norm of `x`.
    fn norm2(&self, x: &[f32]) -> f32 {
        self.dot(x, x).sqrt()
    }

    /// y[i] += alpha * x[i]
    fn axpy(&self, alpha: f32, x: &[f32], y: &mut [f32]);

    /// p[i] = z[i] + beta * p[i]
    fn xpby(&self, z: &[f32], beta: f32, p: &mut [f32]);

    /// out[i] = a[i] * b[i]
    fn scale(&self, a: &[f32], b: &[f32], out: &mut [f32]);

    /// out = mat * x
    fn spmv(&self, mat: &EllpackMatrix, x: &[f32], out: &mut [f32]);
}

/// Single-threaded back end.
#[derive(Clone, Copy, Debug, Default)]
pub struct CpuBlas;

impl Blas for CpuBlas {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn dot(&self, x: &[f32], y: &[f32]) -> f32 {
        dot_product_f32(x, y)
    }

    fn norm2(&self, x: &[f32]) -> f32 {
        norm_squared_f32(x).sqrt()
    }

    fn axpy(&self, alpha: f32, x: &[f32], y: &mut [f32]) {
        axpy_f32(y, alpha, x);
    }

    fn xpby(&self, z: &[f32], beta: f32, p: &mut [f32]) {
        xpby_f32(p, z, beta);
    }

    fn scale(&self, a: &[f32], b: &[f32], out: &mut [f32]) {
        multiply_elementwise_f32(out, a, b);
    }

    fn spmv(&self, mat: &EllpackMatrix, x: &[f32], out: &mut [f32]) {
        mat.multiply(x, out);
    }
}

/// Multi-threaded back end on the global rayon pool.
#[derive(Clone, Copy, Debug, Default)]
pub struct ParallelBlas;

impl Blas for ParallelBlas {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn dot(&self, x: &[f32], y: &[f32]) -> f32 {
        debug_assert_eq!(x.len(), y.len());
        x.par_chunks(PAR_MIN_LEN)
            .zip(y.par_chunks(PAR_MIN_LEN))
            .map(|(xc, yc)| dot_product_f32(xc, yc))
            .sum()
    }

    fn norm2(&self, x: &[f32]) -> f32 {
        x.par_chunks(PAR_MIN_LEN).map(norm_squared_f32).sum::<f32>().sqrt()
    }

    fn axpy(&self, alpha: f32, x: &[f32], y: &mut [f32]) {
        debug_assert_eq!(x.len(), y.len());
        y.par_chunks_mut(PAR_MIN_LEN)
            .zip(x.par_chunks(PAR_MIN_LEN))
            .for_each(|(yc, xc)| axpy_f32(yc, alpha, xc));
    }

    fn xpby(&self, z: &[f32], beta: f32, p: &mut [f32]) {
        debug_assert_eq!(z.len(), p.len());
        p.par_chunks_mut(PAR_MIN_LEN)
            .zip(z.par_chunks(PAR_MIN_LEN))
            .for_each(|(pc, zc)| xpby_f32(pc, zc, beta));
    }

    fn scale(&self, a: &[f32], b: &[f32], out: &mut [f32]) {
        out.par_chunks_mut(PAR_MIN_LEN)
            .zip(a.par_chunks(PAR_MIN_LEN))
            .zip(b.par_chunks(PAR_MIN_LEN))
            .for_each(|((oc, ac), bc)| multiply_elementwise_f32(oc, ac, bc));
    }

    fn spmv(&self, mat: &EllpackMatrix, x: &[f32], out: &mut [f32]) {
        mat.par_multiply(x, out);
    }
}

/// Selectable back end.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlasBackend {
    Cpu,
    #[default]
    Parallel,
}

impl BlasBackend {
    /// Back end implementation for this selection.
    pub fn blas(self) -> &'static dyn Blas {
        match self {
            BlasBackend::Cpu => &CpuBlas,
            BlasBackend::Parallel => &ParallelBlas,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp(n: usize, scale: f32) -> Vec<f32> {
        (0..n).map(|i| (i % 17) as f32 * scale).collect()
    }

    #[test]
    fn test_backends_agree() {
        // long enough for the parallel back end to split
        let n = 3 * PAR_MIN_LEN + 11;
        let x = ramp(n, 0.01);
        let y = ramp(n, -0.02);

        assert_relative_eq!(CpuBlas.dot(&x, &y), ParallelBlas.dot(&x, &y), max_relative = 1e-4);

        let mut a = y.clone();
        let mut b = y.clone();
        CpuBlas.axpy(0.5, &x, &mut a);
        ParallelBlas.axpy(0.5, &x, &mut b);
        assert_eq!(a, b);

        CpuBlas.xpby(&x, 0.25, &mut a);
        ParallelBlas.xpby(&x, 0.25, &mut b);
        assert_eq!(a, b);

        let mut sa = vec![0.0; n];
        let mut sb = vec![0.0; n];
        CpuBlas.scale(&x, &y, &mut sa);
        ParallelBlas.scale(&x, &y, &mut sb);
        assert_eq!(sa, sb);
    }

    #[test]
    fn test_spmv_identity() {
        let mut m = EllpackMatrix::new(4, 4, 1).unwrap();
        for i in 0..4 {
            m.add(i, i, 1.0).unwrap();
        }
        let x = [1.0, -2.0, 3.0, -4.0];
        let mut out = [0.0; 4];
        for backend in [BlasBackend::Cpu, BlasBackend::Parallel] {
            backend.blas().spmv(&m, &x, &mut out);
            assert_eq!(out, x);
        }
    }

    #[test]
    fn test_norm2() {
        assert_relative_eq!(CpuBlas.norm2(&[3.0, 4.0]), 5.0);
        assert_relative_eq!(ParallelBlas.norm2(&[3.0, 4.0]), 5.0);

        let x = ramp(10_000, 0.001);
        let expected = CpuBlas.dot(&x, &x).sqrt();
        assert_relative_eq!(CpuBlas.norm2(&x), expected, max_relative = 1e-5);
        assert_relative_eq!(ParallelBlas.norm2(&x), expected, max_relative = 1e-4);
    }

    #[test]
    fn test_backend_serde_names() {
        let b: BlasBackend = serde_json::from_str("\"cpu\"").unwrap();
        assert_eq!(b, BlasBackend::Cpu);
        assert_eq!(serde_json::to_string(&BlasBackend::Parallel).unwrap(), "\"parallel\"");
    }
}
