//! SIMD-accelerated vector kernels for the conjugate gradient solver
//!
//! When the `simd` feature is enabled these use 128-bit SIMD (f32x4), which
//! maps onto SSE/NEON and WASM SIMD alike. Every kernel has a scalar
//! fallback with identical semantics.

#[cfg(feature = "simd")]
use wide::f32x4;

/// SIMD lane width (4 for f32x4)
#[cfg(feature = "simd")]
pub const SIMD_WIDTH: usize = 4;

#[cfg(not(feature = "simd"))]
pub const SIMD_WIDTH: usize = 1;

// ============================================================================
// Reductions
// ============================================================================

/// Compute dot product: sum(a[i] * b[i])
#[cfg(feature = "simd")]
#[inline]
pub fn dot_product_f32(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let n = a.len();
    let chunks = n / SIMD_WIDTH;

    let mut sum = f32x4::ZERO;
    for i in 0..chunks {
        let idx = i * SIMD_WIDTH;
        let va = f32x4::from(&a[idx..idx + SIMD_WIDTH]);
        let vb = f32x4::from(&b[idx..idx + SIMD_WIDTH]);
        sum += va * vb;
    }

    let mut result = sum.reduce_add();
    for i in chunks * SIMD_WIDTH..n {
        result += a[i] * b[i];
    }
    result
}

#[cfg(not(feature = "simd"))]
#[inline]
pub fn dot_product_f32(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(&ai, &bi)| ai * bi).sum()
}

/// Compute squared norm: sum(a[i]^2)
#[cfg(feature = "simd")]
#[inline]
pub fn norm_squared_f32(a: &[f32]) -> f32 {
    let n = a.len();
    let chunks = n / SIMD_WIDTH;

    let mut sum = f32x4::ZERO;
    for i in 0..chunks {
        let idx = i * SIMD_WIDTH;
        let va = f32x4::from(&a[idx..idx + SIMD_WIDTH]);
        sum += va * va;
    }

    let mut result = sum.reduce_add();
    for i in chunks * SIMD_WIDTH..n {
        result += a[i] * a[i];
    }
    result
}

#[cfg(not(feature = "simd"))]
#[inline]
pub fn norm_squared_f32(a: &[f32]) -> f32 {
    a.iter().map(|&ai| ai * ai).sum()
}

// ============================================================================
// Fused Multiply-Add Operations
// ============================================================================

/// Compute y[i] = y[i] + alpha * x[i] (axpy operation)
#[cfg(feature = "simd")]
#[inline]
pub fn axpy_f32(y: &mut [f32], alpha: f32, x: &[f32]) {
    debug_assert_eq!(y.len(), x.len());
    let n = y.len();
    let chunks = n / SIMD_WIDTH;
    let valpha = f32x4::splat(alpha);

    for i in 0..chunks {
        let idx = i * SIMD_WIDTH;
        let vy = f32x4::from(&y[idx..idx + SIMD_WIDTH]);
        let vx = f32x4::from(&x[idx..idx + SIMD_WIDTH]);
        let result = vy + valpha * vx;
        y[idx..idx + SIMD_WIDTH].copy_from_slice(result.as_array_ref());
    }

    for i in chunks * SIMD_WIDTH..n {
        y[i] += alpha * x[i];
    }
}

#[cfg(not(feature = "simd"))]
#[inline]
pub fn axpy_f32(y: &mut [f32], alpha: f32, x: &[f32]) {
    debug_assert_eq!(y.len(), x.len());
    for (yi, &xi) in y.iter_mut().zip(x.iter()) {
        *yi += alpha * xi;
    }
}

/// Compute p[i] = z[i] + beta * p[i] (search direction update in CG)
#[cfg(feature = "simd")]
#[inline]
pub fn xpby_f32(p: &mut [f32], z: &[f32], beta: f32) {
    debug_assert_eq!(p.len(), z.len());
    let n = p.len();
    let chunks = n / SIMD_WIDTH;
    let vbeta = f32x4::splat(beta);

    for i in 0..chunks {
        let idx = i * SIMD_WIDTH;
        let vp = f32x4::from(&p[idx..idx + SIMD_WIDTH]);
        let vz = f32x4::from(&z[idx..idx + SIMD_WIDTH]);
        let result = vz + vbeta * vp;
        p[idx..idx + SIMD_WIDTH].copy_from_slice(result.as_array_ref());
    }

    for i in chunks * SIMD_WIDTH..n {
        p[i] = z[i] + beta * p[i];
    }
}

#[cfg(not(feature = "simd"))]
#[inline]
pub fn xpby_f32(p: &mut [f32], z: &[f32], beta: f32) {
    debug_assert_eq!(p.len(), z.len());
    for (pi, &zi) in p.iter_mut().zip(z.iter()) {
        *pi = zi + beta * *pi;
    }
}

// ============================================================================
// Element-wise Operations
// ============================================================================

/// Compute out[i] = a[i] * b[i] (diagonal scaling for the Jacobi preconditioner)
#[cfg(feature = "simd")]
#[inline]
pub fn multiply_elementwise_f32(out: &mut [f32], a: &[f32], b: &[f32]) {
    debug_assert_eq!(a.len(), b.len());
    debug_assert_eq!(out.len(), a.len());
    let n = out.len();
    let chunks = n / SIMD_WIDTH;

    for i in 0..chunks {
        let idx = i * SIMD_WIDTH;
        let va = f32x4::from(&a[idx..idx + SIMD_WIDTH]);
        let vb = f32x4::from(&b[idx..idx + SIMD_WIDTH]);
        let result = va * vb;
        out[idx..idx + SIMD_WIDTH].copy_from_slice(result.as_array_ref());
    }

    for i in chunks * SIMD_WIDTH..n {
        out[i] = a[i] * b[i];
    }
}

#[cfg(not(feature = "simd"))]
#[inline]
pub fn multiply_elementwise_f32(out: &mut [f32], a: &[f32], b: &[f32]) {
    debug_assert_eq!(a.len(), b.len());
    debug_assert_eq!(out.len(), a.len());
    for i in 0..out.len() {
        out[i] = a[i] * b[i];
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_product() {
        let a = vec![1.0f32, 2.0, 3.0, 4.0, 5.0];
        let b = vec![2.0f32, 3.0, 4.0, 5.0, 6.0];

        let result = dot_product_f32(&a, &b);
        let expected: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();

        assert!((result - expected).abs() < 1e-6);
    }

    #[test]
    fn test_norm_squared() {
        let a = vec![3.0f32, 4.0, 0.0, 0.0, 12.0];
        assert!((norm_squared_f32(&a) - 169.0).abs() < 1e-5);
    }

    #[test]
    fn test_empty_reductions() {
        assert_eq!(dot_product_f32(&[], &[]), 0.0);
        assert_eq!(norm_squared_f32(&[]), 0.0);
    }

    #[test]
    fn test_axpy() {
        let mut y = vec![1.0f32, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0];
        let x = vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0];
        axpy_f32(&mut y, -2.0, &x);
        assert_eq!(y, vec![-1.0, -3.0, -5.0, -7.0, -9.0, -11.0, -13.0]);
    }

    #[test]
    fn test_xpby() {
        let mut p = vec![1.0f32, 2.0, 3.0, 4.0, 5.0];
        let z = vec![10.0f32, 10.0, 10.0, 10.0, 10.0];
        xpby_f32(&mut p, &z, 0.5);
        assert_eq!(p, vec![10.5, 11.0, 11.5, 12.0, 12.5]);
    }

    #[test]
    fn test_multiply_elementwise() {
        let a = vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
        let b = vec![0.5f32, 0.5, 2.0, 2.0, 0.0, 1.0];
        let mut out = vec![0.0f32; 6];
        multiply_elementwise_f32(&mut out, &a, &b);
        assert_eq!(out, vec![0.5, 1.0, 6.0, 8.0, 0.0, 6.0]);
    }
}
