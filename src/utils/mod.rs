//! Shared numeric kernels

pub mod morphology;
pub mod simd_ops;
