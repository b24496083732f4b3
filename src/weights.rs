//! Edge weights
//!
//! Affinity of two 6-connected voxels, decaying exponentially with their
//! intensity difference:
//!
//! ```text
//! w = clamp(exp(-beta * d²), min_weight, 1)
//! ```
//!
//! The classification-blended model mixes in the difference of opacities
//! obtained from a 1D transfer function:
//!
//! ```text
//! d² = (1 - blend) * Δintensity² + blend * Δopacity²
//! ```
//!
//! Both models only depend on squared differences, so `w(i, j) == w(j, i)`
//! holds bit for bit.

use serde::{Deserialize, Serialize};

/// Largest possible edge weight.
pub const MAX_WEIGHT: f32 = 1.0;

/// Number of entries the transfer function is pre-sampled into.
pub const TRANSFER_LUT_SIZE: usize = 4096;

/// Per-voxel inputs to the weight function, computed once per volume.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VoxelSample {
    pub intensity: f32,
    pub opacity: f32,
}

/// Strategy computing the weight of an edge between two adjacent voxels.
pub trait EdgeWeight: Sync {
    /// Auxiliary classification sample for a normalized intensity.
    #[inline]
    fn classify(&self, _intensity: f32) -> f32 {
        0.0
    }

    /// Weight of the edge between two voxels.
    fn weight(&self, a: VoxelSample, b: VoxelSample) -> f32;

    /// Sample for a voxel with normalized intensity `intensity`.
    #[inline]
    fn sample(&self, intensity: f32) -> VoxelSample {
        VoxelSample { intensity, opacity: self.classify(intensity) }
    }
}

/// Intensity-only weights.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IntensityWeights {
    pub beta: f32,
    pub min_weight: f32,
}

impl IntensityWeights {
    pub fn new(beta: f32, min_weight: f32) -> Self {
        Self { beta, min_weight }
    }
}

impl EdgeWeight for IntensityWeights {
    #[inline(always)]
    fn weight(&self, a: VoxelSample, b: VoxelSample) -> f32 {
        let diff = a.intensity - b.intensity;
        (-self.beta * diff * diff).exp().clamp(self.min_weight, MAX_WEIGHT)
    }
}

/// A control point of a [`TransferFunction1D`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransferKey {
    /// Normalized intensity in [0, 1].
    pub intensity: f32,
    /// Opacity in [0, 1].
    pub opacity: f32,
}

/// Piecewise linear mapping from normalized intensity to opacity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransferFunction1D {
    keys: Vec<TransferKey>,
}

impl TransferFunction1D {
    /// Build from control points; keys are sorted by intensity.
    pub fn new(mut keys: Vec<TransferKey>) -> Self {
        keys.sort_by(|a, b| a.intensity.total_cmp(&b.intensity));
        Self { keys }
    }

    /// Linear ramp from transparent at `lower` to opaque at `upper`.
    pub fn ramp(lower: f32, upper: f32) -> Self {
        Self::new(vec![
            TransferKey { intensity: lower, opacity: 0.0 },
            TransferKey { intensity: upper, opacity: 1.0 },
        ])
    }

    pub fn keys(&self) -> &[TransferKey] {
        &self.keys
    }

    /// Opacity at `intensity`, held constant beyond the outermost keys.
    pub fn opacity(&self, intensity: f32) -> f32 {
        let (first, last) = match (self.keys.first(), self.keys.last()) {
            (Some(f), Some(l)) => (f, l),
            _ => return 0.0,
        };
        if intensity <= first.intensity {
            return first.opacity;
        }
        if intensity >= last.intensity {
            return last.opacity;
        }
        for pair in self.keys.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            if intensity <= hi.intensity {
                let span = hi.intensity - lo.intensity;
                if span <= 0.0 {
                    return hi.opacity;
                }
                let t = (intensity - lo.intensity) / span;
                return lo.opacity + t * (hi.opacity - lo.opacity);
            }
        }
        last.opacity
    }

    /// Sample the function at `size` evenly spaced intensities.
    pub fn lookup_table(&self, size: usize) -> Vec<f32> {
        let denom = size.saturating_sub(1).max(1) as f32;
        (0..size).map(|i| self.opacity(i as f32 / denom)).collect()
    }
}

/// Weights blending intensity with transfer-function opacity.
#[derive(Clone, Debug, PartialEq)]
pub struct TransFuncWeights {
    pub beta: f32,
    pub blend: f32,
    pub min_weight: f32,
    lut: Vec<f32>,
}

impl TransFuncWeights {
    pub fn new(transfer: &TransferFunction1D, beta: f32, blend: f32, min_weight: f32) -> Self {
        Self {
            beta,
            blend: blend.clamp(0.0, 1.0),
            min_weight,
            lut: transfer.lookup_table(TRANSFER_LUT_SIZE),
        }
    }
}

impl EdgeWeight for TransFuncWeights {
    #[inline]
    fn classify(&self, intensity: f32) -> f32 {
        let last = self.lut.len() - 1;
        let pos = (intensity.clamp(0.0, 1.0) * last as f32).round() as usize;
        self.lut[pos.min(last)]
    }

    #[inline(always)]
    fn weight(&self, a: VoxelSample, b: VoxelSample) -> f32 {
        let di = a.intensity - b.intensity;
        let d_opacity = a.opacity - b.opacity;
        let dist = (1.0 - self.blend) * di * di + self.blend * d_opacity * d_opacity;
        (-self.beta * dist).exp().clamp(self.min_weight, MAX_WEIGHT)
    }
}

/// The two weight strategies, resolved once per system build.
#[derive(Clone, Debug, PartialEq)]
pub enum EdgeWeightModel {
    Intensity(IntensityWeights),
    TransFunc(TransFuncWeights),
}

impl EdgeWeightModel {
    pub fn intensity(beta: f32, min_weight: f32) -> Self {
        Self::Intensity(IntensityWeights::new(beta, min_weight))
    }

    pub fn trans_func(transfer: &TransferFunction1D, beta: f32, blend: f32, min_weight: f32) -> Self {
        Self::TransFunc(TransFuncWeights::new(transfer, beta, blend, min_weight))
    }

    pub fn min_weight(&self) -> f32 {
        match self {
            Self::Intensity(w) => w.min_weight,
            Self::TransFunc(w) => w.min_weight,
        }
    }
}
