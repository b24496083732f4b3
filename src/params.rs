//! Segmentation parameters
//!
//! Every field has a default, so a partial JSON/TOML document deserializes
//! into a complete parameter set.

use serde::{Deserialize, Serialize};

use crate::error::{RandomWalkerError, RwResult};
use crate::seeds::ClipRegion;
use crate::solvers::{BlasBackend, Preconditioner};
use crate::weights::{EdgeWeightModel, TransferFunction1D};

/// Coarsest supported level-of-detail (scale factor 32).
pub const MAX_LOD_LEVEL: usize = 5;

/// Erosion kernel sizes offered for level-of-detail seed derivation.
pub const EROSION_KERNEL_SIZES: [usize; 8] = [3, 5, 7, 9, 15, 25, 35, 45];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomWalkerParams {
    /// Edge-stopping sharpness; larger values make weights fall off faster.
    pub beta: f32,
    /// Lower clamp for edge weights, keeps the system non-singular.
    pub min_edge_weight: f32,
    pub edge_weights: EdgeWeightParams,
    pub preconditioner: Preconditioner,
    pub blas: BlasBackend,
    /// Relative residual at which CG stops.
    pub error_threshold: f32,
    /// CG iteration cap, 0 for unlimited.
    pub max_iterations: usize,
    pub lod: LodParams,
    /// Voxels outside this box (native coordinates) are background seeds.
    pub clip: Option<ClipRegion>,
    /// Probability above which a voxel is foreground in the binary output.
    pub foreground_threshold: f32,
    /// Resample coarse results back to the input resolution.
    pub resample_output_volumes: bool,
}

impl Default for RandomWalkerParams {
    fn default() -> Self {
        Self {
            beta: 4096.0,
            min_edge_weight: 1e-5,
            edge_weights: EdgeWeightParams::default(),
            preconditioner: Preconditioner::Jacobi,
            blas: BlasBackend::Parallel,
            error_threshold: 1e-2,
            max_iterations: 1000,
            lod: LodParams::default(),
            clip: None,
            foreground_threshold: 0.5,
            resample_output_volumes: true,
        }
    }
}

impl RandomWalkerParams {
    /// Copy with out-of-range values clamped into their valid ranges.
    pub fn normalized(&self) -> Self {
        let mut params = self.clone();
        params.lod.min_level = params.lod.min_level.min(MAX_LOD_LEVEL);
        params.lod.max_level = params.lod.max_level.clamp(params.lod.min_level, MAX_LOD_LEVEL);
        params.edge_weights.blend_factor = params.edge_weights.blend_factor.clamp(0.0, 1.0);
        params.foreground_threshold = params.foreground_threshold.clamp(0.0, 1.0);
        params
    }

    /// Reject parameter sets that cannot produce a solvable system.
    pub fn validate(&self) -> RwResult<()> {
        if !(self.beta > 0.0 && self.beta.is_finite()) {
            return Err(RandomWalkerError::invalid_params(format!(
                "beta must be positive, got {}",
                self.beta
            )));
        }
        if !(self.min_edge_weight > 0.0 && self.min_edge_weight <= 1.0) {
            return Err(RandomWalkerError::invalid_params(format!(
                "minimum edge weight must lie in (0, 1], got {}",
                self.min_edge_weight
            )));
        }
        if !(self.error_threshold > 0.0) {
            return Err(RandomWalkerError::invalid_params(format!(
                "error threshold must be positive, got {}",
                self.error_threshold
            )));
        }
        if self.edge_weights.use_classification && self.edge_weights.transfer_function.is_none() {
            return Err(RandomWalkerError::invalid_params(
                "classification-based edge weights require a transfer function",
            ));
        }
        self.lod.validate()
    }

    /// Edge weight strategy selected by these parameters.
    pub fn edge_weight_model(&self) -> RwResult<EdgeWeightModel> {
        let ew = &self.edge_weights;
        if !ew.use_classification {
            return Ok(EdgeWeightModel::intensity(self.beta, self.min_edge_weight));
        }
        let transfer = ew.transfer_function.as_ref().ok_or_else(|| {
            RandomWalkerError::invalid_params("classification-based edge weights require a transfer function")
        })?;
        Ok(EdgeWeightModel::trans_func(transfer, self.beta, ew.blend_factor, self.min_edge_weight))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeWeightParams {
    /// Blend intensity differences with transfer-function opacity differences.
    pub use_classification: bool,
    pub transfer_function: Option<TransferFunction1D>,
    /// Share of the opacity term, in [0, 1].
    pub blend_factor: f32,
}

impl Default for EdgeWeightParams {
    fn default() -> Self {
        Self {
            use_classification: false,
            transfer_function: None,
            blend_factor: 0.3,
        }
    }
}

/// Multi-resolution settings.
///
/// Level `l` runs at scale factor `2^l`; the solve proceeds from
/// `max_level` (coarsest) down to `min_level`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LodParams {
    pub enabled: bool,
    pub min_level: usize,
    pub max_level: usize,
    /// Fraction of the maximum probability at or above which a voxel seeds
    /// the foreground of the next level.
    pub foreground_seed_threshold: f32,
    /// Fraction at or below which a voxel seeds the background.
    pub background_seed_threshold: f32,
    /// Odd edge length of the erosion applied to derived seeds.
    pub erosion_kernel_size: usize,
}

impl Default for LodParams {
    fn default() -> Self {
        Self {
            enabled: false,
            min_level: 0,
            max_level: 2,
            foreground_seed_threshold: 0.99,
            background_seed_threshold: 0.01,
            erosion_kernel_size: 3,
        }
    }
}

impl LodParams {
    fn validate(&self) -> RwResult<()> {
        let k = self.erosion_kernel_size;
        if k % 2 == 0 || !(3..=45).contains(&k) {
            return Err(RandomWalkerError::invalid_params(format!(
                "erosion kernel size must be odd and within 3..=45, got {k}"
            )));
        }
        let (fg, bg) = (self.foreground_seed_threshold, self.background_seed_threshold);
        if !(0.0..=1.0).contains(&fg) || !(0.0..=1.0).contains(&bg) || bg >= fg {
            return Err(RandomWalkerError::invalid_params(format!(
                "seed thresholds must satisfy 0 <= background < foreground <= 1, got {bg} / {fg}"
            )));
        }
        Ok(())
    }

    /// Coarsest level to start from.
    pub fn start_level(&self) -> usize {
        if self.enabled {
            self.max_level.max(self.min_level)
        } else {
            0
        }
    }

    /// Level whose result is returned.
    pub fn end_level(&self) -> usize {
        if self.enabled {
            self.min_level
        } else {
            0
        }
    }

    /// Working dimensions for `level`: `round(native / 2^level)`, at least 1.
    pub fn scaled_dims(native: [usize; 3], level: usize) -> [usize; 3] {
        let scale = (1usize << level) as f32;
        let axis = |d: usize| ((d as f32 / scale).round() as usize).max(1);
        [axis(native[0]), axis(native[1]), axis(native[2])]
    }

    /// Working dimensions of the finest and coarsest level in the selected range.
    pub fn level_dims(&self, native: [usize; 3]) -> ([usize; 3], [usize; 3]) {
        (
            Self::scaled_dims(native, self.end_level()),
            Self::scaled_dims(native, self.start_level()),
        )
    }
}
