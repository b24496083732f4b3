//! rw-segment: Random Walker volume segmentation
//!
//! This crate segments 3D volumes from sparse foreground/background seeds
//! with the Random Walker algorithm (Grady 2006): every unseeded voxel gets
//! the probability that a random walk started there reaches a foreground
//! seed first, found by solving a sparse Laplacian system.
//!
//! # Modules
//! - `volume`: Voxel grids and resampling
//! - `index`: Coordinate/index conversion and the voxel-to-row map
//! - `seeds`: Seed classification from polylines, label masks and a clip box
//! - `weights`: Edge weights (intensity, transfer-function blended)
//! - `sparse`: ELLPACK sparse matrix
//! - `system`: Equation system assembly
//! - `solvers`: Preconditioned CG and BLAS back ends
//! - `solver`: Single-level solver state machine and output volumes
//! - `lod`: Multi-resolution driver
//! - `analysis`: Uncertainty regions of a probability volume
//! - `params`: Parameters
//! - `utils`: SIMD kernels, morphology

// Core modules
pub mod error;
pub mod index;
pub mod params;
pub mod volume;

// Algorithm modules
pub mod seeds;
pub mod solver;
pub mod solvers;
pub mod sparse;
pub mod system;
pub mod weights;

// Drivers
pub mod analysis;
pub mod lod;

pub mod utils;

pub use error::{RandomWalkerError, RwResult};
pub use lod::{LevelRecord, RandomWalker, SeedInput, Segmentation};
pub use params::{EdgeWeightParams, LodParams, RandomWalkerParams};
pub use seeds::{ClipRegion, SeedAssignment, SeedClassifier, SeedLabel, SeedPaths};
pub use solver::{RandomWalkerSolver, SystemState};
pub use solvers::{BlasBackend, Preconditioner};
pub use volume::{VoxelGrid, VoxelType};
pub use weights::{EdgeWeightModel, TransferFunction1D, TransferKey};
