//! Common test utilities for rw-segment integration tests

#![allow(dead_code)]

use rw_segment::solvers::CpuBlas;
use rw_segment::{
    EdgeWeightModel, RandomWalkerParams, RandomWalkerSolver, SeedAssignment, SeedClassifier, SeedInput,
    SeedPaths, VoxelGrid,
};

/// Cube of edge length `n` with constant intensity.
pub fn uniform_volume(n: usize, value: f32) -> VoxelGrid<f32> {
    VoxelGrid::filled([n, n, n], value).unwrap()
}

/// Volume split by the plane `x = split`: `low` below it, `high` from it on.
pub fn split_volume(dims: [usize; 3], split: usize, low: f32, high: f32) -> VoxelGrid<f32> {
    VoxelGrid::from_fn(dims, |x, _, _| if x < split { low } else { high }).unwrap()
}

/// Single-point polylines.
pub fn point_paths(points: &[[f32; 3]]) -> SeedPaths {
    SeedPaths::from_segments(points.iter().map(|p| vec![*p]).collect())
}

pub fn point_seeds(foreground: &[[f32; 3]], background: &[[f32; 3]]) -> SeedInput {
    SeedInput::from_paths(point_paths(foreground), point_paths(background))
}

/// Classify point seeds on a grid of dimensions `dims`.
pub fn classify_points(dims: [usize; 3], foreground: &[[f32; 3]], background: &[[f32; 3]]) -> SeedAssignment {
    let fg = point_paths(foreground);
    let bg = point_paths(background);
    SeedClassifier::new().with_paths(&fg, &bg).classify(dims).unwrap()
}

/// Set up and solve a single-level system with the sequential back end.
pub fn solve_single_level(
    volume: &VoxelGrid<f32>,
    seeds: SeedAssignment,
    params: &RandomWalkerParams,
) -> RandomWalkerSolver {
    let model = params.edge_weight_model().unwrap();
    let mut solver = RandomWalkerSolver::new(seeds, model);
    solver.setup_equation_system(volume).unwrap();
    solver
        .solve(&CpuBlas, params.preconditioner, params.error_threshold, params.max_iterations)
        .unwrap();
    solver
}

/// Parameters converging tightly on small test volumes.
pub fn tight_params() -> RandomWalkerParams {
    RandomWalkerParams {
        error_threshold: 1e-5,
        max_iterations: 5000,
        ..RandomWalkerParams::default()
    }
}

pub fn intensity_model(params: &RandomWalkerParams) -> EdgeWeightModel {
    EdgeWeightModel::intensity(params.beta, params.min_edge_weight)
}

/// Dice coefficient of two binary masks (non-zero = set).
pub fn dice(a: &[u8], b: &[u8]) -> f64 {
    let mut both = 0usize;
    let mut total = 0usize;
    for (&x, &y) in a.iter().zip(b) {
        if x > 0 && y > 0 {
            both += 1;
        }
        total += (x > 0) as usize + (y > 0) as usize;
    }
    if total == 0 {
        return 1.0;
    }
    2.0 * both as f64 / total as f64
}

/// Number of set voxels in a mask.
pub fn count_set(mask: &[u8]) -> usize {
    mask.iter().filter(|&&v| v > 0).count()
}

/// Result of comparing a segmentation to a reference mask
#[derive(Debug)]
pub struct TestResult {
    pub name: String,
    pub dice: f64,
    pub foreground_ratio: f64,
}

impl TestResult {
    pub fn new(name: &str, output: &[u8], reference: &[u8]) -> Self {
        TestResult {
            name: name.to_string(),
            dice: dice(output, reference),
            foreground_ratio: count_set(output) as f64 / output.len().max(1) as f64,
        }
    }

    pub fn print(&self) {
        println!("{:<20} Dice={:.4}  fg={:.4}", self.name, self.dice, self.foreground_ratio);
    }
}
