//! Random Walker solver
//!
//! Owns one seed assignment and one edge weight model, builds the equation
//! system, solves it and turns the solution into output volumes. The solver
//! is single-use and moves through a fixed set of states:
//!
//! ```text
//! Initial --setup_equation_system--> Setup --solve--> Solved
//!     \                                 \
//!      `----------- (error) ------------`--> Failure
//! ```

use log::{debug, info};

use crate::error::{try_filled, RandomWalkerError, RwResult};
use crate::index::{RowIndexMap, INVALID_ROW};
use crate::seeds::SeedAssignment;
use crate::solvers::{conjugate_gradient, Blas, Preconditioner};
use crate::sparse::EllpackMatrix;
use crate::system::{build_system, SparseSystem};
use crate::volume::{VoxelGrid, VoxelType};
use crate::weights::EdgeWeightModel;

/// Lifecycle of a [`RandomWalkerSolver`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SystemState {
    Initial,
    Setup,
    Solved,
    Failure,
}

impl SystemState {
    pub fn name(self) -> &'static str {
        match self {
            SystemState::Initial => "Initial",
            SystemState::Setup => "Setup",
            SystemState::Solved => "Solved",
            SystemState::Failure => "Failure",
        }
    }
}

/// Single-use Random Walker solver.
#[derive(Debug)]
pub struct RandomWalkerSolver {
    seeds: SeedAssignment,
    weights: EdgeWeightModel,
    rows: Option<RowIndexMap>,
    system: Option<SparseSystem>,
    solution: Vec<f32>,
    iterations: usize,
    state: SystemState,
}

impl RandomWalkerSolver {
    pub fn new(seeds: SeedAssignment, weights: EdgeWeightModel) -> Self {
        Self {
            seeds,
            weights,
            rows: None,
            system: None,
            solution: Vec::new(),
            iterations: 0,
            state: SystemState::Initial,
        }
    }

    pub fn state(&self) -> SystemState {
        self.state
    }

    fn require(&self, operation: &'static str, expected: SystemState) -> RwResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(RandomWalkerError::InvalidState {
                operation,
                expected: expected.name(),
                actual: self.state.name(),
            })
        }
    }

    fn require_system(&self, operation: &'static str) -> RwResult<&SparseSystem> {
        match (&self.system, self.state) {
            (Some(system), SystemState::Setup | SystemState::Solved) => Ok(system),
            _ => Err(RandomWalkerError::InvalidState {
                operation,
                expected: "Setup or Solved",
                actual: self.state.name(),
            }),
        }
    }

    /// Build the row map and the equation system for `volume`.
    ///
    /// Only valid in the `Initial` state. On error the solver enters `Failure`.
    pub fn setup_equation_system<V: VoxelType>(&mut self, volume: &VoxelGrid<V>) -> RwResult<()> {
        self.require("setup_equation_system", SystemState::Initial)?;

        let result = RowIndexMap::build(&self.seeds).and_then(|rows| {
            build_system(volume, &self.seeds, &rows, &self.weights).map(|system| (rows, system))
        });

        match result {
            Ok((rows, system)) => {
                debug!(
                    "Equation system: {} unknowns, {} seeds ({} fg / {} bg)",
                    system.size(),
                    self.seeds.num_seeds(),
                    self.seeds.num_foreground(),
                    self.seeds.num_background()
                );
                self.rows = Some(rows);
                self.system = Some(system);
                self.state = SystemState::Setup;
                Ok(())
            }
            Err(e) => {
                self.state = SystemState::Failure;
                Err(e)
            }
        }
    }

    /// Solve the equation system with conjugate gradients.
    ///
    /// # Arguments
    /// * `blas` - Vector back end
    /// * `preconditioner` - Preconditioner
    /// * `error_threshold` - Relative residual at which to stop
    /// * `max_iterations` - Iteration cap (0 = unlimited)
    ///
    /// # Returns
    /// Number of CG iterations performed
    pub fn solve(
        &mut self,
        blas: &dyn Blas,
        preconditioner: Preconditioner,
        error_threshold: f32,
        max_iterations: usize,
    ) -> RwResult<usize> {
        self.require("solve", SystemState::Setup)?;
        let system = self.require_system("solve")?;

        let outcome = conjugate_gradient(
            blas,
            &system.matrix,
            &system.rhs,
            preconditioner,
            error_threshold,
            max_iterations,
        );
        match outcome {
            Ok(outcome) => {
                self.solution = outcome.solution;
                self.iterations = outcome.iterations;
                self.state = SystemState::Solved;
                Ok(outcome.iterations)
            }
            Err(e) => {
                self.state = SystemState::Failure;
                Err(e)
            }
        }
    }

    /// Probability of `voxel`: its seed value, or the solved unknown.
    #[inline]
    fn probability_unchecked(&self, rows: &RowIndexMap, voxel: usize) -> f32 {
        match self.seeds.seed_value(voxel) {
            Some(value) => value,
            None => self.solution[rows.row(voxel)],
        }
    }

    fn solved_rows(&self, operation: &'static str) -> RwResult<&RowIndexMap> {
        self.require(operation, SystemState::Solved)?;
        self.rows.as_ref().ok_or(RandomWalkerError::InvalidState {
            operation,
            expected: "Solved",
            actual: self.state.name(),
        })
    }

    /// Foreground probability of `voxel`. Requires `Solved`.
    pub fn get_probability(&self, voxel: usize) -> RwResult<f32> {
        let rows = self.solved_rows("get_probability")?;
        Ok(self.probability_unchecked(rows, voxel))
    }

    /// Probabilities of all voxels in linear index order. Requires `Solved`.
    pub fn probabilities(&self) -> RwResult<Vec<f32>> {
        let rows = self.solved_rows("probabilities")?;
        let mut out = try_filled("probabilities", self.num_voxels(), 0.0f32)?;
        for (voxel, p) in out.iter_mut().enumerate() {
            *p = self.probability_unchecked(rows, voxel);
        }
        Ok(out)
    }

    pub fn is_seed_point(&self, voxel: usize) -> bool {
        self.seeds.is_seed(voxel)
    }

    /// Fixed value of a seed voxel, `None` when unseeded.
    pub fn seed_value(&self, voxel: usize) -> Option<f32> {
        self.seeds.seed_value(voxel)
    }

    /// Equation row of `voxel`; `None` for seeds or before setup.
    pub fn row_index(&self, voxel: usize) -> Option<usize> {
        self.rows
            .as_ref()
            .map(|rows| rows.row(voxel))
            .filter(|&row| row != INVALID_ROW)
    }

    pub fn seeds(&self) -> &SeedAssignment {
        &self.seeds
    }

    pub fn edge_weight_model(&self) -> &EdgeWeightModel {
        &self.weights
    }

    /// Built system; `None` before setup.
    pub fn system(&self) -> Option<&SparseSystem> {
        self.system.as_ref()
    }

    pub fn matrix(&self) -> Option<&EllpackMatrix> {
        self.system.as_ref().map(|s| &s.matrix)
    }

    /// Number of unknowns (unseeded voxels).
    pub fn system_size(&self) -> usize {
        self.seeds.num_voxels() - self.seeds.num_seeds()
    }

    pub fn num_voxels(&self) -> usize {
        self.seeds.num_voxels()
    }

    pub fn dims(&self) -> [usize; 3] {
        self.seeds.dims()
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn seed_range(&self) -> (f32, f32) {
        self.seeds.seed_range()
    }

    /// Minimum and maximum probability over all voxels. Requires `Solved`.
    pub fn probability_range(&self) -> RwResult<(f32, f32)> {
        let rows = self.solved_rows("probability_range")?;
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        for voxel in 0..self.num_voxels() {
            let p = self.probability_unchecked(rows, voxel);
            min = min.min(p);
            max = max.max(p);
        }
        Ok((min, max))
    }

    /// Probabilities normalized over the seed range into [0, 1].
    fn normalized_probabilities(&self, operation: &'static str) -> RwResult<Vec<f32>> {
        let rows = self.solved_rows(operation)?;
        let (min, max) = self.seed_range();
        if max <= min {
            return Err(RandomWalkerError::DegenerateSeedRange { min, max });
        }
        let range = max - min;
        let mut out = try_filled("normalized probabilities", self.num_voxels(), 0.0f32)?;
        for (voxel, p) in out.iter_mut().enumerate() {
            *p = ((self.probability_unchecked(rows, voxel) - min) / range).clamp(0.0, 1.0);
        }
        Ok(out)
    }

    /// Probability volume scaled into the representable range of `T`.
    pub fn generate_probability_volume<T: VoxelType>(&self) -> RwResult<VoxelGrid<T>> {
        let probs = self.normalized_probabilities("generate_probability_volume")?;
        let mut data = try_filled("probability volume", probs.len(), T::default())?;
        for (out, &p) in data.iter_mut().zip(&probs) {
            *out = T::from_normalized(p);
        }
        VoxelGrid::new(self.dims(), data)
    }

    /// Binary volume: `T::MAX_VALUE` where the normalized probability exceeds
    /// `threshold`, zero elsewhere.
    pub fn generate_binary_segmentation<T: VoxelType>(&self, threshold: f32) -> RwResult<VoxelGrid<T>> {
        let probs = self.normalized_probabilities("generate_binary_segmentation")?;
        let mut data = try_filled("segmentation volume", probs.len(), T::default())?;
        for (out, &p) in data.iter_mut().zip(&probs) {
            if p > threshold {
                *out = T::MAX_VALUE;
            }
        }
        let seg = VoxelGrid::new(self.dims(), data)?;
        info!(
            "Foreground ratio at threshold {}: {:.4}",
            threshold,
            seg.count_nonzero() as f32 / seg.num_voxels() as f32
        );
        Ok(seg)
    }

    /// Debug volume visualizing how strongly each unseeded voxel is coupled.
    ///
    /// Unseeded voxels map their diagonal entry `d` onto
    /// `1 - ln(1 + 1000 d / d_max) / ln(1000)`, seeds show their seed value.
    /// Requires `Setup` or `Solved`.
    pub fn edge_weight_volume(&self) -> RwResult<VoxelGrid<u8>> {
        let system = self.require_system("edge_weight_volume")?;
        let rows = self.rows.as_ref().ok_or(RandomWalkerError::InvalidState {
            operation: "edge_weight_volume",
            expected: "Setup or Solved",
            actual: self.state.name(),
        })?;

        let max_diag = (0..system.size())
            .map(|r| system.matrix.diagonal(r))
            .fold(0.0f32, f32::max);
        let scale = 1000.0f32;

        let mut data = try_filled("edge weight volume", self.num_voxels(), 0u8)?;
        for (voxel, out) in data.iter_mut().enumerate() {
            let value = match self.seeds.seed_value(voxel) {
                Some(seed) => seed,
                None if max_diag > 0.0 => {
                    let d = system.matrix.diagonal(rows.row(voxel)) / max_diag;
                    1.0 - (1.0 + d * scale).ln() / scale.ln()
                }
                None => 0.0,
            };
            *out = u8::from_normalized(value);
        }
        VoxelGrid::new(self.dims(), data)
    }
}
