//! Multi-resolution Random Walker
//!
//! Solves from the coarsest selected level (scale factor `2^max_level`) down
//! to `min_level`. After every level except the last, the probability map is
//! split into confident foreground and background regions, eroded, and used
//! as seed volumes for the next finer level. Seed polylines and the clip box
//! are rescaled for every level.
//!
//! Downsampled input volumes are cached per level and reused across calls to
//! [`RandomWalker::compute`] until the input volume is replaced.

use std::time::{Duration, Instant};

use log::info;

use crate::error::{RandomWalkerError, RwResult};
use crate::params::{LodParams, RandomWalkerParams};
use crate::seeds::{SeedClassifier, SeedPaths};
use crate::solver::RandomWalkerSolver;
use crate::utils::morphology::{erode_separable, threshold_seeds};
use crate::volume::{VoxelGrid, VoxelType};

/// Seeds supplied by the caller, in native voxel coordinates.
#[derive(Clone, Debug, Default)]
pub struct SeedInput {
    pub foreground: SeedPaths,
    pub background: SeedPaths,
    /// Foreground label mask, any resolution.
    pub foreground_volume: Option<VoxelGrid<u8>>,
    /// Background label mask, any resolution.
    pub background_volume: Option<VoxelGrid<u8>>,
}

impl SeedInput {
    pub fn from_paths(foreground: SeedPaths, background: SeedPaths) -> Self {
        Self { foreground, background, ..Self::default() }
    }

    pub fn with_volumes(mut self, foreground: Option<VoxelGrid<u8>>, background: Option<VoxelGrid<u8>>) -> Self {
        self.foreground_volume = foreground;
        self.background_volume = background;
        self
    }
}

/// Statistics of one level of a multi-resolution run.
#[derive(Clone, Debug, PartialEq)]
pub struct LevelRecord {
    /// 1-based position in the run.
    pub iteration: usize,
    pub level: usize,
    pub scale_factor: f32,
    pub work_dims: [usize; 3],
    pub num_seeds: usize,
    pub num_foreground_seeds: usize,
    pub num_background_seeds: usize,
    pub num_unseeded: usize,
    pub probability_range: (f32, f32),
    pub iterations: usize,
    pub time_setup: Duration,
    pub time_solve: Duration,
    pub time_seed_analysis: Duration,
    pub time_total: Duration,
}

impl LevelRecord {
    fn new(iteration: usize, level: usize, work_dims: [usize; 3]) -> Self {
        Self {
            iteration,
            level,
            scale_factor: (1usize << level) as f32,
            work_dims,
            num_seeds: 0,
            num_foreground_seeds: 0,
            num_background_seeds: 0,
            num_unseeded: 0,
            probability_range: (0.0, 0.0),
            iterations: 0,
            time_setup: Duration::ZERO,
            time_solve: Duration::ZERO,
            time_seed_analysis: Duration::ZERO,
            time_total: Duration::ZERO,
        }
    }

    pub fn log(&self) {
        let [nx, ny, nz] = self.work_dims;
        info!(
            "Level {} (iteration {}, scale {}): {}x{}x{} voxels, {} seeds ({} fg / {} bg), {} unseeded",
            self.level,
            self.iteration,
            self.scale_factor,
            nx,
            ny,
            nz,
            self.num_seeds,
            self.num_foreground_seeds,
            self.num_background_seeds,
            self.num_unseeded
        );
        info!(
            "Level {}: probability range [{:.4}, {:.4}], {} CG iterations; setup {:.3?}, solve {:.3?}, seed analysis {:.3?}, total {:.3?}",
            self.level,
            self.probability_range.0,
            self.probability_range.1,
            self.iterations,
            self.time_setup,
            self.time_solve,
            self.time_seed_analysis,
            self.time_total
        );
    }
}

/// Multi-resolution Random Walker segmentation of one input volume.
#[derive(Debug)]
pub struct RandomWalker<V: VoxelType> {
    volume: VoxelGrid<V>,
    params: RandomWalkerParams,
    /// Downsampled volumes; index `level - 1`.
    level_cache: Vec<Option<VoxelGrid<V>>>,
}

impl<V: VoxelType> RandomWalker<V> {
    /// Wrap `volume`; parameters are clamped and then validated.
    pub fn new(volume: VoxelGrid<V>, params: RandomWalkerParams) -> RwResult<Self> {
        let params = params.normalized();
        params.validate()?;
        Ok(Self { volume, params, level_cache: Vec::new() })
    }

    pub fn volume(&self) -> &VoxelGrid<V> {
        &self.volume
    }

    pub fn params(&self) -> &RandomWalkerParams {
        &self.params
    }

    /// Replace the input volume and drop all cached level volumes.
    pub fn set_volume(&mut self, volume: VoxelGrid<V>) {
        self.volume = volume;
        self.clear_cache();
    }

    /// Replace the parameters; cached level volumes stay valid.
    pub fn set_params(&mut self, params: RandomWalkerParams) -> RwResult<()> {
        let params = params.normalized();
        params.validate()?;
        self.params = params;
        Ok(())
    }

    pub fn clear_cache(&mut self) {
        self.level_cache.clear();
    }

    /// Levels (> 0) whose downsampled volume is currently cached.
    pub fn cached_levels(&self) -> Vec<usize> {
        self.level_cache
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.as_ref().map(|_| i + 1))
            .collect()
    }

    /// Working dimensions of the finest and coarsest level of the configured range.
    pub fn level_dims(&self) -> ([usize; 3], [usize; 3]) {
        self.params.lod.level_dims(self.volume.dims())
    }

    fn ensure_level_volumes(&mut self, start: usize, end: usize) -> RwResult<()> {
        let first = end.max(1);
        if first > start {
            return Ok(());
        }
        let missing = (first..=start)
            .any(|level| self.level_cache.get(level - 1).map_or(true, |v| v.is_none()));
        if !missing {
            return Ok(());
        }

        info!("Computing level of detail volumes...");
        let timer = Instant::now();
        if self.level_cache.len() < start {
            self.level_cache.resize_with(start, || None);
        }
        for level in first..=start {
            if self.level_cache[level - 1].is_some() {
                continue;
            }
            let dims = LodParams::scaled_dims(self.volume.dims(), level);
            self.level_cache[level - 1] = Some(self.volume.resample_trilinear(dims)?);
        }
        info!("...finished ({:.3?})", timer.elapsed());
        Ok(())
    }

    fn level_volume(&self, level: usize) -> RwResult<&VoxelGrid<V>> {
        if level == 0 {
            return Ok(&self.volume);
        }
        self.level_cache
            .get(level - 1)
            .and_then(Option::as_ref)
            .ok_or_else(|| RandomWalkerError::invalid_volume(format!("level-{level} volume missing")))
    }

    /// Run the multi-resolution solve.
    ///
    /// Any failure aborts the whole run; per-level buffers are dropped and
    /// nothing is returned, so earlier results held by the caller stay intact.
    pub fn compute(&mut self, seeds: &SeedInput) -> RwResult<Segmentation> {
        let run_timer = Instant::now();
        let params = self.params.clone();
        let start_level = params.lod.start_level();
        let end_level = params.lod.end_level();

        self.ensure_level_volumes(start_level, end_level)?;

        let model = params.edge_weight_model()?;
        let blas = params.blas.blas();

        // seed masks derived from the previous level replace the caller's masks
        let mut derived: Option<(VoxelGrid<u8>, VoxelGrid<u8>)> = None;
        let mut records = Vec::with_capacity(start_level - end_level + 1);
        let mut final_solver = None;

        for level in (end_level..=start_level).rev() {
            let level_timer = Instant::now();
            let work = self.level_volume(level)?;
            let work_dims = work.dims();
            let mut record = LevelRecord::new(start_level - level + 1, level, work_dims);
            let scale = record.scale_factor;

            let foreground = seeds.foreground.scaled(scale);
            let background = seeds.background.scaled(scale);
            let clip = params.clip.map(|c| c.scaled(scale));
            let (fg_volume, bg_volume) = match &derived {
                Some((fg, bg)) => (Some(fg), Some(bg)),
                None => (seeds.foreground_volume.as_ref(), seeds.background_volume.as_ref()),
            };

            let assignment = SeedClassifier::new()
                .with_paths(&foreground, &background)
                .with_volumes(fg_volume, bg_volume)
                .with_clip(clip)
                .classify(work_dims)?;
            record.num_seeds = assignment.num_seeds();
            record.num_foreground_seeds = assignment.num_foreground();
            record.num_background_seeds = assignment.num_background();
            record.num_unseeded = assignment.num_voxels() - assignment.num_seeds();

            let mut solver = RandomWalkerSolver::new(assignment, model.clone());
            let timer = Instant::now();
            solver.setup_equation_system(work)?;
            record.time_setup = timer.elapsed();

            let timer = Instant::now();
            record.iterations = solver.solve(
                blas,
                params.preconditioner,
                params.error_threshold,
                params.max_iterations,
            )?;
            record.time_solve = timer.elapsed();
            record.probability_range = solver.probability_range()?;

            if level != end_level {
                let timer = Instant::now();
                derived = Some(derive_seed_volumes(&solver, &params.lod)?);
                record.time_seed_analysis = timer.elapsed();
            }

            record.time_total = level_timer.elapsed();
            record.log();
            records.push(record);
            final_solver = Some(solver);
        }

        let solver = final_solver.ok_or(RandomWalkerError::InvalidState {
            operation: "compute",
            expected: "Solved",
            actual: "Initial",
        })?;
        info!("Random Walker finished in {:.3?}", run_timer.elapsed());

        Ok(Segmentation {
            solver,
            records,
            native_dims: self.volume.dims(),
            foreground_threshold: params.foreground_threshold,
            resample_output: params.resample_output_volumes,
        })
    }
}

/// Confident foreground/background masks for the next finer level.
///
/// The probability map is rendered to 16 bits, split with the two seed
/// thresholds and each half eroded with the configured box kernel.
pub fn derive_seed_volumes(
    solver: &RandomWalkerSolver,
    lod: &LodParams,
) -> RwResult<(VoxelGrid<u8>, VoxelGrid<u8>)> {
    let probabilities = solver.generate_probability_volume::<u16>()?;
    let [nx, ny, nz] = probabilities.dims();
    let (fg, bg) = threshold_seeds(
        probabilities.data(),
        lod.foreground_seed_threshold,
        lod.background_seed_threshold,
    )?;
    drop(probabilities);

    let fg = erode_separable(&fg, nx, ny, nz, lod.erosion_kernel_size)?;
    let bg = erode_separable(&bg, nx, ny, nz, lod.erosion_kernel_size)?;
    Ok((VoxelGrid::new([nx, ny, nz], fg)?, VoxelGrid::new([nx, ny, nz], bg)?))
}

/// Result of a completed run.
#[derive(Debug)]
pub struct Segmentation {
    solver: RandomWalkerSolver,
    records: Vec<LevelRecord>,
    native_dims: [usize; 3],
    foreground_threshold: f32,
    resample_output: bool,
}

impl Segmentation {
    /// Solver of the finest level.
    pub fn solver(&self) -> &RandomWalkerSolver {
        &self.solver
    }

    /// One record per level, coarsest first.
    pub fn records(&self) -> &[LevelRecord] {
        &self.records
    }

    /// Dimensions of the finest solved level.
    pub fn work_dims(&self) -> [usize; 3] {
        self.solver.dims()
    }

    /// Dimensions of the output volumes.
    pub fn output_dims(&self) -> [usize; 3] {
        if self.resample_output {
            self.native_dims
        } else {
            self.work_dims()
        }
    }

    fn to_output<T: VoxelType>(&self, grid: VoxelGrid<T>) -> RwResult<VoxelGrid<T>> {
        let dims = self.output_dims();
        if grid.dims() == dims {
            return Ok(grid);
        }
        info!(
            "Resampling output from {:?} to {:?}",
            grid.dims(),
            dims
        );
        grid.resample_nearest(dims)
    }

    pub fn probability_volume<T: VoxelType>(&self) -> RwResult<VoxelGrid<T>> {
        self.to_output(self.solver.generate_probability_volume()?)
    }

    /// Binary segmentation at the configured foreground threshold.
    pub fn segmentation<T: VoxelType>(&self) -> RwResult<VoxelGrid<T>> {
        self.segmentation_at(self.foreground_threshold)
    }

    pub fn segmentation_at<T: VoxelType>(&self, threshold: f32) -> RwResult<VoxelGrid<T>> {
        self.to_output(self.solver.generate_binary_segmentation(threshold)?)
    }

    pub fn edge_weight_volume(&self) -> RwResult<VoxelGrid<u8>> {
        self.to_output(self.solver.edge_weight_volume()?)
    }

    /// Share of voxels above the configured foreground threshold.
    pub fn foreground_ratio(&self) -> RwResult<f32> {
        let seg = self.solver.generate_binary_segmentation::<u8>(self.foreground_threshold)?;
        Ok(seg.count_nonzero() as f32 / seg.num_voxels() as f32)
    }
}
