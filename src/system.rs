//! Random Walker equation system
//!
//! Builds the reduced graph Laplacian `L_U x = -B^T m` over the unseeded
//! voxels of a 6-connected grid. For an unseeded voxel `i`:
//!
//! - every in-bounds neighbour `j` adds `w_ij` to the diagonal of row `i`
//! - an unseeded neighbour adds `-w_ij` at column `row(j)`
//! - a seeded neighbour adds `w_ij * seed_value(j)` to the right-hand side
//!
//! Each row is computed entirely by one worker from the two endpoint samples
//! of its edges, so rows can be built in parallel without shared writes, and
//! the two halves of a coupling are bit-identical.

use log::debug;
use rayon::prelude::*;

use crate::error::{try_filled, RandomWalkerError, RwResult};
use crate::index::{to_coords, to_index, RowIndexMap};
use crate::seeds::SeedAssignment;
use crate::sparse::{EllpackMatrix, RowFull, RANDOM_WALKER_ROW_CAPACITY};
use crate::volume::{VoxelGrid, VoxelType};
use crate::weights::{EdgeWeight, EdgeWeightModel, VoxelSample};

/// System matrix and right-hand side.
#[derive(Clone, Debug)]
pub struct SparseSystem {
    pub matrix: EllpackMatrix,
    pub rhs: Vec<f32>,
}

impl SparseSystem {
    pub fn size(&self) -> usize {
        self.rhs.len()
    }
}

/// Assemble the equation system for `volume` under `seeds`.
///
/// # Arguments
/// * `volume` - Intensity volume, same dimensions as `seeds`
/// * `seeds` - Seed assignment
/// * `rows` - Row map built from `seeds`
/// * `model` - Edge weight strategy
///
/// # Returns
/// Matrix of size `rows.system_size()` squared, and the right-hand side.
pub fn build_system<V: VoxelType>(
    volume: &VoxelGrid<V>,
    seeds: &SeedAssignment,
    rows: &RowIndexMap,
    model: &EdgeWeightModel,
) -> RwResult<SparseSystem> {
    if volume.dims() != seeds.dims() {
        return Err(RandomWalkerError::DimensionMismatch {
            expected: seeds.dims(),
            actual: volume.dims(),
        });
    }
    if rows.num_voxels() != seeds.num_voxels() {
        return Err(RandomWalkerError::invalid_volume("row map does not match the seed assignment"));
    }
    if seeds.num_seeds() == 0 {
        return Err(RandomWalkerError::NoSeeds);
    }

    match model {
        EdgeWeightModel::Intensity(w) => build_with(volume, seeds, rows, w),
        EdgeWeightModel::TransFunc(w) => build_with(volume, seeds, rows, w),
    }
}

/// Per-voxel weight inputs, computed once per volume.
pub fn voxel_samples<V: VoxelType, W: EdgeWeight>(volume: &VoxelGrid<V>, weights: &W) -> RwResult<Vec<VoxelSample>> {
    let mut samples = try_filled("voxel samples", volume.num_voxels(), VoxelSample::default())?;
    samples
        .par_iter_mut()
        .zip(volume.data().par_iter())
        .for_each(|(s, v)| *s = weights.sample(v.to_normalized()));
    Ok(samples)
}

/// In-bounds 6-neighbourhood of voxel `[x, y, z]`, as linear indices.
#[inline]
pub(crate) fn neighbors(c: [usize; 3], dims: [usize; 3]) -> impl Iterator<Item = usize> {
    let [x, y, z] = c;
    [
        (x > 0).then(|| to_index(x - 1, y, z, dims)),
        (x + 1 < dims[0]).then(|| to_index(x + 1, y, z, dims)),
        (y > 0).then(|| to_index(x, y - 1, z, dims)),
        (y + 1 < dims[1]).then(|| to_index(x, y + 1, z, dims)),
        (z > 0).then(|| to_index(x, y, z - 1, dims)),
        (z + 1 < dims[2]).then(|| to_index(x, y, z + 1, dims)),
    ]
    .into_iter()
    .flatten()
}

fn build_with<V: VoxelType, W: EdgeWeight>(
    volume: &VoxelGrid<V>,
    seeds: &SeedAssignment,
    rows: &RowIndexMap,
    weights: &W,
) -> RwResult<SparseSystem> {
    let dims = volume.dims();
    let size = rows.system_size();
    let samples = voxel_samples(volume, weights)?;

    let mut matrix = EllpackMatrix::new(size, size, RANDOM_WALKER_ROW_CAPACITY)?;
    let mut rhs = try_filled("right-hand side", size, 0.0f32)?;

    matrix
        .par_rows_mut()
        .zip(rhs.par_iter_mut())
        .try_for_each(|(mut row, b)| -> RwResult<()> {
            let r = row.index();
            let voxel = rows.voxel(r);
            let sample = samples[voxel];
            let full = move |_: RowFull| RandomWalkerError::RowCapacityExceeded {
                row: r,
                capacity: RANDOM_WALKER_ROW_CAPACITY,
            };

            // diagonal occupies the first slot
            row.add(r, 0.0).map_err(full)?;

            let mut diagonal = 0.0f32;
            for nb in neighbors(to_coords(voxel, dims), dims) {
                let w = weights.weight(sample, samples[nb]);
                diagonal += w;
                match seeds.seed_value(nb) {
                    Some(value) => *b += w * value,
                    None => row.add(rows.row(nb), -w).map_err(full)?,
                }
            }
            row.add(r, diagonal).map_err(full)
        })?;

    debug!(
        "Built {}x{} system ({} non-zeros) for {}x{}x{} grid",
        size,
        size,
        matrix.num_nonzeros(),
        dims[0],
        dims[1],
        dims[2]
    );

    Ok(SparseSystem { matrix, rhs })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seeds::SeedLabel;

    fn line_volume(values: &[f32]) -> VoxelGrid<f32> {
        VoxelGrid::new([values.len(), 1, 1], values.to_vec()).unwrap()
    }

    fn line_seeds(labels: &[SeedLabel]) -> SeedAssignment {
        SeedAssignment::from_labels([labels.len(), 1, 1], labels.to_vec()).unwrap()
    }

    #[test]
    fn test_line_system() {
        use SeedLabel::*;
        // F U U B on a uniform line: weights are all 1
        let volume = line_volume(&[0.5; 4]);
        let seeds = line_seeds(&[Foreground, Unseeded, Unseeded, Background]);
        let rows = RowIndexMap::build(&seeds).unwrap();
        let model = EdgeWeightModel::intensity(4096.0, 1e-5);
        let sys = build_system(&volume, &seeds, &rows, &model).unwrap();

        assert_eq!(sys.size(), 2);
        assert_eq!(sys.matrix.get(0, 0), 2.0);
        assert_eq!(sys.matrix.get(0, 1), -1.0);
        assert_eq!(sys.matrix.get(1, 0), -1.0);
        assert_eq!(sys.matrix.get(1, 1), 2.0);
        assert_eq!(sys.rhs, vec![1.0, 0.0]);
    }

    #[test]
    fn test_no_seeds_rejected() {
        let volume = line_volume(&[0.0; 3]);
        let seeds = line_seeds(&[SeedLabel::Unseeded; 3]);
        let rows = RowIndexMap::build(&seeds).unwrap();
        let model = EdgeWeightModel::intensity(10.0, 1e-5);
        let err = build_system(&volume, &seeds, &rows, &model).unwrap_err();
        assert_eq!(err, RandomWalkerError::NoSeeds);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let volume = line_volume(&[0.0; 3]);
        let seeds = line_seeds(&[SeedLabel::Foreground; 4]);
        let rows = RowIndexMap::build(&seeds).unwrap();
        let model = EdgeWeightModel::intensity(10.0, 1e-5);
        assert!(matches!(
            build_system(&volume, &seeds, &rows, &model),
            Err(RandomWalkerError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_neighbors_at_corner_and_center() {
        let dims = [3, 3, 3];
        assert_eq!(neighbors([0, 0, 0], dims).count(), 3);
        assert_eq!(neighbors([1, 1, 1], dims).count(), 6);
        let mut n: Vec<usize> = neighbors([1, 1, 1], dims).collect();
        n.sort_unstable();
        assert_eq!(n, vec![4, 10, 12, 14, 16, 22]);
    }

    #[test]
    fn test_rows_never_exceed_capacity() {
        let volume = VoxelGrid::from_fn([5, 5, 5], |x, y, z| ((x + 2 * y + 3 * z) % 7) as f32 / 7.0).unwrap();
        let mut labels = vec![SeedLabel::Unseeded; 125];
        labels[0] = SeedLabel::Foreground;
        labels[124] = SeedLabel::Background;
        let seeds = SeedAssignment::from_labels([5, 5, 5], labels).unwrap();
        let rows = RowIndexMap::build(&seeds).unwrap();
        let sys = build_system(&volume, &seeds, &rows, &EdgeWeightModel::intensity(50.0, 1e-5)).unwrap();
        assert_eq!(sys.size(), 123);
        assert!(sys.matrix.is_symmetric());
        for r in 0..sys.size() {
            assert!(sys.matrix.row_entries(r).count() <= RANDOM_WALKER_ROW_CAPACITY);
        }
    }
}
