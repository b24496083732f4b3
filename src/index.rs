//! Grid index mapping
//!
//! Converts between 3D voxel coordinates and linear indices
//! (`index = z*ny*nx + y*nx + x`), and between voxel indices and the rows
//! of the Random Walker equation system. Seeded voxels carry known values and
//! are excluded from the system, so only unseeded voxels own a row.

use crate::error::{try_filled, RwResult};
use crate::seeds::SeedAssignment;

/// Row index assigned to seeded voxels.
pub const INVALID_ROW: usize = usize::MAX;

/// Linear index of voxel `(x, y, z)` in a grid of dimensions `dims`.
#[inline(always)]
pub fn to_index(x: usize, y: usize, z: usize, dims: [usize; 3]) -> usize {
    z * dims[1] * dims[0] + y * dims[0] + x
}

/// Voxel coordinates of linear index `index` in a grid of dimensions `dims`.
#[inline(always)]
pub fn to_coords(index: usize, dims: [usize; 3]) -> [usize; 3] {
    let slice = dims[0] * dims[1];
    let z = index / slice;
    let rem = index - z * slice;
    let y = rem / dims[0];
    let x = rem - y * dims[0];
    [x, y, z]
}

/// Bijection between unseeded voxels and equation rows.
///
/// Rows are handed out in ascending voxel order, so the map is stable for a
/// given seed assignment.
#[derive(Clone, Debug)]
pub struct RowIndexMap {
    voxel_to_row: Vec<usize>,
    row_to_voxel: Vec<usize>,
}

impl RowIndexMap {
    /// Build the map with a single linear pass over the seed assignment.
    pub fn build(seeds: &SeedAssignment) -> RwResult<Self> {
        let num_voxels = seeds.num_voxels();
        let system_size = num_voxels - seeds.num_seeds();

        let mut voxel_to_row = try_filled("row index map", num_voxels, INVALID_ROW)?;
        let mut row_to_voxel = try_filled("voxel index map", system_size, 0usize)?;

        let mut row = 0usize;
        for (voxel, label) in seeds.labels().iter().enumerate() {
            if label.is_seed() {
                continue;
            }
            voxel_to_row[voxel] = row;
            row_to_voxel[row] = voxel;
            row += 1;
        }
        debug_assert_eq!(row, system_size);

        Ok(Self { voxel_to_row, row_to_voxel })
    }

    /// Equation row of `voxel`, or [`INVALID_ROW`] for a seed.
    #[inline(always)]
    pub fn row(&self, voxel: usize) -> usize {
        self.voxel_to_row[voxel]
    }

    /// Voxel owning equation row `row`.
    #[inline(always)]
    pub fn voxel(&self, row: usize) -> usize {
        self.row_to_voxel[row]
    }

    /// Number of equation rows (unseeded voxels).
    pub fn system_size(&self) -> usize {
        self.row_to_voxel.len()
    }

    /// Number of voxels covered by the map.
    pub fn num_voxels(&self) -> usize {
        self.voxel_to_row.len()
    }
}
