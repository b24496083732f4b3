//! Uncertainty regions
//!
//! Locates connected regions of a probability volume where the segmentation
//! is ambiguous, e.g. to suggest where additional seeds are needed. The band
//! of uncertain probabilities is thinned with an opposite-neighbour erosion
//! and split into connected components, which are reported largest first.

use std::collections::VecDeque;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{try_copied, try_filled, RandomWalkerError, RwResult};
use crate::index::{to_coords, to_index};
use crate::volume::VoxelGrid;

/// Neighbourhood used for connected components.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    /// Face neighbours.
    Six,
    /// Face and edge neighbours.
    #[default]
    Eighteen,
    /// Face, edge and corner neighbours.
    TwentySix,
}

impl Connectivity {
    fn offsets(self) -> Vec<[isize; 3]> {
        let max_manhattan = match self {
            Connectivity::Six => 1,
            Connectivity::Eighteen => 2,
            Connectivity::TwentySix => 3,
        };
        let mut offsets = Vec::with_capacity(26);
        for dz in -1isize..=1 {
            for dy in -1isize..=1 {
                for dx in -1isize..=1 {
                    let m = dx.abs() + dy.abs() + dz.abs();
                    if m > 0 && m <= max_manhattan {
                        offsets.push([dx, dy, dz]);
                    }
                }
            }
        }
        offsets
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UncertaintyParams {
    /// Probabilities within `[lower, upper]` count as uncertain.
    pub range: (f32, f32),
    pub connectivity: Connectivity,
    /// Components with fewer voxels are discarded.
    pub min_region_size: usize,
    /// Keep at most this many (largest) regions.
    pub max_regions: usize,
}

impl Default for UncertaintyParams {
    fn default() -> Self {
        Self {
            range: (0.2, 0.8),
            connectivity: Connectivity::Eighteen,
            min_region_size: 1,
            max_regions: 10000,
        }
    }
}

/// A connected uncertain region.
#[derive(Clone, Debug, PartialEq)]
pub struct UncertaintyRegion {
    /// Label in [`UncertaintyAnalysis::labels`]; 1 is the largest region.
    pub label: u16,
    pub size: usize,
    pub center_of_mass: [f32; 3],
    /// Lower-left-front corner of the bounding box.
    pub llf: [usize; 3],
    /// Upper-right-back corner of the bounding box (inclusive).
    pub urb: [usize; 3],
}

#[derive(Clone, Debug)]
pub struct UncertaintyAnalysis {
    /// Region label per voxel, 0 outside all regions.
    pub labels: VoxelGrid<u16>,
    /// Regions, largest first.
    pub regions: Vec<UncertaintyRegion>,
}

/// Find uncertainty regions in an 8-bit probability volume.
pub fn analyze_uncertainty(probabilities: &VoxelGrid<u8>, params: &UncertaintyParams) -> RwResult<UncertaintyAnalysis> {
    let (lower, upper) = params.range;
    if !(0.0..=1.0).contains(&lower) || !(0.0..=1.0).contains(&upper) || lower > upper {
        return Err(RandomWalkerError::invalid_params(format!(
            "uncertainty range must satisfy 0 <= lower <= upper <= 1, got [{lower}, {upper}]"
        )));
    }
    let lo = (lower * 255.0).round() as u8;
    let hi = (upper * 255.0).round() as u8;
    let dims = probabilities.dims();

    let mut band = try_filled("uncertainty band", probabilities.num_voxels(), 0u8)?;
    for (b, &p) in band.iter_mut().zip(probabilities.data()) {
        if p >= lo && p <= hi {
            *b = p;
        }
    }
    let band = erode_opposite_pairs(&band, dims)?;

    let (labels, regions) = connected_components(&band, dims, params)?;
    debug!("Uncertainty analysis: {} regions", regions.len());
    Ok(UncertaintyAnalysis { labels: VoxelGrid::new(dims, labels)?, regions })
}

/// Clear interior voxels that lack support on both sides along some axis.
///
/// Only voxels with a full 6-neighbourhood are considered; the border is
/// left unchanged.
pub fn erode_opposite_pairs(volume: &[u8], dims: [usize; 3]) -> RwResult<Vec<u8>> {
    let [nx, ny, nz] = dims;
    let mut result = try_copied("eroded band", volume)?;
    if nx < 3 || ny < 3 || nz < 3 {
        return Ok(result);
    }
    let sx = 1;
    let sy = nx;
    let sz = nx * ny;
    for z in 1..nz - 1 {
        for y in 1..ny - 1 {
            for x in 1..nx - 1 {
                let i = to_index(x, y, z, dims);
                if volume[i] == 0 {
                    continue;
                }
                let thin = |s: usize| volume[i + s] == 0 && volume[i - s] == 0;
                if thin(sx) || thin(sy) || thin(sz) {
                    result[i] = 0;
                }
            }
        }
    }
    Ok(result)
}

fn connected_components(
    mask: &[u8],
    dims: [usize; 3],
    params: &UncertaintyParams,
) -> RwResult<(Vec<u16>, Vec<UncertaintyRegion>)> {
    let offsets = params.connectivity.offsets();
    let mut component = try_filled("component labels", mask.len(), 0u32)?;
    let mut regions: Vec<(u32, UncertaintyRegion, [f64; 3])> = Vec::new();
    let mut queue = VecDeque::new();

    for seed in 0..mask.len() {
        if mask[seed] == 0 || component[seed] != 0 {
            continue;
        }
        let id = regions.len() as u32 + 1;
        let mut region = UncertaintyRegion {
            label: 0,
            size: 0,
            center_of_mass: [0.0; 3],
            llf: dims,
            urb: [0; 3],
        };
        let mut sum = [0.0f64; 3];

        component[seed] = id;
        queue.push_back(seed);
        while let Some(voxel) = queue.pop_front() {
            let c = to_coords(voxel, dims);
            region.size += 1;
            for axis in 0..3 {
                sum[axis] += c[axis] as f64;
                region.llf[axis] = region.llf[axis].min(c[axis]);
                region.urb[axis] = region.urb[axis].max(c[axis]);
            }
            for off in &offsets {
                let n = [
                    c[0] as isize + off[0],
                    c[1] as isize + off[1],
                    c[2] as isize + off[2],
                ];
                if (0..3).any(|a| n[a] < 0 || n[a] >= dims[a] as isize) {
                    continue;
                }
                let ni = to_index(n[0] as usize, n[1] as usize, n[2] as usize, dims);
                if mask[ni] != 0 && component[ni] == 0 {
                    component[ni] = id;
                    queue.push_back(ni);
                }
            }
        }
        regions.push((id, region, sum));
    }

    // largest first, ties by discovery order
    regions.retain(|(_, r, _)| r.size >= params.min_region_size.max(1));
    regions.sort_by(|a, b| b.1.size.cmp(&a.1.size).then(a.0.cmp(&b.0)));
    regions.truncate(params.max_regions.min(u16::MAX as usize));

    let mut relabel = try_filled("region relabel table", component_count(&component) + 1, 0u16)?;
    let mut out = Vec::with_capacity(regions.len());
    for (rank, (id, mut region, sum)) in regions.into_iter().enumerate() {
        let label = rank as u16 + 1;
        relabel[id as usize] = label;
        region.label = label;
        let n = region.size as f64;
        region.center_of_mass = [(sum[0] / n) as f32, (sum[1] / n) as f32, (sum[2] / n) as f32];
        out.push(region);
    }

    let mut labels = try_filled("region labels", mask.len(), 0u16)?;
    for (l, &c) in labels.iter_mut().zip(&component) {
        *l = relabel[c as usize];
    }
    Ok((labels, out))
}

fn component_count(component: &[u32]) -> usize {
    component.iter().copied().max().unwrap_or(0) as usize
}
