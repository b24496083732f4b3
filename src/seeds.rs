//! Seed classification
//!
//! Rasterizes foreground/background seed polylines and label volumes onto the
//! working grid and assigns every voxel one of three states. Classification is
//! first-come: once a voxel is marked it is never reclassified. Sources are
//! applied in a fixed order:
//!
//! 1. clip region (voxels outside the box become background)
//! 2. foreground polylines
//! 3. foreground label volume
//! 4. background polylines
//! 5. background label volume

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{try_filled, RandomWalkerError, RwResult};
use crate::index::to_index;
use crate::volume::VoxelGrid;

/// Per-voxel seed state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SeedLabel {
    #[default]
    Unseeded = 0,
    Foreground = 1,
    Background = 2,
}

impl SeedLabel {
    #[inline(always)]
    pub fn is_seed(self) -> bool {
        self != SeedLabel::Unseeded
    }

    /// Fixed probability carried by a seed: 1 for foreground, 0 for background.
    #[inline(always)]
    pub fn seed_value(self) -> Option<f32> {
        match self {
            SeedLabel::Unseeded => None,
            SeedLabel::Foreground => Some(1.0),
            SeedLabel::Background => Some(0.0),
        }
    }
}

/// A list of polylines in voxel coordinates.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SeedPaths {
    segments: Vec<Vec<[f32; 3]>>,
}

impl SeedPaths {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_segments(segments: Vec<Vec<[f32; 3]>>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[Vec<[f32; 3]>] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(|s| s.is_empty())
    }

    /// Copy with every point divided by `scale_factor`.
    pub fn scaled(&self, scale_factor: f32) -> Self {
        let segments = self
            .segments
            .iter()
            .map(|seg| {
                seg.iter()
                    .map(|p| [p[0] / scale_factor, p[1] / scale_factor, p[2] / scale_factor])
                    .collect()
            })
            .collect();
        Self { segments }
    }
}

/// Axis-aligned box in voxel coordinates (inclusive bounds).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipRegion {
    pub min: [usize; 3],
    pub max: [usize; 3],
}

impl ClipRegion {
    pub fn new(min: [usize; 3], max: [usize; 3]) -> Self {
        Self { min, max }
    }

    /// Bounds divided by `scale_factor` and rounded.
    pub fn scaled(&self, scale_factor: f32) -> Self {
        let scale = |v: usize| (v as f32 / scale_factor).round() as usize;
        Self {
            min: [scale(self.min[0]), scale(self.min[1]), scale(self.min[2])],
            max: [scale(self.max[0]), scale(self.max[1]), scale(self.max[2])],
        }
    }

    /// True when any coordinate lies strictly outside the box.
    #[inline]
    pub fn excludes(&self, x: usize, y: usize, z: usize) -> bool {
        x < self.min[0] || y < self.min[1] || z < self.min[2]
            || x > self.max[0] || y > self.max[1] || z > self.max[2]
    }
}

/// Seed state of every voxel of a working grid.
#[derive(Clone, Debug)]
pub struct SeedAssignment {
    dims: [usize; 3],
    labels: Vec<SeedLabel>,
    num_foreground: usize,
    num_background: usize,
}

impl SeedAssignment {
    /// Wrap an existing label buffer.
    pub fn from_labels(dims: [usize; 3], labels: Vec<SeedLabel>) -> RwResult<Self> {
        let expected = dims[0] * dims[1] * dims[2];
        if labels.len() != expected || expected == 0 {
            return Err(RandomWalkerError::invalid_volume(format!(
                "{} seed labels supplied for a {}x{}x{} grid",
                labels.len(), dims[0], dims[1], dims[2]
            )));
        }
        let mut seeds = Self { dims, labels, num_foreground: 0, num_background: 0 };
        seeds.recount();
        Ok(seeds)
    }

    fn recount(&mut self) {
        self.num_foreground = self.labels.iter().filter(|&&l| l == SeedLabel::Foreground).count();
        self.num_background = self.labels.iter().filter(|&&l| l == SeedLabel::Background).count();
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn num_voxels(&self) -> usize {
        self.labels.len()
    }

    pub fn labels(&self) -> &[SeedLabel] {
        &self.labels
    }

    #[inline(always)]
    pub fn label(&self, voxel: usize) -> SeedLabel {
        self.labels[voxel]
    }

    #[inline(always)]
    pub fn is_seed(&self, voxel: usize) -> bool {
        self.labels[voxel].is_seed()
    }

    /// Fixed value of a seeded voxel, `None` for unseeded voxels.
    #[inline(always)]
    pub fn seed_value(&self, voxel: usize) -> Option<f32> {
        self.labels[voxel].seed_value()
    }

    pub fn num_seeds(&self) -> usize {
        self.num_foreground + self.num_background
    }

    pub fn num_foreground(&self) -> usize {
        self.num_foreground
    }

    pub fn num_background(&self) -> usize {
        self.num_background
    }

    /// Range spanned by the seed values.
    ///
    /// Without foreground seeds everything converges to 0, without background
    /// seeds to 1.
    pub fn seed_range(&self) -> (f32, f32) {
        if self.num_foreground == 0 {
            (0.0, 0.0)
        } else if self.num_background == 0 {
            (1.0, 1.0)
        } else {
            (0.0, 1.0)
        }
    }
}

/// Seed sources for one classification pass.
#[derive(Clone, Copy, Debug, Default)]
pub struct SeedClassifier<'a> {
    pub foreground_paths: Option<&'a SeedPaths>,
    pub background_paths: Option<&'a SeedPaths>,
    pub foreground_volume: Option<&'a VoxelGrid<u8>>,
    pub background_volume: Option<&'a VoxelGrid<u8>>,
    pub clip: Option<ClipRegion>,
}

impl<'a> SeedClassifier<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_paths(mut self, foreground: &'a SeedPaths, background: &'a SeedPaths) -> Self {
        self.foreground_paths = Some(foreground);
        self.background_paths = Some(background);
        self
    }

    pub fn with_volumes(
        mut self,
        foreground: Option<&'a VoxelGrid<u8>>,
        background: Option<&'a VoxelGrid<u8>>,
    ) -> Self {
        self.foreground_volume = foreground;
        self.background_volume = background;
        self
    }

    pub fn with_clip(mut self, clip: Option<ClipRegion>) -> Self {
        self.clip = clip;
        self
    }

    /// Classify every voxel of a grid with dimensions `dims`.
    pub fn classify(&self, dims: [usize; 3]) -> RwResult<SeedAssignment> {
        let num_voxels = dims[0] * dims[1] * dims[2];
        if num_voxels == 0 {
            return Err(RandomWalkerError::invalid_volume("cannot classify an empty grid"));
        }
        let mut labels = try_filled("seed buffer", num_voxels, SeedLabel::Unseeded)?;

        if let Some(clip) = &self.clip {
            mark_clipped(&mut labels, dims, clip);
        }
        if let Some(paths) = self.foreground_paths.filter(|p| !p.is_empty()) {
            rasterize_paths(&mut labels, dims, paths, SeedLabel::Foreground);
        }
        if let Some(volume) = self.foreground_volume {
            mark_from_volume(&mut labels, dims, volume, SeedLabel::Foreground)?;
        }
        if let Some(paths) = self.background_paths.filter(|p| !p.is_empty()) {
            rasterize_paths(&mut labels, dims, paths, SeedLabel::Background);
        }
        if let Some(volume) = self.background_volume {
            mark_from_volume(&mut labels, dims, volume, SeedLabel::Background)?;
        }

        SeedAssignment::from_labels(dims, labels)
    }
}

#[inline(always)]
fn mark(labels: &mut [SeedLabel], index: usize, label: SeedLabel) {
    if labels[index] == SeedLabel::Unseeded {
        labels[index] = label;
    }
}

fn mark_clipped(labels: &mut [SeedLabel], dims: [usize; 3], clip: &ClipRegion) {
    let slice = dims[0] * dims[1];
    labels.par_chunks_mut(slice).enumerate().for_each(|(z, plane)| {
        for y in 0..dims[1] {
            for x in 0..dims[0] {
                if clip.excludes(x, y, z) {
                    mark(plane, y * dims[0] + x, SeedLabel::Background);
                }
            }
        }
    });
}

/// Round and clamp a continuous coordinate onto the grid.
#[inline]
fn snap(value: f64, dim: usize) -> usize {
    let v = value.round();
    if v <= 0.0 {
        0
    } else {
        (v as usize).min(dim - 1)
    }
}

#[inline]
fn snap_point(p: [f64; 3], dims: [usize; 3]) -> [usize; 3] {
    [snap(p[0], dims[0]), snap(p[1], dims[1]), snap(p[2], dims[2])]
}

/// Mark samples taken at unit steps along each segment of each polyline.
///
/// A polyline consisting of a single point marks that point. Points with a
/// non-finite coordinate are ignored, together with the segments touching
/// them.
fn rasterize_paths(labels: &mut [SeedLabel], dims: [usize; 3], paths: &SeedPaths, label: SeedLabel) {
    let finite = |p: &[f32; 3]| p.iter().all(|c| c.is_finite());

    for segment in paths.segments() {
        if segment.len() == 1 {
            if finite(&segment[0]) {
                let [x, y, z] = snap_point(segment[0].map(f64::from), dims);
                mark(labels, to_index(x, y, z, dims), label);
            }
            continue;
        }
        for pair in segment.windows(2) {
            if finite(&pair[0]) && finite(&pair[1]) {
                rasterize_segment(labels, dims, pair[0], pair[1], label);
            }
        }
    }
}

/// Mark the samples `start + t * dir` for `t = 0, 1, 2, ...` while `t` is
/// below the segment length.
///
/// Coordinates move monotonically along a segment, so consecutive samples
/// falling into the same clamped voxel are skipped by jumping to the next
/// rounding boundary. The cost depends on the number of voxels crossed, not
/// on the segment length.
fn rasterize_segment(
    labels: &mut [SeedLabel],
    dims: [usize; 3],
    start: [f32; 3],
    end: [f32; 3],
    label: SeedLabel,
) {
    let s = start.map(f64::from);
    let e = end.map(f64::from);
    let delta = [e[0] - s[0], e[1] - s[1], e[2] - s[2]];
    let length = (delta[0] * delta[0] + delta[1] * delta[1] + delta[2] * delta[2]).sqrt();
    if length == 0.0 || !length.is_finite() {
        return;
    }
    let dir = [delta[0] / length, delta[1] / length, delta[2] / length];
    // samples t = 0 .. num_samples - 1
    let num_samples = length.ceil();

    let mut t = 0.0f64;
    loop {
        let voxel = snap_point([s[0] + dir[0] * t, s[1] + dir[1] * t, s[2] + dir[2] * t], dims);
        mark(labels, to_index(voxel[0], voxel[1], voxel[2], dims), label);

        let mut next = f64::INFINITY;
        for axis in 0..3 {
            let v = voxel[axis];
            let boundary = if dir[axis] > 0.0 && v + 1 < dims[axis] {
                v as f64 + 0.5
            } else if dir[axis] < 0.0 && v > 0 {
                v as f64 - 0.5
            } else {
                continue;
            };
            let crossing = (boundary - s[axis]) / dir[axis];
            next = next.min(crossing.floor().max(t + 1.0));
        }
        // `next <= t` once unit steps are no longer representable
        if next >= num_samples || next <= t {
            break;
        }
        t = next;
    }
}

/// Mark voxels whose nearest sample in `volume` is non-zero.
fn mark_from_volume(
    labels: &mut [SeedLabel],
    dims: [usize; 3],
    volume: &VoxelGrid<u8>,
    label: SeedLabel,
) -> RwResult<()> {
    let vol_dims = volume.dims();
    if vol_dims.iter().any(|&d| d == 0) {
        return Err(RandomWalkerError::DimensionMismatch { expected: dims, actual: vol_dims });
    }
    let scale = [
        vol_dims[0] as f32 / dims[0] as f32,
        vol_dims[1] as f32 / dims[1] as f32,
        vol_dims[2] as f32 / dims[2] as f32,
    ];
    let sample = |c: usize, axis: usize| -> usize {
        ((c as f32 * scale[axis] + 0.45).floor() as usize).min(vol_dims[axis] - 1)
    };

    let slice = dims[0] * dims[1];
    labels.par_chunks_mut(slice).enumerate().for_each(|(z, plane)| {
        let sz = sample(z, 2);
        for y in 0..dims[1] {
            let sy = sample(y, 1);
            for x in 0..dims[0] {
                let sx = sample(x, 0);
                if volume.get(sx, sy, sz) != 0 {
                    mark(plane, y * dims[0] + x, label);
                }
            }
        }
    });
    Ok(())
}
