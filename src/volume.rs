//! Voxel grids
//!
//! A dense 3D scalar volume stored in x-fastest order
//! (`index = z*ny*nx + y*nx + x`), generic over the voxel type so that
//! intensity inputs, label masks and probability outputs share one container.

use crate::error::{try_copied, try_filled, RandomWalkerError, RwResult};
use crate::index::{to_coords, to_index};

/// Scalar voxel types a [`VoxelGrid`] can hold.
pub trait VoxelType: Copy + Default + PartialEq + PartialOrd + Send + Sync + std::fmt::Debug + 'static {
    /// Largest representable value (1.0 for floating point voxels).
    const MAX_VALUE: Self;

    /// Value mapped to [0, 1] for integer types; floats are passed through.
    fn to_normalized(self) -> f32;

    /// Inverse of [`to_normalized`](Self::to_normalized), clamped to the representable range.
    fn from_normalized(value: f32) -> Self;

    /// Raw value as `f32` (used for interpolation).
    fn to_f32(self) -> f32;

    /// Raw `f32` rounded and clamped back into this type.
    fn from_f32(value: f32) -> Self;

    #[inline]
    fn is_nonzero(self) -> bool {
        self != Self::default()
    }
}

impl VoxelType for u8 {
    const MAX_VALUE: Self = u8::MAX;

    #[inline]
    fn to_normalized(self) -> f32 {
        self as f32 / u8::MAX as f32
    }

    #[inline]
    fn from_normalized(value: f32) -> Self {
        (value.clamp(0.0, 1.0) * u8::MAX as f32).round() as u8
    }

    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_f32(value: f32) -> Self {
        value.round().clamp(0.0, u8::MAX as f32) as u8
    }
}

impl VoxelType for u16 {
    const MAX_VALUE: Self = u16::MAX;

    #[inline]
    fn to_normalized(self) -> f32 {
        self as f32 / u16::MAX as f32
    }

    #[inline]
    fn from_normalized(value: f32) -> Self {
        (value.clamp(0.0, 1.0) * u16::MAX as f32).round() as u16
    }

    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_f32(value: f32) -> Self {
        value.round().clamp(0.0, u16::MAX as f32) as u16
    }
}

impl VoxelType for f32 {
    const MAX_VALUE: Self = 1.0;

    #[inline]
    fn to_normalized(self) -> f32 {
        self
    }

    #[inline]
    fn from_normalized(value: f32) -> Self {
        value.clamp(0.0, 1.0)
    }

    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(value: f32) -> Self {
        value
    }
}

/// Dense 3D voxel grid owning its samples.
#[derive(Clone, Debug, PartialEq)]
pub struct VoxelGrid<T: VoxelType> {
    dims: [usize; 3],
    data: Vec<T>,
}

impl<T: VoxelType> VoxelGrid<T> {
    /// Wrap existing samples. `data.len()` must equal `nx*ny*nz`.
    pub fn new(dims: [usize; 3], data: Vec<T>) -> RwResult<Self> {
        check_dims(dims)?;
        let expected = dims[0] * dims[1] * dims[2];
        if data.len() != expected {
            return Err(RandomWalkerError::invalid_volume(format!(
                "{} samples supplied for a {}x{}x{} grid",
                data.len(), dims[0], dims[1], dims[2]
            )));
        }
        Ok(Self { dims, data })
    }

    /// Grid with every voxel set to `value`.
    pub fn filled(dims: [usize; 3], value: T) -> RwResult<Self> {
        check_dims(dims)?;
        let data = try_filled("voxel grid", dims[0] * dims[1] * dims[2], value)?;
        Ok(Self { dims, data })
    }

    /// Grid with every voxel set to zero.
    pub fn zeros(dims: [usize; 3]) -> RwResult<Self> {
        Self::filled(dims, T::default())
    }

    /// Grid whose voxels are produced by `f(x, y, z)`.
    pub fn from_fn<F>(dims: [usize; 3], mut f: F) -> RwResult<Self>
    where
        F: FnMut(usize, usize, usize) -> T,
    {
        let mut grid = Self::zeros(dims)?;
        for z in 0..dims[2] {
            for y in 0..dims[1] {
                for x in 0..dims[0] {
                    let idx = to_index(x, y, z, dims);
                    grid.data[idx] = f(x, y, z);
                }
            }
        }
        Ok(grid)
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn num_voxels(&self) -> usize {
        self.data.len()
    }

    #[inline(always)]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        to_index(x, y, z, self.dims)
    }

    #[inline(always)]
    pub fn coords(&self, index: usize) -> [usize; 3] {
        to_coords(index, self.dims)
    }

    #[inline(always)]
    pub fn get(&self, x: usize, y: usize, z: usize) -> T {
        self.data[self.index(x, y, z)]
    }

    #[inline(always)]
    pub fn set(&mut self, x: usize, y: usize, z: usize, value: T) {
        let idx = self.index(x, y, z);
        self.data[idx] = value;
    }

    #[inline(always)]
    pub fn voxel(&self, index: usize) -> T {
        self.data[index]
    }

    /// Sample at `index` mapped to [0, 1] (see [`VoxelType::to_normalized`]).
    #[inline(always)]
    pub fn normalized(&self, index: usize) -> f32 {
        self.data[index].to_normalized()
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Number of voxels with a non-zero value.
    pub fn count_nonzero(&self) -> usize {
        self.data.iter().filter(|v| v.is_nonzero()).count()
    }

    /// Minimum and maximum sample value.
    pub fn value_range(&self) -> (T, T) {
        let mut min = self.data[0];
        let mut max = self.data[0];
        for &v in &self.data[1..] {
            if v < min {
                min = v;
            }
            if v > max {
                max = v;
            }
        }
        (min, max)
    }

    /// Resample to `dims` with trilinear interpolation.
    ///
    /// Grid corners map onto grid corners, so the first and last voxel along
    /// each axis are preserved.
    pub fn resample_trilinear(&self, dims: [usize; 3]) -> RwResult<Self> {
        check_dims(dims)?;
        if dims == self.dims {
            return Ok(Self { dims, data: try_copied("resampled volume", &self.data)? });
        }
        let ratio = axis_ratios(self.dims, dims);
        let src = self.dims;
        let mut out = Self::zeros(dims)?;

        for z in 0..dims[2] {
            let (z0, z1, tz) = lerp_coords(z, ratio[2], src[2]);
            for y in 0..dims[1] {
                let (y0, y1, ty) = lerp_coords(y, ratio[1], src[1]);
                for x in 0..dims[0] {
                    let (x0, x1, tx) = lerp_coords(x, ratio[0], src[0]);

                    let c000 = self.get(x0, y0, z0).to_f32();
                    let c100 = self.get(x1, y0, z0).to_f32();
                    let c010 = self.get(x0, y1, z0).to_f32();
                    let c110 = self.get(x1, y1, z0).to_f32();
                    let c001 = self.get(x0, y0, z1).to_f32();
                    let c101 = self.get(x1, y0, z1).to_f32();
                    let c011 = self.get(x0, y1, z1).to_f32();
                    let c111 = self.get(x1, y1, z1).to_f32();

                    let c00 = c000 + (c100 - c000) * tx;
                    let c10 = c010 + (c110 - c010) * tx;
                    let c01 = c001 + (c101 - c001) * tx;
                    let c11 = c011 + (c111 - c011) * tx;
                    let c0 = c00 + (c10 - c00) * ty;
                    let c1 = c01 + (c11 - c01) * ty;

                    out.set(x, y, z, T::from_f32(c0 + (c1 - c0) * tz));
                }
            }
        }

        Ok(out)
    }

    /// Resample to `dims` taking the nearest source voxel.
    pub fn resample_nearest(&self, dims: [usize; 3]) -> RwResult<Self> {
        check_dims(dims)?;
        if dims == self.dims {
            return Ok(Self { dims, data: try_copied("resampled volume", &self.data)? });
        }
        let ratio = axis_ratios(self.dims, dims);
        let src = self.dims;
        let mut out = Self::zeros(dims)?;

        for z in 0..dims[2] {
            let sz = nearest_coord(z, ratio[2], src[2]);
            for y in 0..dims[1] {
                let sy = nearest_coord(y, ratio[1], src[1]);
                for x in 0..dims[0] {
                    let sx = nearest_coord(x, ratio[0], src[0]);
                    out.set(x, y, z, self.get(sx, sy, sz));
                }
            }
        }

        Ok(out)
    }
}

fn check_dims(dims: [usize; 3]) -> RwResult<()> {
    if dims.iter().any(|&d| d == 0) {
        return Err(RandomWalkerError::invalid_volume(format!(
            "zero-sized dimensions {}x{}x{}",
            dims[0], dims[1], dims[2]
        )));
    }
    Ok(())
}

fn axis_ratios(src: [usize; 3], dst: [usize; 3]) -> [f32; 3] {
    let mut ratio = [0.0f32; 3];
    for axis in 0..3 {
        if dst[axis] > 1 {
            ratio[axis] = (src[axis] - 1) as f32 / (dst[axis] - 1) as f32;
        }
    }
    ratio
}

#[inline]
fn lerp_coords(dst: usize, ratio: f32, src_dim: usize) -> (usize, usize, f32) {
    let pos = dst as f32 * ratio;
    let lo = (pos.floor() as usize).min(src_dim - 1);
    let hi = (lo + 1).min(src_dim - 1);
    (lo, hi, pos - lo as f32)
}

#[inline]
fn nearest_coord(dst: usize, ratio: f32, src_dim: usize) -> usize {
    ((dst as f32 * ratio).round() as usize).min(src_dim - 1)
}
