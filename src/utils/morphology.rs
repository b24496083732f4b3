//! Morphology on label masks
//!
//! Box erosion implemented as a separable min filter (x, then y, then z)
//! and the double threshold used to turn a probability map into seed masks.

use rayon::prelude::*;

use crate::error::{try_copied, try_filled, RwResult};

/// Label value of a set voxel in seed masks.
pub const MASK_ON: u8 = 255;

/// Erode with a cubic `kernel_size`³ box
///
/// The window is clipped at the volume border, so border voxels take the
/// minimum over the in-bounds part of their neighbourhood.
///
/// # Arguments
/// * `mask` - Input volume (nx * ny * nz)
/// * `nx`, `ny`, `nz` - Volume dimensions
/// * `kernel_size` - Odd box edge length
///
/// # Returns
/// Eroded volume, or an allocation error for the work buffers
pub fn erode_separable(
    mask: &[u8],
    nx: usize,
    ny: usize,
    nz: usize,
    kernel_size: usize,
) -> RwResult<Vec<u8>> {
    debug_assert_eq!(mask.len(), nx * ny * nz);
    let half = kernel_size / 2;
    if half == 0 || mask.is_empty() {
        return try_copied("erosion buffer", mask);
    }
    let slice = nx * ny;

    // x-direction (mask -> tmp)
    let mut tmp = try_filled("erosion buffer", mask.len(), 0u8)?;
    tmp.par_chunks_mut(nx).enumerate().for_each(|(line, out)| {
        let src = &mask[line * nx..(line + 1) * nx];
        min_filter_line(src, out, half);
    });

    // y-direction (tmp -> result)
    let mut result = try_filled("erosion buffer", mask.len(), 0u8)?;
    result.par_chunks_mut(slice).enumerate().for_each(|(k, out)| {
        let plane = &tmp[k * slice..(k + 1) * slice];
        for j in 0..ny {
            let jmin = j.saturating_sub(half);
            let jmax = (j + half).min(ny - 1);
            for i in 0..nx {
                let mut v = plane[j * nx + i];
                for jj in jmin..=jmax {
                    v = v.min(plane[jj * nx + i]);
                }
                out[j * nx + i] = v;
            }
        }
    });

    // z-direction (result -> tmp)
    tmp.par_chunks_mut(slice).enumerate().for_each(|(k, out)| {
        let kmin = k.saturating_sub(half);
        let kmax = (k + half).min(nz - 1);
        for (idx, o) in out.iter_mut().enumerate() {
            let mut v = result[k * slice + idx];
            for kk in kmin..=kmax {
                v = v.min(result[kk * slice + idx]);
            }
            *o = v;
        }
    });

    Ok(tmp)
}

fn min_filter_line(src: &[u8], out: &mut [u8], half: usize) {
    let n = src.len();
    for (i, o) in out.iter_mut().enumerate() {
        let lo = i.saturating_sub(half);
        let hi = (i + half).min(n - 1);
        *o = src[lo..=hi].iter().copied().min().unwrap_or(src[i]);
    }
}

/// Split a 16-bit probability map into foreground and background masks.
///
/// Thresholds are fractions of `u16::MAX`. A voxel at or below the
/// background threshold is background; otherwise, at or above the
/// foreground threshold it is foreground.
pub fn threshold_seeds(
    probabilities: &[u16],
    foreground_thresh: f32,
    background_thresh: f32,
) -> RwResult<(Vec<u8>, Vec<u8>)> {
    let max = u16::MAX as f32;
    let fg_level = (foreground_thresh * max).round() as u32;
    let bg_level = (background_thresh * max).round() as u32;

    let mut foreground = try_filled("foreground seed mask", probabilities.len(), 0u8)?;
    let mut background = try_filled("background seed mask", probabilities.len(), 0u8)?;
    foreground
        .par_iter_mut()
        .zip(background.par_iter_mut())
        .zip(probabilities.par_iter())
        .for_each(|((fg, bg), &p)| {
            let p = p as u32;
            if p <= bg_level {
                *bg = MASK_ON;
            } else if p >= fg_level {
                *fg = MASK_ON;
            }
        });
    Ok((foreground, background))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idx(i: usize, j: usize, k: usize, n: usize) -> usize {
        i + j * n + k * n * n
    }

    #[test]
    fn test_erosion_shrinks_cube() {
        let n = 9;
        let mut mask = vec![0u8; n * n * n];
        for k in 2..7 {
            for j in 2..7 {
                for i in 2..7 {
                    mask[idx(i, j, k, n)] = MASK_ON;
                }
            }
        }
        let eroded = erode_separable(&mask, n, n, n, 3).unwrap();
        let on = eroded.iter().filter(|&&v| v == MASK_ON).count();
        assert_eq!(on, 27);
        assert_eq!(eroded[idx(4, 4, 4, n)], MASK_ON);
        assert_eq!(eroded[idx(2, 4, 4, n)], 0);
        assert!(eroded.iter().all(|&v| v == 0 || v == MASK_ON));
    }

    #[test]
    fn test_erosion_clips_window_at_border() {
        // a full volume stays full: out-of-bounds voxels are not counted
        let mask = vec![MASK_ON; 4 * 3 * 2];
        assert_eq!(erode_separable(&mask, 4, 3, 2, 5).unwrap(), mask);
    }

    #[test]
    fn test_large_kernel_removes_small_regions() {
        let n = 11;
        let mut mask = vec![0u8; n * n * n];
        mask[idx(5, 5, 5, n)] = MASK_ON;
        let eroded = erode_separable(&mask, n, n, n, 3).unwrap();
        assert!(eroded.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_kernel_size_one_is_identity() {
        let mask: Vec<u8> = (0..27).map(|i| (i * 7 % 256) as u8).collect();
        assert_eq!(erode_separable(&mask, 3, 3, 3, 1).unwrap(), mask);
    }

    #[test]
    fn test_threshold_seeds() {
        let probs = [0u16, 655, 656, 30000, 64880, 64881, 65535];
        let (fg, bg) = threshold_seeds(&probs, 0.99, 0.01).unwrap();
        // 0.01 * 65535 = 655.35 -> 655, 0.99 * 65535 = 64879.65 -> 64880
        assert_eq!(bg, vec![255, 255, 0, 0, 0, 0, 0]);
        assert_eq!(fg, vec![0, 0, 0, 0, 255, 255, 255]);
    }
}
