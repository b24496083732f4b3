//! End-to-end Random Walker tests on synthetic volumes

mod common;

use approx::assert_abs_diff_eq;
use common::*;
use rw_segment::analysis::{analyze_uncertainty, UncertaintyParams};
use rw_segment::index::to_index;
use rw_segment::solvers::{CpuBlas, ParallelBlas};
use rw_segment::{
    ClipRegion, RandomWalker, RandomWalkerError, RandomWalkerParams, RandomWalkerSolver, SeedClassifier,
    SeedInput, SeedLabel, SeedPaths, SystemState, TransferFunction1D, VoxelGrid,
};

#[test]
fn test_uniform_cube_diffuses_evenly() {
    let volume = uniform_volume(4, 0.5);
    let seeds = classify_points([4, 4, 4], &[[0.0, 0.0, 0.0]], &[[3.0, 3.0, 3.0]]);
    let params = RandomWalkerParams { beta: 1.0, ..tight_params() };
    let solver = solve_single_level(&volume, seeds, &params);

    let dims = [4, 4, 4];
    let mid = solver.get_probability(to_index(2, 1, 1, dims)).unwrap();
    assert_abs_diff_eq!(mid, 0.5, epsilon = 0.15);
    let mid = solver.get_probability(to_index(1, 2, 2, dims)).unwrap();
    assert_abs_diff_eq!(mid, 0.5, epsilon = 0.15);

    // point reflection swaps the seeds, so mirrored voxels sum to one
    for z in 0..4 {
        for y in 0..4 {
            for x in 0..4 {
                let p = solver.get_probability(to_index(x, y, z, dims)).unwrap();
                let q = solver.get_probability(to_index(3 - x, 3 - y, 3 - z, dims)).unwrap();
                assert_abs_diff_eq!(p + q, 1.0, epsilon = 1e-3);
            }
        }
    }

    // probabilities decrease away from the foreground seed along the diagonal
    let diag: Vec<f32> = (0..4)
        .map(|i| solver.get_probability(to_index(i, i, i, dims)).unwrap())
        .collect();
    assert!(diag.windows(2).all(|w| w[0] > w[1]));
}

#[test]
fn test_intensity_edge_stops_diffusion() {
    let dims = [8, 4, 4];
    let volume = split_volume(dims, 4, 0.1, 0.9);
    let seeds = classify_points(dims, &[[0.0, 2.0, 2.0]], &[[7.0, 2.0, 2.0]]);
    let params = RandomWalkerParams {
        beta: 1e5,
        min_edge_weight: 1e-8,
        ..tight_params()
    };
    let solver = solve_single_level(&volume, seeds, &params);

    for z in 0..4 {
        for y in 0..4 {
            for x in 0..8 {
                let p = solver.get_probability(to_index(x, y, z, dims)).unwrap();
                if x < 4 {
                    assert!(p > 0.9, "voxel ({x},{y},{z}) = {p}");
                } else {
                    assert!(p < 0.1, "voxel ({x},{y},{z}) = {p}");
                }
            }
        }
    }

    let seg = solver.generate_binary_segmentation::<u8>(0.5).unwrap();
    let reference = split_volume(dims, 4, 1.0, 0.0);
    let reference: Vec<u8> = reference.data().iter().map(|&v| (v * 255.0) as u8).collect();
    let result = TestResult::new("edge stop", seg.data(), &reference);
    result.print();
    assert_eq!(result.dice, 1.0);
}

#[test]
fn test_disabled_lod_matches_level_zero_only() {
    let volume = split_volume([6, 5, 4], 3, 0.3, 0.6);
    let seeds = point_seeds(&[[1.0, 2.0, 2.0]], &[[5.0, 2.0, 1.0]]);

    let plain = RandomWalkerParams::default();
    let mut lod = RandomWalkerParams::default();
    lod.lod.enabled = true;
    lod.lod.min_level = 0;
    lod.lod.max_level = 0;

    let a = RandomWalker::new(volume.clone(), plain).unwrap().compute(&seeds).unwrap();
    let b = RandomWalker::new(volume, lod).unwrap().compute(&seeds).unwrap();
    assert_eq!(a.records().len(), 1);
    assert_eq!(b.records().len(), 1);

    let sa = a.solver().system().unwrap();
    let sb = b.solver().system().unwrap();
    assert_eq!(sa.size(), sb.size());
    assert_eq!(sa.rhs, sb.rhs);
    for row in 0..sa.size() {
        let ra: Vec<(usize, f32)> = sa.matrix.row_entries(row).collect();
        let rb: Vec<(usize, f32)> = sb.matrix.row_entries(row).collect();
        assert_eq!(ra, rb);
    }
}

#[test]
fn test_no_seed_points_fails_setup() {
    let volume = uniform_volume(4, 0.5);
    let empty = SeedPaths::new();
    let seeds = SeedClassifier::new().with_paths(&empty, &empty).classify([4, 4, 4]).unwrap();
    assert_eq!(seeds.num_seeds(), 0);

    let params = RandomWalkerParams::default();
    let mut solver = RandomWalkerSolver::new(seeds, intensity_model(&params));
    let err = solver.setup_equation_system(&volume).unwrap_err();
    assert_eq!(err, RandomWalkerError::NoSeeds);
    assert_eq!(err.to_string(), "no seed points");
    assert_eq!(solver.state(), SystemState::Failure);

    let mut rw = RandomWalker::new(volume, params).unwrap();
    assert_eq!(rw.compute(&SeedInput::default()).unwrap_err(), RandomWalkerError::NoSeeds);
}

#[test]
fn test_threshold_monotonicity() {
    let dims = [10, 6, 6];
    let volume = VoxelGrid::from_fn(dims, |x, y, z| (x as f32 * 0.07 + (y + z) as f32 * 0.01).min(1.0)).unwrap();
    let seeds = classify_points(dims, &[[0.0, 3.0, 3.0]], &[[9.0, 3.0, 3.0]]);
    let solver = solve_single_level(&volume, seeds, &RandomWalkerParams { beta: 50.0, ..tight_params() });

    let thresholds = [0.9, 0.7, 0.5, 0.3, 0.1];
    let masks: Vec<VoxelGrid<u8>> = thresholds
        .iter()
        .map(|&t| solver.generate_binary_segmentation::<u8>(t).unwrap())
        .collect();
    for pair in masks.windows(2) {
        let (strict, loose) = (&pair[0], &pair[1]);
        for (a, b) in strict.data().iter().zip(loose.data()) {
            assert!(*a == 0 || *b == 255);
        }
        assert!(count_set(strict.data()) <= count_set(loose.data()));
    }
}

#[test]
fn test_seed_values_survive_unconverged_solve() {
    let dims = [6, 6, 6];
    let volume = VoxelGrid::from_fn(dims, |x, y, z| ((x * 3 + y * 5 + z * 7) % 11) as f32 / 11.0).unwrap();
    let fg = SeedPaths::from_segments(vec![vec![[0.0, 0.0, 0.0], [0.0, 5.0, 5.0]]]);
    let bg = SeedPaths::from_segments(vec![vec![[5.0, 0.0, 5.0], [5.0, 5.0, 0.0]]]);
    let seeds = SeedClassifier::new().with_paths(&fg, &bg).classify(dims).unwrap();

    let params = RandomWalkerParams::default();
    let mut solver = RandomWalkerSolver::new(seeds, intensity_model(&params));
    solver.setup_equation_system(&volume).unwrap();
    let iterations = solver.solve(&CpuBlas, params.preconditioner, 1e-9, 1).unwrap();
    assert_eq!(iterations, 1);

    for voxel in 0..solver.num_voxels() {
        if let Some(value) = solver.seed_value(voxel) {
            assert!(solver.is_seed_point(voxel));
            assert_eq!(solver.get_probability(voxel).unwrap(), value);
        }
    }
}

#[test]
fn test_seed_range_degenerates() {
    let dims = [3, 3, 3];
    let fg_only = classify_points(dims, &[[1.0, 1.0, 1.0]], &[]);
    assert_eq!(fg_only.seed_range(), (1.0, 1.0));
    let bg_only = classify_points(dims, &[], &[[1.0, 1.0, 1.0]]);
    assert_eq!(bg_only.seed_range(), (0.0, 0.0));
    let both = classify_points(dims, &[[0.0, 0.0, 0.0]], &[[2.0, 2.0, 2.0]]);
    assert_eq!(both.seed_range(), (0.0, 1.0));

    let volume = uniform_volume(3, 0.2);
    let solver = solve_single_level(&volume, bg_only, &tight_params());
    for voxel in 0..solver.num_voxels() {
        assert_abs_diff_eq!(solver.get_probability(voxel).unwrap(), 0.0, epsilon = 1e-6);
    }
    assert!(matches!(
        solver.generate_binary_segmentation::<u8>(0.5),
        Err(RandomWalkerError::DegenerateSeedRange { .. })
    ));
}

#[test]
fn test_clip_region_seeds_background() {
    let params = RandomWalkerParams {
        clip: Some(ClipRegion::new([2, 2, 2], [5, 5, 5])),
        ..tight_params()
    };
    let mut rw = RandomWalker::new(uniform_volume(8, 0.4), params).unwrap();
    let seg = rw.compute(&point_seeds(&[[3.0, 3.0, 3.0]], &[])).unwrap();

    let record = &seg.records()[0];
    assert_eq!(record.num_background_seeds, 8 * 8 * 8 - 4 * 4 * 4);
    assert_eq!(record.num_foreground_seeds, 1);

    let mask = seg.segmentation::<u8>().unwrap();
    assert_eq!(mask.get(0, 0, 0), 0);
    assert_eq!(mask.get(7, 3, 3), 0);
    assert_eq!(mask.get(3, 3, 3), 255);
}

#[test]
fn test_label_volume_seeds_at_other_resolution() {
    let volume = split_volume([8, 8, 8], 4, 0.2, 0.7);
    // 4x4x4 masks, each voxel covering 2x2x2 working voxels
    let fg = VoxelGrid::from_fn([4, 4, 4], |x, y, z| if x == 0 && y == 1 && z == 1 { 255u8 } else { 0 }).unwrap();
    let bg = VoxelGrid::from_fn([4, 4, 4], |x, y, z| if x == 3 && y == 2 && z == 2 { 255u8 } else { 0 }).unwrap();
    let seeds = SeedInput::default().with_volumes(Some(fg), Some(bg));

    let mut rw = RandomWalker::new(volume, tight_params()).unwrap();
    let seg = rw.compute(&seeds).unwrap();
    let record = &seg.records()[0];
    assert_eq!(record.num_foreground_seeds, 8);
    assert_eq!(record.num_background_seeds, 8);

    let probs = seg.probability_volume::<f32>().unwrap();
    assert!(probs.get(1, 6, 6) > 0.5);
    assert!(probs.get(6, 1, 1) < 0.5);
}

#[test]
fn test_blas_backends_agree() {
    let dims = [12, 10, 8];
    let volume = VoxelGrid::from_fn(dims, |x, y, _| if x + y < 10 { 0.25 } else { 0.65 }).unwrap();
    let params = RandomWalkerParams { beta: 200.0, ..tight_params() };

    let solve_with = |parallel: bool| {
        let seeds = classify_points(dims, &[[1.0, 1.0, 4.0]], &[[10.0, 8.0, 4.0]]);
        let mut solver = RandomWalkerSolver::new(seeds, intensity_model(&params));
        solver.setup_equation_system(&volume).unwrap();
        if parallel {
            solver.solve(&ParallelBlas, params.preconditioner, 1e-6, 5000).unwrap();
        } else {
            solver.solve(&CpuBlas, params.preconditioner, 1e-6, 5000).unwrap();
        }
        solver.probabilities().unwrap()
    };

    let seq = solve_with(false);
    let par = solve_with(true);
    for (a, b) in seq.iter().zip(&par) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-3);
    }
}

#[test]
fn test_classification_weights_follow_transfer_function() {
    // two regions with identical intensity statistics but a transfer
    // function step between them
    let dims = [10, 4, 4];
    let volume = VoxelGrid::from_fn(dims, |x, _, _| 0.45 + x as f32 * 0.01).unwrap();
    let mut params = RandomWalkerParams { beta: 2000.0, ..tight_params() };
    params.edge_weights.use_classification = true;
    params.edge_weights.blend_factor = 1.0;
    params.edge_weights.transfer_function = Some(TransferFunction1D::ramp(0.494, 0.496));

    let seeds = classify_points(dims, &[[0.0, 2.0, 2.0]], &[[9.0, 2.0, 2.0]]);
    let solver = solve_single_level(&volume, seeds, &params);
    let p = |x| solver.get_probability(to_index(x, 2, 2, dims)).unwrap();
    // the opacity jump sits between x = 4 and x = 5
    assert!(p(4) - p(5) > 0.5);
}

#[test]
fn test_uncertainty_regions_of_ambiguous_result() {
    // seeds on both sides of a uniform slab leave a wide uncertain band
    let mut rw = RandomWalker::new(uniform_volume(10, 0.5), RandomWalkerParams { beta: 1.0, ..tight_params() }).unwrap();
    let fg: Vec<[f32; 3]> = (0..10).flat_map(|y| (0..10).map(move |z| [0.0, y as f32, z as f32])).collect();
    let bg: Vec<[f32; 3]> = (0..10).flat_map(|y| (0..10).map(move |z| [9.0, y as f32, z as f32])).collect();
    let seg = rw.compute(&point_seeds(&fg, &bg)).unwrap();
    let probs = seg.probability_volume::<u8>().unwrap();

    let result = analyze_uncertainty(&probs, &UncertaintyParams::default()).unwrap();
    assert_eq!(result.regions.len(), 1);
    let region = &result.regions[0];
    // x in [2, 7] lies within [0.2, 0.8]; the volume border is never eroded
    assert!(region.llf[0] >= 1 && region.urb[0] <= 8);
    assert_abs_diff_eq!(region.center_of_mass[0], 4.5, epsilon = 0.5);
}

#[test]
fn test_edge_weight_volume_marks_seeds() {
    let dims = [5, 5, 5];
    let volume = split_volume(dims, 2, 0.0, 1.0);
    let seeds = classify_points(dims, &[[0.0, 0.0, 0.0]], &[[4.0, 4.0, 4.0]]);
    let params = RandomWalkerParams::default();
    let mut solver = RandomWalkerSolver::new(seeds, intensity_model(&params));
    solver.setup_equation_system(&volume).unwrap();

    let ew = solver.edge_weight_volume().unwrap();
    assert_eq!(ew.get(0, 0, 0), 255);
    assert_eq!(ew.get(4, 4, 4), 0);
    // voxels next to the intensity edge are weakly coupled and show up bright
    assert!(ew.get(2, 2, 2) > ew.get(3, 2, 2));
    assert_eq!(solver.seeds().label(to_index(0, 0, 0, dims)), SeedLabel::Foreground);
}
