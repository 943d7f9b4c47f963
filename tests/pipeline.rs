use ndarray::Array3;
use voxel_fit::app::pipeline::fit_model;
use voxel_fit::data::{Phantom, PhantomNoise, PhantomSpec, simulate};
use voxel_fit::device::{ComputeContext, ComputeDevice, DeviceKind};
use voxel_fit::domain::{FitConfig, FitStatus, NoiseModel, NoiseStd, Sentinel, VoxelBatch};
use voxel_fit::fit::{FitOptions, fit};
use voxel_fit::io::{load_fit_info, load_volume_maps};
use voxel_fit::maps::{BIC, LOG_LIKELIHOOD, RETURN_CODES, create_roi};
use voxel_fit::models::{ForwardModel, Tensor};
use voxel_fit::report::roi_stats;

fn cpu(device_id: usize, compute_units: usize) -> ComputeDevice {
    ComputeDevice {
        platform_id: 0,
        device_id,
        name: format!("cpu{device_id}"),
        kind: DeviceKind::Cpu,
        compute_units,
        global_memory_bytes: 0,
    }
}

fn ctx(lanes: &[usize]) -> ComputeContext {
    ComputeContext::new(lanes.iter().enumerate().map(|(i, &n)| cpu(i, n)).collect()).unwrap()
}

fn phantom(shape: [usize; 3]) -> Phantom {
    let spec = PhantomSpec {
        shape,
        snr: 50.0,
        seed: 7,
        noise: PhantomNoise::Gaussian,
    };
    simulate(&Tensor, &spec).unwrap()
}

fn batch(phantom: &Phantom, mask: &Array3<bool>) -> VoxelBatch {
    VoxelBatch::from_arrays(&phantom.signal.clone().into_dyn(), phantom.protocol.clone(), Some(mask)).unwrap()
}

fn config(sigma: f64) -> FitConfig {
    FitConfig {
        noise_model: Some(NoiseModel::Gaussian),
        noise_std: NoiseStd::Fixed(sigma),
        ..FitConfig::default()
    }
}

fn median(mut values: Vec<f64>) -> f64 {
    values.sort_by(f64::total_cmp);
    values[values.len() / 2]
}

#[test]
fn tensor_phantom_fit_recovers_signal_scale_and_diffusivity() {
    let phantom = phantom([6, 6, 3]);
    let batch = batch(&phantom, &phantom.mask);
    let out = tempfile::tempdir().unwrap();

    let run = fit_model("Tensor", &batch, out.path(), &ctx(&[2]), &config(phantom.sigma)).unwrap();
    assert_eq!(run.results.len(), phantom.truth.len());
    assert!(run.info.status.not_converged() * 4 <= run.info.status.total());

    let s0_error = median(
        run.results
            .iter()
            .zip(&phantom.truth)
            .map(|(r, t)| (r.params[0] - t[0]).abs() / t[0])
            .collect(),
    );
    assert!(s0_error < 0.05, "median S0 error {s0_error}");

    let trace_error = median(
        run.results
            .iter()
            .zip(&phantom.truth)
            .map(|(r, t)| {
                let fitted: f64 = r.params[1..4].iter().sum();
                let truth: f64 = t[1..4].iter().sum();
                (fitted - truth).abs() / truth
            })
            .collect(),
    );
    assert!(trace_error < 0.15, "median trace error {trace_error}");

    let ll = create_roi(run.maps.get(LOG_LIKELIHOOD).unwrap(), &phantom.mask).unwrap();
    assert_eq!(ll.len(), phantom.truth.len());
    let stats = roi_stats(&ll).unwrap();
    assert_eq!(stats.count, ll.len());
    assert!(stats.mean < 0.0);
    assert!(stats.std.is_finite());

    // Outside the mask every map holds the sentinel.
    let outside = phantom.mask.mapv(|m| !m);
    for (_, map) in run.maps.iter() {
        assert!(create_roi(map, &outside).unwrap().iter().all(|v| *v == 0.0));
    }
}

#[test]
fn empty_mask_yields_sentinel_maps_without_error() {
    let phantom = phantom([4, 4, 2]);
    let empty = Array3::from_elem((4, 4, 2), false);
    let batch = batch(&phantom, &empty);
    assert!(batch.is_empty());

    let out = tempfile::tempdir().unwrap();
    let config = FitConfig {
        sentinel: Sentinel::Nan,
        ..config(phantom.sigma)
    };
    let run = fit_model("Tensor", &batch, out.path(), &ctx(&[2]), &config).unwrap();
    assert!(run.results.is_empty());
    assert_eq!(run.info.status.total(), 0);
    assert!(!run.maps.is_empty());
    for (_, map) in run.maps.iter() {
        assert_eq!(map.dim(), (4, 4, 2));
        assert!(map.iter().all(|v| v.is_nan()));
    }
}

#[test]
fn bad_voxel_does_not_disturb_its_neighbours() {
    let phantom = phantom([4, 4, 2]);
    let clean = batch(&phantom, &phantom.mask);

    let [x, y, z] = clean.spatial_index()[3];
    let mut signal = phantom.signal.clone();
    signal[[x, y, z, 5]] = f64::NAN;
    let dirty = VoxelBatch::from_arrays(&signal.into_dyn(), phantom.protocol.clone(), Some(&phantom.mask)).unwrap();

    let config = config(phantom.sigma);
    let options = FitOptions::resolve(&config, &Tensor, &clean);
    let ctx = ctx(&[2]);
    let expected = fit(&clean, &Tensor, &ctx, &options).unwrap();
    let actual = fit(&dirty, &Tensor, &ctx, &options).unwrap();

    assert_eq!(actual[3].status, FitStatus::Degenerate);
    assert_eq!(actual[3].params, Tensor.defaults());
    for i in (0..expected.len()).filter(|&i| i != 3) {
        assert_eq!(actual[i], expected[i], "voxel {i}");
    }
}

#[test]
fn zeroed_voxel_fits_like_an_unmasked_one() {
    let phantom = phantom([4, 4, 2]);
    let full = batch(&phantom, &phantom.mask);
    let [x, y, z] = full.spatial_index()[3];

    let mut zeroed = phantom.signal.clone();
    zeroed.slice_mut(ndarray::s![x, y, z, ..]).fill(0.0);
    let dirty = VoxelBatch::from_arrays(&zeroed.into_dyn(), phantom.protocol.clone(), Some(&phantom.mask)).unwrap();

    let mut reduced_mask = phantom.mask.clone();
    reduced_mask[[x, y, z]] = false;
    let reduced = batch(&phantom, &reduced_mask);

    let config = FitConfig::default();
    let out_dirty = tempfile::tempdir().unwrap();
    let out_reduced = tempfile::tempdir().unwrap();
    let run_dirty = fit_model("Tensor", &dirty, out_dirty.path(), &ctx(&[2]), &config).unwrap();
    let run_reduced = fit_model("Tensor", &reduced, out_reduced.path(), &ctx(&[2]), &config).unwrap();

    assert_eq!(run_dirty.info.noise_std, run_reduced.info.noise_std);
    assert_eq!(run_dirty.results[3].status, FitStatus::Degenerate);
    let others: Vec<_> = run_dirty
        .results
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != 3)
        .map(|(_, r)| r.clone())
        .collect();
    assert_eq!(others, run_reduced.results);
}

#[test]
fn nan_sample_keeps_roi_statistics_and_criteria_finite() {
    let phantom = phantom([4, 4, 2]);
    let clean = batch(&phantom, &phantom.mask);
    let [x, y, z] = clean.spatial_index()[3];
    let mut signal = phantom.signal.clone();
    signal[[x, y, z, 5]] = f64::NAN;
    let dirty = VoxelBatch::from_arrays(&signal.into_dyn(), phantom.protocol.clone(), Some(&phantom.mask)).unwrap();

    let out = tempfile::tempdir().unwrap();
    let run = fit_model("Tensor", &dirty, out.path(), &ctx(&[2]), &FitConfig::default()).unwrap();
    assert_eq!(run.results[3].status, FitStatus::Degenerate);
    assert!(run.maps.get(BIC).unwrap()[[x, y, z]].is_finite());

    let ll = create_roi(run.maps.get(LOG_LIKELIHOOD).unwrap(), &phantom.mask).unwrap();
    let stats = roi_stats(&ll).unwrap();
    assert_eq!(stats.count, ll.len());
    assert!(stats.mean.is_finite() && stats.std.is_finite());
    assert!(stats.min > -1e6, "min {}", stats.min);
}

#[test]
fn results_do_not_depend_on_device_layout() {
    let phantom = phantom([4, 4, 2]);
    let batch = batch(&phantom, &phantom.mask);
    let config = config(phantom.sigma);
    let options = FitOptions::resolve(&config, &Tensor, &batch);

    let single = fit(&batch, &Tensor, &ctx(&[1]), &options).unwrap();
    let split = fit(&batch, &Tensor, &ctx(&[2, 3]), &options).unwrap();
    let again = fit(&batch, &Tensor, &ctx(&[1]), &options).unwrap();
    assert_eq!(single, split);
    assert_eq!(single, again);
}

#[test]
fn content_outside_the_mask_is_ignored() {
    let phantom = phantom([4, 4, 2]);
    let mut noisy = phantom.signal.clone();
    for ((x, y, z, _), v) in noisy.indexed_iter_mut() {
        if !phantom.mask[[x, y, z]] {
            *v = if (x + y + z) % 2 == 0 { f64::NAN } else { 1e6 };
        }
    }
    let a = batch(&phantom, &phantom.mask);
    let b = VoxelBatch::from_arrays(&noisy.into_dyn(), phantom.protocol.clone(), Some(&phantom.mask)).unwrap();
    assert_eq!(a, b);

    let config = config(phantom.sigma);
    let out_a = tempfile::tempdir().unwrap();
    let out_b = tempfile::tempdir().unwrap();
    let run_a = fit_model("Tensor", &a, out_a.path(), &ctx(&[2]), &config).unwrap();
    let run_b = fit_model("Tensor", &b, out_b.path(), &ctx(&[1, 1]), &config).unwrap();
    assert_eq!(run_a.maps, run_b.maps);
}

#[test]
fn persisted_maps_and_info_read_back() {
    let phantom = phantom([4, 4, 2]);
    let batch = batch(&phantom, &phantom.mask);
    let out = tempfile::tempdir().unwrap();

    let run = fit_model("Tensor", &batch, out.path(), &ctx(&[2]), &config(phantom.sigma)).unwrap();
    assert_eq!(run.dir, out.path().join("Tensor"));

    let maps = load_volume_maps(&run.dir).unwrap();
    assert_eq!(maps, run.maps);
    assert!(maps.get(RETURN_CODES).is_some());
    assert!(maps.get("Tensor.FA").is_some());

    let info = load_fit_info(&run.dir).unwrap();
    assert_eq!(info.model, "Tensor");
    assert_eq!(info.voxels, batch.len());
    assert_eq!(info.measurements, 63);
    assert_eq!(info.status, run.info.status);
    assert_eq!(info.maps, run.info.maps);

    // A second fit into the same output replaces the directory.
    let again = fit_model("Tensor", &batch, out.path(), &ctx(&[2]), &config(phantom.sigma)).unwrap();
    assert_eq!(load_volume_maps(&again.dir).unwrap(), run.maps);
}
