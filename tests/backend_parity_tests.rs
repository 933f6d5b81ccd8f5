//! CPU/accelerator numerical-contract tests. Every test skips cleanly on
//! machines without a compute adapter.

use nalgebra::{Matrix3, Matrix3x4, Vector3};
use rand::{Rng, SeedableRng};
use sapiv::core::{CalibrationSet, CameraView, Frame, RefractiveGeometry, SampleMap};
use sapiv::hal::{ComputeContext, CpuBackend, GpuContext};
use sapiv::refocus::{Composition, RefocusConfig, Session, ThresholdMode};

const W: usize = 64;
const H: usize = 64;

fn random_frame(seed: u64) -> Frame {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    Frame::from_vec(W, H, (0..W * H).map(|_| rng.gen_range(0.0..1.0)).collect()).unwrap()
}

fn max_abs_diff(a: &Frame, b: &Frame) -> f32 {
    a.as_slice()
        .iter()
        .zip(b.as_slice())
        .map(|(&x, &y)| (x - y).abs())
        .fold(0.0, f32::max)
}

fn rig() -> Vec<CameraView> {
    let signs = [(1.0, 1.0), (1.0, -1.0), (-1.0, 1.0), (-1.0, -1.0)];
    signs
        .iter()
        .enumerate()
        .map(|(i, &(sx, sy))| {
            let c = Vector3::new(sx * 300.0, sy * 300.0, -550.0);
            let k = Matrix3::new(600.0, 0.0, 22.0 + c.x, 0.0, 600.0, 27.0 + c.y, 0.0, 0.0, 1.0);
            let ext = Matrix3x4::new(
                1.0, 0.0, 0.0, -c.x, //
                0.0, 1.0, 0.0, -c.y, //
                0.0, 0.0, 1.0, -c.z,
            );
            CameraView::new(format!("cam{i}"), k * ext, c)
        })
        .collect()
}

fn calibration(geometry: Option<RefractiveGeometry>) -> CalibrationSet {
    CalibrationSet::new(W, H, 1.0, rig(), geometry).unwrap()
}

fn run_both(
    config: RefocusConfig,
    geometry: Option<RefractiveGeometry>,
    thresh: f64,
) -> Option<(Frame, Frame)> {
    GpuContext::global()?;

    let views: Vec<Vec<Frame>> = (0..4).map(|i| vec![random_frame(100 + i)]).collect();

    let mut run = |accelerated: bool| {
        let cfg = RefocusConfig {
            use_accelerator: accelerated,
            ..config.clone()
        };
        let mut s = Session::new(cfg, calibration(geometry)).unwrap();
        s.set_views(views.clone()).unwrap();
        s.refocus(50.0, 0.0, 0.0, 0.0, thresh, 0).unwrap()
    };

    Some((run(false), run(true)))
}

#[test]
fn warp_parity() {
    let Some(gpu) = GpuContext::global() else {
        return;
    };
    let cpu = CpuBackend::new();
    let src = random_frame(1);
    let h = Matrix3::new(1.01, 0.02, -3.0, -0.015, 0.99, 2.0, 1e-5, -2e-5, 1.0);

    let cpu_out = cpu.warp_perspective(&src, &h).unwrap();
    let dev = gpu.upload(&src).unwrap();
    let gpu_out = gpu.download(&gpu.warp_perspective(&dev, &h).unwrap()).unwrap();

    let diff = max_abs_diff(&cpu_out, &gpu_out);
    assert!(diff <= 1.0 / 255.0, "warp parity off by {diff}");
}

#[test]
fn remap_parity() {
    let Some(gpu) = GpuContext::global() else {
        return;
    };
    let cpu = CpuBackend::new();
    let src = random_frame(2);

    let mut rng = rand::rngs::StdRng::seed_from_u64(3);
    let mut map = SampleMap::zeros(W, H);
    for i in 0..W * H {
        map.x[i] = rng.gen_range(-4.0..(W as f32 + 4.0));
        map.y[i] = rng.gen_range(-4.0..(H as f32 + 4.0));
    }

    let cpu_out = cpu.remap(&src, &map).unwrap();
    let dev = gpu.upload(&src).unwrap();
    let gpu_out = gpu.download(&gpu.remap(&dev, &map).unwrap()).unwrap();

    let diff = max_abs_diff(&cpu_out, &gpu_out);
    assert!(diff <= 1.0 / 255.0, "remap parity off by {diff}");
}

#[test]
fn mean_reconstruction_parity() {
    let config = RefocusConfig {
        benchmark_mode: true,
        ..Default::default()
    };
    let Some((cpu, gpu)) = run_both(config, None, 0.0) else {
        return;
    };
    let diff = max_abs_diff(&cpu, &gpu);
    assert!(diff <= 1.0 / 255.0, "mean parity off by {diff}");
}

#[test]
fn thresholded_reconstruction_parity() {
    let config = RefocusConfig {
        threshold_mode: ThresholdMode::Absolute,
        ..Default::default()
    };
    let Some((cpu, gpu)) = run_both(config, None, 0.3) else {
        return;
    };
    let diff = max_abs_diff(&cpu, &gpu);
    assert!(diff <= 2.0 / 255.0, "thresholded parity off by {diff}");
}

#[test]
fn composition_parity() {
    for composition in [
        Composition::Mult { exponent: 1.2 },
        Composition::MinLos,
        Composition::NlcaFast { delta: 0.1 },
        Composition::Nlca {
            window: 8,
            delta: 0.1,
        },
    ] {
        let config = RefocusConfig {
            composition,
            benchmark_mode: true,
            ..Default::default()
        };
        let Some((cpu, gpu)) = run_both(config, None, 0.0) else {
            return;
        };
        let diff = max_abs_diff(&cpu, &gpu);
        assert!(
            diff <= 2.0 / 255.0,
            "{composition:?} parity off by {diff}"
        );
    }
}

#[test]
fn refractive_full_map_parity() {
    let geom = RefractiveGeometry {
        z_wall: 0.0,
        thickness: 5.0,
        n1: 1.0,
        n2: 1.5,
        n3: 1.33,
    };
    let config = RefocusConfig {
        corner_homography: false,
        benchmark_mode: true,
        ..Default::default()
    };
    // The device solver iterates in f32; allow one extra quantization step.
    let Some((cpu, gpu)) = run_both(config, Some(geom), 0.0) else {
        return;
    };
    let diff = max_abs_diff(&cpu, &gpu);
    assert!(diff <= 2.0 / 255.0, "refractive parity off by {diff}");
}

#[test]
fn stats_parity() {
    let Some(gpu) = GpuContext::global() else {
        return;
    };
    let cpu = CpuBackend::new();
    let frame = random_frame(9);

    let (mc, sc) = cpu.mean_stdev(&frame).unwrap();
    let dev = gpu.upload(&frame).unwrap();
    let (mg, sg) = gpu.mean_stdev(&dev).unwrap();

    assert!((mc - mg).abs() < 1e-4, "mean differs: {mc} vs {mg}");
    assert!((sc - sg).abs() < 1e-4, "stdev differs: {sc} vs {sg}");
}
