use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nalgebra::{Matrix3, Matrix3x4, Vector3};
use sapiv::core::{CalibrationSet, CameraView, Frame, PixelScale, PlanePose, RefractiveGeometry};
use sapiv::optics::refraction::{refract_point, SolverOptions};
use sapiv::refocus::{MapBuilder, RefocusConfig, Session};

const W: usize = 128;
const H: usize = 128;

fn camera(cx: f64, cy: f64) -> CameraView {
    let k = Matrix3::new(600.0, 0.0, 22.0 + cx, 0.0, 600.0, 27.0 + cy, 0.0, 0.0, 1.0);
    let ext = Matrix3x4::new(
        1.0, 0.0, 0.0, -cx, //
        0.0, 1.0, 0.0, -cy, //
        0.0, 0.0, 1.0, 550.0,
    );
    CameraView::new(format!("cam_{cx}_{cy}"), k * ext, Vector3::new(cx, cy, -550.0))
}

fn tank() -> RefractiveGeometry {
    RefractiveGeometry {
        z_wall: 0.0,
        thickness: 5.0,
        n1: 1.0,
        n2: 1.5,
        n3: 1.33,
    }
}

fn ramp_frame() -> Frame {
    Frame::from_vec(W, H, (0..W * H).map(|i| (i % 251) as f32 / 250.0).collect()).unwrap()
}

fn bench_refraction_solver(c: &mut Criterion) {
    let center = Vector3::new(300.0, 300.0, -550.0);
    let target = Vector3::new(10.0, 5.0, 50.0);
    let geom = tank();
    let opts = SolverOptions::default();

    c.bench_function("refract_single_point", |b| {
        b.iter(|| refract_point(black_box(&center), black_box(&target), &geom, &opts))
    });
}

fn bench_map_generation(c: &mut Criterion) {
    let cam = camera(300.0, 300.0);
    let builder = MapBuilder {
        scale: PixelScale::new(1.0, W, H, false),
        pose: PlanePose::at_depth(50.0),
        geometry: Some(tank()),
        solver: SolverOptions::default(),
        cylinder_radius: None,
    };

    c.bench_function("corner_homography", |b| {
        b.iter(|| builder.corner_homography(black_box(&cam)).unwrap())
    });

    let pinhole = MapBuilder {
        geometry: None,
        ..builder.clone()
    };
    c.bench_function("dense_pinhole_map", |b| {
        b.iter(|| pinhole.dense_pinhole_map(black_box(&cam)))
    });
}

fn bench_cpu_refocus(c: &mut Criterion) {
    let cams = vec![
        camera(300.0, 300.0),
        camera(300.0, -300.0),
        camera(-300.0, 300.0),
        camera(-300.0, -300.0),
    ];
    let calib = CalibrationSet::new(W, H, 1.0, cams, None).unwrap();
    let mut session = Session::new(RefocusConfig::default(), calib).unwrap();
    session
        .set_views((0..4).map(|_| vec![ramp_frame()]).collect())
        .unwrap();

    c.bench_function("cpu_refocus_corner_mean", |b| {
        b.iter(|| {
            session
                .refocus(black_box(50.0), 0.0, 0.0, 0.0, 0.0, 0)
                .unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_refraction_solver,
    bench_map_generation,
    bench_cpu_refocus
);
criterion_main!(benches);
