use super::{dispatch, dispatch_size_2d};
use crate::context::RefractiveMapSpec;
use crate::gpu::{GpuContext, GpuFrame};
use crate::Result;
use std::sync::Arc;

/// The shader has no f64; tolerances below f32 resolution are clamped.
const MIN_GPU_TOL: f64 = 1e-6;

/// Flat parameter block consumed by `refract_map.wgsl`; index layout is
/// mirrored at the top of the shader.
fn pack_params(spec: &RefractiveMapSpec) -> Vec<f32> {
    let mut p = Vec::with_capacity(45);
    p.push(spec.width as f32);
    p.push(spec.height as f32);
    for r in 0..3 {
        for c in 0..3 {
            p.push(spec.pixel_to_plane[(r, c)] as f32);
        }
    }
    for r in 0..3 {
        for c in 0..3 {
            p.push(spec.rotation[(r, c)] as f32);
        }
    }
    p.push(spec.shift.x as f32);
    p.push(spec.shift.y as f32);
    p.push(spec.shift.z as f32);
    for r in 0..3 {
        for c in 0..4 {
            p.push(spec.p[(r, c)] as f32);
        }
    }
    p.push(spec.center.x as f32);
    p.push(spec.center.y as f32);
    p.push(spec.center.z as f32);
    p.push(spec.geometry.z_wall as f32);
    p.push(spec.geometry.thickness as f32);
    p.push(spec.geometry.n1 as f32);
    p.push(spec.geometry.n2 as f32);
    p.push(spec.geometry.n3 as f32);
    p.push(spec.tol.max(MIN_GPU_TOL) as f32);
    p.push(spec.max_iters as f32);
    p
}

/// Build the dense refractive map and apply it, entirely on the device.
pub fn refract_remap(
    ctx: &GpuContext,
    src: &GpuFrame,
    spec: &RefractiveMapSpec,
) -> Result<GpuFrame> {
    let (w, h) = (spec.width, spec.height);
    let out = ctx.empty_storage_buffer(w * h, "refract output");
    let params = ctx.storage_buffer_from(&pack_params(spec), "refract params");

    let (wx, wy) = dispatch_size_2d(w as u32, h as u32);
    dispatch(
        ctx,
        include_str!("../../shaders/refract_map.wgsl"),
        "refractive remap",
        &[&src.buffer, &out, &params],
        (wx, wy, 1),
    );

    Ok(GpuFrame {
        buffer: Arc::new(out),
        width: w,
        height: h,
    })
}
