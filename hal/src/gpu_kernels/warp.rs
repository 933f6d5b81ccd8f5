use super::{dispatch, dispatch_size_2d};
use crate::gpu::{GpuContext, GpuFrame};
use crate::Result;
use nalgebra::Matrix3;
use std::sync::Arc;

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct WarpParams {
    width: u32,
    height: u32,
    _pad0: u32,
    _pad1: u32,
    h0: [f32; 4],
    h1: [f32; 4],
    h2: [f32; 4],
}

/// Perspective warp; `hinv` maps destination pixels back to source pixels.
pub fn warp_perspective(
    ctx: &GpuContext,
    src: &GpuFrame,
    hinv: &Matrix3<f64>,
) -> Result<GpuFrame> {
    let (w, h) = (src.width, src.height);
    let out = ctx.empty_storage_buffer(w * h, "warp output");

    let row = |r: usize| {
        [
            hinv[(r, 0)] as f32,
            hinv[(r, 1)] as f32,
            hinv[(r, 2)] as f32,
            0.0,
        ]
    };
    let params = WarpParams {
        width: w as u32,
        height: h as u32,
        _pad0: 0,
        _pad1: 0,
        h0: row(0),
        h1: row(1),
        h2: row(2),
    };
    let params_buf = ctx.uniform_buffer(bytemuck::bytes_of(&params), "warp params");

    let (wx, wy) = dispatch_size_2d(w as u32, h as u32);
    dispatch(
        ctx,
        include_str!("../../shaders/warp_perspective.wgsl"),
        "warp perspective",
        &[&src.buffer, &out, &params_buf],
        (wx, wy, 1),
    );

    Ok(GpuFrame {
        buffer: Arc::new(out),
        width: w,
        height: h,
    })
}
