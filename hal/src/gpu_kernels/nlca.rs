use super::{dispatch, dispatch_size_1d, dispatch_size_2d};
use crate::gpu::{GpuContext, GpuFrame};
use crate::Result;
use std::sync::Arc;

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct NlcaParams {
    width: u32,
    height: u32,
    window: u32,
    _pad: u32,
    delta: f32,
    _pad1: f32,
    _pad2: f32,
    _pad3: f32,
}

/// Windowed non-linear contrast adjustment over exactly four views.
pub fn nlca(ctx: &GpuContext, views: &[GpuFrame], window: u32, delta: f32) -> Result<GpuFrame> {
    let (w, h) = (views[0].width, views[0].height);
    let out = ctx.empty_storage_buffer(w * h, "nlca output");

    let params = NlcaParams {
        width: w as u32,
        height: h as u32,
        window,
        _pad: 0,
        delta,
        _pad1: 0.0,
        _pad2: 0.0,
        _pad3: 0.0,
    };
    let params_buf = ctx.uniform_buffer(bytemuck::bytes_of(&params), "nlca params");

    let (wx, wy) = dispatch_size_2d(w as u32, h as u32);
    dispatch(
        ctx,
        include_str!("../../shaders/nlca.wgsl"),
        "nlca",
        &[
            &views[0].buffer,
            &views[1].buffer,
            &views[2].buffer,
            &views[3].buffer,
            &out,
            &params_buf,
        ],
        (wx, wy, 1),
    );

    Ok(GpuFrame {
        buffer: Arc::new(out),
        width: w,
        height: h,
    })
}

/// Single-pixel NLCA for peak-normalized inputs.
pub fn nlca_fast(ctx: &GpuContext, views: &[GpuFrame], delta: f32) -> Result<GpuFrame> {
    let (w, h) = (views[0].width, views[0].height);
    let len = (w * h) as u32;
    let out = ctx.empty_storage_buffer(w * h, "nlca fast output");

    let params = NlcaParams {
        width: w as u32,
        height: h as u32,
        window: 1,
        _pad: 0,
        delta,
        _pad1: 0.0,
        _pad2: 0.0,
        _pad3: 0.0,
    };
    let params_buf = ctx.uniform_buffer(bytemuck::bytes_of(&params), "nlca fast params");

    dispatch(
        ctx,
        include_str!("../../shaders/nlca_fast.wgsl"),
        "nlca fast",
        &[
            &views[0].buffer,
            &views[1].buffer,
            &views[2].buffer,
            &views[3].buffer,
            &out,
            &params_buf,
        ],
        (dispatch_size_1d(len), 1, 1),
    );

    Ok(GpuFrame {
        buffer: Arc::new(out),
        width: w,
        height: h,
    })
}
