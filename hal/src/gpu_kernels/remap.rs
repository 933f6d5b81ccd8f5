use super::{dispatch, dispatch_size_2d};
use crate::gpu::{GpuContext, GpuFrame};
use crate::Result;
use sapiv_core::SampleMap;
use std::sync::Arc;

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct RemapParams {
    width: u32,
    height: u32,
    _pad0: u32,
    _pad1: u32,
}

/// Bilinear resample through a host-built dense sample map.
pub fn remap(ctx: &GpuContext, src: &GpuFrame, map: &SampleMap) -> Result<GpuFrame> {
    let (w, h) = (src.width, src.height);
    let out = ctx.empty_storage_buffer(w * h, "remap output");
    let xmap = ctx.storage_buffer_from(&map.x, "remap xmap");
    let ymap = ctx.storage_buffer_from(&map.y, "remap ymap");

    let params = RemapParams {
        width: w as u32,
        height: h as u32,
        _pad0: 0,
        _pad1: 0,
    };
    let params_buf = ctx.uniform_buffer(bytemuck::bytes_of(&params), "remap params");

    let (wx, wy) = dispatch_size_2d(w as u32, h as u32);
    dispatch(
        ctx,
        include_str!("../../shaders/remap.wgsl"),
        "remap",
        &[&src.buffer, &xmap, &ymap, &out, &params_buf],
        (wx, wy, 1),
    );

    Ok(GpuFrame {
        buffer: Arc::new(out),
        width: w,
        height: h,
    })
}
