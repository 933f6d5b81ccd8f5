use super::{dispatch, dispatch_size_1d};
use crate::gpu::{GpuContext, GpuFrame};
use crate::Result;

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct ThresholdParams {
    len: u32,
    _pad: u32,
    thresh: f32,
    _pad2: f32,
}

/// In-place to-zero threshold: values not strictly above `thresh` become 0.
pub fn threshold_to_zero(ctx: &GpuContext, frame: &mut GpuFrame, thresh: f32) -> Result<()> {
    let params = ThresholdParams {
        len: frame.len() as u32,
        _pad: 0,
        thresh,
        _pad2: 0.0,
    };
    let params_buf = ctx.uniform_buffer(bytemuck::bytes_of(&params), "threshold params");
    dispatch(
        ctx,
        include_str!("../../shaders/threshold_to_zero.wgsl"),
        "threshold to zero",
        &[&frame.buffer, &params_buf],
        (dispatch_size_1d(frame.len() as u32), 1, 1),
    );
    Ok(())
}
