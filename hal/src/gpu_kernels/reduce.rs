use super::{dispatch, WORKGROUP_SIZE_1D};
use crate::gpu::{GpuContext, GpuFrame};
use crate::{Error, Result};

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct ReduceParams {
    len: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

/// Population mean and standard deviation via a workgroup tree reduction;
/// per-workgroup (Σv, Σv²) partials are finished on the host.
pub fn mean_stdev(ctx: &GpuContext, frame: &GpuFrame) -> Result<(f32, f32)> {
    let len = frame.len();
    if len == 0 {
        return Err(Error::InvalidInput("empty frame".into()));
    }
    let num_groups = (len as u32).div_ceil(WORKGROUP_SIZE_1D);
    let partials = ctx.empty_storage_buffer(num_groups as usize * 2, "reduce partials");

    let params = ReduceParams {
        len: len as u32,
        _pad0: 0,
        _pad1: 0,
        _pad2: 0,
    };
    let params_buf = ctx.uniform_buffer(bytemuck::bytes_of(&params), "reduce params");
    dispatch(
        ctx,
        include_str!("../../shaders/reduce_sums.wgsl"),
        "reduce sums",
        &[&frame.buffer, &partials, &params_buf],
        (num_groups, 1, 1),
    );

    let sums = ctx.read_f32(&partials, num_groups as usize * 2)?;
    let mut sum = 0.0f64;
    let mut sumsq = 0.0f64;
    for chunk in sums.chunks_exact(2) {
        sum += chunk[0] as f64;
        sumsq += chunk[1] as f64;
    }
    let n = len as f64;
    let mean = sum / n;
    let var = (sumsq / n - mean * mean).max(0.0);
    Ok((mean as f32, var.sqrt() as f32))
}
