use super::{dispatch, dispatch_size_1d};
use crate::gpu::{GpuContext, GpuFrame};
use crate::{Error, Result};

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct FoldParams {
    len: u32,
    first: u32,
    scalar: f32,
    _pad: f32,
}

fn check_same_size(acc: &GpuFrame, view: &GpuFrame) -> Result<()> {
    if acc.width != view.width || acc.height != view.height {
        return Err(Error::InvalidInput(format!(
            "fold operands differ in size: {}x{} vs {}x{}",
            acc.width, acc.height, view.width, view.height
        )));
    }
    Ok(())
}

fn run_fold(
    ctx: &GpuContext,
    shader: &str,
    label: &str,
    acc: &GpuFrame,
    view: &GpuFrame,
    first: bool,
    scalar: f32,
) {
    let params = FoldParams {
        len: acc.len() as u32,
        first: first as u32,
        scalar,
        _pad: 0.0,
    };
    let params_buf = ctx.uniform_buffer(bytemuck::bytes_of(&params), label);
    dispatch(
        ctx,
        shader,
        label,
        &[&acc.buffer, &view.buffer, &params_buf],
        (dispatch_size_1d(acc.len() as u32), 1, 1),
    );
}

/// acc += view · factor
pub fn scale_add(ctx: &GpuContext, acc: &mut GpuFrame, view: &GpuFrame, factor: f32) -> Result<()> {
    check_same_size(acc, view)?;
    run_fold(
        ctx,
        include_str!("../../shaders/scale_add.wgsl"),
        "scale add",
        acc,
        view,
        false,
        factor,
    );
    Ok(())
}

/// acc = view^e (first) or acc · view^e.
pub fn mul_pow(
    ctx: &GpuContext,
    acc: &mut GpuFrame,
    view: &GpuFrame,
    exponent: f32,
    first_view: bool,
) -> Result<()> {
    check_same_size(acc, view)?;
    run_fold(
        ctx,
        include_str!("../../shaders/mul_pow.wgsl"),
        "mul pow",
        acc,
        view,
        first_view,
        exponent,
    );
    Ok(())
}

/// acc = view (first) or min(acc, view).
pub fn min_fold(
    ctx: &GpuContext,
    acc: &mut GpuFrame,
    view: &GpuFrame,
    first_view: bool,
) -> Result<()> {
    check_same_size(acc, view)?;
    run_fold(
        ctx,
        include_str!("../../shaders/min_fold.wgsl"),
        "min fold",
        acc,
        view,
        first_view,
        0.0,
    );
    Ok(())
}
