//! WGSL compute kernels for the accelerator backend.
//!
//! Each kernel module pairs a host-side dispatch function with a shader in
//! `hal/shaders/`. Bind-group layouts are inferred from the shaders; buffer
//! order in [`dispatch`] must match the shader binding indices.

pub mod fold;
pub mod nlca;
pub mod reduce;
pub mod refract;
pub mod remap;
pub mod threshold;
pub mod warp;

use crate::gpu::GpuContext;

pub const WORKGROUP_SIZE_1D: u32 = 256;
pub const WORKGROUP_SIZE_2D: u32 = 16;

pub fn dispatch_size_1d(count: u32) -> u32 {
    count.div_ceil(WORKGROUP_SIZE_1D)
}

pub fn dispatch_size_2d(width: u32, height: u32) -> (u32, u32) {
    (
        width.div_ceil(WORKGROUP_SIZE_2D),
        height.div_ceil(WORKGROUP_SIZE_2D),
    )
}

/// Compile, bind and submit a single compute pass. `buffers` bind to
/// sequential indices in group 0.
pub(crate) fn dispatch(
    ctx: &GpuContext,
    shader_source: &str,
    label: &str,
    buffers: &[&wgpu::Buffer],
    workgroups: (u32, u32, u32),
) {
    let pipeline = ctx.create_compute_pipeline(shader_source, "main");

    let entries: Vec<wgpu::BindGroupEntry> = buffers
        .iter()
        .enumerate()
        .map(|(i, buffer)| wgpu::BindGroupEntry {
            binding: i as u32,
            resource: buffer.as_entire_binding(),
        })
        .collect();

    let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout: &pipeline.get_bind_group_layout(0),
        entries: &entries,
    });

    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
    {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: None,
            timestamp_writes: None,
        });
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(workgroups.0, workgroups.1, workgroups.2);
    }
    ctx.submit(encoder);
}
