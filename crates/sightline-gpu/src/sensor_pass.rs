//! Records a frame's sensor draw commands.
//!
//! All commands share one uniform buffer, filled through the encoder; each
//! draw binds its slice with a dynamic offset. Opaque commands are recorded
//! before translucent ones and keep their relative order within a pass.

use std::num::NonZeroU64;

use glam::DMat4;
use sightline_core::DrawCommand;
use sightline_core::sensor::commands::{RenderPass, SensorUniforms};

use crate::backend::WgpuBackend;
use crate::error::GpuError;

/// Color and depth attachments sensors draw over. Existing contents are kept.
pub struct SensorTarget<'a> {
    pub color: &'a wgpu::TextureView,
    pub depth: &'a wgpu::TextureView,
}

pub struct SensorPass {
    uniform_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    stride: u64,
    capacity: usize,
}

impl SensorPass {
    const INITIAL_CAPACITY: usize = 16;

    pub fn new(backend: &WgpuBackend) -> Self {
        let stride = backend
            .context()
            .uniform_stride(std::mem::size_of::<SensorUniforms>() as u64);
        let (uniform_buffer, bind_group) =
            create_uniforms(backend, stride, Self::INITIAL_CAPACITY);
        Self {
            uniform_buffer,
            bind_group,
            stride,
            capacity: Self::INITIAL_CAPACITY,
        }
    }

    /// How many draws fit before the uniform buffer grows.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Upload uniforms and record every command into `encoder`.
    ///
    /// Commands referring to released resources are skipped with a warning.
    pub fn record(
        &mut self,
        backend: &mut WgpuBackend,
        encoder: &mut wgpu::CommandEncoder,
        target: SensorTarget<'_>,
        commands: &[DrawCommand],
        view: DMat4,
        projection: DMat4,
    ) -> Result<usize, GpuError> {
        let ordered: Vec<&DrawCommand> = commands
            .iter()
            .filter(|c| c.pass == RenderPass::Opaque)
            .chain(commands.iter().filter(|c| c.pass == RenderPass::Translucent))
            .filter(|c| c.vertex_count > 0)
            .collect();
        if ordered.is_empty() {
            return Ok(0);
        }

        for command in &ordered {
            backend.prepare_pipeline(command.shader, command.render_state)?;
        }

        if ordered.len() > self.capacity {
            let capacity = ordered.len().next_power_of_two();
            let (buffer, bind_group) = create_uniforms(backend, self.stride, capacity);
            self.uniform_buffer = buffer;
            self.bind_group = bind_group;
            self.capacity = capacity;
            tracing::debug!(capacity, "grew sensor uniform buffer");
        }

        let mut staging = vec![0u8; self.stride as usize * ordered.len()];
        for (i, command) in ordered.iter().enumerate() {
            let uniforms = SensorUniforms::new(command, view, projection);
            let start = i * self.stride as usize;
            staging[start..start + std::mem::size_of::<SensorUniforms>()]
                .copy_from_slice(bytemuck::bytes_of(&uniforms));
        }
        backend.context().stage_buffer(
            encoder,
            "sightline_sensor_uniform_staging",
            &self.uniform_buffer,
            &staging,
        );

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("sightline_sensor_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target.color,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: target.depth,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        let mut drawn = 0;
        for (i, command) in ordered.iter().enumerate() {
            let (Some(pipeline), Some(buffer)) = (
                backend.pipeline(command.shader, command.render_state),
                backend.vertex_buffer(command.vertex_array),
            ) else {
                tracing::warn!(
                    surface = ?command.surface,
                    vertex_array = %command.vertex_array,
                    "sensor draw refers to a released resource, skipped"
                );
                continue;
            };
            let offset = (i as u64 * self.stride) as u32;
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &self.bind_group, &[offset]);
            pass.set_vertex_buffer(0, buffer.slice(..));
            pass.draw(0..command.vertex_count, 0..1);
            drawn += 1;
        }
        Ok(drawn)
    }
}

fn create_uniforms(
    backend: &WgpuBackend,
    stride: u64,
    capacity: usize,
) -> (wgpu::Buffer, wgpu::BindGroup) {
    let device = &backend.context().device;
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("sightline_sensor_uniforms"),
        size: stride * capacity as u64,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("sightline_sensor_uniform_bind_group"),
        layout: backend.uniform_layout(),
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: &buffer,
                offset: 0,
                size: NonZeroU64::new(std::mem::size_of::<SensorUniforms>() as u64),
            }),
        }],
    });
    (buffer, bind_group)
}
