//! Draws the host's occluder geometry into the camera targets.
//!
//! The visibility pass classifies whatever the scene depth holds, so the
//! same triangles that cast shadows are rasterized here first. Each mesh is
//! drawn relative to its origin like the shadow map does.

use std::num::NonZeroU64;

use glam::{DMat4, Mat4};
use sightline_core::Color;

use crate::backend::TargetFormats;
use crate::context::GpuContext;
use crate::sensor_pass::SensorTarget;
use crate::shadow_map::OccluderMesh;

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct SceneUniforms {
    model_view: [[f32; 4]; 4],
    projection: [[f32; 4]; 4],
    base_color: [f32; 4],
}

pub struct ScenePass {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    stride: u64,
    capacity: usize,
}

impl ScenePass {
    pub fn new(context: &GpuContext, formats: TargetFormats) -> Self {
        let device = &context.device;
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("sightline_scene_shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/scene.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("sightline_scene_layout"),
            entries: &[
                // binding 0: per-mesh matrices and color (dynamic offset)
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: NonZeroU64::new(
                            std::mem::size_of::<SceneUniforms>() as u64
                        ),
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("sightline_scene_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("sightline_scene_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: 12,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &wgpu::vertex_attr_array![0 => Float32x3],
                }],
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: formats.depth,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: formats.color,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            multiview: None,
            cache: None,
        });

        let stride = context.uniform_stride(std::mem::size_of::<SceneUniforms>() as u64);
        let capacity = 4;
        let (uniform_buffer, bind_group) =
            create_uniforms(device, &bind_group_layout, stride, capacity);

        Self {
            pipeline,
            bind_group_layout,
            uniform_buffer,
            bind_group,
            stride,
            capacity,
        }
    }

    /// Draw every mesh over `target` in `color`, keeping existing contents.
    /// Returns the number of meshes drawn.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &mut self,
        context: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        target: SensorTarget<'_>,
        meshes: &[OccluderMesh],
        color: Color,
        view: DMat4,
        projection: DMat4,
    ) -> usize {
        let meshes: Vec<&OccluderMesh> = meshes.iter().filter(|m| m.vertex_count() > 0).collect();
        if meshes.is_empty() {
            return 0;
        }

        if meshes.len() > self.capacity {
            self.capacity = meshes.len().next_power_of_two();
            let (buffer, bind_group) = create_uniforms(
                &context.device,
                &self.bind_group_layout,
                self.stride,
                self.capacity,
            );
            self.uniform_buffer = buffer;
            self.bind_group = bind_group;
        }

        let projection = projection.as_mat4().to_cols_array_2d();
        let mut staging = vec![0u8; self.stride as usize * meshes.len()];
        for (i, mesh) in meshes.iter().enumerate() {
            let model_view: Mat4 = (view * DMat4::from_translation(mesh.origin())).as_mat4();
            let uniforms = SceneUniforms {
                model_view: model_view.to_cols_array_2d(),
                projection,
                base_color: color.0,
            };
            let start = i * self.stride as usize;
            staging[start..start + std::mem::size_of::<SceneUniforms>()]
                .copy_from_slice(bytemuck::bytes_of(&uniforms));
        }
        context.stage_buffer(
            encoder,
            "sightline_scene_uniform_staging",
            &self.uniform_buffer,
            &staging,
        );

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("sightline_scene_pass"),
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

        pass.set_pipeline(&self.pipeline);
        for (i, mesh) in meshes.iter().enumerate() {
            let offset = (i as u64 * self.stride) as u32;
            pass.set_bind_group(0, &self.bind_group, &[offset]);
            pass.set_vertex_buffer(0, mesh.buffer().slice(..));
            pass.draw(0..mesh.vertex_count(), 0..1);
        }
        meshes.len()
    }
}

fn create_uniforms(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    stride: u64,
    capacity: usize,
) -> (wgpu::Buffer, wgpu::BindGroup) {
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("sightline_scene_uniforms"),
        size: stride * capacity as u64,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("sightline_scene_bind_group"),
        layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: &buffer,
                offset: 0,
                size: NonZeroU64::new(std::mem::size_of::<SceneUniforms>() as u64),
            }),
        }],
    });
    (buffer, bind_group)
}
