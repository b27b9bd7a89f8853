//! Depth-only shadow map rendered from the viewshed's light camera.
//!
//! Occluders are uploaded relative to their own origin in f32; the
//! light view-projection is composed with that origin in f64 per mesh so
//! globe-scale coordinates keep their precision.

use std::num::NonZeroU64;

use glam::{DMat4, DVec3};
use sightline_core::LightCamera;
use sightline_core::viewshed::shadow::Triangle;

use crate::context::GpuContext;

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct ShadowUniforms {
    light_view_projection: [[f32; 4]; 4],
}

/// Scene geometry that casts shadows into the viewshed.
///
/// Clones share the same GPU buffer.
#[derive(Clone)]
pub struct OccluderMesh {
    origin: DVec3,
    buffer: wgpu::Buffer,
    vertex_count: u32,
}

impl OccluderMesh {
    /// Upload a triangle list (three positions per triangle).
    pub fn new(context: &GpuContext, label: &str, positions: &[DVec3]) -> Self {
        let origin = positions.first().copied().unwrap_or(DVec3::ZERO);
        let relative: Vec<[f32; 3]> = positions
            .iter()
            .map(|p| (*p - origin).as_vec3().to_array())
            .collect();
        let bytes: &[u8] = bytemuck::cast_slice(&relative);
        let buffer = context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: (bytes.len() as u64).max(12),
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        if !bytes.is_empty() {
            context.queue.write_buffer(&buffer, 0, bytes);
        }
        Self {
            origin,
            buffer,
            vertex_count: relative.len() as u32,
        }
    }

    /// Upload the same triangles the CPU depth map ray-casts.
    pub fn from_triangles(context: &GpuContext, label: &str, triangles: &[Triangle]) -> Self {
        let positions: Vec<DVec3> = triangles.iter().flat_map(|t| [t.a, t.b, t.c]).collect();
        Self::new(context, label, &positions)
    }

    pub fn origin(&self) -> DVec3 {
        self.origin
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub(crate) fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}

/// Owns the shadow depth texture, its comparison sampler and the depth-only
/// pipeline.
pub struct ShadowMapGenerator {
    size: u32,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    sampler: wgpu::Sampler,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    stride: u64,
    capacity: usize,
}

impl ShadowMapGenerator {
    /// Create a `size`×`size` shadow map, clamped to the device limit.
    pub fn new(context: &GpuContext, size: u32) -> Self {
        let device = &context.device;
        let size = clamp_size(context, size);
        let (texture, view) = create_depth_texture(device, size);

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("sightline_shadow_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            compare: Some(wgpu::CompareFunction::LessEqual),
            ..Default::default()
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("sightline_shadow_depth_shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/shadow_depth.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("sightline_shadow_depth_layout"),
            entries: &[
                // binding 0: per-occluder light view-projection (dynamic offset)
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: NonZeroU64::new(
                            std::mem::size_of::<ShadowUniforms>() as u64
                        ),
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("sightline_shadow_depth_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("sightline_shadow_depth_pipeline"),
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
                format: crate::DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            fragment: None,
            multiview: None,
            cache: None,
        });

        let stride = context.uniform_stride(std::mem::size_of::<ShadowUniforms>() as u64);
        let capacity = 4;
        let (uniform_buffer, bind_group) =
            create_uniforms(device, &bind_group_layout, stride, capacity);

        Self {
            size,
            texture,
            view,
            sampler,
            pipeline,
            bind_group_layout,
            uniform_buffer,
            bind_group,
            stride,
            capacity,
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn sampler(&self) -> &wgpu::Sampler {
        &self.sampler
    }

    /// Recreate the depth texture when the requested size changed.
    /// Returns whether the texture was replaced.
    pub fn resize(&mut self, context: &GpuContext, size: u32) -> bool {
        let size = clamp_size(context, size);
        if size == self.size {
            return false;
        }
        let (texture, view) = create_depth_texture(&context.device, size);
        self.texture = texture;
        self.view = view;
        self.size = size;
        tracing::debug!(size, "resized viewshed shadow map");
        true
    }

    /// Clear to the far plane and render every occluder's depth.
    pub fn render(
        &mut self,
        context: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        light: &LightCamera,
        occluders: &[OccluderMesh],
    ) {
        let occluders: Vec<&OccluderMesh> =
            occluders.iter().filter(|o| o.vertex_count > 0).collect();

        if occluders.len() > self.capacity {
            self.capacity = occluders.len().next_power_of_two();
            let (buffer, bind_group) = create_uniforms(
                &context.device,
                &self.bind_group_layout,
                self.stride,
                self.capacity,
            );
            self.uniform_buffer = buffer;
            self.bind_group = bind_group;
        }

        if !occluders.is_empty() {
            let view_projection = light.view_projection();
            let mut staging = vec![0u8; self.stride as usize * occluders.len()];
            for (i, mesh) in occluders.iter().enumerate() {
                let matrix = view_projection * DMat4::from_translation(mesh.origin);
                let uniforms = ShadowUniforms {
                    light_view_projection: matrix.as_mat4().to_cols_array_2d(),
                };
                let start = i * self.stride as usize;
                staging[start..start + std::mem::size_of::<ShadowUniforms>()]
                    .copy_from_slice(bytemuck::bytes_of(&uniforms));
            }
            context.stage_buffer(
                encoder,
                "sightline_shadow_uniform_staging",
                &self.uniform_buffer,
                &staging,
            );
        }

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("sightline_shadow_depth_pass"),
            color_attachments: &[],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &self.view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        pass.set_pipeline(&self.pipeline);
        for (i, mesh) in occluders.iter().enumerate() {
            let offset = (i as u64 * self.stride) as u32;
            pass.set_bind_group(0, &self.bind_group, &[offset]);
            pass.set_vertex_buffer(0, mesh.buffer.slice(..));
            pass.draw(0..mesh.vertex_count, 0..1);
        }
    }
}

fn clamp_size(context: &GpuContext, size: u32) -> u32 {
    let max = context.capabilities.max_texture_dimension_2d;
    if size > max {
        tracing::warn!(requested = size, max, "shadow map size clamped to device limit");
        return max;
    }
    size
}

fn create_depth_texture(device: &wgpu::Device, size: u32) -> (wgpu::Texture, wgpu::TextureView) {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("sightline_shadow_map"),
        size: wgpu::Extent3d {
            width: size,
            height: size,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: crate::DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}

fn create_uniforms(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    stride: u64,
    capacity: usize,
) -> (wgpu::Buffer, wgpu::BindGroup) {
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("sightline_shadow_uniforms"),
        size: stride * capacity as u64,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("sightline_shadow_bind_group"),
        layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: &buffer,
                offset: 0,
                size: NonZeroU64::new(std::mem::size_of::<ShadowUniforms>() as u64),
            }),
        }],
    });
    (buffer, bind_group)
}
