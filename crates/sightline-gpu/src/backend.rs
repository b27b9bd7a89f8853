//! wgpu implementation of the sensor [`RenderBackend`].
//!
//! Vertex arrays become vertex buffers, render states are remembered as
//! keys and shader programs compile a WGSL module. Pipelines combine one
//! program with one render state and are built lazily the first time a
//! draw command needs them.

use std::collections::HashMap;
use std::num::NonZeroU64;

use sightline_core::sensor::cache::RenderStateKey;
use sightline_core::sensor::commands::{CullMode, SensorUniforms};
use sightline_core::sensor::geometry::{PrimitiveKind, SensorVertex};
use sightline_core::{BackendError, RenderBackend, ResourceId, ShaderVariant};

use crate::context::GpuContext;
use crate::error::GpuError;

const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3];

/// Formats of the targets sensor pipelines render into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetFormats {
    pub color: wgpu::TextureFormat,
    pub depth: wgpu::TextureFormat,
}

impl Default for TargetFormats {
    fn default() -> Self {
        Self {
            color: wgpu::TextureFormat::Rgba8UnormSrgb,
            depth: crate::DEPTH_FORMAT,
        }
    }
}

struct GpuVertexArray {
    buffer: wgpu::Buffer,
    capacity: u64,
    vertex_count: u32,
    primitive: PrimitiveKind,
}

struct ShaderProgram {
    variant: ShaderVariant,
    module: wgpu::ShaderModule,
}

enum GpuResource {
    VertexArray(GpuVertexArray),
    RenderState(RenderStateKey),
    Program(ShaderProgram),
}

/// Owns every GPU object the sensor caches refer to by id.
pub struct WgpuBackend {
    context: GpuContext,
    formats: TargetFormats,
    uniform_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    next_id: u64,
    resources: HashMap<ResourceId, GpuResource>,
    pipelines: HashMap<(ResourceId, ResourceId), wgpu::RenderPipeline>,
}

impl WgpuBackend {
    pub fn new(context: GpuContext, formats: TargetFormats) -> Self {
        let device = &context.device;
        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("sightline_sensor_uniform_layout"),
            entries: &[
                // binding 0: per-draw sensor uniforms (dynamic offset)
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: NonZeroU64::new(
                            std::mem::size_of::<SensorUniforms>() as u64
                        ),
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("sightline_sensor_pipeline_layout"),
            bind_group_layouts: &[&uniform_layout],
            push_constant_ranges: &[],
        });

        Self {
            context,
            formats,
            uniform_layout,
            pipeline_layout,
            next_id: 1,
            resources: HashMap::new(),
            pipelines: HashMap::new(),
        }
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    pub fn formats(&self) -> TargetFormats {
        self.formats
    }

    /// Layout of the per-draw uniform bind group.
    pub fn uniform_layout(&self) -> &wgpu::BindGroupLayout {
        &self.uniform_layout
    }

    /// Number of live resources, pipelines excluded.
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.resources.contains_key(&id)
    }

    /// The vertex buffer behind a vertex array id.
    pub fn vertex_buffer(&self, id: ResourceId) -> Option<&wgpu::Buffer> {
        match self.resources.get(&id) {
            Some(GpuResource::VertexArray(array)) => Some(&array.buffer),
            _ => None,
        }
    }

    /// Vertex count and primitive of a vertex array.
    pub fn vertex_array_info(&self, id: ResourceId) -> Option<(u32, PrimitiveKind)> {
        match self.resources.get(&id) {
            Some(GpuResource::VertexArray(array)) => Some((array.vertex_count, array.primitive)),
            _ => None,
        }
    }

    /// A pipeline previously built by [`WgpuBackend::prepare_pipeline`].
    pub fn pipeline(&self, shader: ResourceId, state: ResourceId) -> Option<&wgpu::RenderPipeline> {
        self.pipelines.get(&(shader, state))
    }

    /// Build the pipeline for a program and render state if it is missing.
    pub fn prepare_pipeline(
        &mut self,
        shader: ResourceId,
        state: ResourceId,
    ) -> Result<(), GpuError> {
        if self.pipelines.contains_key(&(shader, state)) {
            return Ok(());
        }
        let program = match self.resources.get(&shader) {
            Some(GpuResource::Program(program)) => program,
            Some(_) => return Err(GpuError::WrongResource(shader, "shader program")),
            None => return Err(GpuError::UnknownResource(shader)),
        };
        let key = match self.resources.get(&state) {
            Some(GpuResource::RenderState(key)) => *key,
            Some(_) => return Err(GpuError::WrongResource(state, "render state")),
            None => return Err(GpuError::UnknownResource(state)),
        };

        let pipeline = build_pipeline(
            &self.context.device,
            &self.pipeline_layout,
            program,
            &key,
            self.formats,
        );
        tracing::debug!(%shader, %state, variant = ?program.variant, "built sensor pipeline");
        self.pipelines.insert((shader, state), pipeline);
        Ok(())
    }

    fn allocate_id(&mut self) -> ResourceId {
        let id = ResourceId(self.next_id);
        self.next_id += 1;
        id
    }

    fn create_buffer(&self, label: &str, vertices: &[SensorVertex]) -> (wgpu::Buffer, u64) {
        let bytes: &[u8] = bytemuck::cast_slice(vertices);
        // Zero-sized buffers cannot be bound, keep room for one vertex.
        let capacity = (bytes.len() as u64).max(std::mem::size_of::<SensorVertex>() as u64);
        let buffer = self.context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: capacity,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        if !bytes.is_empty() {
            self.context.queue.write_buffer(&buffer, 0, bytes);
        }
        (buffer, capacity)
    }
}

impl RenderBackend for WgpuBackend {
    fn create_vertex_array(
        &mut self,
        label: &str,
        primitive: PrimitiveKind,
        vertices: &[SensorVertex],
    ) -> Result<ResourceId, BackendError> {
        let vertex_count = u32::try_from(vertices.len())
            .map_err(|_| BackendError::Allocation(format!("{label}: too many vertices")))?;
        let (buffer, capacity) = self.create_buffer(&format!("sightline_{label}_vertices"), vertices);
        let id = self.allocate_id();
        self.resources.insert(
            id,
            GpuResource::VertexArray(GpuVertexArray {
                buffer,
                capacity,
                vertex_count,
                primitive,
            }),
        );
        Ok(id)
    }

    fn update_vertex_array(
        &mut self,
        id: ResourceId,
        vertices: &[SensorVertex],
    ) -> Result<(), BackendError> {
        let vertex_count = u32::try_from(vertices.len())
            .map_err(|_| BackendError::Allocation(format!("{id}: too many vertices")))?;
        let bytes: &[u8] = bytemuck::cast_slice(vertices);
        let needs_grow = match self.resources.get(&id) {
            Some(GpuResource::VertexArray(array)) => bytes.len() as u64 > array.capacity,
            _ => return Err(BackendError::UnknownResource(id)),
        };

        let grown = needs_grow.then(|| self.create_buffer("sightline_grown_vertices", vertices));
        let queue = &self.context.queue;
        let Some(GpuResource::VertexArray(array)) = self.resources.get_mut(&id) else {
            return Err(BackendError::UnknownResource(id));
        };
        match grown {
            Some((buffer, capacity)) => {
                array.buffer = buffer;
                array.capacity = capacity;
            }
            None if !bytes.is_empty() => queue.write_buffer(&array.buffer, 0, bytes),
            None => {}
        }
        array.vertex_count = vertex_count;
        Ok(())
    }

    fn create_render_state(&mut self, key: &RenderStateKey) -> Result<ResourceId, BackendError> {
        let id = self.allocate_id();
        self.resources.insert(id, GpuResource::RenderState(*key));
        Ok(id)
    }

    fn create_shader_program(
        &mut self,
        variant: ShaderVariant,
    ) -> Result<ResourceId, BackendError> {
        let (label, source) = match variant {
            ShaderVariant::Common => (
                "sightline_sensor_shader",
                include_str!("../shaders/sensor.wgsl"),
            ),
            ShaderVariant::ScanPlane => (
                "sightline_sensor_scan_shader",
                include_str!("../shaders/sensor_scan.wgsl"),
            ),
        };
        let module = self
            .context
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
        let id = self.allocate_id();
        self.resources
            .insert(id, GpuResource::Program(ShaderProgram { variant, module }));
        Ok(id)
    }

    fn release(&mut self, id: ResourceId) {
        if self.resources.remove(&id).is_some() {
            self.pipelines
                .retain(|(shader, state), _| *shader != id && *state != id);
        }
    }
}

fn build_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    program: &ShaderProgram,
    key: &RenderStateKey,
    formats: TargetFormats,
) -> wgpu::RenderPipeline {
    let blend = if key.translucent {
        wgpu::BlendState::ALPHA_BLENDING
    } else {
        wgpu::BlendState::REPLACE
    };
    let depth_compare = if key.show_through_ellipsoid {
        wgpu::CompareFunction::Always
    } else {
        wgpu::CompareFunction::LessEqual
    };
    let cull_mode = match key.cull {
        CullMode::None => None,
        CullMode::Front => Some(wgpu::Face::Front),
        CullMode::Back => Some(wgpu::Face::Back),
    };
    let topology = match key.primitive {
        PrimitiveKind::Triangles => wgpu::PrimitiveTopology::TriangleList,
        PrimitiveKind::Lines => wgpu::PrimitiveTopology::LineList,
    };

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("sightline_sensor_pipeline"),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: &program.module,
            entry_point: Some("vs_main"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            buffers: &[wgpu::VertexBufferLayout {
                array_stride: std::mem::size_of::<SensorVertex>() as u64,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &VERTEX_ATTRIBUTES,
            }],
        },
        primitive: wgpu::PrimitiveState {
            topology,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode,
            ..Default::default()
        },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: formats.depth,
            depth_write_enabled: !key.translucent,
            depth_compare,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module: &program.module,
            entry_point: Some("fs_main"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format: formats.color,
                blend: Some(blend),
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        multiview: None,
        cache: None,
    })
}
