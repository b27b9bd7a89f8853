//! Standalone wgpu device for the sightline passes.

use std::sync::Arc;

use wgpu::util::DeviceExt;

use crate::error::GpuError;

/// What the device can do, queried once at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuCapabilities {
    /// Depth-comparison samplers. Without them the viewshed pass is skipped.
    pub comparison_samplers: bool,
    pub max_texture_dimension_2d: u32,
    pub min_uniform_buffer_offset_alignment: u32,
}

impl GpuCapabilities {
    pub fn detect(adapter: &wgpu::Adapter, limits: &wgpu::Limits) -> Self {
        let downlevel = adapter.get_downlevel_capabilities();
        Self {
            comparison_samplers: downlevel
                .flags
                .contains(wgpu::DownlevelFlags::COMPARISON_SAMPLERS),
            max_texture_dimension_2d: limits.max_texture_dimension_2d,
            min_uniform_buffer_offset_alignment: limits.min_uniform_buffer_offset_alignment,
        }
    }

    /// Capabilities assumed for a device created elsewhere.
    pub fn from_limits(limits: &wgpu::Limits) -> Self {
        Self {
            comparison_samplers: true,
            max_texture_dimension_2d: limits.max_texture_dimension_2d,
            min_uniform_buffer_offset_alignment: limits.min_uniform_buffer_offset_alignment,
        }
    }
}

/// Device, queue and capabilities shared by every pass.
#[derive(Clone)]
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub capabilities: GpuCapabilities,
}

impl GpuContext {
    /// Wrap an existing device.
    pub fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        capabilities: GpuCapabilities,
    ) -> Self {
        Self {
            device,
            queue,
            capabilities,
        }
    }

    /// Request an adapter and device.
    pub async fn create() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                ..Default::default()
            })
            .await?;

        let limits = adapter.limits();
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("sightline_device"),
                required_features: crate::required_features(),
                required_limits: limits.clone(),
                ..Default::default()
            })
            .await?;

        let capabilities = GpuCapabilities::detect(&adapter, &limits);
        let info = adapter.get_info();
        tracing::info!(
            adapter = %info.name,
            backend = ?info.backend,
            comparison_samplers = capabilities.comparison_samplers,
            "sightline GPU device created"
        );

        Ok(Self::new(Arc::new(device), Arc::new(queue), capabilities))
    }

    /// Blocking variant of [`GpuContext::create`].
    pub fn create_blocking() -> Result<Self, GpuError> {
        pollster::block_on(Self::create())
    }

    /// Copy `bytes` to the start of `target` as a command in `encoder`.
    ///
    /// The copy is ordered with the passes recorded around it, so several
    /// records sharing `target` in one submission each read their own data.
    /// `target` needs `COPY_DST` and `bytes` a multiple of four in length.
    pub fn stage_buffer(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        label: &str,
        target: &wgpu::Buffer,
        bytes: &[u8],
    ) {
        if bytes.is_empty() {
            return;
        }
        let staging = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytes,
                usage: wgpu::BufferUsages::COPY_SRC,
            });
        encoder.copy_buffer_to_buffer(&staging, 0, target, 0, bytes.len() as u64);
    }

    /// Round a uniform stride up to the device's dynamic-offset alignment.
    pub fn uniform_stride(&self, size: u64) -> u64 {
        let align = u64::from(self.capabilities.min_uniform_buffer_offset_alignment.max(1));
        size.div_ceil(align) * align
    }
}
