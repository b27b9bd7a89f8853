//! Sightline GPU: wgpu passes for sensor volumes and viewshed analysis.
//!
//! This crate owns all GPU resources. No Bevy dependency; it exposes a
//! plain wgpu API that `sightline-bevy` wraps into ECS resources and systems.
//!
//! - [`WgpuBackend`] implements the core [`RenderBackend`] so the sensor
//!   resource cache allocates real buffers and pipelines.
//! - [`SensorPass`] records a frame's sensor draw commands.
//! - [`ScenePass`] rasterizes host occluders into the camera targets.
//! - [`ViewshedRenderer`] renders the observer's shadow map and tints the
//!   scene in a full-screen visibility pass.
//! - [`TargetReadback`] copies the finished target back to the CPU without
//!   blocking the frame.
//!
//! [`RenderBackend`]: sightline_core::RenderBackend

pub mod backend;
pub mod context;
pub mod error;
pub mod readback;
pub mod scene_pass;
pub mod sensor_pass;
pub mod shadow_map;
pub mod viewshed_renderer;
pub mod visibility_pass;

pub use backend::{TargetFormats, WgpuBackend};
pub use context::{GpuCapabilities, GpuContext};
pub use error::GpuError;
pub use readback::{ReadbackFrame, TargetReadback};
pub use scene_pass::ScenePass;
pub use sensor_pass::{SensorPass, SensorTarget};
pub use shadow_map::{OccluderMesh, ShadowMapGenerator};
pub use viewshed_renderer::ViewshedRenderer;
pub use visibility_pass::{SceneTargets, VisibilityPass};

/// Depth format every sensor and shadow pipeline is built for.
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Features the passes need beyond the WebGPU baseline.
pub fn required_features() -> wgpu::Features {
    wgpu::Features::empty()
}
