//! GPU side of one viewshed: shadow map plus visibility post-process stage.
//!
//! The shadow map is re-rendered whenever the frustum's shadow generation,
//! the occluder set or the map size changed since the last render. Without
//! comparison-sampler support the renderer stays inert and the scene passes
//! through untouched.

use glam::DMat4;
use sightline_core::ObserverFrustum;
use sightline_core::viewshed::classify::VisibilityUniforms;

use crate::context::GpuContext;
use crate::shadow_map::{OccluderMesh, ShadowMapGenerator};
use crate::visibility_pass::{SceneTargets, VisibilityPass};

pub struct ViewshedRenderer {
    context: GpuContext,
    output_format: wgpu::TextureFormat,
    stage: Option<VisibilityPass>,
    shadow_map: Option<ShadowMapGenerator>,
    occluders: Vec<OccluderMesh>,
    built_generation: u64,
    destroyed: bool,
}

impl ViewshedRenderer {
    pub fn new(context: GpuContext, output_format: wgpu::TextureFormat) -> Self {
        if !context.capabilities.comparison_samplers {
            tracing::warn!("device lacks comparison samplers, viewshed rendering disabled");
        }
        Self {
            context,
            output_format,
            stage: None,
            shadow_map: None,
            occluders: Vec::new(),
            built_generation: 0,
            destroyed: false,
        }
    }

    /// Whether this device can render the effect at all.
    pub fn is_supported(&self) -> bool {
        self.context.capabilities.comparison_samplers
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn shadow_map(&self) -> Option<&ShadowMapGenerator> {
        self.shadow_map.as_ref()
    }

    /// Replace the shadow casters. The map is re-rendered on the next prepare.
    pub fn set_occluders(&mut self, occluders: Vec<OccluderMesh>) {
        if self.destroyed {
            return;
        }
        self.occluders = occluders;
        self.built_generation = 0;
    }

    /// Create the stage on first use and re-render the shadow map when stale.
    /// Returns whether the shadow map was rendered.
    pub fn prepare(&mut self, encoder: &mut wgpu::CommandEncoder, frustum: &ObserverFrustum) -> bool {
        if self.destroyed || !self.is_supported() || !frustum.settings().enabled {
            return false;
        }
        let size = frustum.settings().shadow_map_size;

        if self.stage.is_none() {
            self.stage = Some(VisibilityPass::new(&self.context, self.output_format));
            tracing::debug!("viewshed post-process stage created");
        }
        match &mut self.shadow_map {
            Some(map) => {
                if map.resize(&self.context, size) {
                    self.built_generation = 0;
                }
            }
            None => self.shadow_map = Some(ShadowMapGenerator::new(&self.context, size)),
        }
        let Some(shadow_map) = self.shadow_map.as_mut() else {
            return false;
        };

        if self.built_generation == frustum.shadow_generation() {
            return false;
        }
        shadow_map.render(&self.context, encoder, frustum.light_camera(), &self.occluders);
        self.built_generation = frustum.shadow_generation();
        tracing::debug!(
            size = shadow_map.size(),
            generation = self.built_generation,
            "viewshed shadow map rendered"
        );
        true
    }

    /// Tint `scene.color` into `scene.output`.
    ///
    /// Returns `false` when nothing was written (disabled, destroyed,
    /// unsupported or not yet prepared); the host then presents the scene
    /// color as is.
    pub fn render(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        frustum: &ObserverFrustum,
        scene: &SceneTargets<'_>,
        camera_view: DMat4,
        camera_projection: DMat4,
    ) -> bool {
        if self.destroyed || !frustum.settings().enabled {
            return false;
        }
        let (Some(stage), Some(shadow_map)) = (&self.stage, &self.shadow_map) else {
            return false;
        };
        let uniforms = VisibilityUniforms::new(frustum, camera_view, camera_projection);
        stage.record(&self.context, encoder, &uniforms, scene, shadow_map);
        true
    }

    /// Release the stage, then the shadow map and occluders. Idempotent.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.stage = None;
        self.shadow_map = None;
        self.occluders.clear();
        self.destroyed = true;
        tracing::debug!("viewshed renderer destroyed");
    }
}
