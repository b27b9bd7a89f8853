//! Bevy resources for sensors and viewsheds.

use std::collections::HashMap;

use bevy::prelude::*;
use glam::DVec3;
use sightline_core::sensor::cache::RenderStateKey;
use sightline_core::sensor::geometry::{PrimitiveKind, SensorVertex};
use sightline_core::viewshed::shadow::Triangle;
use sightline_core::{
    BackendError, ConstructionGesture, DrawCommand, EntityCollection, GestureEvent,
    ObserverFrustum, Pick, ReferenceFrame, RenderBackend, ResourceId, SceneMode,
    SensorVisualizer, ShaderVariant, Viewshed, ViewshedSettings, VisualizerRegistry,
    VisualizerSet,
};
use sightline_gpu::{
    GpuContext, OccluderMesh, ReadbackFrame, ScenePass, SensorPass, TargetFormats,
    TargetReadback, ViewshedRenderer, WgpuBackend,
};

// ── Sensors ──────────────────────────────────────────────────────

/// Entities with sensors and the visualizers that draw them.
///
/// This is the single source of truth for sensor state within the ECS.
#[derive(Resource)]
pub struct SensorScene {
    pub entities: EntityCollection,
    pub mode: SceneMode,
    registry: VisualizerRegistry,
    visualizers: VisualizerSet,
}

impl Default for SensorScene {
    fn default() -> Self {
        let mut registry = VisualizerRegistry::new();
        SensorVisualizer::register(&mut registry);
        Self::with_registry(registry)
    }
}

impl SensorScene {
    /// Use a host-populated registry instead of the sensor-only default.
    pub fn with_registry(registry: VisualizerRegistry) -> Self {
        let visualizers = registry.create_visualizers();
        Self {
            entities: EntityCollection::new(),
            mode: SceneMode::Scene3D,
            registry,
            visualizers,
        }
    }

    pub fn registry(&self) -> &VisualizerRegistry {
        &self.registry
    }

    pub fn visualizers_mut(&mut self) -> (&EntityCollection, &mut VisualizerSet) {
        (&self.entities, &mut self.visualizers)
    }
}

/// Draw commands produced by the last visualizer update.
#[derive(Resource, Default)]
pub struct SensorFrame {
    pub commands: Vec<DrawCommand>,
}

/// Backend used when no GPU device is available.
///
/// Allocates ids and keeps vertex counts so commands still assemble; nothing
/// is uploaded anywhere.
#[derive(Resource, Default, Debug)]
pub struct HostBackend {
    next_id: u64,
    /// Live ids; vertex arrays carry their vertex count.
    resources: HashMap<ResourceId, Option<usize>>,
}

impl HostBackend {
    pub fn live_resources(&self) -> usize {
        self.resources.len()
    }

    fn allocate(&mut self, vertex_count: Option<usize>) -> ResourceId {
        self.next_id += 1;
        let id = ResourceId(self.next_id);
        self.resources.insert(id, vertex_count);
        id
    }
}

impl RenderBackend for HostBackend {
    fn create_vertex_array(
        &mut self,
        _label: &str,
        _primitive: PrimitiveKind,
        vertices: &[SensorVertex],
    ) -> Result<ResourceId, BackendError> {
        Ok(self.allocate(Some(vertices.len())))
    }

    fn update_vertex_array(
        &mut self,
        id: ResourceId,
        vertices: &[SensorVertex],
    ) -> Result<(), BackendError> {
        match self.resources.get_mut(&id) {
            Some(Some(count)) => {
                *count = vertices.len();
                Ok(())
            }
            _ => Err(BackendError::UnknownResource(id)),
        }
    }

    fn create_render_state(&mut self, _key: &RenderStateKey) -> Result<ResourceId, BackendError> {
        Ok(self.allocate(None))
    }

    fn create_shader_program(
        &mut self,
        _variant: ShaderVariant,
    ) -> Result<ResourceId, BackendError> {
        Ok(self.allocate(None))
    }

    fn release(&mut self, id: ResourceId) {
        self.resources.remove(&id);
    }
}

// ── GPU ──────────────────────────────────────────────────────────

/// Color, depth and output textures the GPU passes render into.
///
/// Every frame the occluders and sensors are drawn into `color` and `depth`;
/// the viewshed tints them into `output`.
pub struct OffscreenTargets {
    pub size: (u32, u32),
    pub color: wgpu::Texture,
    pub color_view: wgpu::TextureView,
    pub depth: wgpu::Texture,
    pub depth_view: wgpu::TextureView,
    pub output: wgpu::Texture,
    pub output_view: wgpu::TextureView,
}

impl OffscreenTargets {
    pub fn new(context: &GpuContext, formats: TargetFormats, size: (u32, u32)) -> Self {
        let sampled = wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC;
        let (color, color_view) =
            create_target(context, "sightline_offscreen_color", formats.color, sampled, size);
        let (depth, depth_view) =
            create_target(context, "sightline_offscreen_depth", formats.depth, sampled, size);
        let (output, output_view) =
            create_target(context, "sightline_offscreen_output", formats.color, sampled, size);
        Self {
            size,
            color,
            color_view,
            depth,
            depth_view,
            output,
            output_view,
        }
    }
}

fn create_target(
    context: &GpuContext,
    label: &str,
    format: wgpu::TextureFormat,
    usage: wgpu::TextureUsages,
    (width, height): (u32, u32),
) -> (wgpu::Texture, wgpu::TextureView) {
    let texture = context.device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}

/// GPU state, inserted at startup when a device could be created.
#[derive(Resource)]
pub struct GpuSightline {
    pub context: GpuContext,
    pub backend: WgpuBackend,
    pub scene_pass: ScenePass,
    pub sensor_pass: SensorPass,
    pub targets: OffscreenTargets,
    pub readback: TargetReadback,
    /// Uploaded occluders, shared by the scene pass and the viewshed.
    pub occluder_meshes: Vec<OccluderMesh>,
    /// Occluder revision last uploaded.
    pub occluder_revision: u64,
    /// Renderer of the committed viewshed and the commit it belongs to.
    pub viewshed: Option<(u64, ViewshedRenderer)>,
}

impl GpuSightline {
    pub fn new(context: GpuContext, size: (u32, u32)) -> Self {
        let formats = TargetFormats::default();
        let backend = WgpuBackend::new(context.clone(), formats);
        let scene_pass = ScenePass::new(&context, formats);
        let sensor_pass = SensorPass::new(&backend);
        let targets = OffscreenTargets::new(&context, formats, size);
        let readback = TargetReadback::new(&context, size);
        Self {
            context,
            backend,
            scene_pass,
            sensor_pass,
            targets,
            readback,
            occluder_meshes: Vec::new(),
            occluder_revision: 0,
            viewshed: None,
        }
    }

    /// Destroy the viewshed renderer, if any.
    pub fn drop_viewshed(&mut self) {
        if let Some((_, mut renderer)) = self.viewshed.take() {
            renderer.destroy();
        }
    }
}

/// Latest offscreen frame read back from the GPU: the viewshed output, or
/// the plain scene while no viewshed is drawn.
#[derive(Resource, Default)]
pub struct ViewshedOutput {
    pub frame: Option<ReadbackFrame>,
    /// Incremented for every consumed frame.
    pub serial: u64,
}

/// Image the consumed frames are written to, for the host to display.
#[derive(Resource)]
pub struct ViewshedImage {
    pub handle: Handle<Image>,
}

// ── Viewshed ─────────────────────────────────────────────────────

/// Screen-to-world picking supplied by the host scene.
pub trait ScenePicker: Send + Sync {
    /// First scene surface hit along the ray, if any.
    fn pick(&self, origin: DVec3, direction: DVec3) -> Option<Pick>;
}

/// The host's picker. Without one, or when it misses, picks fall back to the
/// ellipsoid or the ground plane.
#[derive(Resource, Default)]
pub struct ScenePicking {
    picker: Option<Box<dyn ScenePicker>>,
}

impl ScenePicking {
    pub fn new(picker: impl ScenePicker + 'static) -> Self {
        Self {
            picker: Some(Box::new(picker)),
        }
    }

    pub fn pick(&self, frame: &ReferenceFrame, origin: DVec3, direction: DVec3) -> Option<Pick> {
        self.picker
            .as_ref()
            .and_then(|p| p.pick(origin, direction))
            .or_else(|| frame.pick_fallback(origin, direction).map(Pick::terrain))
    }
}

/// Scene triangles that cast shadows into the viewshed.
#[derive(Resource, Default)]
pub struct Occluders {
    triangles: Vec<Triangle>,
    revision: u64,
}

impl Occluders {
    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn set(&mut self, triangles: Vec<Triangle>) {
        self.triangles = triangles;
        self.revision += 1;
    }
}

/// What a gesture event did to the viewshed state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GestureOutcome {
    Committed { observer: DVec3, target: DVec3 },
    Cancelled,
}

/// The interactive gesture, its live preview and the committed viewshed.
#[derive(Resource, Default)]
pub struct ViewshedState {
    pub settings: ViewshedSettings,
    pub gesture: ConstructionGesture,
    /// Frustum aimed at the cursor while the target is being chosen.
    pub preview: Option<ObserverFrustum>,
    pub viewshed: Option<Viewshed>,
    /// Incremented on every commit so renderers can tell viewsheds apart.
    pub commit_serial: u64,
}

impl ViewshedState {
    pub fn start(&mut self) {
        self.gesture.start();
        self.preview = None;
    }

    pub fn cancel(&mut self) -> Option<GestureOutcome> {
        if self.gesture.cancel() != GestureEvent::Cancelled {
            return None;
        }
        self.preview = None;
        Some(GestureOutcome::Cancelled)
    }

    /// Destroy the committed viewshed.
    pub fn clear(&mut self) {
        if let Some(mut viewshed) = self.viewshed.take() {
            viewshed.destroy();
        }
    }

    /// Replace the settings used for new viewsheds and apply them to the
    /// committed one.
    pub fn set_settings(&mut self, settings: ViewshedSettings) {
        if let Err(e) = settings.validate() {
            tracing::warn!("Ignoring invalid viewshed settings: {e}");
            return;
        }
        if let Some(viewshed) = &mut self.viewshed
            && let Err(e) = viewshed.frustum_mut().set_settings(settings.clone())
        {
            tracing::warn!("Failed to apply viewshed settings: {e}");
        }
        self.settings = settings;
    }

    /// React to a gesture event: update the preview, commit or cancel.
    pub fn apply(&mut self, event: GestureEvent, frame: &ReferenceFrame) -> Option<GestureOutcome> {
        match event {
            GestureEvent::Ignored | GestureEvent::ObserverPlaced(_) => None,
            GestureEvent::Preview { observer, target } => {
                self.preview = ObserverFrustum::with_settings(
                    *frame,
                    observer.position,
                    target,
                    self.settings.clone(),
                )
                .ok();
                None
            }
            GestureEvent::Committed { observer, target } => {
                self.preview = None;
                match Viewshed::from_picks(*frame, observer, target, self.settings.clone()) {
                    Ok(viewshed) => {
                        self.clear();
                        self.viewshed = Some(viewshed);
                        self.commit_serial += 1;
                        tracing::info!(?observer, ?target, "viewshed committed");
                        Some(GestureOutcome::Committed {
                            observer: observer.position,
                            target,
                        })
                    }
                    Err(e) => {
                        tracing::warn!("Viewshed construction failed: {e}");
                        Some(GestureOutcome::Cancelled)
                    }
                }
            }
            GestureEvent::Cancelled => {
                self.preview = None;
                Some(GestureOutcome::Cancelled)
            }
        }
    }

    /// The frustum to outline: the live preview, else the committed one.
    pub fn debug_frustum(&self) -> Option<&ObserverFrustum> {
        self.preview
            .as_ref()
            .or_else(|| self.viewshed.as_ref().map(|v| v.frustum()))
    }

    pub fn is_constructing(&self) -> bool {
        self.gesture.is_active()
    }
}

#[cfg(test)]
mod tests {
    use sightline_core::GestureInput;

    use super::*;

    fn ground(x: f64, z: f64) -> Pick {
        Pick::terrain(DVec3::new(x, 0.0, z))
    }

    #[test]
    fn test_gesture_commits_viewshed() {
        let frame = ReferenceFrame::y_up();
        let mut state = ViewshedState::default();
        state.start();
        assert!(state.is_constructing());

        let observer = Pick::model(DVec3::new(0.0, 2.0, 0.0));
        let e = state.gesture.handle(GestureInput::LeftClick(Some(observer)));
        assert_eq!(state.apply(e, &frame), None);

        let e = state.gesture.handle(GestureInput::Move(Some(ground(0.0, -40.0))));
        assert_eq!(state.apply(e, &frame), None);
        assert!(state.preview.is_some());

        let e = state.gesture.handle(GestureInput::LeftClick(Some(ground(0.0, -80.0))));
        let outcome = state.apply(e, &frame);
        assert!(matches!(outcome, Some(GestureOutcome::Committed { .. })));
        assert!(state.preview.is_none());
        assert_eq!(state.commit_serial, 1);
        assert!(state.viewshed.is_some());
        assert!(!state.is_constructing());
    }

    #[test]
    fn test_cancel_keeps_previous_viewshed() {
        let frame = ReferenceFrame::y_up();
        let mut state = ViewshedState::default();
        state.start();
        let e = state.gesture.handle(GestureInput::LeftClick(Some(ground(0.0, 0.0))));
        state.apply(e, &frame);
        let e = state.gesture.handle(GestureInput::LeftClick(Some(ground(0.0, -50.0))));
        state.apply(e, &frame);

        state.start();
        assert_eq!(state.cancel(), Some(GestureOutcome::Cancelled));
        assert!(state.viewshed.is_some());
        state.clear();
        assert!(state.viewshed.is_none());
    }

    #[test]
    fn test_picking_falls_back_to_ground_plane() {
        let picking = ScenePicking::default();
        let hit = picking
            .pick(
                &ReferenceFrame::y_up(),
                DVec3::new(0.0, 10.0, 0.0),
                DVec3::new(0.0, -1.0, -1.0).normalize(),
            )
            .expect("ray reaches the ground");
        assert!((hit.position - DVec3::new(0.0, 0.0, -10.0)).length() < 1e-9);
    }

    #[test]
    fn test_host_backend_tracks_live_resources() {
        let mut backend = HostBackend::default();
        let id = backend
            .create_vertex_array("test", PrimitiveKind::Lines, &[])
            .expect("host backend never fails");
        assert_eq!(backend.live_resources(), 1);
        backend.release(id);
        assert_eq!(backend.live_resources(), 0);
        assert!(backend.update_vertex_array(id, &[]).is_err());
    }
}
