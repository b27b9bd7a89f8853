//! Draw command assembly.
//!
//! A fixed surface table drives everything: each [`SurfaceRecord`] names the
//! vertex stream, shader variant and primitive of one sensor surface. Cull
//! modes and the render pass follow from the surface color: translucent
//! triangle surfaces draw their back faces first and then their front faces,
//! opaque ones cull back faces, lines never cull and are never doubled.

use bytemuck::{Pod, Zeroable};
use glam::{DMat4, DVec3};

use super::cache::{RenderStateKey, ResourceCache, ResourceId};
use super::geometry::PrimitiveKind;
use super::params::{ScanPlaneMode, SensorVolumeParameters};
use super::scan::ScanPose;
use crate::color::Color;

/// The drawable parts of a sensor volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceKind {
    Sector,
    SectorLines,
    SeamLines,
    Dome,
    DomeLines,
    ScanPlane,
}

/// Vertex streams owned by the resource cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexSource {
    SectorFaces,
    SectorLines,
    SeamLines,
    Dome,
    DomeLines,
    ScanWedge,
}

/// The two fixed shader programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderVariant {
    /// Sector, dome and outlines.
    Common,
    /// The animated scan wedge.
    ScanPlane,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    Back,
}

/// Which pass a command is recorded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderPass {
    Opaque,
    Translucent,
}

/// One row of the surface table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceRecord {
    pub kind: SurfaceKind,
    pub vertex_source: VertexSource,
    pub shader_variant: ShaderVariant,
    pub primitive: PrimitiveKind,
}

/// Every sensor surface, in draw order.
pub const SURFACE_TABLE: [SurfaceRecord; 6] = [
    SurfaceRecord {
        kind: SurfaceKind::Sector,
        vertex_source: VertexSource::SectorFaces,
        shader_variant: ShaderVariant::Common,
        primitive: PrimitiveKind::Triangles,
    },
    SurfaceRecord {
        kind: SurfaceKind::SectorLines,
        vertex_source: VertexSource::SectorLines,
        shader_variant: ShaderVariant::Common,
        primitive: PrimitiveKind::Lines,
    },
    SurfaceRecord {
        kind: SurfaceKind::SeamLines,
        vertex_source: VertexSource::SeamLines,
        shader_variant: ShaderVariant::Common,
        primitive: PrimitiveKind::Lines,
    },
    SurfaceRecord {
        kind: SurfaceKind::Dome,
        vertex_source: VertexSource::Dome,
        shader_variant: ShaderVariant::Common,
        primitive: PrimitiveKind::Triangles,
    },
    SurfaceRecord {
        kind: SurfaceKind::DomeLines,
        vertex_source: VertexSource::DomeLines,
        shader_variant: ShaderVariant::Common,
        primitive: PrimitiveKind::Lines,
    },
    SurfaceRecord {
        kind: SurfaceKind::ScanPlane,
        vertex_source: VertexSource::ScanWedge,
        shader_variant: ShaderVariant::ScanPlane,
        primitive: PrimitiveKind::Triangles,
    },
];

impl SurfaceKind {
    /// Whether the per-surface flag enables this surface.
    pub fn is_enabled(self, params: &SensorVolumeParameters) -> bool {
        match self {
            Self::Sector => params.show_lateral_surfaces,
            Self::SectorLines => params.show_sector_lines,
            Self::SeamLines => params.show_sector_seam_lines,
            Self::Dome => params.show_dome_surfaces,
            Self::DomeLines => params.show_dome_lines,
            Self::ScanPlane => params.show_scan_plane,
        }
    }

    pub fn color(self, params: &SensorVolumeParameters) -> Color {
        match self {
            Self::Sector => params.lateral_surface_color,
            Self::SectorLines | Self::SeamLines | Self::DomeLines => params.line_color,
            Self::Dome => params.dome_surface_color,
            Self::ScanPlane => params.scan_plane_color,
        }
    }

    /// Dome fragments outside the sensor footprint are discarded.
    pub fn clips_to_footprint(self) -> bool {
        matches!(self, Self::Dome | Self::DomeLines)
    }
}

impl SurfaceRecord {
    /// Cull modes to draw, in order.
    pub fn cull_modes(&self, translucent: bool) -> &'static [CullMode] {
        match (self.primitive, translucent) {
            (PrimitiveKind::Lines, _) => &[CullMode::None],
            (PrimitiveKind::Triangles, true) => &[CullMode::Front, CullMode::Back],
            (PrimitiveKind::Triangles, false) => &[CullMode::Back],
        }
    }
}

/// Render state keys needed for the enabled surfaces.
pub fn required_render_states(params: &SensorVolumeParameters) -> Vec<RenderStateKey> {
    let mut keys = Vec::new();
    for record in SURFACE_TABLE.iter().filter(|r| r.kind.is_enabled(params)) {
        let translucent = record.kind.color(params).is_translucent();
        for &cull in record.cull_modes(translucent) {
            let key = RenderStateKey {
                translucent,
                show_through_ellipsoid: params.show_through_ellipsoid,
                cull,
                primitive: record.primitive,
            };
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }
    keys
}

/// Shader programs needed for the enabled surfaces. `Common` is always kept.
pub fn required_shaders(params: &SensorVolumeParameters) -> Vec<ShaderVariant> {
    let mut variants = vec![ShaderVariant::Common];
    if params.show_scan_plane {
        variants.push(ShaderVariant::ScanPlane);
    }
    variants
}

// ── Commands ─────────────────────────────────────────────────────

/// Material inputs that only change when the command set is rebuilt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceMaterial {
    pub color: Color,
    pub intersection_color: Color,
    pub intersection_width: f32,
    pub x_half_angle: f64,
    pub y_half_angle: f64,
    pub ellipsoid_radii: DVec3,
    /// Discard fragments inside the ellipsoid.
    pub clip_to_ellipsoid: bool,
    pub clip_to_footprint: bool,
}

/// Inputs refreshed in place every frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTransform {
    pub model: DMat4,
    pub scan_x: f64,
    pub scan_y: f64,
    pub scan_mode: ScanPlaneMode,
}

impl Default for FrameTransform {
    fn default() -> Self {
        Self {
            model: DMat4::IDENTITY,
            scan_x: 0.0,
            scan_y: 0.0,
            scan_mode: ScanPlaneMode::Horizontal,
        }
    }
}

/// One draw of one surface with one cull mode.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCommand {
    pub surface: SurfaceKind,
    pub pass: RenderPass,
    pub cull: CullMode,
    pub primitive: PrimitiveKind,
    pub vertex_array: ResourceId,
    pub vertex_count: u32,
    pub render_state: ResourceId,
    pub shader: ResourceId,
    pub material: SurfaceMaterial,
    pub transform: FrameTransform,
}

impl DrawCommand {
    /// Refresh per-frame inputs.
    ///
    /// `placement` is the sensor's model matrix; the radius scale and, for the
    /// scan plane, the sweep rotation are applied here.
    pub fn refresh(
        &mut self,
        placement: DMat4,
        radius: f64,
        scan: Option<&ScanPose>,
        mode: ScanPlaneMode,
    ) {
        let scale = DMat4::from_scale(DVec3::splat(radius));
        self.transform = match (self.surface, scan) {
            (SurfaceKind::ScanPlane, Some(pose)) => FrameTransform {
                model: pose.model_matrix(placement, radius),
                scan_x: pose.scan_x,
                scan_y: pose.scan_y,
                scan_mode: mode,
            },
            _ => FrameTransform {
                model: placement * scale,
                scan_x: 0.0,
                scan_y: 0.0,
                scan_mode: mode,
            },
        };
    }
}

/// Build the command set from the enabled surfaces and cached resources.
///
/// Surfaces whose vertex stream, render state or program is missing (for
/// example a zero half-angle sector) are skipped.
pub fn assemble(params: &SensorVolumeParameters, cache: &ResourceCache) -> Vec<DrawCommand> {
    let mut commands = Vec::new();
    for record in SURFACE_TABLE.iter().filter(|r| r.kind.is_enabled(params)) {
        let Some(array) = cache.vertex_array(record.vertex_source) else {
            continue;
        };
        let Some(shader) = cache.shader_program(record.shader_variant) else {
            continue;
        };
        let color = record.kind.color(params);
        let translucent = color.is_translucent();
        let material = SurfaceMaterial {
            color,
            intersection_color: params.intersection_color,
            intersection_width: params.intersection_width,
            x_half_angle: params.x_half_angle,
            y_half_angle: params.y_half_angle,
            ellipsoid_radii: params.ellipsoid.radii,
            clip_to_ellipsoid: !params.show_through_ellipsoid,
            clip_to_footprint: record.kind.clips_to_footprint(),
        };

        for &cull in record.cull_modes(translucent) {
            let key = RenderStateKey {
                translucent,
                show_through_ellipsoid: params.show_through_ellipsoid,
                cull,
                primitive: record.primitive,
            };
            let Some(render_state) = cache.render_state(&key) else {
                continue;
            };
            commands.push(DrawCommand {
                surface: record.kind,
                pass: if translucent {
                    RenderPass::Translucent
                } else {
                    RenderPass::Opaque
                },
                cull,
                primitive: record.primitive,
                vertex_array: array.id,
                vertex_count: array.vertex_count,
                render_state,
                shader,
                material,
                transform: FrameTransform::default(),
            });
        }
    }
    commands
}

// ── GPU layout ───────────────────────────────────────────────────

/// Per-draw uniform block shared by `sensor.wgsl` and `sensor_scan.wgsl`.
///
/// The model-view matrix is composed in f64 so globe-scale translations cancel
/// before the conversion to f32.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SensorUniforms {
    pub model_view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub model: [[f32; 4]; 4],
    pub color: [f32; 4],
    pub intersection_color: [f32; 4],
    /// xyz = 1 / radii, w = minimum radius.
    pub inverse_radii: [f32; 4],
    /// x half-angle, y half-angle, scan x, scan y.
    pub angles: [f32; 4],
    /// intersection width, clip to footprint, clip to ellipsoid, scan mode.
    pub flags: [f32; 4],
}

impl SensorUniforms {
    pub fn new(command: &DrawCommand, view: DMat4, projection: DMat4) -> Self {
        let m = &command.material;
        let t = &command.transform;
        let inv = DVec3::ONE / m.ellipsoid_radii;
        Self {
            model_view: (view * t.model).as_mat4().to_cols_array_2d(),
            projection: projection.as_mat4().to_cols_array_2d(),
            model: t.model.as_mat4().to_cols_array_2d(),
            color: m.color.0,
            intersection_color: m.intersection_color.0,
            inverse_radii: [
                inv.x as f32,
                inv.y as f32,
                inv.z as f32,
                m.ellipsoid_radii.min_element() as f32,
            ],
            angles: [
                m.x_half_angle as f32,
                m.y_half_angle as f32,
                t.scan_x as f32,
                t.scan_y as f32,
            ],
            flags: [
                m.intersection_width,
                if m.clip_to_footprint { 1.0 } else { 0.0 },
                if m.clip_to_ellipsoid { 1.0 } else { 0.0 },
                t.scan_mode.to_u32() as f32,
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::testing::RecordingBackend;
    use crate::sensor::volume::SensorVolume;

    fn opaque_params() -> SensorVolumeParameters {
        SensorVolumeParameters {
            lateral_surface_color: Color::YELLOW,
            dome_surface_color: Color::GREEN,
            scan_plane_color: Color::WHITE,
            ..Default::default()
        }
    }

    fn built(params: SensorVolumeParameters) -> Vec<DrawCommand> {
        let volume = SensorVolume::new(params).expect("valid parameters");
        let mut backend = RecordingBackend::default();
        let mut cache = ResourceCache::new();
        cache
            .update(&volume, &mut backend)
            .expect("recording backend never fails");
        cache.commands().to_vec()
    }

    #[test]
    fn test_opaque_sensor_issues_five_commands() {
        assert_eq!(built(opaque_params()).len(), 5);
    }

    #[test]
    fn test_scan_plane_adds_one_command() {
        let params = SensorVolumeParameters {
            show_scan_plane: true,
            ..opaque_params()
        };
        let commands = built(params);
        assert_eq!(commands.len(), 6);
        assert!(
            commands
                .iter()
                .any(|c| c.surface == SurfaceKind::ScanPlane && c.cull == CullMode::Back)
        );
    }

    #[test]
    fn test_translucent_surfaces_double_lines_do_not() {
        let params = SensorVolumeParameters {
            line_color: Color::WHITE.with_alpha(0.5),
            ..Default::default()
        };
        let commands = built(params);
        // Sector and dome are translucent by default: 2 + 2, lines stay at 3.
        assert_eq!(commands.len(), 7);
        let sector: Vec<CullMode> = commands
            .iter()
            .filter(|c| c.surface == SurfaceKind::Sector)
            .map(|c| c.cull)
            .collect();
        assert_eq!(sector, vec![CullMode::Front, CullMode::Back]);
        assert!(
            commands
                .iter()
                .filter(|c| c.primitive == PrimitiveKind::Lines)
                .all(|c| c.cull == CullMode::None && c.pass == RenderPass::Translucent)
        );
    }

    #[test]
    fn test_zero_half_angle_skips_sector_surfaces() {
        let params = SensorVolumeParameters {
            x_half_angle: 0.0,
            ..opaque_params()
        };
        let commands = built(params);
        assert!(commands.iter().all(|c| matches!(
            c.surface,
            SurfaceKind::Dome | SurfaceKind::DomeLines
        )));
    }

    #[test]
    fn test_line_surfaces_share_line_color() {
        let params = SensorVolumeParameters {
            line_color: Color::RED,
            ..opaque_params()
        };
        for c in built(params)
            .iter()
            .filter(|c| c.primitive == PrimitiveKind::Lines)
        {
            assert_eq!(c.material.color, Color::RED);
        }
    }

    #[test]
    fn test_refresh_scales_by_radius() {
        let mut commands = built(opaque_params());
        let placement = DMat4::from_translation(DVec3::new(10.0, 0.0, 0.0));
        commands[0].refresh(placement, 250.0, None, ScanPlaneMode::Horizontal);
        let apex = commands[0].transform.model.transform_point3(DVec3::ZERO);
        let rim = commands[0].transform.model.transform_point3(DVec3::Z);
        assert!((apex - DVec3::new(10.0, 0.0, 0.0)).length() < 1e-9);
        assert!(((rim - apex).length() - 250.0).abs() < 1e-9);
    }
}
