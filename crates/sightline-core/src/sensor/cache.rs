//! Render resource cache.
//!
//! The cache remembers which generation of each tier it last built and, on
//! every update, rebuilds only the stale tiers in dependency order:
//! geometry → render state → shader → commands. Commands also rebuild when
//! render states or shaders changed during the same update.
//!
//! GPU allocation is delegated to a [`RenderBackend`]. A failure leaves the
//! failing tier stale so the next update retries it.

use std::collections::HashMap;

use super::commands::{
    self, CullMode, DrawCommand, ShaderVariant, VertexSource, required_render_states,
    required_shaders,
};
use super::geometry::{self, Mesh, PrimitiveKind, SensorVertex};
use super::volume::{Generations, SensorVolume};

/// Opaque handle to a backend resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u64);

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Errors a backend may report while allocating or updating resources.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    #[error("resource allocation failed: {0}")]
    Allocation(String),

    #[error("unknown resource {0}")]
    UnknownResource(ResourceId),

    #[error("unsupported by this backend: {0}")]
    Unsupported(String),
}

/// Fixed-function state a sensor surface is drawn with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderStateKey {
    /// Alpha blending on, depth writes off.
    pub translucent: bool,
    /// Depth test disabled so the surface shows through the globe.
    pub show_through_ellipsoid: bool,
    pub cull: CullMode,
    pub primitive: PrimitiveKind,
}

/// Allocation interface the cache drives.
///
/// Implementations own the actual GPU objects; the cache only keeps ids.
pub trait RenderBackend {
    /// Upload a new vertex array.
    fn create_vertex_array(
        &mut self,
        label: &str,
        primitive: PrimitiveKind,
        vertices: &[SensorVertex],
    ) -> Result<ResourceId, BackendError>;

    /// Replace the contents of an existing vertex array, keeping its id.
    fn update_vertex_array(
        &mut self,
        id: ResourceId,
        vertices: &[SensorVertex],
    ) -> Result<(), BackendError>;

    fn create_render_state(&mut self, key: &RenderStateKey) -> Result<ResourceId, BackendError>;

    fn create_shader_program(&mut self, variant: ShaderVariant)
    -> Result<ResourceId, BackendError>;

    /// Free a resource. Unknown ids are ignored.
    fn release(&mut self, id: ResourceId);
}

/// A vertex array id and how many vertices it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexArray {
    pub id: ResourceId,
    pub vertex_count: u32,
}

/// What an update rebuilt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub geometry: bool,
    pub render_state: bool,
    pub shader: bool,
    pub commands: bool,
}

/// Cached resources for one sensor volume.
#[derive(Debug, Default)]
pub struct ResourceCache {
    built: Generations,
    vertex_arrays: HashMap<VertexSource, VertexArray>,
    render_states: HashMap<RenderStateKey, ResourceId>,
    programs: HashMap<ShaderVariant, ResourceId>,
    commands: Vec<DrawCommand>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vertex_array(&self, source: VertexSource) -> Option<VertexArray> {
        self.vertex_arrays.get(&source).copied()
    }

    pub fn render_state(&self, key: &RenderStateKey) -> Option<ResourceId> {
        self.render_states.get(key).copied()
    }

    pub fn shader_program(&self, variant: ShaderVariant) -> Option<ResourceId> {
        self.programs.get(&variant).copied()
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn commands_mut(&mut self) -> &mut [DrawCommand] {
        &mut self.commands
    }

    /// Generations this cache last built.
    pub fn built_generations(&self) -> Generations {
        self.built
    }

    /// Whether any tier is behind `volume`.
    pub fn is_stale(&self, volume: &SensorVolume) -> bool {
        self.built != volume.generations()
    }

    /// Rebuild every stale tier.
    pub fn update(
        &mut self,
        volume: &SensorVolume,
        backend: &mut dyn RenderBackend,
    ) -> Result<RebuildReport, BackendError> {
        let target = volume.generations();
        let params = volume.params();
        let mut report = RebuildReport::default();

        if self.built.geometry != target.geometry {
            self.rebuild_geometry(
                params.x_half_angle,
                params.y_half_angle,
                params.slice,
                backend,
            )?;
            self.built.geometry = target.geometry;
            report.geometry = true;
        }

        if self.built.render_state != target.render_state {
            let keys = required_render_states(params);
            self.render_states.retain(|key, id| {
                let keep = keys.contains(key);
                if !keep {
                    backend.release(*id);
                }
                keep
            });
            for key in keys {
                if !self.render_states.contains_key(&key) {
                    let id = backend.create_render_state(&key)?;
                    self.render_states.insert(key, id);
                }
            }
            self.built.render_state = target.render_state;
            report.render_state = true;
        }

        if self.built.shader != target.shader {
            let variants = required_shaders(params);
            self.programs.retain(|variant, id| {
                let keep = variants.contains(variant);
                if !keep {
                    backend.release(*id);
                }
                keep
            });
            for variant in variants {
                if !self.programs.contains_key(&variant) {
                    let id = backend.create_shader_program(variant)?;
                    tracing::debug!(?variant, %id, "compiled sensor shader program");
                    self.programs.insert(variant, id);
                }
            }
            self.built.shader = target.shader;
            report.shader = true;
        }

        if self.built.commands != target.commands || report.render_state || report.shader {
            self.commands = commands::assemble(params, self);
            self.built.commands = target.commands;
            report.commands = true;
        }

        Ok(report)
    }

    fn rebuild_geometry(
        &mut self,
        x_half_angle: f64,
        y_half_angle: f64,
        slice: u32,
        backend: &mut dyn RenderBackend,
    ) -> Result<(), BackendError> {
        match geometry::build_sector(x_half_angle, y_half_angle, slice) {
            Some(sector) => {
                self.upload(VertexSource::SectorFaces, &sector.faces, backend)?;
                self.upload(VertexSource::SectorLines, &sector.sector_lines, backend)?;
                self.upload(VertexSource::SeamLines, &sector.seam_lines, backend)?;
            }
            None => {
                for source in [
                    VertexSource::SectorFaces,
                    VertexSource::SectorLines,
                    VertexSource::SeamLines,
                ] {
                    if let Some(array) = self.vertex_arrays.remove(&source) {
                        backend.release(array.id);
                    }
                }
            }
        }

        let dome = geometry::build_dome(slice);
        self.upload(VertexSource::Dome, &dome.surface, backend)?;
        self.upload(VertexSource::DomeLines, &dome.lines, backend)?;
        self.upload(
            VertexSource::ScanWedge,
            &geometry::build_scan_wedge(slice),
            backend,
        )?;

        tracing::debug!(
            x_half_angle,
            y_half_angle,
            slice,
            arrays = self.vertex_arrays.len(),
            "rebuilt sensor geometry"
        );
        Ok(())
    }

    /// Upload into the existing array for `source`, or create one.
    fn upload(
        &mut self,
        source: VertexSource,
        mesh: &Mesh,
        backend: &mut dyn RenderBackend,
    ) -> Result<(), BackendError> {
        let vertex_count = u32::try_from(mesh.vertices.len())
            .map_err(|_| BackendError::Allocation(format!("{source:?} has too many vertices")))?;
        match self.vertex_arrays.get_mut(&source) {
            Some(array) => {
                backend.update_vertex_array(array.id, &mesh.vertices)?;
                array.vertex_count = vertex_count;
            }
            None => {
                let label = format!("sensor {source:?}");
                let id = backend.create_vertex_array(&label, mesh.primitive, &mesh.vertices)?;
                self.vertex_arrays
                    .insert(source, VertexArray { id, vertex_count });
            }
        }
        Ok(())
    }

    /// Release every resource and forget all built generations.
    pub fn release_all(&mut self, backend: &mut dyn RenderBackend) {
        for (_, array) in self.vertex_arrays.drain() {
            backend.release(array.id);
        }
        for (_, id) in self.render_states.drain() {
            backend.release(id);
        }
        for (_, id) in self.programs.drain() {
            backend.release(id);
        }
        self.commands.clear();
        self.built = Generations::default();
    }
}
