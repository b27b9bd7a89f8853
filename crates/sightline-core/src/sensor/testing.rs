//! In-memory `RenderBackend` that records every call.

use std::collections::{HashMap, HashSet};

use super::cache::{BackendError, RenderBackend, RenderStateKey, ResourceId};
use super::commands::ShaderVariant;
use super::geometry::{PrimitiveKind, SensorVertex};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Resource {
    VertexArray {
        primitive: PrimitiveKind,
        vertex_count: usize,
    },
    RenderState(RenderStateKey),
    Program(ShaderVariant),
}

#[derive(Debug, Default)]
pub(crate) struct RecordingBackend {
    next_id: u64,
    live: HashMap<ResourceId, Resource>,
    released: HashSet<ResourceId>,
    created: usize,
    updates: usize,
    failures_pending: usize,
}

impl RecordingBackend {
    /// Make the next `count` create calls fail.
    pub(crate) fn fail_next(&mut self, count: usize) {
        self.failures_pending = count;
    }

    pub(crate) fn created(&self) -> usize {
        self.created
    }

    pub(crate) fn updates(&self) -> usize {
        self.updates
    }

    pub(crate) fn live(&self) -> usize {
        self.live.len()
    }

    pub(crate) fn is_released(&self, id: ResourceId) -> bool {
        self.released.contains(&id)
    }

    fn allocate(&mut self, resource: Resource) -> Result<ResourceId, BackendError> {
        if self.failures_pending > 0 {
            self.failures_pending -= 1;
            return Err(BackendError::Allocation("injected failure".into()));
        }
        self.next_id += 1;
        let id = ResourceId(self.next_id);
        self.live.insert(id, resource);
        self.created += 1;
        Ok(id)
    }
}

impl RenderBackend for RecordingBackend {
    fn create_vertex_array(
        &mut self,
        _label: &str,
        primitive: PrimitiveKind,
        vertices: &[SensorVertex],
    ) -> Result<ResourceId, BackendError> {
        self.allocate(Resource::VertexArray {
            primitive,
            vertex_count: vertices.len(),
        })
    }

    fn update_vertex_array(
        &mut self,
        id: ResourceId,
        vertices: &[SensorVertex],
    ) -> Result<(), BackendError> {
        match self.live.get_mut(&id) {
            Some(Resource::VertexArray { vertex_count, .. }) => {
                *vertex_count = vertices.len();
                self.updates += 1;
                Ok(())
            }
            _ => Err(BackendError::UnknownResource(id)),
        }
    }

    fn create_render_state(&mut self, key: &RenderStateKey) -> Result<ResourceId, BackendError> {
        self.allocate(Resource::RenderState(*key))
    }

    fn create_shader_program(
        &mut self,
        variant: ShaderVariant,
    ) -> Result<ResourceId, BackendError> {
        self.allocate(Resource::Program(variant))
    }

    fn release(&mut self, id: ResourceId) {
        if self.live.remove(&id).is_some() {
            self.released.insert(id);
        }
    }
}
