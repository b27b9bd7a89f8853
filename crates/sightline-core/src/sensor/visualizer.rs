//! Visualizer that keeps one [`SensorPrimitive`] per entity with a sensor.

use std::collections::HashMap;

use super::cache::RenderBackend;
use super::primitive::SensorPrimitive;
use crate::frame::FrameState;
use crate::registry::{EntityCollection, EntityId, Visualizer, VisualizerRegistry};

/// Registry name of the sensor visualizer.
pub const SENSOR_VISUALIZER: &str = "sensor";

#[derive(Debug, Default)]
pub struct SensorVisualizer {
    primitives: HashMap<EntityId, SensorPrimitive>,
    destroyed: bool,
}

impl SensorVisualizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the sensor visualizer factory to `registry`.
    pub fn register(registry: &mut VisualizerRegistry) {
        registry.register(SENSOR_VISUALIZER, || Box::new(SensorVisualizer::new()));
    }

    pub fn primitive(&self, id: EntityId) -> Option<&SensorPrimitive> {
        self.primitives.get(&id)
    }

    pub fn len(&self) -> usize {
        self.primitives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primitives.is_empty()
    }

    fn sync(&mut self, entities: &EntityCollection, backend: &mut dyn RenderBackend) {
        self.primitives.retain(|id, primitive| {
            let keep = entities.get(*id).is_some_and(|e| e.sensor.is_some());
            if !keep {
                primitive.destroy(backend);
            }
            keep
        });

        for entity in entities.iter() {
            let Some(sensor) = &entity.sensor else {
                continue;
            };
            let mut params = sensor.clone();
            params.show &= entity.show;

            match self.primitives.get_mut(&entity.id) {
                Some(primitive) => {
                    if let Err(e) = primitive.volume_mut().apply(&params) {
                        tracing::warn!(entity = entity.id.0, "rejected sensor update: {e}");
                    }
                }
                None => match SensorPrimitive::new(params) {
                    Ok(primitive) => {
                        tracing::debug!(entity = entity.id.0, "created sensor primitive");
                        self.primitives.insert(entity.id, primitive);
                    }
                    Err(e) => {
                        tracing::warn!(entity = entity.id.0, "invalid sensor parameters: {e}");
                    }
                },
            }
        }
    }
}

impl Visualizer for SensorVisualizer {
    fn update(
        &mut self,
        entities: &EntityCollection,
        frame: &mut FrameState,
        backend: &mut dyn RenderBackend,
    ) {
        if self.destroyed {
            return;
        }
        self.sync(entities, backend);
        for primitive in self.primitives.values_mut() {
            primitive.update(frame, backend);
        }
    }

    fn destroy(&mut self, backend: &mut dyn RenderBackend) {
        for (_, mut primitive) in self.primitives.drain() {
            primitive.destroy(backend);
        }
        self.destroyed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color;
    use crate::frame::SceneMode;
    use crate::registry::Entity;
    use crate::sensor::params::SensorVolumeParameters;
    use crate::sensor::testing::RecordingBackend;

    fn opaque() -> SensorVolumeParameters {
        SensorVolumeParameters {
            lateral_surface_color: Color::YELLOW,
            dome_surface_color: Color::YELLOW,
            ..Default::default()
        }
    }

    #[test]
    fn test_visualizer_tracks_entities() {
        let mut entities = EntityCollection::new();
        entities.insert(Entity::new(EntityId(1), "a").with_sensor(opaque()));
        entities.insert(Entity::new(EntityId(2), "b").with_sensor(opaque()));
        entities.insert(Entity::new(EntityId(3), "no sensor"));

        let mut vis = SensorVisualizer::new();
        let mut backend = RecordingBackend::default();
        let mut frame = FrameState::new(SceneMode::Scene3D, 0.0);
        vis.update(&entities, &mut frame, &mut backend);
        assert_eq!(vis.len(), 2);
        assert_eq!(frame.commands.len(), 10);

        entities.remove(EntityId(1));
        let mut frame = FrameState::new(SceneMode::Scene3D, 0.1);
        vis.update(&entities, &mut frame, &mut backend);
        assert_eq!(vis.len(), 1);
        assert_eq!(frame.commands.len(), 5);
    }

    #[test]
    fn test_hidden_entity_draws_nothing() {
        let mut entities = EntityCollection::new();
        let mut entity = Entity::new(EntityId(9), "hidden").with_sensor(opaque());
        entity.show = false;
        entities.insert(entity);

        let mut vis = SensorVisualizer::new();
        let mut backend = RecordingBackend::default();
        let mut frame = FrameState::new(SceneMode::Scene3D, 0.0);
        vis.update(&entities, &mut frame, &mut backend);
        assert!(frame.commands.is_empty());
    }

    #[test]
    fn test_invalid_update_keeps_previous_sensor() {
        let mut entities = EntityCollection::new();
        entities.insert(Entity::new(EntityId(4), "radar").with_sensor(opaque()));
        let mut vis = SensorVisualizer::new();
        let mut backend = RecordingBackend::default();
        let mut frame = FrameState::new(SceneMode::Scene3D, 0.0);
        vis.update(&entities, &mut frame, &mut backend);

        if let Some(sensor) = entities
            .get_mut(EntityId(4))
            .and_then(|e| e.sensor.as_mut())
        {
            sensor.radius = -3.0;
        }
        vis.update(&entities, &mut frame, &mut backend);
        let radius = vis
            .primitive(EntityId(4))
            .map(|p| p.volume().params().radius);
        assert_eq!(radius, Some(1000.0));
    }

    #[test]
    fn test_registered_factory_and_destroy() {
        let mut registry = VisualizerRegistry::new();
        SensorVisualizer::register(&mut registry);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec![SENSOR_VISUALIZER]);

        let mut entities = EntityCollection::new();
        entities.insert(Entity::new(EntityId(1), "a").with_sensor(opaque()));
        let mut set = registry.create_visualizers();
        let mut backend = RecordingBackend::default();
        let mut frame = FrameState::new(SceneMode::Scene3D, 0.0);
        set.update(&entities, &mut frame, &mut backend);
        assert!(backend.live() > 0);

        set.destroy(&mut backend);
        set.destroy(&mut backend);
        assert_eq!(backend.live(), 0);
    }
}
