//! Entities and the visualizers that draw them.
//!
//! The host owns a [`VisualizerRegistry`] and registers visualizer factories
//! into it once at startup. For every entity collection it displays, the host
//! asks the registry for a fresh [`VisualizerSet`] and updates that set each
//! frame.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::frame::FrameState;
use crate::sensor::cache::RenderBackend;
use crate::sensor::params::SensorVolumeParameters;

/// Stable identifier of an entity within its collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

/// A scene object that may carry a sensor volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_show")]
    pub show: bool,
    #[serde(default)]
    pub sensor: Option<SensorVolumeParameters>,
}

fn default_show() -> bool {
    true
}

impl Entity {
    pub fn new(id: EntityId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            show: true,
            sensor: None,
        }
    }

    pub fn with_sensor(mut self, params: SensorVolumeParameters) -> Self {
        self.sensor = Some(params);
        self
    }
}

/// An ordered set of entities keyed by id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityCollection {
    entities: BTreeMap<EntityId, Entity>,
}

impl EntityCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entity.
    pub fn insert(&mut self, entity: Entity) -> Option<Entity> {
        self.entities.insert(entity.id, entity)
    }

    pub fn remove(&mut self, id: EntityId) -> Option<Entity> {
        self.entities.remove(&id)
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Turns entities of one kind into draw commands.
pub trait Visualizer: Send + Sync {
    /// Sync with `entities` and append this frame's draw commands.
    fn update(
        &mut self,
        entities: &EntityCollection,
        frame: &mut FrameState,
        backend: &mut dyn RenderBackend,
    );

    /// Release everything this visualizer allocated. Safe to call twice.
    fn destroy(&mut self, backend: &mut dyn RenderBackend);
}

type Factory = Box<dyn Fn() -> Box<dyn Visualizer> + Send + Sync>;

/// Host-owned list of visualizer factories.
#[derive(Default)]
pub struct VisualizerRegistry {
    factories: Vec<(&'static str, Factory)>,
}

impl std::fmt::Debug for VisualizerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisualizerRegistry")
            .field("factories", &self.names().collect::<Vec<_>>())
            .finish()
    }
}

impl VisualizerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `name`, replacing any earlier one.
    pub fn register<F>(&mut self, name: &'static str, factory: F)
    where
        F: Fn() -> Box<dyn Visualizer> + Send + Sync + 'static,
    {
        if let Some(slot) = self.factories.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = Box::new(factory);
            tracing::debug!(name, "replaced visualizer factory");
        } else {
            self.factories.push((name, Box::new(factory)));
            tracing::debug!(name, "registered visualizer factory");
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.iter().map(|(n, _)| *n)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// One visualizer per registered factory, for a single collection.
    pub fn create_visualizers(&self) -> VisualizerSet {
        VisualizerSet {
            visualizers: self.factories.iter().map(|(_, f)| f()).collect(),
            destroyed: false,
        }
    }
}

/// The visualizers attached to one entity collection.
pub struct VisualizerSet {
    visualizers: Vec<Box<dyn Visualizer>>,
    destroyed: bool,
}

impl VisualizerSet {
    pub fn update(
        &mut self,
        entities: &EntityCollection,
        frame: &mut FrameState,
        backend: &mut dyn RenderBackend,
    ) {
        if self.destroyed {
            return;
        }
        for visualizer in &mut self.visualizers {
            visualizer.update(entities, frame, backend);
        }
    }

    pub fn destroy(&mut self, backend: &mut dyn RenderBackend) {
        if self.destroyed {
            return;
        }
        for visualizer in &mut self.visualizers {
            visualizer.destroy(backend);
        }
        self.destroyed = true;
    }

    pub fn len(&self) -> usize {
        self.visualizers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visualizers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::frame::SceneMode;
    use crate::sensor::testing::RecordingBackend;

    struct Counting(Arc<AtomicUsize>);

    impl Visualizer for Counting {
        fn update(&mut self, _: &EntityCollection, _: &mut FrameState, _: &mut dyn RenderBackend) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }

        fn destroy(&mut self, _: &mut dyn RenderBackend) {}
    }

    #[test]
    fn test_registry_creates_one_visualizer_per_factory() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = VisualizerRegistry::new();
        let c = calls.clone();
        registry.register("counting", move || Box::new(Counting(c.clone())));
        let c = calls.clone();
        registry.register("counting-again", move || Box::new(Counting(c.clone())));

        let mut set = registry.create_visualizers();
        assert_eq!(set.len(), 2);
        let mut backend = RecordingBackend::default();
        let mut frame = FrameState::new(SceneMode::Scene3D, 0.0);
        set.update(&EntityCollection::new(), &mut frame, &mut backend);
        assert_eq!(calls.load(Ordering::Relaxed), 2);

        set.destroy(&mut backend);
        set.update(&EntityCollection::new(), &mut frame, &mut backend);
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_register_same_name_replaces() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = VisualizerRegistry::new();
        for _ in 0..3 {
            let c = calls.clone();
            registry.register("counting", move || Box::new(Counting(c.clone())));
        }
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["counting"]);
    }

    #[test]
    fn test_entity_collection_from_json() {
        let json = r#"{ "entities": { "7": { "id": 7, "name": "radar", "sensor": { "radius": 500.0 } } } }"#;
        let collection: EntityCollection =
            serde_json::from_str(json).expect("collection should parse");
        let entity = collection.get(EntityId(7)).expect("entity present");
        assert!(entity.show);
        assert_eq!(entity.sensor.as_ref().map(|s| s.radius), Some(500.0));
    }
}
