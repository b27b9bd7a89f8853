//! Sightline Core: domain layer for sensor volumes and viewshed analysis.
//!
//! This crate contains the sensor geometry, parameter controller, resource
//! cache and draw-command assembly, scan-plane animation, light frustum math
//! and the CPU reference of the visibility classifier. No GPU or framework
//! dependencies: GPU allocation goes through the [`RenderBackend`] trait.

pub mod color;
pub mod error;
pub mod frame;
pub mod geodesy;
pub mod registry;
pub mod sensor;
pub mod viewshed;

// Re-exports for convenience.
pub use color::Color;
pub use error::SightlineError;
pub use frame::{FrameState, SceneMode};
pub use geodesy::{Cartographic, Ellipsoid, ReferenceFrame};
pub use registry::{
    Entity, EntityCollection, EntityId, Visualizer, VisualizerRegistry, VisualizerSet,
};
pub use sensor::cache::{BackendError, RenderBackend, ResourceId};
pub use sensor::commands::{DrawCommand, ShaderVariant, SurfaceKind};
pub use sensor::params::{ScanPlaneMode, SensorVolumeParameters};
pub use sensor::primitive::SensorPrimitive;
pub use sensor::visualizer::SensorVisualizer;
pub use sensor::volume::SensorVolume;
pub use viewshed::analysis::Viewshed;
pub use viewshed::frustum::{ObserverFrustum, ViewshedSettings};
pub use viewshed::gesture::{ConstructionGesture, GestureEvent, GestureInput, Pick};
pub use viewshed::light::LightCamera;
pub use viewshed::shadow::PickSurface;
