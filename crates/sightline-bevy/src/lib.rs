//! Sightline Bevy Plugin: drives sensor volumes and viewsheds from Bevy's ECS.
//!
//! Provides `SightlinePlugin` which registers all resources, messages, and
//! systems needed to run the sightline core and GPU passes within a Bevy
//! application.

pub mod config;
pub mod events;
pub mod resources;
pub mod systems;

use bevy::prelude::*;

pub use config::SightlineConfig;
pub use resources::{ScenePicker, ScenePicking, ViewshedImage, ViewshedOutput};

use events::{SensorFrameReady, SightlineCommand, ViewshedCancelled, ViewshedCommitted};
use resources::{HostBackend, Occluders, SensorFrame, SensorScene, ViewshedState};
use systems::{
    apply_config, consume_viewshed_output, draw_debug_gizmos, drive_viewshed_gesture,
    handle_sightline_commands, init_gpu, release_on_exit, render_offscreen,
    setup_viewshed_image, update_sensor_visualizers, update_viewshed_image,
};

/// Main Bevy plugin for sightline.
///
/// Registers resources, messages, and systems for:
/// - Keeping sensor entities and their visualizers as Bevy resources
/// - Producing sensor draw commands every frame from the virtual clock
/// - The two-click viewshed construction gesture with a live preview
/// - GPU pass creation at startup and per-frame offscreen submission
/// - Async readback of the finished frame into the `ViewshedImage`
/// - Debug gizmos for the observer frustum and sensor outlines
pub struct SightlinePlugin;

impl Plugin for SightlinePlugin {
    fn build(&self, app: &mut App) {
        app.add_message::<SightlineCommand>()
            .add_message::<ViewshedCommitted>()
            .add_message::<ViewshedCancelled>()
            .add_message::<SensorFrameReady>()
            .init_resource::<SightlineConfig>()
            .init_resource::<SensorScene>()
            .init_resource::<SensorFrame>()
            .init_resource::<HostBackend>()
            .init_resource::<ScenePicking>()
            .init_resource::<Occluders>()
            .init_resource::<ViewshedState>()
            .init_resource::<ViewshedOutput>()
            .add_systems(Startup, (apply_config, init_gpu, setup_viewshed_image))
            .add_systems(
                Update,
                (
                    handle_sightline_commands,
                    update_sensor_visualizers.after(handle_sightline_commands),
                    drive_viewshed_gesture.after(handle_sightline_commands),
                    render_offscreen
                        .after(update_sensor_visualizers)
                        .after(drive_viewshed_gesture),
                    consume_viewshed_output.after(render_offscreen),
                    update_viewshed_image.after(consume_viewshed_output),
                    draw_debug_gizmos.after(drive_viewshed_gesture),
                ),
            )
            .add_systems(Last, release_on_exit);
    }
}
