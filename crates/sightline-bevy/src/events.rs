//! Bevy messages for driving sensors and viewsheds.

use bevy::prelude::*;
use glam::DVec3;
use sightline_core::{EntityId, SceneMode, SensorVolumeParameters, ViewshedSettings};

/// Inbound commands from the host UI.
#[derive(Message, Debug, Clone)]
pub enum SightlineCommand {
    /// Add a sensor entity, or replace its parameters.
    UpsertSensor {
        id: EntityId,
        name: String,
        params: SensorVolumeParameters,
    },
    SetSensorShown {
        id: EntityId,
        show: bool,
    },
    RemoveSensor {
        id: EntityId,
    },
    SetSceneMode(SceneMode),
    /// Begin the two-click viewshed construction.
    StartViewshed,
    /// Abort a construction in progress.
    CancelViewshed,
    /// Destroy the committed viewshed.
    ClearViewshed,
    SetViewshedSettings(ViewshedSettings),
}

/// Fired when a construction gesture committed a new viewshed.
#[derive(Message, Debug, Clone, Copy)]
pub struct ViewshedCommitted {
    pub observer: DVec3,
    pub target: DVec3,
}

/// Fired when a construction gesture was cancelled.
#[derive(Message, Debug, Clone, Copy)]
pub struct ViewshedCancelled;

/// Fired after the sensor visualizers produced this frame's draw commands.
#[derive(Message, Debug, Clone, Copy)]
pub struct SensorFrameReady {
    pub commands: usize,
}
