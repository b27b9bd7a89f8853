//! Runtime configuration for the sightline plugin.

use bevy::prelude::*;
use sightline_core::viewshed::shadow::validate_shadow_map_size;
use sightline_core::{Color, ReferenceFrame, ViewshedSettings};

/// Shadow map resolution override.
pub const ENV_SHADOW_MAP_SIZE: &str = "SIGHTLINE_SHADOW_MAP_SIZE";
/// Soft shadow override (`1`/`true`/`on`).
pub const ENV_SOFT_SHADOWS: &str = "SIGHTLINE_SOFT_SHADOWS";
/// Draw the observer frustum with gizmos.
pub const ENV_DEBUG_FRUSTUM: &str = "SIGHTLINE_DEBUG_FRUSTUM";
/// Path to a JSON file with viewshed settings.
pub const ENV_CONFIG: &str = "SIGHTLINE_CONFIG";

/// Default offscreen target width.
const DEFAULT_WIDTH: u32 = 1280;
/// Default offscreen target height.
const DEFAULT_HEIGHT: u32 = 720;

/// Runtime configuration, read from the environment on first use.
#[derive(Resource, Clone, Debug)]
pub struct SightlineConfig {
    /// Frame picks and observers are expressed in. Bevy scenes are local.
    pub frame: ReferenceFrame,
    /// Settings new viewsheds are built with.
    pub viewshed: ViewshedSettings,
    /// Draw the observer frustum (preview and committed) with gizmos.
    pub debug_frustum: bool,
    /// Outline sensor volumes with gizmos.
    pub debug_sensors: bool,
    /// Size of the offscreen targets the GPU passes render into.
    pub offscreen_size: (u32, u32),
    /// Base color occluders are shaded with in the offscreen scene.
    pub occluder_color: Color,
}

impl Default for SightlineConfig {
    fn default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

impl SightlineConfig {
    /// Build from an environment lookup. Invalid values are logged and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut viewshed = lookup(ENV_CONFIG)
            .and_then(|path| load_settings(&path))
            .unwrap_or_default();

        if let Some(raw) = lookup(ENV_SHADOW_MAP_SIZE) {
            match raw.trim().parse::<u32>() {
                Ok(size) if validate_shadow_map_size(size).is_ok() => {
                    viewshed.shadow_map_size = size;
                }
                _ => tracing::warn!("{ENV_SHADOW_MAP_SIZE}={raw} is not a valid shadow map size"),
            }
        }
        if let Some(raw) = lookup(ENV_SOFT_SHADOWS) {
            viewshed.soft_shadows = parse_flag(&raw);
        }

        Self {
            frame: ReferenceFrame::y_up(),
            viewshed,
            debug_frustum: lookup(ENV_DEBUG_FRUSTUM).is_some_and(|v| parse_flag(&v)),
            debug_sensors: true,
            offscreen_size: (DEFAULT_WIDTH, DEFAULT_HEIGHT),
            occluder_color: Color::rgba(0.6, 0.6, 0.6, 1.0),
        }
    }
}

fn parse_flag(raw: &str) -> bool {
    !matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "off" | "no"
    )
}

fn load_settings(path: &str) -> Option<ViewshedSettings> {
    let json = match std::fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!("Failed to read {ENV_CONFIG} file {path}: {e}");
            return None;
        }
    };
    match ViewshedSettings::from_json(&json) {
        Ok(settings) => {
            tracing::info!("Loaded viewshed settings from {path}");
            Some(settings)
        }
        Err(e) => {
            tracing::warn!("Ignoring invalid viewshed settings in {path}: {e}");
            None
        }
    }
}
