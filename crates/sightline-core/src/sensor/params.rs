//! Sensor volume parameters.
//!
//! `SensorVolumeParameters` is the plain, serializable description of a
//! sensor. Presets are loaded from JSON; the live object is wrapped by
//! [`SensorVolume`](super::volume::SensorVolume), which owns invalidation.

use glam::DMat4;
use serde::{Deserialize, Serialize};

use crate::color::Color;
use crate::error::{SightlineError, ensure_finite};
use crate::geodesy::Ellipsoid;

/// Smallest tessellation that still produces a fan per face.
pub const MIN_SLICE: u32 = 2;
/// Largest accepted tessellation.
pub const MAX_SLICE: u32 = 1024;

/// Axis the scan plane sweeps across.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScanPlaneMode {
    /// A horizontal plane sweeping up and down through the y half-angle.
    #[default]
    Horizontal,
    /// A vertical plane sweeping left and right through the x half-angle.
    Vertical,
}

impl ScanPlaneMode {
    /// GPU-compatible integer for the shader uniform.
    pub const fn to_u32(self) -> u32 {
        match self {
            Self::Horizontal => 0,
            Self::Vertical => 1,
        }
    }
}

/// Full description of a rectangular sensor volume.
///
/// Angles are radians. The sensor looks down its local +Z axis; x spans the
/// local X axis and y the local Y axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorVolumeParameters {
    /// Range of the sensor in meters. `f64::INFINITY` is accepted.
    pub radius: f64,
    /// Half of the angular width along local X.
    pub x_half_angle: f64,
    /// Half of the angular width along local Y.
    pub y_half_angle: f64,
    /// Placement of the sensor apex and orientation in the fixed frame.
    pub model_matrix: DMat4,
    /// Arc samples per face edge.
    pub slice: u32,

    /// Master visibility switch.
    pub show: bool,
    pub show_lateral_surfaces: bool,
    pub show_sector_lines: bool,
    pub show_sector_seam_lines: bool,
    pub show_dome_surfaces: bool,
    pub show_dome_lines: bool,
    pub show_scan_plane: bool,
    /// Draw on top of the ellipsoid instead of being hidden behind it.
    pub show_through_ellipsoid: bool,

    pub lateral_surface_color: Color,
    pub dome_surface_color: Color,
    pub scan_plane_color: Color,
    pub line_color: Color,
    pub intersection_color: Color,
    /// Width in meters of the highlight where the volume meets the ellipsoid.
    pub intersection_width: f32,

    pub scan_plane_mode: ScanPlaneMode,
    /// Seconds for one full sweep.
    pub scan_plane_rate: f64,

    /// Ellipsoid used for the intersection highlight and occlusion test.
    pub ellipsoid: Ellipsoid,
}

impl Default for SensorVolumeParameters {
    fn default() -> Self {
        Self {
            radius: 1000.0,
            x_half_angle: 20f64.to_radians(),
            y_half_angle: 20f64.to_radians(),
            model_matrix: DMat4::IDENTITY,
            slice: 32,
            show: true,
            show_lateral_surfaces: true,
            show_sector_lines: true,
            show_sector_seam_lines: true,
            show_dome_surfaces: true,
            show_dome_lines: true,
            show_scan_plane: false,
            show_through_ellipsoid: false,
            lateral_surface_color: Color::rgba(1.0, 1.0, 0.0, 0.35),
            dome_surface_color: Color::rgba(1.0, 1.0, 0.0, 0.35),
            scan_plane_color: Color::rgba(1.0, 1.0, 1.0, 0.6),
            line_color: Color::WHITE,
            intersection_color: Color::WHITE,
            intersection_width: 5.0,
            scan_plane_mode: ScanPlaneMode::Horizontal,
            scan_plane_rate: 3.0,
            ellipsoid: Ellipsoid::WGS84,
        }
    }
}

impl SensorVolumeParameters {
    /// Parse and validate a JSON preset. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, SightlineError> {
        let params: Self = serde_json::from_str(json)?;
        params.validate()?;
        Ok(params)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String, SightlineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check every precondition.
    pub fn validate(&self) -> Result<(), SightlineError> {
        validate_radius(self.radius)?;
        validate_half_angle(self.x_half_angle)?;
        validate_half_angle(self.y_half_angle)?;
        validate_slice(self.slice)?;
        validate_scan_rate(self.scan_plane_rate)?;
        validate_intersection_width(self.intersection_width)?;
        for color in [
            self.lateral_surface_color,
            self.dome_surface_color,
            self.scan_plane_color,
            self.line_color,
            self.intersection_color,
        ] {
            validate_color(color)?;
        }
        if !self.model_matrix.is_finite() {
            return Err(SightlineError::NonFinite("model matrix"));
        }
        Ok(())
    }

    /// Whether the volume has no extent and therefore nothing to draw.
    pub fn is_degenerate(&self) -> bool {
        self.radius == 0.0 || self.x_half_angle == 0.0 || self.y_half_angle == 0.0
    }
}

pub(crate) fn validate_radius(radius: f64) -> Result<(), SightlineError> {
    if radius.is_nan() {
        return Err(SightlineError::NonFinite("radius"));
    }
    if radius < 0.0 {
        return Err(SightlineError::NegativeRadius(radius));
    }
    Ok(())
}

pub(crate) fn validate_half_angle(angle: f64) -> Result<(), SightlineError> {
    ensure_finite(angle, "half-angle")?;
    if !(0.0..std::f64::consts::FRAC_PI_2).contains(&angle) {
        return Err(SightlineError::HalfAngleOutOfRange(angle));
    }
    Ok(())
}

pub(crate) fn validate_slice(slice: u32) -> Result<(), SightlineError> {
    if !(MIN_SLICE..=MAX_SLICE).contains(&slice) {
        return Err(SightlineError::InvalidTessellation {
            got: slice,
            min: MIN_SLICE,
        });
    }
    Ok(())
}

pub(crate) fn validate_scan_rate(rate: f64) -> Result<(), SightlineError> {
    if !(rate.is_finite() && rate > 0.0) {
        return Err(SightlineError::InvalidScanRate(rate));
    }
    Ok(())
}

pub(crate) fn validate_intersection_width(width: f32) -> Result<(), SightlineError> {
    if !(width.is_finite() && width >= 0.0) {
        return Err(SightlineError::InvalidIntersectionWidth(width));
    }
    Ok(())
}

/// Channels must be finite and alpha must lie in `[0, 1]`.
pub(crate) fn validate_color(color: Color) -> Result<(), SightlineError> {
    if color.0.iter().any(|c| !c.is_finite()) {
        return Err(SightlineError::NonFinite("color"));
    }
    let alpha = color.alpha();
    if !(0.0..=1.0).contains(&alpha) {
        return Err(SightlineError::AlphaOutOfRange(alpha));
    }
    Ok(())
}
