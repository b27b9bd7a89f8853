//! The mutable configuration surface of a sensor volume.
//!
//! Setters validate synchronously, leave the volume unchanged on error, and
//! bump the generation counter of every cache tier the change invalidates.
//! Nothing is rebuilt here: the resource cache compares generations on the
//! next update.
//!
//! | setter | geometry | render state | shader | commands |
//! |---|---|---|---|---|
//! | half-angles, slice | ✓ | | | ✓ |
//! | radius | | | | ✓ |
//! | colors | | ✓ | | ✓ |
//! | show-through-ellipsoid | | ✓ | | |
//! | show flags | | ✓ | scan plane only | ✓ |
//! | intersection width | | | | ✓ |

use glam::DMat4;

use super::params::{
    ScanPlaneMode, SensorVolumeParameters, validate_color, validate_half_angle,
    validate_intersection_width, validate_radius, validate_scan_rate, validate_slice,
};
use crate::color::Color;
use crate::error::SightlineError;

/// Range used for the model scale when the radius is infinite.
pub const INFINITE_RADIUS_EXTENT: f64 = 5.0e7;

/// One generation counter per cache tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Generations {
    pub geometry: u64,
    pub render_state: u64,
    pub shader: u64,
    pub commands: u64,
}

impl Generations {
    /// Every tier at generation 1, so a fresh cache (all zero) is stale.
    const fn initial() -> Self {
        Self {
            geometry: 1,
            render_state: 1,
            shader: 1,
            commands: 1,
        }
    }
}

/// A sensor volume's parameters plus their invalidation state.
#[derive(Debug, Clone)]
pub struct SensorVolume {
    params: SensorVolumeParameters,
    generations: Generations,
}

/// Flags that toggle individual surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceToggle {
    Show,
    LateralSurfaces,
    SectorLines,
    SectorSeamLines,
    DomeSurfaces,
    DomeLines,
    ScanPlane,
}

/// Material colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceColor {
    LateralSurface,
    DomeSurface,
    ScanPlane,
    Line,
    Intersection,
}

impl SensorVolume {
    /// Validate `params` and wrap them.
    pub fn new(params: SensorVolumeParameters) -> Result<Self, SightlineError> {
        params.validate()?;
        Ok(Self {
            params,
            generations: Generations::initial(),
        })
    }

    pub fn params(&self) -> &SensorVolumeParameters {
        &self.params
    }

    pub fn generations(&self) -> Generations {
        self.generations
    }

    /// Radius used to scale the unit meshes; infinite ranges are clamped.
    pub fn render_radius(&self) -> f64 {
        if self.params.radius.is_infinite() {
            INFINITE_RADIUS_EXTENT
        } else {
            self.params.radius
        }
    }

    // ── Geometry ─────────────────────────────────────────────────

    pub fn set_x_half_angle(&mut self, angle: f64) -> Result<(), SightlineError> {
        self.set_half_angles(angle, self.params.y_half_angle)
    }

    pub fn set_y_half_angle(&mut self, angle: f64) -> Result<(), SightlineError> {
        self.set_half_angles(self.params.x_half_angle, angle)
    }

    /// Set both half-angles at once (one geometry rebuild).
    pub fn set_half_angles(&mut self, x: f64, y: f64) -> Result<(), SightlineError> {
        validate_half_angle(x)?;
        validate_half_angle(y)?;
        if x == self.params.x_half_angle && y == self.params.y_half_angle {
            return Ok(());
        }
        self.params.x_half_angle = x;
        self.params.y_half_angle = y;
        self.generations.geometry += 1;
        self.generations.commands += 1;
        Ok(())
    }

    pub fn set_slice(&mut self, slice: u32) -> Result<(), SightlineError> {
        validate_slice(slice)?;
        if slice != self.params.slice {
            self.params.slice = slice;
            self.generations.geometry += 1;
            self.generations.commands += 1;
        }
        Ok(())
    }

    pub fn set_radius(&mut self, radius: f64) -> Result<(), SightlineError> {
        validate_radius(radius)?;
        if radius != self.params.radius {
            self.params.radius = radius;
            self.generations.commands += 1;
        }
        Ok(())
    }

    /// Placement is read every frame, so no tier is invalidated.
    pub fn set_model_matrix(&mut self, model: DMat4) -> Result<(), SightlineError> {
        if !model.is_finite() {
            return Err(SightlineError::NonFinite("model matrix"));
        }
        self.params.model_matrix = model;
        Ok(())
    }

    // ── Appearance ───────────────────────────────────────────────

    pub fn set_visible(&mut self, toggle: SurfaceToggle, visible: bool) {
        let slot = match toggle {
            SurfaceToggle::Show => &mut self.params.show,
            SurfaceToggle::LateralSurfaces => &mut self.params.show_lateral_surfaces,
            SurfaceToggle::SectorLines => &mut self.params.show_sector_lines,
            SurfaceToggle::SectorSeamLines => &mut self.params.show_sector_seam_lines,
            SurfaceToggle::DomeSurfaces => &mut self.params.show_dome_surfaces,
            SurfaceToggle::DomeLines => &mut self.params.show_dome_lines,
            SurfaceToggle::ScanPlane => &mut self.params.show_scan_plane,
        };
        if *slot == visible {
            return;
        }
        *slot = visible;
        self.generations.render_state += 1;
        self.generations.commands += 1;
        if toggle == SurfaceToggle::ScanPlane {
            self.generations.shader += 1;
        }
    }

    pub fn set_color(&mut self, which: SurfaceColor, color: Color) -> Result<(), SightlineError> {
        validate_color(color)?;
        let slot = match which {
            SurfaceColor::LateralSurface => &mut self.params.lateral_surface_color,
            SurfaceColor::DomeSurface => &mut self.params.dome_surface_color,
            SurfaceColor::ScanPlane => &mut self.params.scan_plane_color,
            SurfaceColor::Line => &mut self.params.line_color,
            SurfaceColor::Intersection => &mut self.params.intersection_color,
        };
        if *slot != color {
            *slot = color;
            self.generations.render_state += 1;
            self.generations.commands += 1;
        }
        Ok(())
    }

    pub fn set_show_through_ellipsoid(&mut self, show_through: bool) {
        if show_through != self.params.show_through_ellipsoid {
            self.params.show_through_ellipsoid = show_through;
            self.generations.render_state += 1;
        }
    }

    pub fn set_intersection_width(&mut self, width: f32) -> Result<(), SightlineError> {
        validate_intersection_width(width)?;
        if width != self.params.intersection_width {
            self.params.intersection_width = width;
            self.generations.commands += 1;
        }
        Ok(())
    }

    // ── Scan plane ───────────────────────────────────────────────

    /// Sweep axis is a per-frame uniform; no tier is invalidated.
    pub fn set_scan_plane_mode(&mut self, mode: ScanPlaneMode) {
        self.params.scan_plane_mode = mode;
    }

    pub fn set_scan_plane_rate(&mut self, rate: f64) -> Result<(), SightlineError> {
        validate_scan_rate(rate)?;
        self.params.scan_plane_rate = rate;
        Ok(())
    }

    /// Apply a full parameter set, bumping only the tiers whose inputs changed.
    ///
    /// Validation happens up front, so a failing set leaves the volume as it was.
    pub fn apply(&mut self, next: &SensorVolumeParameters) -> Result<(), SightlineError> {
        next.validate()?;
        let prev = self.params.clone();

        self.set_half_angles(next.x_half_angle, next.y_half_angle)?;
        self.set_slice(next.slice)?;
        self.set_radius(next.radius)?;
        self.set_model_matrix(next.model_matrix)?;

        let toggles = [
            (SurfaceToggle::Show, next.show),
            (SurfaceToggle::LateralSurfaces, next.show_lateral_surfaces),
            (SurfaceToggle::SectorLines, next.show_sector_lines),
            (SurfaceToggle::SectorSeamLines, next.show_sector_seam_lines),
            (SurfaceToggle::DomeSurfaces, next.show_dome_surfaces),
            (SurfaceToggle::DomeLines, next.show_dome_lines),
            (SurfaceToggle::ScanPlane, next.show_scan_plane),
        ];
        for (toggle, visible) in toggles {
            self.set_visible(toggle, visible);
        }

        let colors = [
            (SurfaceColor::LateralSurface, next.lateral_surface_color),
            (SurfaceColor::DomeSurface, next.dome_surface_color),
            (SurfaceColor::ScanPlane, next.scan_plane_color),
            (SurfaceColor::Line, next.line_color),
            (SurfaceColor::Intersection, next.intersection_color),
        ];
        for (which, color) in colors {
            self.set_color(which, color)?;
        }

        self.set_show_through_ellipsoid(next.show_through_ellipsoid);
        self.set_intersection_width(next.intersection_width)?;
        self.set_scan_plane_mode(next.scan_plane_mode);
        self.set_scan_plane_rate(next.scan_plane_rate)?;

        if next.ellipsoid != prev.ellipsoid {
            self.params.ellipsoid = next.ellipsoid;
            self.generations.commands += 1;
        }
        Ok(())
    }
}
