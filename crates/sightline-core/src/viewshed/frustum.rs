//! Observer configuration for a viewshed.
//!
//! The aim is described either by an end point or by distance, heading and
//! pitch in the east-north-up frame at the observer. Whichever was set last
//! is authoritative: the other description is recomputed from it, and moving
//! the observer re-derives the aim from the authoritative one.
//!
//! Heading is measured clockwise from north, pitch is the elevation above the
//! local horizon. Both are in degrees.
//!
//! Every change that affects the light camera or the shadow map bumps
//! `shadow_generation`; appearance-only changes do not.

use glam::{DQuat, DVec3};
use serde::{Deserialize, Serialize};

use super::light::LightCamera;
use super::shadow::{DEFAULT_SHADOW_MAP_SIZE, DEFAULT_SOFTNESS, PickSurface, ShadowMapSettings};
use crate::color::Color;
use crate::error::{SightlineError, ensure_finite};
use crate::geodesy::ReferenceFrame;

/// Appearance and filtering of a viewshed, loadable from a JSON preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewshedSettings {
    /// Full horizontal view angle in degrees, `(0, 180)`.
    pub horizontal_view_angle: f64,
    /// Full vertical view angle in degrees, `(0, 180)`.
    pub vertical_view_angle: f64,
    pub visible_area_color: Color,
    pub invisible_area_color: Color,
    /// Blend factor toward the tint colors, `[0, 1]`.
    pub alpha: f32,
    pub enabled: bool,
    pub soft_shadows: bool,
    /// PCF tap spacing in texels when soft shadows are on.
    pub softness: f32,
    pub shadow_map_size: u32,
}

impl Default for ViewshedSettings {
    fn default() -> Self {
        Self {
            horizontal_view_angle: 90.0,
            vertical_view_angle: 60.0,
            visible_area_color: Color::GREEN,
            invisible_area_color: Color::RED,
            alpha: 0.5,
            enabled: true,
            soft_shadows: false,
            softness: DEFAULT_SOFTNESS,
            shadow_map_size: DEFAULT_SHADOW_MAP_SIZE,
        }
    }
}

impl ViewshedSettings {
    pub fn from_json(json: &str) -> Result<Self, SightlineError> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SightlineError> {
        validate_view_angle(self.horizontal_view_angle)?;
        validate_view_angle(self.vertical_view_angle)?;
        validate_alpha(self.alpha)?;
        if !(self.softness.is_finite() && self.softness > 0.0) {
            return Err(SightlineError::NonFinite("softness"));
        }
        super::shadow::validate_shadow_map_size(self.shadow_map_size)
    }
}

fn validate_view_angle(degrees: f64) -> Result<(), SightlineError> {
    if !(degrees > 0.0 && degrees < 180.0) {
        return Err(SightlineError::ViewAngleOutOfRange(degrees));
    }
    Ok(())
}

fn validate_alpha(alpha: f32) -> Result<(), SightlineError> {
    if !(0.0..=1.0).contains(&alpha) {
        return Err(SightlineError::AlphaOutOfRange(alpha));
    }
    Ok(())
}

/// Which aim description was set last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AimAuthority {
    EndPoint,
    Polar,
}

#[derive(Debug, Clone)]
pub struct ObserverFrustum {
    frame: ReferenceFrame,
    origin: DVec3,
    end: DVec3,
    distance: f64,
    heading: f64,
    pitch: f64,
    authority: AimAuthority,
    settings: ViewshedSettings,
    pick_surface: PickSurface,
    light: LightCamera,
    shadow_generation: u64,
}

/// Distance, heading and pitch (degrees) of `end` seen from `origin`.
fn polar_of(frame: &ReferenceFrame, origin: DVec3, end: DVec3) -> (f64, f64, f64) {
    let offset = end - origin;
    let local = frame.enu_at(origin).to_local(offset);
    let heading = local.x.atan2(local.y).to_degrees();
    let pitch = local.z.atan2(local.x.hypot(local.y)).to_degrees();
    (offset.length(), heading, pitch)
}

/// End point at `distance` along heading/pitch (degrees) from `origin`.
fn end_of(
    frame: &ReferenceFrame,
    origin: DVec3,
    distance: f64,
    heading: f64,
    pitch: f64,
) -> DVec3 {
    let (sh, ch) = heading.to_radians().sin_cos();
    let (sp, cp) = pitch.to_radians().sin_cos();
    let local = DVec3::new(cp * sh, cp * ch, sp) * distance;
    origin + frame.enu_at(origin).to_fixed(local)
}

impl ObserverFrustum {
    /// Observer at `origin` looking at `end` with default settings.
    pub fn new(frame: ReferenceFrame, origin: DVec3, end: DVec3) -> Result<Self, SightlineError> {
        Self::with_settings(frame, origin, end, ViewshedSettings::default())
    }

    pub fn with_settings(
        frame: ReferenceFrame,
        origin: DVec3,
        end: DVec3,
        settings: ViewshedSettings,
    ) -> Result<Self, SightlineError> {
        if !origin.is_finite() || !end.is_finite() {
            return Err(SightlineError::NonFinite("observer position"));
        }
        settings.validate()?;
        let light = LightCamera::new(
            &frame,
            origin,
            end,
            settings.horizontal_view_angle,
            settings.vertical_view_angle,
        )?;
        let (distance, heading, pitch) = polar_of(&frame, origin, end);
        Ok(Self {
            frame,
            origin,
            end,
            distance,
            heading,
            pitch,
            authority: AimAuthority::EndPoint,
            settings,
            pick_surface: PickSurface::default(),
            light,
            shadow_generation: 1,
        })
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn frame(&self) -> &ReferenceFrame {
        &self.frame
    }

    pub fn view_position(&self) -> DVec3 {
        self.origin
    }

    pub fn view_position_end(&self) -> DVec3 {
        self.end
    }

    pub fn view_distance(&self) -> f64 {
        self.distance
    }

    pub fn view_heading(&self) -> f64 {
        self.heading
    }

    pub fn view_pitch(&self) -> f64 {
        self.pitch
    }

    pub fn settings(&self) -> &ViewshedSettings {
        &self.settings
    }

    pub fn pick_surface(&self) -> PickSurface {
        self.pick_surface
    }

    pub fn light_camera(&self) -> &LightCamera {
        &self.light
    }

    pub fn shadow_generation(&self) -> u64 {
        self.shadow_generation
    }

    /// Filtering parameters for the current pick surface and settings.
    pub fn shadow_settings(&self) -> ShadowMapSettings {
        ShadowMapSettings {
            size: self.settings.shadow_map_size,
            soft_shadows: self.settings.soft_shadows,
            softness: self.settings.softness,
            depth_bias: self.pick_surface.depth_bias(),
            normal_offset: self.pick_surface.normal_offset(),
        }
    }

    // ── Aim ──────────────────────────────────────────────────────

    /// Commit a new origin/end pair if it yields a valid light camera.
    fn commit_aim(&mut self, origin: DVec3, end: DVec3) -> Result<(), SightlineError> {
        if !origin.is_finite() || !end.is_finite() {
            return Err(SightlineError::NonFinite("observer position"));
        }
        let light = LightCamera::new(
            &self.frame,
            origin,
            end,
            self.settings.horizontal_view_angle,
            self.settings.vertical_view_angle,
        )?;
        self.origin = origin;
        self.end = end;
        self.light = light;
        self.shadow_generation += 1;
        Ok(())
    }

    /// Move the observer. The aim follows whichever description was set last.
    pub fn set_view_position(&mut self, origin: DVec3) -> Result<(), SightlineError> {
        match self.authority {
            AimAuthority::EndPoint => {
                self.commit_aim(origin, self.end)?;
                let (d, h, p) = polar_of(&self.frame, self.origin, self.end);
                self.distance = d;
                self.heading = h;
                self.pitch = p;
            }
            AimAuthority::Polar => {
                let end = end_of(&self.frame, origin, self.distance, self.heading, self.pitch);
                self.commit_aim(origin, end)?;
            }
        }
        Ok(())
    }

    /// Aim at `end`; distance, heading and pitch are recomputed from it.
    pub fn set_view_position_end(&mut self, end: DVec3) -> Result<(), SightlineError> {
        self.commit_aim(self.origin, end)?;
        let (d, h, p) = polar_of(&self.frame, self.origin, self.end);
        self.distance = d;
        self.heading = h;
        self.pitch = p;
        self.authority = AimAuthority::EndPoint;
        Ok(())
    }

    /// Rescale the aim along its current direction.
    ///
    /// A zero distance puts the target on the observer, which leaves the light
    /// camera without a direction, so it is rejected with
    /// [`SightlineError::CoincidentTarget`].
    pub fn set_view_distance(&mut self, distance: f64) -> Result<(), SightlineError> {
        ensure_finite(distance, "view distance")?;
        if distance < 0.0 {
            return Err(SightlineError::NegativeDistance(distance));
        }
        if distance == 0.0 {
            return Err(SightlineError::CoincidentTarget);
        }
        let direction = (self.end - self.origin).normalize();
        self.commit_aim(self.origin, self.origin + direction * distance)?;
        self.distance = distance;
        self.authority = AimAuthority::Polar;
        Ok(())
    }

    /// Turn the aim about the local up axis to `heading` degrees.
    pub fn set_view_heading(&mut self, heading: f64) -> Result<(), SightlineError> {
        ensure_finite(heading, "view heading")?;
        let delta = (heading - self.heading).to_radians();
        let enu = self.frame.enu_at(self.origin);
        let local = enu.to_local(self.end - self.origin);
        // Clockwise seen from above.
        let rotated = DQuat::from_axis_angle(DVec3::Z, -delta) * local;
        self.commit_aim(self.origin, self.origin + enu.to_fixed(rotated))?;
        self.heading = heading;
        self.authority = AimAuthority::Polar;
        Ok(())
    }

    /// Tilt the aim about the local right axis to `pitch` degrees.
    pub fn set_view_pitch(&mut self, pitch: f64) -> Result<(), SightlineError> {
        ensure_finite(pitch, "view pitch")?;
        if !(pitch > -90.0 && pitch < 90.0) {
            return Err(SightlineError::PitchOutOfRange(pitch));
        }
        let delta = (pitch - self.pitch).to_radians();
        let enu = self.frame.enu_at(self.origin);
        let local = enu.to_local(self.end - self.origin);
        let (sh, ch) = self.heading.to_radians().sin_cos();
        let right = DVec3::new(ch, -sh, 0.0);
        let rotated = DQuat::from_axis_angle(right, delta) * local;
        self.commit_aim(self.origin, self.origin + enu.to_fixed(rotated))?;
        self.pitch = pitch;
        self.authority = AimAuthority::Polar;
        Ok(())
    }

    // ── Appearance and filtering ─────────────────────────────────

    /// Replace the settings. Light and shadow state follow.
    pub fn set_settings(&mut self, settings: ViewshedSettings) -> Result<(), SightlineError> {
        settings.validate()?;
        let light = LightCamera::new(
            &self.frame,
            self.origin,
            self.end,
            settings.horizontal_view_angle,
            settings.vertical_view_angle,
        )?;
        let reshadow = settings.horizontal_view_angle != self.settings.horizontal_view_angle
            || settings.vertical_view_angle != self.settings.vertical_view_angle
            || settings.shadow_map_size != self.settings.shadow_map_size
            || settings.soft_shadows != self.settings.soft_shadows
            || settings.softness != self.settings.softness;
        self.settings = settings;
        self.light = light;
        if reshadow {
            self.shadow_generation += 1;
        }
        Ok(())
    }

    pub fn set_horizontal_view_angle(&mut self, degrees: f64) -> Result<(), SightlineError> {
        let settings = ViewshedSettings {
            horizontal_view_angle: degrees,
            ..self.settings.clone()
        };
        self.set_settings(settings)
    }

    pub fn set_vertical_view_angle(&mut self, degrees: f64) -> Result<(), SightlineError> {
        let settings = ViewshedSettings {
            vertical_view_angle: degrees,
            ..self.settings.clone()
        };
        self.set_settings(settings)
    }

    pub fn set_alpha(&mut self, alpha: f32) -> Result<(), SightlineError> {
        validate_alpha(alpha)?;
        self.settings.alpha = alpha;
        Ok(())
    }

    pub fn set_area_colors(&mut self, visible: Color, invisible: Color) {
        self.settings.visible_area_color = visible;
        self.settings.invisible_area_color = invisible;
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.settings.enabled = enabled;
    }

    pub fn set_soft_shadows(&mut self, soft: bool) {
        if soft != self.settings.soft_shadows {
            self.settings.soft_shadows = soft;
            self.shadow_generation += 1;
        }
    }

    pub fn set_shadow_map_size(&mut self, size: u32) -> Result<(), SightlineError> {
        super::shadow::validate_shadow_map_size(size)?;
        if size != self.settings.shadow_map_size {
            self.settings.shadow_map_size = size;
            self.shadow_generation += 1;
        }
        Ok(())
    }

    pub fn set_pick_surface(&mut self, surface: PickSurface) {
        if surface != self.pick_surface {
            self.pick_surface = surface;
            self.shadow_generation += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geodesy::{Cartographic, Ellipsoid};

    const EPSILON: f64 = 1e-6;

    fn guangzhou() -> ObserverFrustum {
        let e = Ellipsoid::WGS84;
        let origin = e.cartographic_to_cartesian(&Cartographic::from_degrees(113.0, 23.0, 20.0));
        let end = e.cartographic_to_cartesian(&Cartographic::from_degrees(113.001, 23.0005, 40.0));
        ObserverFrustum::new(ReferenceFrame::wgs84(), origin, end).expect("valid observer")
    }

    #[test]
    fn test_end_point_readback_is_consistent() {
        let f = guangzhou();
        let offset = f.view_position_end() - f.view_position();
        assert!((f.view_distance() - offset.length()).abs() < EPSILON);

        // Target is north-east and higher than the observer.
        assert!(f.view_heading() > 0.0 && f.view_heading() < 90.0);
        assert!(f.view_pitch() > 0.0);

        let rebuilt = end_of(
            f.frame(),
            f.view_position(),
            f.view_distance(),
            f.view_heading(),
            f.view_pitch(),
        );
        assert!((rebuilt - f.view_position_end()).length() < EPSILON);
    }

    #[test]
    fn test_set_distance_keeps_direction() {
        let mut f = guangzhou();
        let origin = f.view_position();
        let old_end = f.view_position_end();
        f.set_view_distance(500.0).expect("positive distance");
        let new_end = f.view_position_end();
        assert!(((new_end - origin).length() - 500.0).abs() < EPSILON);
        let a = (old_end - origin).normalize();
        let b = (new_end - origin).normalize();
        assert!(a.cross(b).length() < 1e-9);
        assert!(a.dot(b) > 0.0);
    }

    #[test]
    fn test_set_end_point_recomputes_polar_aim() {
        let mut f = guangzhou();
        let e = Ellipsoid::WGS84;
        let end = e.cartographic_to_cartesian(&Cartographic::from_degrees(113.002, 22.999, 10.0));
        f.set_view_position_end(end).expect("distinct target");

        let offset = end - f.view_position();
        assert!((f.view_distance() - offset.length()).abs() < EPSILON);
        // South-east and lower than the observer.
        assert!(f.view_heading() > 90.0 && f.view_heading() < 180.0);
        assert!(f.view_pitch() < 0.0);

        let rebuilt = end_of(
            f.frame(),
            f.view_position(),
            f.view_distance(),
            f.view_heading(),
            f.view_pitch(),
        );
        assert!((rebuilt - end).length() < EPSILON);
    }

    #[test]
    fn test_end_point_takes_authority_back_from_polar() {
        let mut f = ObserverFrustum::new(
            ReferenceFrame::y_up(),
            DVec3::new(0.0, 2.0, 0.0),
            DVec3::new(0.0, 2.0, -50.0),
        )
        .expect("valid observer");
        f.set_view_heading(90.0).expect("finite heading");
        assert!((f.view_position_end() - DVec3::new(50.0, 2.0, 0.0)).length() < EPSILON);

        let end = DVec3::new(0.0, 2.0, -20.0);
        f.set_view_position_end(end).expect("distinct target");
        assert!((f.view_distance() - 20.0).abs() < EPSILON);
        assert!(f.view_heading().abs() < EPSILON);
        assert!(f.view_pitch().abs() < EPSILON);

        // With the end point authoritative, moving the observer keeps the target.
        f.set_view_position(DVec3::new(5.0, 2.0, 0.0))
            .expect("valid observer");
        assert!((f.view_position_end() - end).length() < EPSILON);
        assert!((f.view_distance() - 425.0_f64.sqrt()).abs() < EPSILON);
        assert!(f.view_heading() < 0.0);
    }

    #[test]
    fn test_zero_distance_is_rejected() {
        let mut f = guangzhou();
        let end = f.view_position_end();
        let distance = f.view_distance();
        let generation = f.shadow_generation();
        assert!(matches!(
            f.set_view_distance(0.0),
            Err(SightlineError::CoincidentTarget)
        ));
        assert_eq!(f.view_position_end(), end);
        assert_eq!(f.view_distance(), distance);
        assert_eq!(f.shadow_generation(), generation);
    }

    #[test]
    fn test_set_heading_and_pitch_rotate_end() {
        let mut f = guangzhou();
        let d = f.view_distance();
        f.set_view_heading(135.0).expect("finite heading");
        f.set_view_pitch(-10.0).expect("pitch in range");
        let (dist, heading, pitch) =
            polar_of(f.frame(), f.view_position(), f.view_position_end());
        assert!((dist - d).abs() < EPSILON);
        assert!((heading - 135.0).abs() < EPSILON);
        assert!((pitch + 10.0).abs() < EPSILON);
    }

    #[test]
    fn test_invalid_inputs_leave_frustum_unchanged() {
        let mut f = guangzhou();
        let end = f.view_position_end();
        let generation = f.shadow_generation();
        assert!(matches!(
            f.set_view_distance(-1.0),
            Err(SightlineError::NegativeDistance(_))
        ));
        assert!(matches!(
            f.set_view_pitch(90.0),
            Err(SightlineError::PitchOutOfRange(_))
        ));
        assert!(f.set_horizontal_view_angle(180.0).is_err());
        assert!(f.set_alpha(1.5).is_err());
        assert!(matches!(
            f.set_view_position(DVec3::new(1.0, 2.0, 3.0)),
            Err(SightlineError::ObserverNearCenter(_))
        ));
        assert_eq!(f.view_position_end(), end);
        assert_eq!(f.shadow_generation(), generation);
    }

    #[test]
    fn test_moving_observer_keeps_polar_aim() {
        let mut f = ObserverFrustum::new(
            ReferenceFrame::y_up(),
            DVec3::new(0.0, 2.0, 0.0),
            DVec3::new(0.0, 2.0, -50.0),
        )
        .expect("valid observer");
        f.set_view_heading(90.0).expect("finite heading");
        f.set_view_position(DVec3::new(10.0, 2.0, 0.0))
            .expect("valid observer");
        // Heading 90° is east (+X) in the local frame.
        assert!((f.view_position_end() - DVec3::new(60.0, 2.0, 0.0)).length() < EPSILON);
    }

    #[test]
    fn test_appearance_changes_do_not_reshadow() {
        let mut f = guangzhou();
        let generation = f.shadow_generation();
        f.set_alpha(0.8).expect("alpha in range");
        f.set_area_colors(Color::WHITE, Color::BLACK);
        assert_eq!(f.shadow_generation(), generation);
        f.set_soft_shadows(true);
        assert_eq!(f.shadow_generation(), generation + 1);
        f.set_pick_surface(PickSurface::Model);
        assert_eq!(f.shadow_settings().depth_bias, 5e-4);
    }

    #[test]
    fn test_settings_preset() {
        let settings = ViewshedSettings::from_json(
            r#"{ "horizontal_view_angle": 120.0, "soft_shadows": true }"#,
        )
        .expect("preset should parse");
        assert_eq!(settings.horizontal_view_angle, 120.0);
        assert_eq!(settings.vertical_view_angle, 60.0);
        assert!(ViewshedSettings::from_json(r#"{ "shadow_map_size": 3000 }"#).is_err());
    }
}
