//! Virtual spot-light camera placed at the observer.
//!
//! ```text
//! forward = normalize(target − origin)
//! up₀     = light_up(origin)          geocentric on a globe, fixed otherwise
//! right   = normalize(forward × up₀)
//! up      = right × forward
//! fov     = max(h, v)      aspect = tan(h/2) / tan(v/2)
//! ```
//! The projection is right-handed with wgpu's `[0, 1]` depth range.

use glam::{DMat4, DVec2, DVec3};

use crate::error::SightlineError;
use crate::geodesy::ReferenceFrame;

/// Near plane of the light frustum in meters.
pub const LIGHT_NEAR: f64 = 0.1;

/// Minimum |forward × up| before the frame is considered degenerate.
const PARALLEL_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightCamera {
    pub position: DVec3,
    pub direction: DVec3,
    pub up: DVec3,
    pub right: DVec3,
    /// Full field of view of the wider axis, radians.
    pub fov: f64,
    pub aspect_ratio: f64,
    pub near: f64,
    pub far: f64,
    /// Full horizontal view angle, radians.
    pub horizontal_view_angle: f64,
    /// Full vertical view angle, radians.
    pub vertical_view_angle: f64,
}

/// Light axes expressed in a camera's eye space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightAxes {
    pub position: DVec3,
    pub direction: DVec3,
    pub up: DVec3,
    pub right: DVec3,
}

impl LightCamera {
    /// Build the light camera for an observer looking at `target`.
    ///
    /// View angles are full angles in degrees.
    pub fn new(
        frame: &ReferenceFrame,
        origin: DVec3,
        target: DVec3,
        horizontal_deg: f64,
        vertical_deg: f64,
    ) -> Result<Self, SightlineError> {
        let offset = target - origin;
        let distance = offset.length();
        if !(distance > 0.0) {
            return Err(SightlineError::CoincidentTarget);
        }
        let direction = offset / distance;
        let up0 = frame.light_up(origin)?;

        let right = direction.cross(up0);
        if right.length() < PARALLEL_TOLERANCE {
            return Err(SightlineError::DegenerateLightFrame);
        }
        let right = right.normalize();
        let up = right.cross(direction);

        let h = horizontal_deg.to_radians();
        let v = vertical_deg.to_radians();
        Ok(Self {
            position: origin,
            direction,
            up,
            right,
            fov: h.max(v),
            aspect_ratio: (h * 0.5).tan() / (v * 0.5).tan(),
            near: LIGHT_NEAR,
            far: distance.max(LIGHT_NEAR * 2.0),
            horizontal_view_angle: h,
            vertical_view_angle: v,
        })
    }

    /// Vertical field of view handed to the projection.
    ///
    /// `fov` applies to the wider axis; when that is the horizontal one the
    /// vertical angle follows from the aspect ratio.
    pub fn fov_y(&self) -> f64 {
        if self.aspect_ratio > 1.0 {
            2.0 * ((self.fov * 0.5).tan() / self.aspect_ratio).atan()
        } else {
            self.fov
        }
    }

    pub fn view(&self) -> DMat4 {
        DMat4::look_to_rh(self.position, self.direction, self.up)
    }

    pub fn projection(&self) -> DMat4 {
        DMat4::perspective_rh(self.fov_y(), self.aspect_ratio, self.near, self.far)
    }

    pub fn view_projection(&self) -> DMat4 {
        self.projection() * self.view()
    }

    /// Shadow-map texture coordinates and depth of a world position.
    ///
    /// `x, y` are in texture space (v grows downward), `z` is NDC depth.
    /// Points behind the light return `None`.
    pub fn light_space(&self, world: DVec3) -> Option<DVec3> {
        let clip = self.view_projection() * world.extend(1.0);
        if clip.w <= 0.0 {
            return None;
        }
        let ndc = clip.truncate() / clip.w;
        Some(DVec3::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5, ndc.z))
    }

    /// World-space ray through shadow-map texture coordinates.
    pub fn texel_ray(&self, uv: DVec2) -> (DVec3, DVec3) {
        let inverse = self.view_projection().inverse();
        let ndc = DVec2::new(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0);
        let near = inverse.project_point3(ndc.extend(0.0));
        let far = inverse.project_point3(ndc.extend(1.0));
        (near, (far - near).normalize())
    }

    /// Light position and axes in the eye space of `camera_view`.
    pub fn in_eye_space(&self, camera_view: DMat4) -> LightAxes {
        LightAxes {
            position: camera_view.transform_point3(self.position),
            direction: camera_view.transform_vector3(self.direction).normalize(),
            up: camera_view.transform_vector3(self.up).normalize(),
            right: camera_view.transform_vector3(self.right).normalize(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-9;

    fn local_light(h: f64, v: f64) -> LightCamera {
        LightCamera::new(
            &ReferenceFrame::y_up(),
            DVec3::new(0.0, 2.0, 0.0),
            DVec3::new(0.0, 2.0, -100.0),
            h,
            v,
        )
        .expect("level view is valid")
    }

    #[test]
    fn test_axes_are_orthonormal() {
        let light = local_light(90.0, 60.0);
        assert!((light.direction - DVec3::NEG_Z).length() < EPSILON);
        assert!((light.up - DVec3::Y).length() < EPSILON);
        assert!((light.right - DVec3::X).length() < EPSILON);
        assert!((light.far - 100.0).abs() < EPSILON);
    }

    #[test]
    fn test_fov_and_aspect() {
        let light = local_light(90.0, 60.0);
        assert!((light.fov - 90f64.to_radians()).abs() < EPSILON);
        assert!((light.fov_y() - 60f64.to_radians()).abs() < EPSILON);

        let tall = local_light(40.0, 70.0);
        assert!((tall.fov_y() - 70f64.to_radians()).abs() < EPSILON);
    }

    #[test]
    fn test_frustum_edges_land_on_texture_edges() {
        let light = local_light(90.0, 60.0);
        // 45° to the right at 10 m lands on the right edge.
        let edge = light
            .light_space(DVec3::new(10.0, 2.0, -10.0))
            .expect("in front of the light");
        assert!((edge.x - 1.0).abs() < 1e-9);
        assert!((edge.y - 0.5).abs() < 1e-9);
        assert!(edge.z > 0.0 && edge.z < 1.0);

        let up = 30f64.to_radians().tan() * 10.0;
        let top = light
            .light_space(DVec3::new(0.0, 2.0 + up, -10.0))
            .expect("in front of the light");
        assert!(top.y.abs() < 1e-9);
    }

    #[test]
    fn test_texel_ray_roundtrip() {
        let light = local_light(70.0, 50.0);
        let (origin, dir) = light.texel_ray(DVec2::new(0.25, 0.75));
        let p = origin + dir * 30.0;
        let uv = light.light_space(p).expect("in front of the light");
        assert!((uv.x - 0.25).abs() < 1e-9);
        assert!((uv.y - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_vertical_view_is_degenerate() {
        let result = LightCamera::new(
            &ReferenceFrame::y_up(),
            DVec3::ZERO,
            DVec3::new(0.0, -10.0, 0.0),
            60.0,
            60.0,
        );
        assert!(matches!(result, Err(SightlineError::DegenerateLightFrame)));
    }

    #[test]
    fn test_coincident_target_is_rejected() {
        let result = LightCamera::new(
            &ReferenceFrame::y_up(),
            DVec3::ONE,
            DVec3::ONE,
            60.0,
            60.0,
        );
        assert!(matches!(result, Err(SightlineError::CoincidentTarget)));
    }
}
