//! Per-pixel visibility classification.
//!
//! For every scene point the classifier decides whether it lies inside the
//! observer's angular cone and, if so, whether the shadow map sees it:
//!
//! 1. no depth (far plane) → untouched
//! 2. farther than the view distance → untouched
//! 3. horizontal angle: project onto the plane ⟂ light up, compare the angle
//!    to the light forward against h/2; vertical: project onto the plane
//!    ⟂ light right and compare against v/2 → untouched when outside
//! 4. outside the light-space `[0, 1]³` box, or `|z| < 1e-2` → untouched
//! 5. 9-tap PCF: fully lit → visible tint, otherwise occluded tint
//!
//! `visibility.wgsl` runs the same steps in eye space; the uniforms it reads
//! are built here so both sides share one light camera.

use bytemuck::{Pod, Zeroable};
use glam::{DMat4, DVec2, DVec3};

use super::frustum::ObserverFrustum;
use super::light::LightCamera;
use super::shadow::{ShadowDepthMap, ShadowMapSettings};
use crate::color::Color;

/// Light-space depths closer to zero than this carry no data.
pub const NO_DATA_DEPTH: f64 = 1e-2;

/// Why a point was left untouched, or how it was tinted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Visible,
    Occluded,
    NoDepth,
    BeyondRange,
    OutsideCone,
    OutsideShadowMap,
}

impl Classification {
    pub fn is_tinted(self) -> bool {
        matches!(self, Self::Visible | Self::Occluded)
    }
}

/// Angle between `v` projected onto the plane with normal `axis` and `forward`.
fn projected_angle(v: DVec3, axis: DVec3, forward: DVec3) -> f64 {
    let projected = v - axis * v.dot(axis);
    let len = projected.length();
    if len <= f64::EPSILON {
        return 0.0;
    }
    (projected / len).dot(forward).clamp(-1.0, 1.0).acos()
}

/// CPU reference of the visibility pass.
#[derive(Debug, Clone, Copy)]
pub struct VisibilityClassifier<'a> {
    pub light: &'a LightCamera,
    pub shadow_map: &'a ShadowDepthMap,
    pub shadow: ShadowMapSettings,
    pub view_distance: f64,
    pub visible_color: Color,
    pub invisible_color: Color,
    pub alpha: f32,
}

impl<'a> VisibilityClassifier<'a> {
    pub fn new(frustum: &'a ObserverFrustum, shadow_map: &'a ShadowDepthMap) -> Self {
        let settings = frustum.settings();
        Self {
            light: frustum.light_camera(),
            shadow_map,
            shadow: frustum.shadow_settings(),
            view_distance: frustum.view_distance(),
            visible_color: settings.visible_area_color,
            invisible_color: settings.invisible_area_color,
            alpha: settings.alpha,
        }
    }

    /// Whether `point` lies inside both angular half-extents.
    pub fn in_cone(&self, point: DVec3) -> bool {
        let v = point - self.light.position;
        let half_h = self.light.horizontal_view_angle * 0.5;
        let half_v = self.light.vertical_view_angle * 0.5;
        projected_angle(v, self.light.up, self.light.direction) <= half_h
            && projected_angle(v, self.light.right, self.light.direction) <= half_v
    }

    /// Classify a scene point. `None` means the pixel had no depth.
    pub fn classify(&self, point: Option<DVec3>, normal: Option<DVec3>) -> Classification {
        let Some(point) = point else {
            return Classification::NoDepth;
        };
        if (point - self.light.position).length() > self.view_distance {
            return Classification::BeyondRange;
        }
        if !self.in_cone(point) {
            return Classification::OutsideCone;
        }

        let offset = normal.map_or(DVec3::ZERO, |n| {
            n.normalize_or_zero() * self.shadow.normal_offset
        });
        let Some(ls) = self.light.light_space(point + offset) else {
            return Classification::OutsideShadowMap;
        };
        let inside = (0.0..=1.0).contains(&ls.x)
            && (0.0..=1.0).contains(&ls.y)
            && (0.0..=1.0).contains(&ls.z);
        if !inside || ls.z.abs() < NO_DATA_DEPTH {
            return Classification::OutsideShadowMap;
        }

        let lit = self.shadow_map.pcf(
            DVec2::new(ls.x, ls.y),
            ls.z - self.shadow.depth_bias,
            self.shadow.tap_spacing(),
        );
        if lit >= 1.0 {
            Classification::Visible
        } else {
            Classification::Occluded
        }
    }

    /// Output color for a pixel.
    pub fn shade(&self, color: Color, point: Option<DVec3>, normal: Option<DVec3>) -> Color {
        match self.classify(point, normal) {
            Classification::Visible => color.mix(self.visible_color, self.alpha),
            Classification::Occluded => color.mix(self.invisible_color, self.alpha),
            _ => color,
        }
    }
}

// ── GPU layout ───────────────────────────────────────────────────

/// Uniform block of `visibility.wgsl`.
///
/// Light axes are in the main camera's eye space; `eye_to_light` maps eye
/// space straight to the light's clip space.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct VisibilityUniforms {
    pub inverse_projection: [[f32; 4]; 4],
    pub eye_to_light: [[f32; 4]; 4],
    /// xyz = position, w = view distance.
    pub light_position: [f32; 4],
    /// xyz = forward, w = half horizontal angle.
    pub light_direction: [f32; 4],
    /// xyz = up, w = half vertical angle.
    pub light_up: [f32; 4],
    /// xyz = right, w = alpha.
    pub light_right: [f32; 4],
    pub visible_color: [f32; 4],
    pub invisible_color: [f32; 4],
    /// texel size, tap spacing, depth bias, normal offset.
    pub shadow: [f32; 4],
}

impl VisibilityUniforms {
    pub fn new(frustum: &ObserverFrustum, camera_view: DMat4, camera_projection: DMat4) -> Self {
        let light = frustum.light_camera();
        let settings = frustum.settings();
        let shadow = frustum.shadow_settings();
        let axes = light.in_eye_space(camera_view);
        let eye_to_light = light.view_projection() * camera_view.inverse();
        let v3 = |v: DVec3, w: f64| [v.x as f32, v.y as f32, v.z as f32, w as f32];
        Self {
            inverse_projection: camera_projection.inverse().as_mat4().to_cols_array_2d(),
            eye_to_light: eye_to_light.as_mat4().to_cols_array_2d(),
            light_position: v3(axes.position, frustum.view_distance()),
            light_direction: v3(axes.direction, light.horizontal_view_angle * 0.5),
            light_up: v3(axes.up, light.vertical_view_angle * 0.5),
            light_right: v3(axes.right, f64::from(settings.alpha)),
            visible_color: settings.visible_area_color.0,
            invisible_color: settings.invisible_area_color.0,
            shadow: [
                1.0 / shadow.size as f32,
                shadow.tap_spacing(),
                shadow.depth_bias as f32,
                shadow.normal_offset as f32,
            ],
        }
    }
}
