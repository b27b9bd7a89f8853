//! Shadow map settings and a CPU reference depth map.
//!
//! The GPU generator renders occluder depth from the [`LightCamera`]. The CPU
//! `ShadowDepthMap` produces the same texels by casting one ray per texel
//! center against triangle occluders (Möller–Trumbore) and storing the
//! nearest hit's NDC depth. It backs the visibility classifier in tests and
//! in hosts without a GPU.

use glam::{DVec2, DVec3};
use serde::{Deserialize, Serialize};

use super::light::LightCamera;
use crate::error::SightlineError;

pub const DEFAULT_SHADOW_MAP_SIZE: u32 = 2048;
pub const MIN_SHADOW_MAP_SIZE: u32 = 64;
pub const MAX_SHADOW_MAP_SIZE: u32 = 8192;

/// Depth bias when the observer was picked on bare terrain.
pub const TERRAIN_DEPTH_BIAS: f64 = 1e-4;
/// Depth bias when the observer was picked on a 3D model.
pub const MODEL_DEPTH_BIAS: f64 = 5e-4;
pub const TERRAIN_NORMAL_OFFSET: f64 = 0.5;
pub const MODEL_NORMAL_OFFSET: f64 = 0.1;

/// Default PCF tap spacing in texels with soft shadows enabled.
pub const DEFAULT_SOFTNESS: f32 = 2.0;

/// What the observer point was picked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PickSurface {
    #[default]
    Terrain,
    Model,
}

impl PickSurface {
    pub const fn depth_bias(self) -> f64 {
        match self {
            Self::Terrain => TERRAIN_DEPTH_BIAS,
            Self::Model => MODEL_DEPTH_BIAS,
        }
    }

    pub const fn normal_offset(self) -> f64 {
        match self {
            Self::Terrain => TERRAIN_NORMAL_OFFSET,
            Self::Model => MODEL_NORMAL_OFFSET,
        }
    }
}

/// Filtering parameters for the shadow comparison.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowMapSettings {
    pub size: u32,
    pub soft_shadows: bool,
    pub softness: f32,
    pub depth_bias: f64,
    pub normal_offset: f64,
}

impl ShadowMapSettings {
    pub fn new(
        size: u32,
        soft_shadows: bool,
        softness: f32,
        surface: PickSurface,
    ) -> Result<Self, SightlineError> {
        validate_shadow_map_size(size)?;
        Ok(Self {
            size,
            soft_shadows,
            softness,
            depth_bias: surface.depth_bias(),
            normal_offset: surface.normal_offset(),
        })
    }

    /// Distance between PCF taps, in texels.
    pub fn tap_spacing(&self) -> f32 {
        if self.soft_shadows {
            self.softness.max(1.0)
        } else {
            1.0
        }
    }
}

impl Default for ShadowMapSettings {
    fn default() -> Self {
        Self {
            size: DEFAULT_SHADOW_MAP_SIZE,
            soft_shadows: false,
            softness: DEFAULT_SOFTNESS,
            depth_bias: TERRAIN_DEPTH_BIAS,
            normal_offset: TERRAIN_NORMAL_OFFSET,
        }
    }
}

pub fn validate_shadow_map_size(size: u32) -> Result<(), SightlineError> {
    if !size.is_power_of_two() || !(MIN_SHADOW_MAP_SIZE..=MAX_SHADOW_MAP_SIZE).contains(&size) {
        return Err(SightlineError::InvalidShadowMapSize {
            got: size,
            min: MIN_SHADOW_MAP_SIZE,
            max: MAX_SHADOW_MAP_SIZE,
        });
    }
    Ok(())
}

// ── Occluders ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    pub a: DVec3,
    pub b: DVec3,
    pub c: DVec3,
}

impl Triangle {
    pub const fn new(a: DVec3, b: DVec3, c: DVec3) -> Self {
        Self { a, b, c }
    }

    /// Two triangles covering the quad `a b c d` (in order around the edge).
    pub fn quad(a: DVec3, b: DVec3, c: DVec3, d: DVec3) -> [Self; 2] {
        [Self::new(a, b, c), Self::new(a, c, d)]
    }

    /// Distance along the ray to the hit, if any. Both faces count.
    pub fn intersect(&self, origin: DVec3, direction: DVec3) -> Option<f64> {
        const EPS: f64 = 1e-12;
        let e1 = self.b - self.a;
        let e2 = self.c - self.a;
        let p = direction.cross(e2);
        let det = e1.dot(p);
        if det.abs() < EPS {
            return None;
        }
        let inv = 1.0 / det;
        let s = origin - self.a;
        let u = s.dot(p) * inv;
        if !(0.0..=1.0).contains(&u) {
            return None;
        }
        let q = s.cross(e1);
        let v = direction.dot(q) * inv;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }
        let t = e2.dot(q) * inv;
        (t > EPS).then_some(t)
    }
}

// ── CPU depth map ────────────────────────────────────────────────

/// Square depth texture; 1.0 means no occluder.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowDepthMap {
    size: u32,
    depths: Vec<f32>,
}

impl ShadowDepthMap {
    /// A map with no occluders.
    pub fn cleared(size: u32) -> Self {
        Self {
            size,
            depths: vec![1.0; (size as usize) * (size as usize)],
        }
    }

    /// Ray-cast `occluders` from `light`, one ray per texel center.
    pub fn render(light: &LightCamera, size: u32, occluders: &[Triangle]) -> Self {
        let mut map = Self::cleared(size);
        if occluders.is_empty() {
            return map;
        }
        let texel = 1.0 / f64::from(size);
        for y in 0..size {
            for x in 0..size {
                let uv = DVec2::new(
                    (f64::from(x) + 0.5) * texel,
                    (f64::from(y) + 0.5) * texel,
                );
                let (origin, dir) = light.texel_ray(uv);
                let nearest = occluders
                    .iter()
                    .filter_map(|t| t.intersect(origin, dir))
                    .fold(f64::INFINITY, f64::min);
                if !nearest.is_finite() {
                    continue;
                }
                if let Some(ls) = light.light_space(origin + dir * nearest)
                    && (0.0..=1.0).contains(&ls.z)
                {
                    map.depths[(y * size + x) as usize] = ls.z as f32;
                }
            }
        }
        tracing::debug!(size, occluders = occluders.len(), "rendered CPU shadow map");
        map
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn depths(&self) -> &[f32] {
        &self.depths
    }

    /// Depth at a texel, clamped to the edge like the GPU sampler.
    pub fn depth_at(&self, x: i64, y: i64) -> f32 {
        let max = i64::from(self.size) - 1;
        let x = x.clamp(0, max) as usize;
        let y = y.clamp(0, max) as usize;
        self.depths[y * self.size as usize + x]
    }

    /// 1.0 when `reference` is at or in front of the stored depth, else 0.0.
    pub fn compare(&self, uv: DVec2, reference: f64) -> f32 {
        let size = f64::from(self.size);
        let x = (uv.x * size).floor() as i64;
        let y = (uv.y * size).floor() as i64;
        if reference <= f64::from(self.depth_at(x, y)) {
            1.0
        } else {
            0.0
        }
    }

    /// 3×3 percentage-closer filter, `spacing` texels between taps.
    pub fn pcf(&self, uv: DVec2, reference: f64, spacing: f32) -> f32 {
        let step = f64::from(spacing) / f64::from(self.size);
        let mut lit = 0.0;
        for dy in -1..=1 {
            for dx in -1..=1 {
                let offset = DVec2::new(f64::from(dx), f64::from(dy)) * step;
                lit += self.compare(uv + offset, reference);
            }
        }
        lit / 9.0
    }
}
