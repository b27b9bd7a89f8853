//! Reference ellipsoid and geodetic ↔ Cartesian conversions.
//!
//! # Algorithm
//! Geodetic → Cartesian uses the closed form
//! ```text
//! n = (cos φ cos λ, cos φ sin λ, sin φ)
//! k = radii² ⊙ n / sqrt(n · (radii² ⊙ n))
//! p = k + n × h
//! ```
//! Cartesian → geodetic projects onto the surface along the geodetic normal
//! with a Newton iteration on the scale factor λ, then reads latitude and
//! longitude off the surface normal.

use glam::DVec3;
use serde::{Deserialize, Serialize};

use super::EnuFrame;

/// Convergence threshold for the surface projection.
const SURFACE_EPSILON: f64 = 1e-12;
/// Points closer to the center than this (in normalized units) have no
/// well-defined surface projection.
const CENTER_TOLERANCE_SQUARED: f64 = 0.1;
const MAX_SURFACE_ITERATIONS: usize = 64;

/// Longitude / latitude in radians, height in meters above the ellipsoid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cartographic {
    pub longitude: f64,
    pub latitude: f64,
    pub height: f64,
}

impl Cartographic {
    /// Build from degrees.
    pub fn from_degrees(longitude: f64, latitude: f64, height: f64) -> Self {
        Self {
            longitude: longitude.to_radians(),
            latitude: latitude.to_radians(),
            height,
        }
    }

    /// `(longitude°, latitude°, height)`.
    pub fn to_degrees(&self) -> (f64, f64, f64) {
        (self.longitude.to_degrees(), self.latitude.to_degrees(), self.height)
    }
}

/// A triaxial ellipsoid centered at the origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ellipsoid {
    pub radii: DVec3,
}

impl Ellipsoid {
    /// WGS84 semi-axes in meters.
    pub const WGS84: Self = Self {
        radii: DVec3::new(6_378_137.0, 6_378_137.0, 6_356_752.314_245_179),
    };

    /// Sphere of the given radius.
    pub fn sphere(radius: f64) -> Self {
        Self {
            radii: DVec3::splat(radius),
        }
    }

    pub fn radii_squared(&self) -> DVec3 {
        self.radii * self.radii
    }

    pub fn one_over_radii(&self) -> DVec3 {
        DVec3::ONE / self.radii
    }

    pub fn one_over_radii_squared(&self) -> DVec3 {
        DVec3::ONE / self.radii_squared()
    }

    /// Smallest semi-axis.
    pub fn minimum_radius(&self) -> f64 {
        self.radii.min_element()
    }

    /// Outward surface normal for a latitude/longitude.
    pub fn geodetic_normal_from_cartographic(&self, c: &Cartographic) -> DVec3 {
        let cos_lat = c.latitude.cos();
        DVec3::new(
            cos_lat * c.longitude.cos(),
            cos_lat * c.longitude.sin(),
            c.latitude.sin(),
        )
    }

    /// Outward surface normal at a Cartesian position.
    pub fn geodetic_normal(&self, position: DVec3) -> DVec3 {
        (position * self.one_over_radii_squared()).normalize_or_zero()
    }

    /// Convert a geodetic position to Cartesian coordinates.
    pub fn cartographic_to_cartesian(&self, c: &Cartographic) -> DVec3 {
        let n = self.geodetic_normal_from_cartographic(c);
        let k = self.radii_squared() * n;
        let gamma = n.dot(k).sqrt();
        k / gamma + n * c.height
    }

    /// Convert a Cartesian position to geodetic coordinates.
    ///
    /// Returns `None` near the ellipsoid center where the projection is undefined.
    pub fn cartesian_to_cartographic(&self, position: DVec3) -> Option<Cartographic> {
        let surface = self.scale_to_geodetic_surface(position)?;
        let n = self.geodetic_normal(surface);
        let h = position - surface;
        let height = h.length().copysign(h.dot(position));
        Some(Cartographic {
            longitude: n.y.atan2(n.x),
            latitude: n.z.clamp(-1.0, 1.0).asin(),
            height,
        })
    }

    /// Project a position onto the surface along the geodetic normal.
    pub fn scale_to_geodetic_surface(&self, position: DVec3) -> Option<DVec3> {
        let inv = self.one_over_radii();
        let inv2 = self.one_over_radii_squared();
        let scaled = position * inv;
        let sq = scaled * scaled;
        let squared_norm = sq.x + sq.y + sq.z;
        let ratio = (1.0 / squared_norm).sqrt();
        let intersection = position * ratio;

        if squared_norm < CENTER_TOLERANCE_SQUARED {
            return ratio.is_finite().then_some(intersection);
        }

        let gradient = intersection * inv2 * 2.0;
        let mut lambda = (1.0 - ratio) * position.length() / (0.5 * gradient.length());
        let mut correction = 0.0;
        let mut multiplier = DVec3::ONE;

        for _ in 0..MAX_SURFACE_ITERATIONS {
            lambda -= correction;
            multiplier = DVec3::ONE / (DVec3::ONE + inv2 * lambda);
            let m2 = multiplier * multiplier;
            let m3 = m2 * multiplier;
            let func = (sq * m2).element_sum() - 1.0;
            let denominator = (sq * m3 * inv2).element_sum();
            let derivative = -2.0 * denominator;
            correction = func / derivative;
            if func.abs() <= SURFACE_EPSILON {
                break;
            }
        }

        Some(position * multiplier)
    }

    /// East-north-up basis at a Cartesian position.
    pub fn enu_at(&self, position: DVec3) -> EnuFrame {
        let up = self.geodetic_normal(position);
        let east_raw = DVec3::new(-position.y, position.x, 0.0);
        let east = if east_raw.length_squared() < 1e-18 {
            DVec3::Y
        } else {
            east_raw.normalize()
        };
        let north = up.cross(east);
        EnuFrame { east, north, up }
    }

    /// First intersection of a ray with the ellipsoid surface, if any.
    pub fn intersect_ray(&self, origin: DVec3, direction: DVec3) -> Option<DVec3> {
        let inv = self.one_over_radii();
        let q = origin * inv;
        let w = direction * inv;

        let a = w.length_squared();
        let b = 2.0 * q.dot(w);
        let c = q.length_squared() - 1.0;
        if a <= 0.0 {
            return None;
        }
        let discriminant = b * b - 4.0 * a * c;
        if discriminant < 0.0 {
            return None;
        }
        let root = discriminant.sqrt();
        let t0 = (-b - root) / (2.0 * a);
        let t1 = (-b + root) / (2.0 * a);
        let t = if t0 >= 0.0 {
            t0
        } else if t1 >= 0.0 {
            t1
        } else {
            return None;
        };
        Some(origin + direction * t)
    }
}

impl Default for Ellipsoid {
    fn default() -> Self {
        Self::WGS84
    }
}
