//! Geodetic math: ellipsoid conversions, local east-north-up frames, and the
//! reference frames observers and sensors are placed in.

pub mod ellipsoid;

use glam::{DMat3, DMat4, DVec3};
use serde::{Deserialize, Serialize};

use crate::error::SightlineError;

pub use ellipsoid::{Cartographic, Ellipsoid};

/// Minimum geocentric distance for the geocentric light "up" approximation.
pub const MIN_OBSERVER_GEOCENTRIC_RADIUS: f64 = 1000.0;

/// Local east-north-up basis at a point, expressed in the fixed frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnuFrame {
    pub east: DVec3,
    pub north: DVec3,
    pub up: DVec3,
}

impl EnuFrame {
    /// Rotate a local `(east, north, up)` vector into the fixed frame.
    pub fn to_fixed(&self, local: DVec3) -> DVec3 {
        self.east * local.x + self.north * local.y + self.up * local.z
    }

    /// Express a fixed-frame vector in local `(east, north, up)` components.
    pub fn to_local(&self, fixed: DVec3) -> DVec3 {
        DVec3::new(fixed.dot(self.east), fixed.dot(self.north), fixed.dot(self.up))
    }

    /// Rotation matrix whose columns are east, north, up.
    pub fn rotation(&self) -> DMat3 {
        DMat3::from_cols(self.east, self.north, self.up)
    }

    /// Affine transform from local ENU coordinates at `origin` to the fixed frame.
    pub fn to_fixed_transform(&self, origin: DVec3) -> DMat4 {
        DMat4::from_cols(
            self.east.extend(0.0),
            self.north.extend(0.0),
            self.up.extend(0.0),
            origin.extend(1.0),
        )
    }
}

/// The frame observers and sensors live in.
///
/// `Globe` is the Earth-centered, Earth-fixed frame of an ellipsoid. `Local`
/// is a flat Cartesian scene (e.g. a Bevy world) with fixed axes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ReferenceFrame {
    Globe(Ellipsoid),
    Local { east: DVec3, north: DVec3, up: DVec3 },
}

impl ReferenceFrame {
    /// WGS84 globe.
    pub const fn wgs84() -> Self {
        Self::Globe(Ellipsoid::WGS84)
    }

    /// Bevy's convention: +Y up, -Z forward (north), +X right (east).
    pub const fn y_up() -> Self {
        Self::Local {
            east: DVec3::X,
            north: DVec3::NEG_Z,
            up: DVec3::Y,
        }
    }

    /// East-north-up basis at `position`.
    pub fn enu_at(&self, position: DVec3) -> EnuFrame {
        match *self {
            Self::Globe(ellipsoid) => ellipsoid.enu_at(position),
            Self::Local { east, north, up } => EnuFrame { east, north, up },
        }
    }

    /// Up axis handed to the light camera at `position`.
    ///
    /// On a globe this is the geocentric direction `normalize(position)`, which
    /// is only meaningful away from the globe center.
    pub fn light_up(&self, position: DVec3) -> Result<DVec3, SightlineError> {
        match *self {
            Self::Globe(_) => {
                let radius = position.length();
                if !(radius >= MIN_OBSERVER_GEOCENTRIC_RADIUS) {
                    return Err(SightlineError::ObserverNearCenter(radius));
                }
                Ok(position / radius)
            }
            Self::Local { up, .. } => Ok(up),
        }
    }

    /// Fallback pick when no scene surface was hit: the ellipsoid on a globe,
    /// the ground plane through the origin in a local frame.
    pub fn pick_fallback(&self, ray_origin: DVec3, ray_direction: DVec3) -> Option<DVec3> {
        match *self {
            Self::Globe(ellipsoid) => ellipsoid.intersect_ray(ray_origin, ray_direction),
            Self::Local { up, .. } => {
                let denom = ray_direction.dot(up);
                if denom.abs() < 1e-12 {
                    return None;
                }
                let t = -ray_origin.dot(up) / denom;
                (t >= 0.0).then(|| ray_origin + ray_direction * t)
            }
        }
    }
}

impl Default for ReferenceFrame {
    fn default() -> Self {
        Self::wgs84()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_light_up_rejects_globe_center() {
        let frame = ReferenceFrame::wgs84();
        assert!(matches!(
            frame.light_up(DVec3::new(10.0, 0.0, 0.0)),
            Err(SightlineError::ObserverNearCenter(_))
        ));
        let up = frame
            .light_up(DVec3::new(0.0, 0.0, 6_400_000.0))
            .expect("surface point has an up axis");
        assert!((up - DVec3::Z).length() < 1e-12);
    }

    #[test]
    fn test_local_fallback_hits_ground_plane() {
        let frame = ReferenceFrame::y_up();
        let hit = frame
            .pick_fallback(DVec3::new(1.0, 10.0, 2.0), DVec3::NEG_Y)
            .expect("ray pointing down hits the ground");
        assert!((hit - DVec3::new(1.0, 0.0, 2.0)).length() < 1e-12);
        assert!(frame.pick_fallback(DVec3::new(0.0, 10.0, 0.0), DVec3::Y).is_none());
    }

    #[test]
    fn test_enu_roundtrip() {
        let frame = ReferenceFrame::wgs84();
        let p = Ellipsoid::WGS84.cartographic_to_cartesian(&Cartographic::from_degrees(
            113.0, 23.0, 20.0,
        ));
        let enu = frame.enu_at(p);
        let v = DVec3::new(3.0, -4.0, 12.0);
        let back = enu.to_local(enu.to_fixed(v));
        assert!((back - v).length() < 1e-9);
    }
}
