//! Unit-scale sensor meshes.
//!
//! Every mesh is built with the apex at the origin, the boresight on +Z and a
//! range of 1. The model matrix scales by the sensor radius and places it.
//!
//! # Sector
//! Two principal arcs bound the footprint. Because each lateral face is a
//! plane through the apex rotated by the other half-angle, the arc a face
//! actually spans is narrower than the nominal half-angle:
//! ```text
//! maxY = atan(cos(xHalf) · tan(yHalf))
//! maxX = atan(cos(yHalf) · tan(xHalf))
//! ```
//! The four faces are emitted edge to edge (right top→bottom, bottom
//! right→left, left bottom→top, top left→right) so consecutive faces share
//! their corner vertex and every fan triangle winds outward.
//!
//! # Dome
//! A unit sphere with poles on ±Y; it does not depend on the half-angles.
//! Pixels outside the footprint are discarded by the fragment shader.
//!
//! # Scan plane
//! A flat fan whose rim vertices store an arc parameter `t ∈ [-1, 1]` in
//! `position.x`. The scan vertex shader turns `t` into an angle using the
//! current scan extent, so the wedge is never regenerated.

use bytemuck::{Pod, Zeroable};
use glam::DVec3;

/// Vertex layout shared by every sensor mesh.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SensorVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

impl SensorVertex {
    fn new(position: DVec3, normal: DVec3) -> Self {
        Self {
            position: position.as_vec3().to_array(),
            normal: normal.as_vec3().to_array(),
        }
    }
}

/// How a vertex stream is assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Triangles,
    Lines,
}

/// A non-indexed vertex stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub primitive: PrimitiveKind,
    pub vertices: Vec<SensorVertex>,
}

impl Mesh {
    fn triangles() -> Self {
        Self {
            primitive: PrimitiveKind::Triangles,
            vertices: Vec::new(),
        }
    }

    fn lines() -> Self {
        Self {
            primitive: PrimitiveKind::Lines,
            vertices: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Number of triangles or line segments.
    pub fn primitive_count(&self) -> usize {
        match self.primitive {
            PrimitiveKind::Triangles => self.vertices.len() / 3,
            PrimitiveKind::Lines => self.vertices.len() / 2,
        }
    }
}

/// Half-angle-dependent meshes.
#[derive(Debug, Clone, PartialEq)]
pub struct SectorGeometry {
    /// Four lateral faces as apex fans.
    pub faces: Mesh,
    /// One segment from the apex to every rim point.
    pub sector_lines: Mesh,
    /// The closed rim loop.
    pub seam_lines: Mesh,
    /// Rim points in face order, corners not repeated.
    pub rim: Vec<DVec3>,
}

/// Half-angle-independent dome meshes.
#[derive(Debug, Clone, PartialEq)]
pub struct DomeGeometry {
    pub surface: Mesh,
    pub lines: Mesh,
}

/// Arc half-extents actually spanned by the lateral faces.
///
/// Returns `(max_x, max_y)`.
pub fn effective_half_angles(x_half_angle: f64, y_half_angle: f64) -> (f64, f64) {
    let max_x = (y_half_angle.cos() * x_half_angle.tan()).atan();
    let max_y = (x_half_angle.cos() * y_half_angle.tan()).atan();
    (max_x, max_y)
}

/// Sample `slice` values from `from` to `to` inclusive.
fn arc_samples(from: f64, to: f64, slice: u32) -> impl Iterator<Item = f64> {
    let steps = f64::from(slice - 1);
    (0..slice).map(move |i| from + (to - from) * f64::from(i) / steps)
}

/// The four face arcs in winding order: right, bottom, left, top.
pub fn face_arcs(x_half_angle: f64, y_half_angle: f64, slice: u32) -> [Vec<DVec3>; 4] {
    let (max_x, max_y) = effective_half_angles(x_half_angle, y_half_angle);
    let (sin_a, cos_a) = x_half_angle.sin_cos();
    let (sin_b, cos_b) = y_half_angle.sin_cos();

    let right = arc_samples(max_y, -max_y, slice)
        .map(|t| DVec3::new(t.cos() * sin_a, t.sin(), t.cos() * cos_a))
        .collect();
    let bottom = arc_samples(max_x, -max_x, slice)
        .map(|p| DVec3::new(p.sin(), -p.cos() * sin_b, p.cos() * cos_b))
        .collect();
    let left = arc_samples(-max_y, max_y, slice)
        .map(|t| DVec3::new(-t.cos() * sin_a, t.sin(), t.cos() * cos_a))
        .collect();
    let top = arc_samples(-max_x, max_x, slice)
        .map(|p| DVec3::new(p.sin(), p.cos() * sin_b, p.cos() * cos_b))
        .collect();

    [right, bottom, left, top]
}

/// Build the lateral faces and their outlines.
///
/// Returns `None` when either half-angle is zero: the sector has no extent.
pub fn build_sector(x_half_angle: f64, y_half_angle: f64, slice: u32) -> Option<SectorGeometry> {
    if x_half_angle <= 0.0 || y_half_angle <= 0.0 || slice < 2 {
        return None;
    }

    let arcs = face_arcs(x_half_angle, y_half_angle, slice);
    let mut faces = Mesh::triangles();
    let mut rim = Vec::with_capacity(arcs.len() * (slice as usize - 1));

    for arc in &arcs {
        let (Some(&first), Some(&last)) = (arc.first(), arc.last()) else {
            continue;
        };
        let normal = first.cross(last).normalize_or_zero();
        for pair in arc.windows(2) {
            faces.vertices.push(SensorVertex::new(DVec3::ZERO, normal));
            faces.vertices.push(SensorVertex::new(pair[0], normal));
            faces.vertices.push(SensorVertex::new(pair[1], normal));
        }
        // The last point is the next face's first.
        rim.extend_from_slice(&arc[..arc.len() - 1]);
    }

    let mut sector_lines = Mesh::lines();
    for &p in &rim {
        sector_lines.vertices.push(SensorVertex::new(DVec3::ZERO, p));
        sector_lines.vertices.push(SensorVertex::new(p, p));
    }

    let mut seam_lines = Mesh::lines();
    for (i, &p) in rim.iter().enumerate() {
        let q = rim[(i + 1) % rim.len()];
        seam_lines.vertices.push(SensorVertex::new(p, p));
        seam_lines.vertices.push(SensorVertex::new(q, q));
    }

    Some(SectorGeometry {
        faces,
        sector_lines,
        seam_lines,
        rim,
    })
}

/// Build the unit dome: `slice` stacks by `2 · slice` sectors.
pub fn build_dome(slice: u32) -> DomeGeometry {
    let stacks = slice.max(2);
    let sectors = stacks * 2;
    let point = |stack: u32, sector: u32| {
        let v = std::f64::consts::PI * f64::from(stack) / f64::from(stacks);
        let u = std::f64::consts::TAU * f64::from(sector) / f64::from(sectors);
        DVec3::new(v.sin() * u.sin(), v.cos(), v.sin() * u.cos())
    };
    let vertex = |p: DVec3| SensorVertex::new(p, p);

    let mut surface = Mesh::triangles();
    for i in 0..stacks {
        for j in 0..sectors {
            let a = point(i, j);
            let b = point(i + 1, j);
            let c = point(i + 1, j + 1);
            let d = point(i, j + 1);
            // Skip the collapsed triangle at each pole.
            if i + 1 < stacks {
                surface.vertices.extend([vertex(a), vertex(b), vertex(c)]);
            }
            if i > 0 {
                surface.vertices.extend([vertex(a), vertex(c), vertex(d)]);
            }
        }
    }

    let mut lines = Mesh::lines();
    for i in 1..stacks {
        for j in 0..sectors {
            lines.vertices.extend([vertex(point(i, j)), vertex(point(i, j + 1))]);
        }
    }
    for j in 0..sectors {
        for i in 0..stacks {
            lines.vertices.extend([vertex(point(i, j)), vertex(point(i + 1, j))]);
        }
    }

    DomeGeometry { surface, lines }
}

/// Build the scan wedge: an apex fan over `slice` rim samples of `t ∈ [-1, 1]`.
///
/// Rim vertices are `(t, 0, 1)`; the apex is the origin. Normals are left at
/// zero and derived in the scan shader from the sweep axis.
pub fn build_scan_wedge(slice: u32) -> Mesh {
    let mut wedge = Mesh::triangles();
    let rim: Vec<f64> = arc_samples(-1.0, 1.0, slice.max(2)).collect();
    for pair in rim.windows(2) {
        wedge.vertices.extend([
            SensorVertex::new(DVec3::ZERO, DVec3::ZERO),
            SensorVertex::new(DVec3::new(pair[0], 0.0, 1.0), DVec3::ZERO),
            SensorVertex::new(DVec3::new(pair[1], 0.0, 1.0), DVec3::ZERO),
        ]);
    }
    wedge
}
