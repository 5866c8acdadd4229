// Copyright 2025 John Brosnihan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Native collision geometry
//!
//! Geometry is immutable once a shape is created; changing it means
//! releasing the shape and creating a new one. All queries here work in
//! shape-local space. Capsules and heightfields use +Z as their axis.

use crate::error::{PhysicsError, Result};
use glam::{Vec2, Vec3};
use std::f32::consts::PI;

/// Triangle soup used by meshes and convex hulls
#[derive(Debug, Clone, PartialEq)]
pub struct TriangleData {
    /// Unscaled vertices
    pub vertices: Vec<Vec3>,
    /// Three indices per triangle
    pub indices: Vec<u32>,
    /// Per-axis geometry scale
    pub scale: Vec3,
}

impl TriangleData {
    /// Create triangle data
    pub fn new(vertices: Vec<Vec3>, indices: Vec<u32>, scale: Vec3) -> Self {
        TriangleData {
            vertices,
            indices,
            scale,
        }
    }

    /// Number of triangles
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Scaled corners of triangle `i`
    pub fn triangle(&self, i: usize) -> [Vec3; 3] {
        let at = |k: usize| self.vertices[self.indices[i * 3 + k] as usize] * self.scale;
        [at(0), at(1), at(2)]
    }

    fn validate(&self, kind: &'static str) -> Result<()> {
        if self.vertices.is_empty() || self.indices.is_empty() {
            return Err(PhysicsError::invalid_geometry(kind, "mesh is empty"));
        }
        if self.indices.len() % 3 != 0 {
            return Err(PhysicsError::invalid_geometry(
                kind,
                "index count is not a multiple of 3",
            ));
        }
        if let Some(bad) = self.indices.iter().find(|i| **i as usize >= self.vertices.len()) {
            return Err(PhysicsError::invalid_geometry(
                kind,
                format!("index {} out of range", bad),
            ));
        }
        if !positive_finite(self.scale) {
            return Err(PhysicsError::invalid_geometry(kind, "scale must be positive"));
        }
        if self.vertices.iter().any(|v| !v.is_finite()) {
            return Err(PhysicsError::invalid_geometry(kind, "non-finite vertex"));
        }
        Ok(())
    }

    fn signed_volume(&self) -> f32 {
        (0..self.triangle_count())
            .map(|i| {
                let [a, b, c] = self.triangle(i);
                a.dot(b.cross(c)) / 6.0
            })
            .sum()
    }

    fn bounds(&self) -> (Vec3, Vec3) {
        self.vertices.iter().fold(
            (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)),
            |(lo, hi), v| {
                let s = *v * self.scale;
                (lo.min(s), hi.max(s))
            },
        )
    }

    fn signed_distance(&self, p: Vec3) -> f32 {
        let mut best = f32::INFINITY;
        let mut sign = 1.0;
        for i in 0..self.triangle_count() {
            let [a, b, c] = self.triangle(i);
            let closest = closest_point_on_triangle(p, a, b, c);
            let d = (p - closest).length_squared();
            if d < best {
                best = d;
                let n = (b - a).cross(c - a);
                sign = if (p - closest).dot(n) < 0.0 { -1.0 } else { 1.0 };
            }
        }
        sign * best.sqrt()
    }
}

/// Square grid of heights centred on the origin
#[derive(Debug, Clone, PartialEq)]
pub struct HeightFieldData {
    /// Samples per side
    pub resolution: u32,
    /// Row-major heights in world units; rows run along +Y
    pub heights: Vec<f32>,
    /// Extent along X and Y
    pub size: Vec2,
}

impl HeightFieldData {
    /// Create heightfield data
    pub fn new(resolution: u32, heights: Vec<f32>, size: Vec2) -> Self {
        HeightFieldData {
            resolution,
            heights,
            size,
        }
    }

    fn sample(&self, column: usize, row: usize) -> f32 {
        self.heights[row * self.resolution as usize + column]
    }

    /// Bilinear height under a local XY position, `None` outside the grid
    pub fn height_at(&self, x: f32, y: f32) -> Option<f32> {
        let half = self.size * 0.5;
        if x < -half.x || x > half.x || y < -half.y || y > half.y {
            return None;
        }
        let cells = (self.resolution - 1) as f32;
        let u = (x + half.x) / self.size.x * cells;
        let v = (y + half.y) / self.size.y * cells;
        let last = self.resolution as usize - 1;
        let c0 = (u.floor() as usize).min(last);
        let r0 = (v.floor() as usize).min(last);
        let c1 = (c0 + 1).min(last);
        let r1 = (r0 + 1).min(last);
        let fu = u - c0 as f32;
        let fv = v - r0 as f32;
        let low = self.sample(c0, r0) * (1.0 - fu) + self.sample(c1, r0) * fu;
        let high = self.sample(c0, r1) * (1.0 - fu) + self.sample(c1, r1) * fu;
        Some(low * (1.0 - fv) + high * fv)
    }

    fn height_range(&self) -> (f32, f32) {
        self.heights
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), h| (lo.min(*h), hi.max(*h)))
    }
}

/// Collision geometry of one native shape
#[derive(Debug, Clone, PartialEq)]
pub enum NativeGeometry {
    /// Axis-aligned box given by half extents
    Box {
        /// Half extents
        half_extents: Vec3,
    },
    /// Sphere
    Sphere {
        /// Radius
        radius: f32,
    },
    /// Capsule along local +Z
    Capsule {
        /// Radius of the end caps
        radius: f32,
        /// Half length of the cylindrical section
        half_height: f32,
    },
    /// Half-space `normal · p <= distance`
    Plane {
        /// Unit normal
        normal: Vec3,
        /// Offset along the normal
        distance: f32,
    },
    /// Arbitrary triangle mesh
    TriangleMesh(TriangleData),
    /// Closed convex triangle hull
    ConvexHull(TriangleData),
    /// Heightmap terrain
    HeightField(HeightFieldData),
}

fn positive_finite(v: Vec3) -> bool {
    v.is_finite() && v.min_element() > 0.0
}

impl NativeGeometry {
    /// Short geometry kind name used in errors and logs
    pub fn kind(&self) -> &'static str {
        match self {
            NativeGeometry::Box { .. } => "box",
            NativeGeometry::Sphere { .. } => "sphere",
            NativeGeometry::Capsule { .. } => "capsule",
            NativeGeometry::Plane { .. } => "plane",
            NativeGeometry::TriangleMesh(_) => "mesh",
            NativeGeometry::ConvexHull(_) => "convex hull",
            NativeGeometry::HeightField(_) => "heightfield",
        }
    }

    /// Reject degenerate descriptions
    pub fn validate(&self) -> Result<()> {
        let kind = self.kind();
        match self {
            NativeGeometry::Box { half_extents } => {
                if !positive_finite(*half_extents) {
                    return Err(PhysicsError::invalid_geometry(
                        kind,
                        "half extents must be positive",
                    ));
                }
            }
            NativeGeometry::Sphere { radius } => {
                if !(*radius > 0.0 && radius.is_finite()) {
                    return Err(PhysicsError::invalid_geometry(kind, "radius must be positive"));
                }
            }
            NativeGeometry::Capsule {
                radius,
                half_height,
            } => {
                if !(*radius > 0.0 && radius.is_finite()) {
                    return Err(PhysicsError::invalid_geometry(kind, "radius must be positive"));
                }
                if !(*half_height >= 0.0 && half_height.is_finite()) {
                    return Err(PhysicsError::invalid_geometry(
                        kind,
                        "half height must be non-negative",
                    ));
                }
            }
            NativeGeometry::Plane { normal, distance } => {
                if !distance.is_finite() || !normal.is_finite() || (normal.length() - 1.0).abs() > 1e-3 {
                    return Err(PhysicsError::invalid_geometry(kind, "normal must be unit length"));
                }
            }
            NativeGeometry::TriangleMesh(data) | NativeGeometry::ConvexHull(data) => {
                data.validate(kind)?;
            }
            NativeGeometry::HeightField(data) => {
                if data.resolution < 2 {
                    return Err(PhysicsError::invalid_geometry(
                        kind,
                        "resolution must be at least 2",
                    ));
                }
                let expected = (data.resolution * data.resolution) as usize;
                if data.heights.len() != expected {
                    return Err(PhysicsError::invalid_geometry(
                        kind,
                        format!("expected {} height samples, got {}", expected, data.heights.len()),
                    ));
                }
                if !(data.size.x > 0.0 && data.size.y > 0.0 && data.size.is_finite()) {
                    return Err(PhysicsError::invalid_geometry(kind, "size must be positive"));
                }
            }
        }
        Ok(())
    }

    /// Whether dynamic actors may carry this geometry
    pub fn supports_dynamic(&self) -> bool {
        !matches!(
            self,
            NativeGeometry::Plane { .. }
                | NativeGeometry::TriangleMesh(_)
                | NativeGeometry::HeightField(_)
        )
    }

    /// Enclosed volume, zero for unbounded or open geometry
    pub fn volume(&self) -> f32 {
        match self {
            NativeGeometry::Box { half_extents } => 8.0 * half_extents.x * half_extents.y * half_extents.z,
            NativeGeometry::Sphere { radius } => 4.0 / 3.0 * PI * radius.powi(3),
            NativeGeometry::Capsule {
                radius,
                half_height,
            } => PI * radius * radius * (2.0 * half_height) + 4.0 / 3.0 * PI * radius.powi(3),
            NativeGeometry::ConvexHull(data) => data.signed_volume().abs(),
            NativeGeometry::Plane { .. }
            | NativeGeometry::TriangleMesh(_)
            | NativeGeometry::HeightField(_) => 0.0,
        }
    }

    /// Diagonal inertia about the local origin for the given mass
    pub fn inertia(&self, mass: f32) -> Vec3 {
        match self {
            NativeGeometry::Sphere { radius } => Vec3::splat(0.4 * mass * radius * radius),
            NativeGeometry::Capsule {
                radius,
                half_height,
            } => {
                let h = 2.0 * half_height + 2.0 * radius;
                let axial = 0.5 * mass * radius * radius;
                let lateral = mass * (3.0 * radius * radius + h * h) / 12.0;
                Vec3::new(lateral, lateral, axial)
            }
            _ => match self.local_bounds() {
                Some((lo, hi)) => {
                    let full = hi - lo;
                    Vec3::new(
                        full.y * full.y + full.z * full.z,
                        full.x * full.x + full.z * full.z,
                        full.x * full.x + full.y * full.y,
                    ) * (mass / 12.0)
                }
                None => Vec3::ZERO,
            },
        }
    }

    /// Local axis-aligned bounds, `None` for planes
    pub fn local_bounds(&self) -> Option<(Vec3, Vec3)> {
        match self {
            NativeGeometry::Box { half_extents } => Some((-*half_extents, *half_extents)),
            NativeGeometry::Sphere { radius } => Some((Vec3::splat(-radius), Vec3::splat(*radius))),
            NativeGeometry::Capsule {
                radius,
                half_height,
            } => {
                let e = Vec3::new(*radius, *radius, radius + half_height);
                Some((-e, e))
            }
            NativeGeometry::Plane { .. } => None,
            NativeGeometry::TriangleMesh(data) | NativeGeometry::ConvexHull(data) => Some(data.bounds()),
            NativeGeometry::HeightField(data) => {
                let (lo, hi) = data.height_range();
                let half = data.size * 0.5;
                Some((Vec3::new(-half.x, -half.y, lo), Vec3::new(half.x, half.y, hi)))
            }
        }
    }

    /// Signed distance from a local point to the surface, negative inside
    ///
    /// Exact for primitive shapes; a conservative lower bound for
    /// heightfields.
    pub fn signed_distance(&self, p: Vec3) -> f32 {
        match self {
            NativeGeometry::Box { half_extents } => {
                let q = p.abs() - *half_extents;
                q.max(Vec3::ZERO).length() + q.max_element().min(0.0)
            }
            NativeGeometry::Sphere { radius } => p.length() - radius,
            NativeGeometry::Capsule {
                radius,
                half_height,
            } => {
                let z = p.z.clamp(-half_height, *half_height);
                (p - Vec3::new(0.0, 0.0, z)).length() - radius
            }
            NativeGeometry::Plane { normal, distance } => normal.dot(p) - distance,
            NativeGeometry::TriangleMesh(data) | NativeGeometry::ConvexHull(data) => {
                data.signed_distance(p)
            }
            NativeGeometry::HeightField(data) => {
                let half = data.size * 0.5;
                let dx = (p.x.abs() - half.x).max(0.0);
                let dy = (p.y.abs() - half.y).max(0.0);
                if dx > 0.0 || dy > 0.0 {
                    return (dx * dx + dy * dy).sqrt().max(1e-3);
                }
                match data.height_at(p.x, p.y) {
                    Some(h) => (p.z - h) * 0.5,
                    None => f32::INFINITY,
                }
            }
        }
    }

    /// Outward surface normal nearest to a local point
    pub fn normal_at(&self, p: Vec3) -> Vec3 {
        match self {
            NativeGeometry::Plane { normal, .. } => *normal,
            NativeGeometry::Sphere { .. } => p.try_normalize().unwrap_or(Vec3::Z),
            _ => {
                const H: f32 = 1e-3;
                let dx = self.signed_distance(p + Vec3::X * H) - self.signed_distance(p - Vec3::X * H);
                let dy = self.signed_distance(p + Vec3::Y * H) - self.signed_distance(p - Vec3::Y * H);
                let dz = self.signed_distance(p + Vec3::Z * H) - self.signed_distance(p - Vec3::Z * H);
                Vec3::new(dx, dy, dz).try_normalize().unwrap_or(Vec3::Z)
            }
        }
    }

    /// Points with radii whose union approximates the shape for contact tests
    pub fn contact_samples(&self) -> Vec<(Vec3, f32)> {
        match self {
            NativeGeometry::Sphere { radius } => vec![(Vec3::ZERO, *radius)],
            NativeGeometry::Capsule {
                radius,
                half_height,
            } => vec![
                (Vec3::new(0.0, 0.0, -half_height), *radius),
                (Vec3::ZERO, *radius),
                (Vec3::new(0.0, 0.0, *half_height), *radius),
            ],
            NativeGeometry::Box { half_extents } => {
                let h = *half_extents;
                let mut samples = Vec::with_capacity(9);
                for i in 0..8 {
                    let sign = Vec3::new(
                        if i & 1 == 0 { -1.0 } else { 1.0 },
                        if i & 2 == 0 { -1.0 } else { 1.0 },
                        if i & 4 == 0 { -1.0 } else { 1.0 },
                    );
                    samples.push((h * sign, 0.0));
                }
                samples.push((Vec3::ZERO, h.min_element()));
                samples
            }
            NativeGeometry::ConvexHull(data) => {
                let stride = (data.vertices.len() / 64).max(1);
                data.vertices
                    .iter()
                    .step_by(stride)
                    .map(|v| (*v * data.scale, 0.0))
                    .collect()
            }
            NativeGeometry::Plane { .. }
            | NativeGeometry::TriangleMesh(_)
            | NativeGeometry::HeightField(_) => Vec::new(),
        }
    }

    /// Local-space line segments outlining the shape
    pub fn wireframe(&self) -> Vec<(Vec3, Vec3)> {
        match self {
            NativeGeometry::Box { half_extents } => box_edges(-*half_extents, *half_extents),
            NativeGeometry::Sphere { radius } => {
                let mut lines = circle(Vec3::ZERO, Vec3::X, Vec3::Y, *radius);
                lines.extend(circle(Vec3::ZERO, Vec3::X, Vec3::Z, *radius));
                lines.extend(circle(Vec3::ZERO, Vec3::Y, Vec3::Z, *radius));
                lines
            }
            NativeGeometry::Capsule {
                radius,
                half_height,
            } => {
                let top = Vec3::new(0.0, 0.0, *half_height);
                let mut lines = circle(top, Vec3::X, Vec3::Y, *radius);
                lines.extend(circle(-top, Vec3::X, Vec3::Y, *radius));
                for dir in [Vec3::X, -Vec3::X, Vec3::Y, -Vec3::Y] {
                    lines.push((-top + dir * *radius, top + dir * *radius));
                }
                lines
            }
            NativeGeometry::Plane { normal, distance } => {
                let origin = *normal * *distance;
                let tangent = normal.any_orthonormal_vector();
                let bitangent = normal.cross(tangent);
                vec![
                    (origin - tangent * 10.0, origin + tangent * 10.0),
                    (origin - bitangent * 10.0, origin + bitangent * 10.0),
                    (origin, origin + *normal),
                ]
            }
            NativeGeometry::TriangleMesh(data) | NativeGeometry::ConvexHull(data) => {
                let mut lines = Vec::with_capacity(data.triangle_count() * 3);
                for i in 0..data.triangle_count() {
                    let [a, b, c] = data.triangle(i);
                    lines.push((a, b));
                    lines.push((b, c));
                    lines.push((c, a));
                }
                lines
            }
            NativeGeometry::HeightField(_) => self
                .local_bounds()
                .map(|(lo, hi)| box_edges(lo, hi))
                .unwrap_or_default(),
        }
    }
}

fn box_edges(lo: Vec3, hi: Vec3) -> Vec<(Vec3, Vec3)> {
    let corner = |i: usize| {
        Vec3::new(
            if i & 1 == 0 { lo.x } else { hi.x },
            if i & 2 == 0 { lo.y } else { hi.y },
            if i & 4 == 0 { lo.z } else { hi.z },
        )
    };
    let mut lines = Vec::with_capacity(12);
    for i in 0..8usize {
        for bit in [1usize, 2, 4] {
            if i & bit == 0 {
                lines.push((corner(i), corner(i | bit)));
            }
        }
    }
    lines
}

fn circle(center: Vec3, u: Vec3, v: Vec3, radius: f32) -> Vec<(Vec3, Vec3)> {
    const SEGMENTS: usize = 16;
    let point = |k: usize| {
        let a = k as f32 / SEGMENTS as f32 * 2.0 * PI;
        center + (u * a.cos() + v * a.sin()) * radius
    };
    (0..SEGMENTS).map(|k| (point(k), point(k + 1))).collect()
}

/// Closest point to `p` on triangle `abc`
pub fn closest_point_on_triangle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return a;
    }

    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return a + ab * v;
    }

    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return a + ac * w;
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return b + (c - b) * w;
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    a + ab * v + ac * w
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::PolygonGroup;

    fn cube_hull() -> NativeGeometry {
        let cube = PolygonGroup::unit_cube();
        NativeGeometry::ConvexHull(TriangleData::new(cube.vertices, cube.indices, Vec3::splat(2.0)))
    }

    #[test]
    fn test_degenerate_geometry_is_rejected() {
        assert!(NativeGeometry::Sphere { radius: 0.0 }.validate().is_err());
        assert!(NativeGeometry::Box { half_extents: Vec3::new(1.0, 0.0, 1.0) }.validate().is_err());
        assert!(NativeGeometry::Plane { normal: Vec3::ZERO, distance: 0.0 }.validate().is_err());
        assert!(NativeGeometry::TriangleMesh(TriangleData::new(vec![], vec![], Vec3::ONE))
            .validate()
            .is_err());
        assert!(NativeGeometry::HeightField(HeightFieldData::new(2, vec![0.0; 3], Vec2::ONE))
            .validate()
            .is_err());
        assert!(NativeGeometry::Capsule { radius: 0.5, half_height: 0.0 }.validate().is_ok());
    }

    #[test]
    fn test_error_names_the_kind() {
        let err = NativeGeometry::Sphere { radius: -1.0 }.validate().unwrap_err();
        assert_eq!(err.to_string(), "invalid sphere geometry: radius must be positive");
    }

    #[test]
    fn test_box_signed_distance() {
        let geometry = NativeGeometry::Box { half_extents: Vec3::ONE };
        assert!((geometry.signed_distance(Vec3::new(3.0, 0.0, 0.0)) - 2.0).abs() < 1e-6);
        assert!((geometry.signed_distance(Vec3::ZERO) + 1.0).abs() < 1e-6);
        let n = geometry.normal_at(Vec3::new(0.0, 0.0, 1.5));
        assert!((n - Vec3::Z).length() < 1e-3);
    }

    #[test]
    fn test_convex_hull_volume_and_sign() {
        let hull = cube_hull();
        assert!(hull.validate().is_ok());
        assert!((hull.volume() - 8.0).abs() < 1e-4);
        assert!(hull.signed_distance(Vec3::ZERO) < 0.0);
        assert!((hull.signed_distance(Vec3::new(0.0, 0.0, 2.0)) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_heightfield_bilinear() {
        let data = HeightFieldData::new(2, vec![0.0, 0.0, 2.0, 2.0], Vec2::splat(10.0));
        assert_eq!(data.height_at(0.0, -5.0), Some(0.0));
        assert_eq!(data.height_at(0.0, 5.0), Some(2.0));
        assert!((data.height_at(0.0, 0.0).unwrap() - 1.0).abs() < 1e-6);
        assert!(data.height_at(6.0, 0.0).is_none());
    }

    #[test]
    fn test_mass_properties() {
        let sphere = NativeGeometry::Sphere { radius: 1.0 };
        assert!((sphere.volume() - 4.0 / 3.0 * PI).abs() < 1e-5);
        assert!((sphere.inertia(10.0).x - 4.0).abs() < 1e-5);

        let unit = NativeGeometry::Box { half_extents: Vec3::splat(0.5) };
        assert!((unit.volume() - 1.0).abs() < 1e-6);
        assert!((unit.inertia(12.0).z - 2.0).abs() < 1e-5);
        assert_eq!(NativeGeometry::Plane { normal: Vec3::Z, distance: 0.0 }.volume(), 0.0);
    }

    #[test]
    fn test_closest_point_regions() {
        let a = Vec3::ZERO;
        let b = Vec3::X;
        let c = Vec3::Y;
        assert_eq!(closest_point_on_triangle(Vec3::new(-1.0, -1.0, 0.0), a, b, c), a);
        assert_eq!(closest_point_on_triangle(Vec3::new(0.25, 0.25, 3.0), a, b, c), Vec3::new(0.25, 0.25, 0.0));
    }

    #[test]
    fn test_box_wireframe_has_twelve_edges() {
        assert_eq!(NativeGeometry::Box { half_extents: Vec3::ONE }.wireframe().len(), 12);
    }
}
