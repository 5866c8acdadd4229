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
//! Ray and sweep primitives
//!
//! Raycasts are analytic for spheres, boxes, planes and triangle soups
//! (Möller–Trumbore). Capsules and heightfields, and every sphere sweep, are
//! resolved by sphere tracing the geometry's signed distance.

use crate::native::{ActorHandle, NativeGeometry, ShapeHandle};
use crate::math::try_normalize;
use glam::Vec3;

const TRACE_ITERATIONS: usize = 128;
const TRACE_EPSILON: f32 = 1e-4;

/// World-space ray with a normalised direction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    /// Start point
    pub origin: Vec3,
    /// Unit direction
    pub direction: Vec3,
    /// Maximum hit distance
    pub max_distance: f32,
}

impl Ray {
    /// Build a ray, normalising `direction`
    ///
    /// Returns `None` for a zero or non-finite direction or a negative length.
    pub fn new(origin: Vec3, direction: Vec3, max_distance: f32) -> Option<Self> {
        if max_distance.is_nan() || max_distance < 0.0 || !origin.is_finite() {
            return None;
        }
        try_normalize(direction).map(|direction| Ray {
            origin,
            direction,
            max_distance,
        })
    }

    /// Point at distance `t`
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}

/// Scene query hit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaycastHit {
    /// Actor owning the shape that was hit
    pub actor: ActorHandle,
    /// Shape that was hit
    pub shape: ShapeHandle,
    /// World-space hit position
    pub position: Vec3,
    /// World-space surface normal facing the query
    pub normal: Vec3,
    /// Distance along the query direction
    pub distance: f32,
}

/// Hit in shape-local space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalHit {
    /// Distance along the query direction
    pub distance: f32,
    /// Local surface normal
    pub normal: Vec3,
}

/// Raycast one geometry in its local frame
///
/// A ray starting inside a solid shape reports a hit at distance 0.
pub fn raycast_geometry(geometry: &NativeGeometry, origin: Vec3, dir: Vec3, max: f32) -> Option<LocalHit> {
    match geometry {
        NativeGeometry::Sphere { radius } => ray_sphere(origin, dir, *radius, max),
        NativeGeometry::Box { half_extents } => ray_box(origin, dir, *half_extents, max),
        NativeGeometry::Plane { normal, distance } => ray_plane(origin, dir, *normal, *distance, max),
        NativeGeometry::TriangleMesh(data) | NativeGeometry::ConvexHull(data) => {
            let mut best: Option<LocalHit> = None;
            for i in 0..data.triangle_count() {
                let [a, b, c] = data.triangle(i);
                if let Some(t) = ray_triangle(origin, dir, a, b, c) {
                    if t <= max && best.map_or(true, |h| t < h.distance) {
                        let mut normal = (b - a).cross(c - a).normalize_or_zero();
                        if normal.dot(dir) > 0.0 {
                            normal = -normal;
                        }
                        best = Some(LocalHit { distance: t, normal });
                    }
                }
            }
            best
        }
        NativeGeometry::Capsule { .. } | NativeGeometry::HeightField(_) => {
            sphere_trace(geometry, origin, 0.0, dir, max)
        }
    }
}

/// Sweep a sphere through one geometry in its local frame
///
/// A sphere that starts overlapping reports a hit at distance 0 with the
/// depenetration normal.
pub fn sweep_sphere_geometry(
    geometry: &NativeGeometry,
    center: Vec3,
    radius: f32,
    dir: Vec3,
    max: f32,
) -> Option<LocalHit> {
    match geometry {
        NativeGeometry::Sphere { radius: r } => {
            if center.length() < r + radius {
                return Some(LocalHit {
                    distance: 0.0,
                    normal: center.try_normalize().unwrap_or(-dir),
                });
            }
            ray_sphere(center, dir, r + radius, max)
        }
        NativeGeometry::Plane { normal, distance } => {
            ray_plane(center, dir, *normal, distance + radius, max)
        }
        _ => sphere_trace(geometry, center, radius, dir, max),
    }
}

fn sphere_trace(geometry: &NativeGeometry, start: Vec3, radius: f32, dir: Vec3, max: f32) -> Option<LocalHit> {
    let mut t = 0.0;
    for _ in 0..TRACE_ITERATIONS {
        let p = start + dir * t;
        let d = geometry.signed_distance(p) - radius;
        if d < TRACE_EPSILON {
            return Some(LocalHit {
                distance: t,
                normal: geometry.normal_at(p),
            });
        }
        t += d;
        if t > max {
            return None;
        }
    }
    None
}

fn ray_sphere(origin: Vec3, dir: Vec3, radius: f32, max: f32) -> Option<LocalHit> {
    let b = origin.dot(dir);
    let c = origin.length_squared() - radius * radius;
    if c <= 0.0 {
        return Some(LocalHit {
            distance: 0.0,
            normal: -dir,
        });
    }
    if b > 0.0 {
        return None;
    }
    let disc = b * b - c;
    if disc < 0.0 {
        return None;
    }
    let t = -b - disc.sqrt();
    if t > max {
        return None;
    }
    Some(LocalHit {
        distance: t,
        normal: (origin + dir * t) / radius,
    })
}

fn ray_box(origin: Vec3, dir: Vec3, half: Vec3, max: f32) -> Option<LocalHit> {
    if origin.abs().cmple(half).all() {
        return Some(LocalHit {
            distance: 0.0,
            normal: -dir,
        });
    }
    let mut t_near = f32::MIN;
    let mut t_far = f32::MAX;
    let mut near_axis = 0;
    for axis in 0..3 {
        let o = origin[axis];
        let d = dir[axis];
        if d.abs() < 1e-12 {
            if o.abs() > half[axis] {
                return None;
            }
            continue;
        }
        let mut t0 = (-half[axis] - o) / d;
        let mut t1 = (half[axis] - o) / d;
        if t0 > t1 {
            std::mem::swap(&mut t0, &mut t1);
        }
        if t0 > t_near {
            t_near = t0;
            near_axis = axis;
        }
        t_far = t_far.min(t1);
        if t_near > t_far || t_far < 0.0 {
            return None;
        }
    }
    if t_near < 0.0 || t_near > max {
        return None;
    }
    let mut normal = Vec3::ZERO;
    normal[near_axis] = -dir[near_axis].signum();
    Some(LocalHit {
        distance: t_near,
        normal,
    })
}

fn ray_plane(origin: Vec3, dir: Vec3, normal: Vec3, distance: f32, max: f32) -> Option<LocalHit> {
    let height = normal.dot(origin) - distance;
    if height <= 0.0 {
        return Some(LocalHit {
            distance: 0.0,
            normal,
        });
    }
    let denom = normal.dot(dir);
    if denom >= 0.0 {
        return None;
    }
    let t = -height / denom;
    (t <= max).then_some(LocalHit { distance: t, normal })
}

/// Möller–Trumbore ray-triangle intersection, both faces
pub fn ray_triangle(origin: Vec3, dir: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Option<f32> {
    let e1 = b - a;
    let e2 = c - a;
    let p = dir.cross(e2);
    let det = e1.dot(p);
    if det.abs() < 1e-9 {
        return None;
    }
    let inv = 1.0 / det;
    let s = origin - a;
    let u = s.dot(p) * inv;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(e1);
    let v = dir.dot(q) * inv;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(q) * inv;
    (t >= 0.0).then_some(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::HeightFieldData;
    use glam::Vec2;

    #[test]
    fn test_ray_rejects_zero_direction() {
        assert!(Ray::new(Vec3::ZERO, Vec3::ZERO, 10.0).is_none());
        let ray = Ray::new(Vec3::ZERO, Vec3::new(0.0, 0.0, -5.0), 10.0).unwrap();
        assert_eq!(ray.direction, -Vec3::Z);
    }

    #[test]
    fn test_ray_sphere() {
        let sphere = NativeGeometry::Sphere { radius: 1.0 };
        let hit = raycast_geometry(&sphere, Vec3::new(0.0, 0.0, 5.0), -Vec3::Z, 10.0).unwrap();
        assert!((hit.distance - 4.0).abs() < 1e-5);
        assert!((hit.normal - Vec3::Z).length() < 1e-5);
        assert!(raycast_geometry(&sphere, Vec3::new(0.0, 0.0, 5.0), Vec3::Z, 10.0).is_none());
        assert!(raycast_geometry(&sphere, Vec3::new(0.0, 0.0, 5.0), -Vec3::Z, 3.0).is_none());
    }

    #[test]
    fn test_ray_box_reports_entry_face() {
        let geometry = NativeGeometry::Box { half_extents: Vec3::ONE };
        let hit = raycast_geometry(&geometry, Vec3::new(-5.0, 0.0, 0.0), Vec3::X, 10.0).unwrap();
        assert!((hit.distance - 4.0).abs() < 1e-5);
        assert_eq!(hit.normal, -Vec3::X);
    }

    #[test]
    fn test_ray_plane() {
        let plane = NativeGeometry::Plane { normal: Vec3::Z, distance: 0.0 };
        let hit = raycast_geometry(&plane, Vec3::new(1.0, 2.0, 3.0), -Vec3::Z, 10.0).unwrap();
        assert!((hit.distance - 3.0).abs() < 1e-6);
        assert!(raycast_geometry(&plane, Vec3::new(0.0, 0.0, 3.0), Vec3::X, 10.0).is_none());
    }

    #[test]
    fn test_ray_triangle_both_faces() {
        let (a, b, c) = (Vec3::new(-1.0, -1.0, 0.0), Vec3::new(1.0, -1.0, 0.0), Vec3::new(0.0, 1.0, 0.0));
        assert!((ray_triangle(Vec3::Z, -Vec3::Z, a, b, c).unwrap() - 1.0).abs() < 1e-6);
        assert!((ray_triangle(-Vec3::Z, Vec3::Z, a, b, c).unwrap() - 1.0).abs() < 1e-6);
        assert!(ray_triangle(Vec3::new(5.0, 0.0, 1.0), -Vec3::Z, a, b, c).is_none());
    }

    #[test]
    fn test_capsule_trace() {
        let capsule = NativeGeometry::Capsule { radius: 0.5, half_height: 1.0 };
        let hit = raycast_geometry(&capsule, Vec3::new(0.0, 0.0, 5.0), -Vec3::Z, 10.0).unwrap();
        assert!((hit.distance - 3.5).abs() < 1e-3);
    }

    #[test]
    fn test_heightfield_trace() {
        let data = HeightFieldData::new(2, vec![1.0; 4], Vec2::splat(20.0));
        let field = NativeGeometry::HeightField(data);
        let hit = raycast_geometry(&field, Vec3::new(0.0, 0.0, 5.0), -Vec3::Z, 10.0).unwrap();
        assert!((hit.distance - 4.0).abs() < 1e-2);
    }

    #[test]
    fn test_sphere_sweep_against_plane() {
        let plane = NativeGeometry::Plane { normal: Vec3::Z, distance: 0.0 };
        let hit = sweep_sphere_geometry(&plane, Vec3::new(0.0, 0.0, 2.0), 0.5, -Vec3::Z, 10.0).unwrap();
        assert!((hit.distance - 1.5).abs() < 1e-5);

        let overlap = sweep_sphere_geometry(&plane, Vec3::new(0.0, 0.0, 0.2), 0.5, Vec3::X, 1.0).unwrap();
        assert_eq!(overlap.distance, 0.0);
        assert_eq!(overlap.normal, Vec3::Z);
    }

    #[test]
    fn test_sphere_sweep_against_box() {
        let geometry = NativeGeometry::Box { half_extents: Vec3::ONE };
        let hit = sweep_sphere_geometry(&geometry, Vec3::new(-5.0, 0.0, 0.0), 0.5, Vec3::X, 10.0).unwrap();
        assert!((hit.distance - 3.5).abs() < 1e-3);
        assert!((hit.normal + Vec3::X).length() < 1e-2);
    }
}
