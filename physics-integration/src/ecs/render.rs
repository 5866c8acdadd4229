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
//! Render-side data consumed by mesh-based collision shapes
//!
//! These components belong to the rendering layer. The physics system only
//! reads them: mesh and convex-hull shapes are cooked from
//! [`RenderGeometry`], heightfield shapes from [`LandscapeComponent`].

use crate::ecs::Component;
use glam::{Vec2, Vec3};

/// Indexed triangle list of one render batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolygonGroup {
    /// Vertex positions in entity-local space
    pub vertices: Vec<Vec3>,
    /// Triangle indices, three per triangle
    pub indices: Vec<u32>,
}

impl PolygonGroup {
    /// Create a polygon group
    pub fn new(vertices: Vec<Vec3>, indices: Vec<u32>) -> Self {
        PolygonGroup { vertices, indices }
    }

    /// Unit cube centred on the origin, twelve triangles
    pub fn unit_cube() -> Self {
        let h = 0.5;
        let vertices = vec![
            Vec3::new(-h, -h, -h),
            Vec3::new(h, -h, -h),
            Vec3::new(h, h, -h),
            Vec3::new(-h, h, -h),
            Vec3::new(-h, -h, h),
            Vec3::new(h, -h, h),
            Vec3::new(h, h, h),
            Vec3::new(-h, h, h),
        ];
        #[rustfmt::skip]
        let indices = vec![
            0, 2, 1, 0, 3, 2, // bottom
            4, 5, 6, 4, 6, 7, // top
            0, 1, 5, 0, 5, 4,
            1, 2, 6, 1, 6, 5,
            2, 3, 7, 2, 7, 6,
            3, 0, 4, 3, 4, 7,
        ];
        PolygonGroup { vertices, indices }
    }
}

/// Render geometry of an entity
#[derive(Debug, Clone, Default)]
pub struct RenderGeometry {
    /// Polygon groups of every render batch
    pub polygon_groups: Vec<PolygonGroup>,
}

impl RenderGeometry {
    /// Render geometry made of a single polygon group
    pub fn from_group(group: PolygonGroup) -> Self {
        RenderGeometry {
            polygon_groups: vec![group],
        }
    }

    /// All vertices and triangle indices merged into one list
    pub fn merged(&self) -> (Vec<Vec3>, Vec<u32>) {
        let mut vertices = Vec::new();
        let mut indices = Vec::new();
        for group in &self.polygon_groups {
            let base = vertices.len() as u32;
            vertices.extend_from_slice(&group.vertices);
            indices.extend(group.indices.iter().map(|i| base + i));
        }
        (vertices, indices)
    }
}

impl Component for RenderGeometry {}

/// Square heightmap terrain
///
/// Heights are normalised samples in `[0, 1]`, laid out row-major.
/// The terrain is centred on the entity origin in the XY plane.
#[derive(Debug, Clone)]
pub struct LandscapeComponent {
    /// Samples per side
    pub resolution: u32,
    /// Row-major normalised heights
    pub heights: Vec<f32>,
    /// Terrain extent along X and Y
    pub size: Vec2,
    /// World height of a sample equal to 1.0
    pub height_scale: f32,
}

impl LandscapeComponent {
    /// Flat landscape of the given resolution
    pub fn flat(resolution: u32, size: Vec2, height_scale: f32) -> Self {
        LandscapeComponent {
            resolution,
            heights: vec![0.0; (resolution * resolution) as usize],
            size,
            height_scale,
        }
    }
}

impl Component for LandscapeComponent {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merged_rebases_indices() {
        let geometry = RenderGeometry {
            polygon_groups: vec![PolygonGroup::unit_cube(), PolygonGroup::unit_cube()],
        };
        let (vertices, indices) = geometry.merged();
        assert_eq!(vertices.len(), 16);
        assert_eq!(indices.len(), 72);
        assert_eq!(*indices.iter().max().unwrap(), 15);
    }
}
