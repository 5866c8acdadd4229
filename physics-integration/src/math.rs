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
//! Transform value type shared by the scene and the native world
//!
//! Thin wrapper over `glam` types. Conversions between scene and native
//! representations are plain value copies.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Default comparison tolerance for transform equality checks
pub const TRANSFORM_EPSILON: f32 = 1e-6;

/// Rigid pose: translation and rotation without scale
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// World or parent-relative position
    pub position: Vec3,
    /// Orientation
    pub rotation: Quat,
}

impl Pose {
    /// Identity pose at the origin
    pub const IDENTITY: Pose = Pose {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    /// Create a pose from position and rotation
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Pose { position, rotation }
    }

    /// Pose with identity rotation
    pub fn from_position(position: Vec3) -> Self {
        Pose::new(position, Quat::IDENTITY)
    }

    /// Transform a point from pose-local space into the parent space
    pub fn transform_point(&self, local: Vec3) -> Vec3 {
        self.position + self.rotation * local
    }

    /// Transform a direction from pose-local space into the parent space
    pub fn transform_vector(&self, local: Vec3) -> Vec3 {
        self.rotation * local
    }

    /// Map a parent-space point into pose-local space
    pub fn inverse_transform_point(&self, point: Vec3) -> Vec3 {
        self.rotation.inverse() * (point - self.position)
    }

    /// `self * local`
    pub fn compose(&self, local: &Pose) -> Pose {
        Pose {
            position: self.transform_point(local.position),
            rotation: (self.rotation * local.rotation).normalize(),
        }
    }

    /// Inverse rigid transform
    pub fn inverse(&self) -> Pose {
        let rotation = self.rotation.inverse();
        Pose {
            position: rotation * -self.position,
            rotation,
        }
    }

    /// Exact component-wise comparison (no tolerance)
    pub fn same_as(&self, other: &Pose) -> bool {
        self.position == other.position && self.rotation == other.rotation
    }
}

impl Default for Pose {
    fn default() -> Self {
        Pose::IDENTITY
    }
}

/// Entity transform: translation, rotation and non-uniform scale
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// Translation
    pub translation: Vec3,
    /// Rotation
    pub rotation: Quat,
    /// Scale
    pub scale: Vec3,
}

impl Transform {
    /// Identity transform
    pub const IDENTITY: Transform = Transform {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    /// Create a transform
    pub fn new(translation: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Transform {
            translation,
            rotation,
            scale,
        }
    }

    /// Transform with only a translation
    pub fn from_translation(translation: Vec3) -> Self {
        Transform {
            translation,
            ..Transform::IDENTITY
        }
    }

    /// Rigid part of the transform
    pub fn pose(&self) -> Pose {
        Pose::new(self.translation, self.rotation)
    }

    /// Same transform with translation and rotation replaced, keeping scale
    pub fn with_pose(&self, pose: Pose) -> Transform {
        Transform {
            translation: pose.position,
            rotation: pose.rotation,
            scale: self.scale,
        }
    }

    /// Parent-then-child composition
    pub fn mul_transform(&self, child: &Transform) -> Transform {
        Transform {
            translation: self.translation + self.rotation * (self.scale * child.translation),
            rotation: (self.rotation * child.rotation).normalize(),
            scale: self.scale * child.scale,
        }
    }

    /// Inverse of [`mul_transform`](Self::mul_transform): the child transform
    /// that yields `world` under `self`
    pub fn relative(&self, world: &Transform) -> Transform {
        let inv_rotation = self.rotation.inverse();
        Transform {
            translation: (inv_rotation * (world.translation - self.translation)) / self.scale,
            rotation: (inv_rotation * world.rotation).normalize(),
            scale: world.scale / self.scale,
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Transform::IDENTITY
    }
}

/// Component-wise `|a - b| <= eps` for vectors
pub fn vec3_approx_eq(a: Vec3, b: Vec3, eps: f32) -> bool {
    (a - b).abs().max_element() <= eps
}

/// Normalize a direction, returning `None` for degenerate input
pub fn try_normalize(v: Vec3) -> Option<Vec3> {
    let len_sq = v.length_squared();
    if len_sq > f32::EPSILON && len_sq.is_finite() {
        Some(v / len_sq.sqrt())
    } else {
        None
    }
}
