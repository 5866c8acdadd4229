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
//! Collision shapes
//!
//! [`ShapeDescriptor`] is the plain data describing one collision volume.
//! [`CollisionShapeComponent`] wraps it together with the native shape the
//! physics system creates for it. Setters only record values and schedule
//! the component; the system applies the change in its next quiescent
//! window.

use crate::archive::KeyedArchive;
use crate::components::binding::{NativeSlot, PhysicsBinding, UpdateLink};
use crate::ecs::{Component, LandscapeComponent, RenderGeometry};
use crate::error::{PhysicsError, Result};
use crate::math::Pose;
use crate::native::{FilterData, HeightFieldData, NativeGeometry, Shape, ShapeHandle, TriangleData};
use glam::{Quat, Vec3};

/// Type mask of shapes that do not set one
pub const DEFAULT_TYPE_MASK: u32 = 1;

/// Collide-with mask of shapes that do not set one
pub const DEFAULT_COLLIDE_WITH_MASK: u32 = u32::MAX;

/// Geometry variant of a collision shape
#[derive(Debug, Clone, PartialEq)]
pub enum ShapeGeometry {
    /// Box
    Box {
        /// Half extents
        half_size: Vec3,
    },
    /// Sphere
    Sphere {
        /// Radius
        radius: f32,
    },
    /// Capsule along local +Z
    Capsule {
        /// Cap radius
        radius: f32,
        /// Half length of the cylinder
        half_height: f32,
    },
    /// Infinite plane
    Plane {
        /// Unit normal
        normal: Vec3,
        /// Offset along the normal
        distance: f32,
    },
    /// Triangle mesh built from the entity's render geometry
    Mesh,
    /// Convex hull built from the entity's render geometry
    ConvexHull,
    /// Heightfield built from the entity's landscape
    HeightField,
}

impl ShapeGeometry {
    /// Short lowercase name
    pub fn kind(&self) -> &'static str {
        match self {
            ShapeGeometry::Box { .. } => "box",
            ShapeGeometry::Sphere { .. } => "sphere",
            ShapeGeometry::Capsule { .. } => "capsule",
            ShapeGeometry::Plane { .. } => "plane",
            ShapeGeometry::Mesh => "mesh",
            ShapeGeometry::ConvexHull => "convex-hull",
            ShapeGeometry::HeightField => "heightfield",
        }
    }

    /// Whether the native geometry is built from render data
    pub fn needs_render_data(&self) -> bool {
        matches!(
            self,
            ShapeGeometry::Mesh | ShapeGeometry::ConvexHull | ShapeGeometry::HeightField
        )
    }

    /// Shapes tagged as drivable ground when created
    pub fn is_drivable_ground(&self) -> bool {
        matches!(self, ShapeGeometry::Plane { .. } | ShapeGeometry::HeightField)
    }
}

/// Data-only description of a collision volume
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeDescriptor {
    /// Geometry
    pub geometry: ShapeGeometry,
    /// Offset from the owning entity
    pub local_position: Vec3,
    /// Rotation relative to the owning entity
    pub local_orientation: Quat,
    /// Scale applied to mesh and convex-hull geometry
    pub local_scale: Vec3,
    /// Material name
    pub material_name: String,
    /// Collision type bits of this shape
    pub type_mask: u32,
    /// Types this shape collides with
    pub collide_with_mask: u32,
    /// Report overlaps instead of colliding
    pub trigger: bool,
    /// Joint anchored on this shape, empty when none
    pub joint_name: String,
    /// Joint anchor offset
    pub joint_offset: Vec3,
    /// Use `mass` instead of the volume-derived mass
    pub override_mass: bool,
    /// Mass used when `override_mass` is set
    pub mass: f32,
}

impl ShapeDescriptor {
    /// Descriptor with default filtering and no offset
    pub fn new(geometry: ShapeGeometry) -> Self {
        ShapeDescriptor {
            geometry,
            local_position: Vec3::ZERO,
            local_orientation: Quat::IDENTITY,
            local_scale: Vec3::ONE,
            material_name: String::new(),
            type_mask: DEFAULT_TYPE_MASK,
            collide_with_mask: DEFAULT_COLLIDE_WITH_MASK,
            trigger: false,
            joint_name: String::new(),
            joint_offset: Vec3::ZERO,
            override_mass: false,
            mass: 1.0,
        }
    }

    /// Offset as a pose
    pub fn local_pose(&self) -> Pose {
        Pose::new(self.local_position, self.local_orientation)
    }
}

/// One collision volume and its native shape
#[derive(Debug)]
pub struct CollisionShapeComponent {
    desc: ShapeDescriptor,
    slot: NativeSlot<Shape>,
    geometry_changed: bool,
    surface: u32,
    ccd: bool,
    link: Option<UpdateLink>,
}

impl Component for CollisionShapeComponent {}

impl PhysicsBinding for CollisionShapeComponent {
    fn update_link(&self) -> Option<&UpdateLink> {
        self.link.as_ref()
    }

    fn set_update_link(&mut self, link: Option<UpdateLink>) {
        self.link = link;
    }
}

impl CollisionShapeComponent {
    /// Shape with default settings
    pub fn new(geometry: ShapeGeometry) -> Self {
        CollisionShapeComponent::from_descriptor(ShapeDescriptor::new(geometry))
    }

    /// Shape from a full descriptor
    pub fn from_descriptor(desc: ShapeDescriptor) -> Self {
        CollisionShapeComponent {
            desc,
            slot: NativeSlot::new(),
            geometry_changed: true,
            surface: 0,
            ccd: false,
            link: None,
        }
    }

    /// Box shape
    pub fn cuboid(half_size: Vec3) -> Self {
        CollisionShapeComponent::new(ShapeGeometry::Box { half_size })
    }

    /// Sphere shape
    pub fn sphere(radius: f32) -> Self {
        CollisionShapeComponent::new(ShapeGeometry::Sphere { radius })
    }

    /// Capsule shape
    pub fn capsule(radius: f32, half_height: f32) -> Self {
        CollisionShapeComponent::new(ShapeGeometry::Capsule { radius, half_height })
    }

    /// Plane shape
    pub fn plane(normal: Vec3, distance: f32) -> Self {
        CollisionShapeComponent::new(ShapeGeometry::Plane { normal, distance })
    }

    /// Full description
    pub fn descriptor(&self) -> &ShapeDescriptor {
        &self.desc
    }

    /// Geometry variant
    pub fn geometry(&self) -> &ShapeGeometry {
        &self.desc.geometry
    }

    /// Installed native shape, `None` until created or after creation failed
    pub fn native_shape(&self) -> Option<ShapeHandle> {
        self.slot.get()
    }

    /// Whether the native geometry must be rebuilt
    pub fn geometry_changed(&self) -> bool {
        self.geometry_changed
    }

    /// Replace the geometry; the native shape is rebuilt
    pub fn set_geometry(&mut self, geometry: ShapeGeometry) {
        self.desc.geometry = geometry;
        self.geometry_changed = true;
        self.schedule_update();
    }

    /// Offset from the owning entity
    pub fn local_position(&self) -> Vec3 {
        self.desc.local_position
    }

    /// Set the offset from the owning entity
    pub fn set_local_position(&mut self, position: Vec3) {
        self.desc.local_position = position;
        self.schedule_update();
    }

    /// Rotation relative to the owning entity
    pub fn local_orientation(&self) -> Quat {
        self.desc.local_orientation
    }

    /// Set the rotation relative to the owning entity
    pub fn set_local_orientation(&mut self, orientation: Quat) {
        self.desc.local_orientation = orientation;
        self.schedule_update();
    }

    /// Geometry scale
    pub fn local_scale(&self) -> Vec3 {
        self.desc.local_scale
    }

    /// Set the geometry scale; the native shape is rebuilt
    pub fn set_local_scale(&mut self, scale: Vec3) {
        self.desc.local_scale = scale;
        self.geometry_changed = true;
        self.schedule_update();
    }

    /// Type mask
    pub fn type_mask(&self) -> u32 {
        self.desc.type_mask
    }

    /// Set the type mask
    pub fn set_type_mask(&mut self, mask: u32) {
        self.desc.type_mask = mask;
        self.schedule_update();
    }

    /// Collide-with mask
    pub fn type_mask_to_collide_with(&self) -> u32 {
        self.desc.collide_with_mask
    }

    /// Set the collide-with mask
    pub fn set_type_mask_to_collide_with(&mut self, mask: u32) {
        self.desc.collide_with_mask = mask;
        self.schedule_update();
    }

    /// Whether the shape is a trigger
    pub fn is_trigger(&self) -> bool {
        self.desc.trigger
    }

    /// Switch trigger mode
    pub fn set_trigger_mode(&mut self, trigger: bool) {
        self.desc.trigger = trigger;
        self.schedule_update();
    }

    /// Material name
    pub fn material_name(&self) -> &str {
        &self.desc.material_name
    }

    /// Set the material name
    pub fn set_material_name(&mut self, name: impl Into<String>) {
        self.desc.material_name = name.into();
        self.schedule_update();
    }

    /// Whether the mass override is active
    pub fn is_mass_overridden(&self) -> bool {
        self.desc.override_mass
    }

    /// Enable or disable the mass override
    pub fn set_override_mass(&mut self, override_mass: bool) {
        self.desc.override_mass = override_mass;
        self.schedule_update();
    }

    /// Override mass
    pub fn mass(&self) -> f32 {
        self.desc.mass
    }

    /// Set the override mass
    pub fn set_mass(&mut self, mass: f32) {
        self.desc.mass = mass;
        self.schedule_update();
    }

    /// Joint anchored on this shape
    pub fn joint_name(&self) -> &str {
        &self.desc.joint_name
    }

    /// Set the joint anchored on this shape
    pub fn set_joint_name(&mut self, name: impl Into<String>) {
        self.desc.joint_name = name.into();
    }

    /// Joint anchor offset
    pub fn joint_offset(&self) -> Vec3 {
        self.desc.joint_offset
    }

    /// Set the joint anchor offset
    pub fn set_joint_offset(&mut self, offset: Vec3) {
        self.desc.joint_offset = offset;
    }

    /// Vehicle surface tag carried in the filter data
    pub fn surface(&self) -> u32 {
        self.surface
    }

    /// Whether continuous collision detection is on
    pub fn ccd_enabled(&self) -> bool {
        self.ccd
    }

    /// Mass contributed to the owning body
    pub fn effective_mass(&self, volume: f32) -> f32 {
        if self.desc.override_mass {
            self.desc.mass
        } else {
            volume
        }
    }

    /// Native filter words for the current masks and flags
    pub fn filter_data(&self) -> FilterData {
        FilterData::new(self.desc.type_mask, self.desc.collide_with_mask)
            .with_ccd(self.ccd)
            .with_surface(self.surface)
    }

    /// Build the native geometry
    ///
    /// Mesh and convex-hull shapes read `render`, heightfields read
    /// `landscape`; without them the result is [`PhysicsError::GeometryNotReady`].
    pub fn build_geometry(
        &self,
        scale: Vec3,
        render: Option<&RenderGeometry>,
        landscape: Option<&LandscapeComponent>,
    ) -> Result<NativeGeometry> {
        let geometry = match &self.desc.geometry {
            ShapeGeometry::Box { half_size } => NativeGeometry::Box {
                half_extents: *half_size,
            },
            ShapeGeometry::Sphere { radius } => NativeGeometry::Sphere { radius: *radius },
            ShapeGeometry::Capsule {
                radius,
                half_height,
            } => NativeGeometry::Capsule {
                radius: *radius,
                half_height: *half_height,
            },
            ShapeGeometry::Plane { normal, distance } => NativeGeometry::Plane {
                normal: crate::math::try_normalize(*normal).ok_or_else(|| {
                    PhysicsError::invalid_geometry("plane", "normal must be non-zero")
                })?,
                distance: *distance,
            },
            ShapeGeometry::Mesh | ShapeGeometry::ConvexHull => {
                let render = render.ok_or(PhysicsError::GeometryNotReady {
                    kind: self.desc.geometry.kind(),
                })?;
                let (vertices, indices) = render.merged();
                let data = TriangleData::new(vertices, indices, scale * self.desc.local_scale);
                if self.desc.geometry == ShapeGeometry::Mesh {
                    NativeGeometry::TriangleMesh(data)
                } else {
                    NativeGeometry::ConvexHull(data)
                }
            }
            ShapeGeometry::HeightField => {
                let landscape = landscape.ok_or(PhysicsError::GeometryNotReady { kind: "heightfield" })?;
                let heights = landscape
                    .heights
                    .iter()
                    .map(|h| h * landscape.height_scale)
                    .collect();
                NativeGeometry::HeightField(HeightFieldData::new(
                    landscape.resolution,
                    heights,
                    landscape.size,
                ))
            }
        };
        geometry.validate()?;
        Ok(geometry)
    }

    pub(crate) fn install_shape(&mut self, handle: ShapeHandle) -> Result<()> {
        self.slot.install(handle, "shape")
    }

    pub(crate) fn take_shape(&mut self) -> Option<ShapeHandle> {
        self.slot.take()
    }

    pub(crate) fn clear_geometry_changed(&mut self) {
        self.geometry_changed = false;
    }

    pub(crate) fn set_surface(&mut self, surface: u32) {
        if self.surface != surface {
            self.surface = surface;
            self.schedule_update();
        }
    }

    pub(crate) fn set_ccd(&mut self, ccd: bool) -> bool {
        let changed = self.ccd != ccd;
        self.ccd = ccd;
        changed
    }

    /// Write persisted fields into `archive`
    pub fn serialize(&self, archive: &mut KeyedArchive) {
        let d = &self.desc;
        archive.set_string("collisionShape.kind", d.geometry.kind().to_string());
        match &d.geometry {
            ShapeGeometry::Box { half_size } => archive.set_vector3("collisionShape.halfSize", *half_size),
            ShapeGeometry::Sphere { radius } => archive.set_f32("collisionShape.radius", *radius),
            ShapeGeometry::Capsule {
                radius,
                half_height,
            } => {
                archive.set_f32("collisionShape.radius", *radius);
                archive.set_f32("collisionShape.halfHeight", *half_height);
            }
            ShapeGeometry::Plane { normal, distance } => {
                archive.set_vector3("collisionShape.normal", *normal);
                archive.set_f32("collisionShape.distance", *distance);
            }
            ShapeGeometry::Mesh | ShapeGeometry::ConvexHull | ShapeGeometry::HeightField => {}
        }
        archive.set_vector3("collisionShape.localPosition", d.local_position);
        archive.set_quaternion("collisionShape.localOrientation", d.local_orientation);
        archive.set_vector3("collisionShape.localScale", d.local_scale);
        archive.set_string("collisionShape.material", d.material_name.clone());
        archive.set_u32("collisionShape.typeMask", d.type_mask);
        archive.set_u32("collisionShape.typeMaskToCollideWith", d.collide_with_mask);
        archive.set_bool("collisionShape.trigger", d.trigger);
        archive.set_string("collisionShape.jointName", d.joint_name.clone());
        archive.set_vector3("collisionShape.jointOffset", d.joint_offset);
        archive.set_bool("collisionShape.overrideMass", d.override_mass);
        archive.set_f32("collisionShape.mass", d.mass);
    }

    /// Rebuild a shape from `archive`; missing keys keep their defaults
    pub fn deserialize(archive: &KeyedArchive) -> Result<Self> {
        let kind = archive
            .try_string("collisionShape.kind")?
            .ok_or_else(|| PhysicsError::Archive {
                key: "collisionShape.kind".to_string(),
                reason: "missing".to_string(),
            })?;
        let geometry = match kind.as_str() {
            "box" => ShapeGeometry::Box {
                half_size: archive.try_vector3("collisionShape.halfSize")?.unwrap_or(Vec3::splat(0.5)),
            },
            "sphere" => ShapeGeometry::Sphere {
                radius: archive.try_f32("collisionShape.radius")?.unwrap_or(0.5),
            },
            "capsule" => ShapeGeometry::Capsule {
                radius: archive.try_f32("collisionShape.radius")?.unwrap_or(0.5),
                half_height: archive.try_f32("collisionShape.halfHeight")?.unwrap_or(0.5),
            },
            "plane" => ShapeGeometry::Plane {
                normal: archive.try_vector3("collisionShape.normal")?.unwrap_or(Vec3::Z),
                distance: archive.try_f32("collisionShape.distance")?.unwrap_or(0.0),
            },
            "mesh" => ShapeGeometry::Mesh,
            "convex-hull" => ShapeGeometry::ConvexHull,
            "heightfield" => ShapeGeometry::HeightField,
            other => {
                return Err(PhysicsError::Archive {
                    key: "collisionShape.kind".to_string(),
                    reason: format!("unknown shape kind `{}`", other),
                })
            }
        };

        let mut desc = ShapeDescriptor::new(geometry);
        if let Some(v) = archive.try_vector3("collisionShape.localPosition")? {
            desc.local_position = v;
        }
        if let Some(q) = archive.try_quaternion("collisionShape.localOrientation")? {
            desc.local_orientation = q;
        }
        if let Some(v) = archive.try_vector3("collisionShape.localScale")? {
            desc.local_scale = v;
        }
        if let Some(s) = archive.try_string("collisionShape.material")? {
            desc.material_name = s;
        }
        if let Some(m) = archive.try_u32("collisionShape.typeMask")? {
            desc.type_mask = m;
        }
        if let Some(m) = archive.try_u32("collisionShape.typeMaskToCollideWith")? {
            desc.collide_with_mask = m;
        }
        if let Some(t) = archive.try_bool("collisionShape.trigger")? {
            desc.trigger = t;
        }
        if let Some(s) = archive.try_string("collisionShape.jointName")? {
            desc.joint_name = s;
        }
        if let Some(v) = archive.try_vector3("collisionShape.jointOffset")? {
            desc.joint_offset = v;
        }
        if let Some(o) = archive.try_bool("collisionShape.overrideMass")? {
            desc.override_mass = o;
        }
        if let Some(m) = archive.try_f32("collisionShape.mass")? {
            desc.mass = m;
        }
        Ok(CollisionShapeComponent::from_descriptor(desc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::UpdateSink;
    use crate::ecs::ComponentId;
    use crate::ecs::PolygonGroup;
    use glam::Vec2;

    #[test]
    fn test_setters_schedule_once() {
        let sink = UpdateSink::new();
        let mut shape = CollisionShapeComponent::sphere(1.0);
        shape.set_type_mask(4);
        assert!(sink.is_empty());

        shape.set_update_link(Some(UpdateLink::new(ComponentId::new(9), sink.clone())));
        shape.set_type_mask(2);
        shape.set_type_mask_to_collide_with(6);
        shape.set_material_name("ice");
        shape.set_trigger_mode(true);
        assert_eq!(sink.drain(), vec![ComponentId::new(9)]);
        assert_eq!(shape.type_mask(), 2);
        assert_eq!(shape.material_name(), "ice");
    }

    #[test]
    fn test_filter_data_words() {
        let mut shape = CollisionShapeComponent::cuboid(Vec3::ONE);
        shape.set_type_mask(2);
        shape.set_type_mask_to_collide_with(5);
        shape.set_ccd(true);
        shape.set_surface(0xffff0000);
        let f = shape.filter_data();
        assert_eq!((f.word0, f.word1, f.word2, f.word3), (1, 2, 5, 0xffff0000));
    }

    #[test]
    fn test_degenerate_geometry_fails_to_build() {
        let shape = CollisionShapeComponent::sphere(0.0);
        let err = shape.build_geometry(Vec3::ONE, None, None).unwrap_err();
        assert!(matches!(err, PhysicsError::InvalidGeometry { kind: "sphere", .. }));
    }

    #[test]
    fn test_render_backed_geometry_waits() {
        let mesh = CollisionShapeComponent::new(ShapeGeometry::ConvexHull);
        let err = mesh.build_geometry(Vec3::ONE, None, None).unwrap_err();
        assert!(err.is_not_ready());

        let render = RenderGeometry::from_group(PolygonGroup::unit_cube());
        let built = mesh.build_geometry(Vec3::splat(2.0), Some(&render), None).unwrap();
        match built {
            NativeGeometry::ConvexHull(data) => assert_eq!(data.scale, Vec3::splat(2.0)),
            other => panic!("unexpected geometry {:?}", other),
        }

        let field = CollisionShapeComponent::new(ShapeGeometry::HeightField);
        let landscape = LandscapeComponent::flat(3, Vec2::splat(10.0), 5.0);
        assert!(field.build_geometry(Vec3::ONE, None, Some(&landscape)).is_ok());
    }

    #[test]
    fn test_double_install_keeps_first_handle() {
        use crate::native::HandleArena;
        let mut arena: HandleArena<Shape, ()> = HandleArena::new();
        let (a, b) = (arena.insert(()), arena.insert(()));
        let mut shape = CollisionShapeComponent::sphere(1.0);
        shape.install_shape(a).unwrap();
        assert!(shape.install_shape(b).is_err());
        assert_eq!(shape.native_shape(), Some(a));
    }

    #[test]
    fn test_archive_keys() {
        let mut shape = CollisionShapeComponent::capsule(0.25, 0.75);
        shape.set_local_position(Vec3::new(0.0, 1.0, 0.0));
        shape.set_override_mass(true);
        shape.set_mass(12.5);
        shape.set_joint_name("hinge");
        let mut archive = KeyedArchive::new();
        shape.serialize(&mut archive);

        assert_eq!(archive.get_string("collisionShape.kind", String::new()), "capsule");
        let restored = CollisionShapeComponent::deserialize(&archive).unwrap();
        assert_eq!(restored.descriptor(), shape.descriptor());
        assert!(restored.geometry_changed());
    }

    #[test]
    fn test_unknown_kind_is_an_archive_error() {
        let mut archive = KeyedArchive::new();
        archive.set_string("collisionShape.kind", "torus".to_string());
        let err = CollisionShapeComponent::deserialize(&archive).unwrap_err();
        assert!(matches!(err, PhysicsError::Archive { .. }));
    }
}
