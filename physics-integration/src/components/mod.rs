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
//! Physics components attached to scene entities

pub mod binding;
pub mod body;
pub mod character;
pub mod collision;
pub mod shape;
pub mod update_queue;

pub(crate) use binding::PhysicsBinding;
pub use binding::{NativeSlot, UpdateLink};
pub use body::{body_shapes, BodyComponent, BodyType};
pub use character::{CharacterControllerComponent, ControllerShape, ControllerState, MovementMode};
pub use collision::{CollisionInfo, CollisionSingleComponent, TriggerInfo, MAX_CONTACT_POINTS};
pub use shape::{
    CollisionShapeComponent, ShapeDescriptor, ShapeGeometry, DEFAULT_COLLIDE_WITH_MASK,
    DEFAULT_TYPE_MASK,
};
pub use update_queue::{UpdateQueue, UpdateSink};
