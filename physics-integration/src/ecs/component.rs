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
//! Component storage
//!
//! Components are data containers attached to entities. Every attached
//! component gets a scene-unique [`ComponentId`], so an entity may carry
//! several components of the same type (a vehicle chassis plus its wheel
//! shapes, for example) and systems can refer to one of them precisely.

use crate::ecs::Entity;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;

/// Trait that all components must implement
pub trait Component: Any + Send + Sync {}

/// Scene-unique identifier of an attached component
///
/// Identifiers are never reused within a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(u64);

impl ComponentId {
    /// Create an id from its raw value
    pub fn new(raw: u64) -> Self {
        ComponentId(raw)
    }

    /// Raw value
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Component({})", self.0)
    }
}

/// Dense-by-id storage for one component type
///
/// Iteration order is ascending [`ComponentId`], i.e. attach order.
pub struct ComponentStorage<T: Component> {
    components: BTreeMap<ComponentId, (Entity, T)>,
}

impl<T: Component> ComponentStorage<T> {
    /// Create a new empty storage
    pub fn new() -> Self {
        ComponentStorage {
            components: BTreeMap::new(),
        }
    }

    /// Insert a component owned by `entity`
    pub fn insert(&mut self, id: ComponentId, entity: Entity, component: T) {
        self.components.insert(id, (entity, component));
    }

    /// Remove a component
    pub fn remove(&mut self, id: ComponentId) -> Option<(Entity, T)> {
        self.components.remove(&id)
    }

    /// Get a reference to a component
    pub fn get(&self, id: ComponentId) -> Option<&T> {
        self.components.get(&id).map(|(_, c)| c)
    }

    /// Get a mutable reference to a component
    pub fn get_mut(&mut self, id: ComponentId) -> Option<&mut T> {
        self.components.get_mut(&id).map(|(_, c)| c)
    }

    /// Owning entity of a component
    pub fn entity_of(&self, id: ComponentId) -> Option<Entity> {
        self.components.get(&id).map(|(e, _)| *e)
    }

    /// Check if the storage contains `id`
    pub fn contains(&self, id: ComponentId) -> bool {
        self.components.contains_key(&id)
    }

    /// Iterate `(id, entity, component)`
    pub fn iter(&self) -> impl Iterator<Item = (ComponentId, Entity, &T)> + '_ {
        self.components.iter().map(|(id, (e, c))| (*id, *e, c))
    }

    /// Iterate `(id, entity, component)` mutably
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ComponentId, Entity, &mut T)> + '_ {
        self.components.iter_mut().map(|(id, (e, c))| (*id, *e, c))
    }

    /// Ids of every stored component
    pub fn ids(&self) -> Vec<ComponentId> {
        self.components.keys().copied().collect()
    }

    /// Get the number of components stored
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Check if the storage is empty
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Clear all components
    pub fn clear(&mut self) {
        self.components.clear();
    }
}

impl<T: Component> Default for ComponentStorage<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Type-erased view of a [`ComponentStorage`]
pub(crate) trait ErasedStorage: Send + Sync {
    fn remove_boxed(&mut self, id: ComponentId) -> Option<Box<dyn Any + Send + Sync>>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Component> ErasedStorage for ComponentStorage<T> {
    fn remove_boxed(&mut self, id: ComponentId) -> Option<Box<dyn Any + Send + Sync>> {
        self.remove(id)
            .map(|(_, c)| Box::new(c) as Box<dyn Any + Send + Sync>)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
